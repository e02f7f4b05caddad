// src/core/execution/executor.rs

//! The request executor: drives one user operation across one or more
//! attempts, composing the load balancing plan, the retry policy,
//! speculative executions, UNPREPARED recovery and the metrics sink.

use crate::config::ExecutionProfile;
use crate::connection::connection::Connection;
use crate::core::cluster::host::HostState;
use crate::core::cluster::metadata::Metadata;
use crate::core::cluster::registry::HostRegistry;
use crate::core::errors::{DbError, ZirconError};
use crate::core::execution::prepared::{PreparedCache, PreparedEntry};
use crate::core::metrics::{MetricsEvent, MetricsRef, RequestLatency};
use crate::core::policies::load_balancing::{LoadBalancingPolicy, QueryContext, QueryPlan};
use crate::core::policies::retry::{self, RetryContext, RetryDecision, RetryPolicy};
use crate::core::policies::speculative::SpeculativeExecutionPolicy;
use crate::core::policies::timestamp::TimestampGenerator;
use crate::core::protocol::codec::serialize_routing_component;
use crate::core::protocol::consistency::Consistency;
use crate::core::protocol::frame::ProtocolVersion;
use crate::core::protocol::request::{BatchRequest, QueryParameters, Request};
use crate::core::protocol::response::{CqlResult, Response};
use crate::core::protocol::types::CqlValue;
use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// What one user operation asks the cluster to do.
#[derive(Debug, Clone)]
pub enum Workload {
    Query {
        query: String,
        values: Vec<CqlValue>,
    },
    Execute {
        entry: Arc<PreparedEntry>,
        values: Vec<CqlValue>,
    },
    Batch(BatchRequest),
}

impl Workload {
    fn query_text(&self) -> Option<&str> {
        match self {
            Workload::Query { query, .. } => Some(query),
            Workload::Execute { entry, .. } => Some(&entry.query),
            Workload::Batch(_) => None,
        }
    }
}

/// A finished request: the raw result plus attempt-level context.
#[derive(Debug)]
pub struct QueryOutcome {
    pub result: CqlResult,
    /// The host whose attempt produced the winning response (a speculative
    /// winner reports itself here).
    pub coordinator: SocketAddr,
    pub tracing_id: Option<Uuid>,
    pub warnings: Vec<String>,
}

/// Long-lived executor state, shared by every request of a session.
pub struct Executor {
    pub registry: Arc<HostRegistry>,
    pub metadata: Arc<Metadata>,
    pub prepared: Arc<PreparedCache>,
    pub load_balancing: Arc<dyn LoadBalancingPolicy>,
    pub retry_policy: Arc<dyn RetryPolicy>,
    pub speculative: Arc<dyn SpeculativeExecutionPolicy>,
    pub timestamps: Arc<dyn TimestampGenerator>,
    pub metrics: MetricsRef,
    pub version: ProtocolVersion,
}

/// Shared state of one request's executions: the plan they pull hosts from,
/// the per-host failures, and the retry budget (which paging deliberately
/// carries across pages instead of resetting).
struct RunShared {
    plan: Mutex<QueryPlan>,
    errors: Mutex<HashMap<SocketAddr, String>>,
    retry_counter: Arc<AtomicU32>,
}

enum ExecutionResult {
    /// Success or a terminal error; either ends the request.
    Done(Result<QueryOutcome, ZirconError>),
    /// This execution ran out of candidate hosts.
    PlanExhausted,
}

impl Executor {
    /// Runs one request to completion. `retry_counter` is shared across the
    /// pages of a paged request.
    pub async fn run(
        &self,
        workload: &Workload,
        profile: &ExecutionProfile,
        keyspace: Option<&str>,
        paging_state: Option<Bytes>,
        retry_counter: Arc<AtomicU32>,
    ) -> Result<QueryOutcome, ZirconError> {
        self.validate(workload)?;

        let routing_key = self.routing_key(workload)?;
        let replica_hint = match (&routing_key, keyspace) {
            (Some(key), Some(ks)) => self.metadata.replicas_for_routing_key(ks, key)?,
            _ => Vec::new(),
        };
        let ctx = QueryContext {
            keyspace: keyspace.map(str::to_owned),
            routing_key,
            replica_hint,
            preferred_host: None,
        };
        let load_balancing = profile
            .load_balancing
            .as_ref()
            .unwrap_or(&self.load_balancing);
        let hosts = self.registry.hosts();
        let plan = load_balancing.new_plan(&hosts, &ctx);

        let shared = Arc::new(RunShared {
            plan: Mutex::new(plan),
            errors: Mutex::new(HashMap::new()),
            retry_counter,
        });

        let speculative = profile.speculative.as_ref().unwrap_or(&self.speculative);
        let mut speculative_plan =
            speculative.new_plan(keyspace, workload.query_text());

        let mut executions = FuturesUnordered::new();
        executions.push(self.run_execution(
            workload,
            profile,
            shared.clone(),
            paging_state.clone(),
        ));
        let mut launched: u32 = 1;
        let mut next_speculative = speculative_plan.next_execution(0);

        loop {
            let speculative_timer = async {
                match next_speculative {
                    Some(delay) => tokio::time::sleep(delay).await,
                    // No (further) speculative executions: never fires.
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                _ = speculative_timer => {
                    self.metrics.on_event(MetricsEvent::SpeculativeExecution);
                    debug!("Launching speculative execution #{launched}");
                    executions.push(self.run_execution(
                        workload,
                        profile,
                        shared.clone(),
                        paging_state.clone(),
                    ));
                    launched += 1;
                    next_speculative = speculative_plan.next_execution(launched);
                }
                finished = executions.next() => {
                    match finished {
                        Some(ExecutionResult::Done(result)) => return result,
                        Some(ExecutionResult::PlanExhausted) => {
                            if executions.is_empty() {
                                // Nothing in flight and nothing left to try.
                                return Err(ZirconError::NoHostAvailable {
                                    errors: shared.errors.lock().clone(),
                                });
                            }
                        }
                        None => {
                            return Err(ZirconError::NoHostAvailable {
                                errors: shared.errors.lock().clone(),
                            });
                        }
                    }
                }
            }
        }
    }

    /// Local validation before anything touches the wire.
    fn validate(&self, workload: &Workload) -> Result<(), ZirconError> {
        if let Workload::Execute { entry, values } = workload {
            let expected = entry.state().metadata.columns.len();
            if values.len() != expected {
                return Err(ZirconError::WrongValueCount {
                    expected,
                    actual: values.len(),
                });
            }
        }
        Ok(())
    }

    /// Builds the partition routing key when the statement is prepared and
    /// the partition-key bind indices are known.
    fn routing_key(&self, workload: &Workload) -> Result<Option<Bytes>, ZirconError> {
        let Workload::Execute { entry, values } = workload else {
            return Ok(None);
        };
        let state = entry.state();
        if state.metadata.pk_indices.is_empty() {
            return Ok(None);
        }

        let mut components = Vec::with_capacity(state.metadata.pk_indices.len());
        for &index in &state.metadata.pk_indices {
            let value = values.get(index as usize);
            let spec = state.metadata.columns.get(index as usize);
            let (Some(value), Some(spec)) = (value, spec) else {
                return Ok(None);
            };
            match serialize_routing_component(value, &spec.data_type, self.version)? {
                Some(payload) => components.push(payload),
                // Null partition-key component: no token to route by.
                None => return Ok(None),
            }
        }

        if components.len() == 1 {
            return Ok(Some(components.into_iter().next().expect("len checked")));
        }
        // Composite keys: each component is length-prefixed and
        // NUL-terminated, the layout CompositeType hashes.
        let mut key = BytesMut::new();
        for component in components {
            let len: u16 = component.len().try_into().map_err(|_| {
                ZirconError::TypeError("Partition key component exceeds 64KiB".into())
            })?;
            key.put_u16(len);
            key.put_slice(&component);
            key.put_u8(0);
        }
        Ok(Some(key.freeze()))
    }

    /// One execution: pulls hosts off the shared plan until a terminal
    /// result or plan exhaustion.
    async fn run_execution(
        &self,
        workload: &Workload,
        profile: &ExecutionProfile,
        shared: Arc<RunShared>,
        paging_state: Option<Bytes>,
    ) -> ExecutionResult {
        let retry_policy = profile.retry_policy.as_ref().unwrap_or(&self.retry_policy);
        let mut consistency = profile.consistency;

        'hosts: loop {
            let Some(host) = shared.plan.lock().next() else {
                return ExecutionResult::PlanExhausted;
            };
            if host.state() == HostState::Down {
                continue;
            }
            let addr = host.address();
            let Some(pool) = self.registry.pool(addr) else {
                shared
                    .errors
                    .lock()
                    .insert(addr, ZirconError::PoolUnavailable(addr).to_string());
                continue;
            };
            let connection = match pool.borrow().await {
                Ok(connection) => connection,
                Err(e) => {
                    self.metrics.on_event(MetricsEvent::ConnectionError);
                    shared.errors.lock().insert(addr, e.to_string());
                    continue;
                }
            };

            // A prepared statement the host has never seen gets its PREPARE
            // up front, saving the guaranteed UNPREPARED round trip.
            if let Workload::Execute { entry, .. } = workload {
                if !entry.is_prepared_on(addr) {
                    if let Err(e) = self.prepared.reprepare_on(entry, &connection).await {
                        shared.errors.lock().insert(addr, e.to_string());
                        continue;
                    }
                }
            }

            // At most one UNPREPARED recovery per host.
            let mut reprepared = false;
            'attempts: loop {
                let request =
                    match self.build_request(workload, profile, consistency, &paging_state) {
                        Ok(request) => request,
                        // Local build errors are terminal, not per-host.
                        Err(e) => return ExecutionResult::Done(Err(e)),
                    };
                let started = Instant::now();
                let outcome = tokio::time::timeout(
                    profile.request_timeout,
                    connection.send_request(
                        &request,
                        profile.tracing,
                        profile.custom_payload.as_ref(),
                    ),
                )
                .await;

                let attempt_error = match outcome {
                    Err(_) => {
                        self.metrics.on_event(MetricsEvent::ClientTimeoutError);
                        ZirconError::RequestTimeout(profile.request_timeout)
                    }
                    Ok(Err(e)) => {
                        self.metrics.on_event(MetricsEvent::ConnectionError);
                        // Transport failures are fatal to the connection,
                        // not the request: move to the next host without
                        // consuming retry budget.
                        shared.errors.lock().insert(addr, e.to_string());
                        continue 'hosts;
                    }
                    Ok(Ok((response, extras))) => {
                        let latency = RequestLatency::from(started.elapsed());
                        self.metrics.on_response(latency);
                        match response {
                            Response::Result(result) => {
                                self.metrics.on_successful_response(latency);
                                return ExecutionResult::Done(Ok(QueryOutcome {
                                    result: *result,
                                    coordinator: addr,
                                    tracing_id: extras.tracing_id,
                                    warnings: extras.warnings,
                                }));
                            }
                            Response::Error { error, message } => {
                                if matches!(error, DbError::Unprepared { .. }) && !reprepared {
                                    // Re-prepare against this very host and
                                    // retry once, outside the retry budget.
                                    match self
                                        .recover_unprepared(workload, &connection, addr)
                                        .await
                                    {
                                        Ok(true) => {
                                            reprepared = true;
                                            continue 'attempts;
                                        }
                                        Ok(false) => {}
                                        Err(e) => {
                                            shared.errors.lock().insert(addr, e.to_string());
                                            continue 'hosts;
                                        }
                                    }
                                }
                                self.record_error_metrics(&error);
                                ZirconError::Db { error, message }
                            }
                            other => {
                                let e = ZirconError::Protocol(format!(
                                    "Unexpected response to request: {other:?}"
                                ));
                                shared.errors.lock().insert(addr, e.to_string());
                                continue 'hosts;
                            }
                        }
                    }
                };

                let retry_ctx = RetryContext {
                    consistency,
                    retry_count: shared.retry_counter.load(Ordering::SeqCst),
                    is_idempotent: profile.is_idempotent,
                    error: &attempt_error,
                };
                let decision = retry::decide(retry_policy.as_ref(), &retry_ctx);
                trace!(
                    "Attempt on {} failed ({}); decision {:?}",
                    addr, attempt_error, decision
                );
                match decision {
                    RetryDecision::RetrySame(cl) => {
                        self.record_retry_metrics(&attempt_error);
                        shared.retry_counter.fetch_add(1, Ordering::SeqCst);
                        consistency = cl;
                        continue 'attempts;
                    }
                    RetryDecision::RetryNext(cl) => {
                        self.record_retry_metrics(&attempt_error);
                        shared.retry_counter.fetch_add(1, Ordering::SeqCst);
                        consistency = cl;
                        shared.errors.lock().insert(addr, attempt_error.to_string());
                        continue 'hosts;
                    }
                    RetryDecision::Rethrow => {
                        return ExecutionResult::Done(Err(attempt_error));
                    }
                    RetryDecision::Ignore => {
                        self.metrics.on_event(MetricsEvent::IgnoreError);
                        return ExecutionResult::Done(Ok(QueryOutcome {
                            result: CqlResult::Void,
                            coordinator: addr,
                            tracing_id: None,
                            warnings: Vec::new(),
                        }));
                    }
                }
            }
        }
    }

    /// UNPREPARED recovery; returns whether a retry should happen.
    async fn recover_unprepared(
        &self,
        workload: &Workload,
        connection: &Connection,
        addr: SocketAddr,
    ) -> Result<bool, ZirconError> {
        let Workload::Execute { entry, .. } = workload else {
            // A batch of prepared statements can also race a restart, but
            // the entry that went stale is not identifiable from here.
            return Ok(false);
        };
        warn!(
            "Host {} reported statement {} unprepared; re-preparing",
            addr,
            hex::encode(entry.id())
        );
        entry.forget_host(addr);
        self.prepared.reprepare_on(entry, connection).await?;
        Ok(true)
    }

    fn build_request(
        &self,
        workload: &Workload,
        profile: &ExecutionProfile,
        consistency: Consistency,
        paging_state: &Option<Bytes>,
    ) -> Result<Request, ZirconError> {
        let timestamp = self
            .version
            .supports_per_query_timestamp()
            .then(|| self.timestamps.next());
        Ok(match workload {
            Workload::Query { query, values } => Request::Query {
                query: query.clone(),
                params: QueryParameters {
                    consistency: Some(consistency),
                    serial_consistency: profile.serial_consistency,
                    values: values.clone(),
                    value_types: None,
                    skip_metadata: false,
                    page_size: Some(profile.fetch_size),
                    paging_state: paging_state.clone(),
                    default_timestamp: timestamp,
                    keyspace: None,
                },
            },
            Workload::Execute { entry, values } => {
                let state = entry.state();
                let value_types = state
                    .metadata
                    .columns
                    .iter()
                    .map(|c| c.data_type.clone())
                    .collect();
                Request::Execute {
                    id: state.id.clone(),
                    result_metadata_id: state.result_metadata_id.clone(),
                    params: QueryParameters {
                        consistency: Some(consistency),
                        serial_consistency: profile.serial_consistency,
                        values: values.clone(),
                        value_types: Some(value_types),
                        // We hold the result metadata from PREPARE; spare
                        // the wire the repeated column specs.
                        skip_metadata: !state.result_metadata.columns.is_empty(),
                        page_size: Some(profile.fetch_size),
                        paging_state: paging_state.clone(),
                        default_timestamp: timestamp,
                        keyspace: None,
                    },
                }
            }
            Workload::Batch(batch) => {
                let mut batch = batch.clone();
                batch.consistency = Some(consistency);
                if batch.serial_consistency.is_none() {
                    batch.serial_consistency = profile.serial_consistency;
                }
                batch.default_timestamp = timestamp;
                Request::Batch(batch)
            }
        })
    }

    fn record_error_metrics(&self, error: &DbError) {
        let event = match error {
            DbError::ReadTimeout { .. } | DbError::ReadFailure { .. } => {
                MetricsEvent::ReadTimeoutError
            }
            DbError::WriteTimeout { .. } | DbError::WriteFailure { .. } => {
                MetricsEvent::WriteTimeoutError
            }
            DbError::Unavailable { .. } => MetricsEvent::UnavailableError,
            DbError::AuthenticationError => MetricsEvent::AuthenticationError,
            _ => MetricsEvent::OtherError,
        };
        self.metrics.on_event(event);
    }

    fn record_retry_metrics(&self, error: &ZirconError) {
        let event = match error {
            ZirconError::Db { error, .. } => match error {
                DbError::ReadTimeout { .. } | DbError::ReadFailure { .. } => {
                    MetricsEvent::ReadTimeoutRetry
                }
                DbError::WriteTimeout { .. } | DbError::WriteFailure { .. } => {
                    MetricsEvent::WriteTimeoutRetry
                }
                DbError::Unavailable { .. } => MetricsEvent::UnavailableRetry,
                _ => MetricsEvent::OtherErrorRetry,
            },
            ZirconError::RequestTimeout(_) => MetricsEvent::ClientTimeoutRetry,
            _ => MetricsEvent::OtherErrorRetry,
        };
        self.metrics.on_event(event);
    }
}

/// The column metadata to decode an outcome's rows with: the response's own
/// when present, the prepared statement's otherwise (skip-metadata case).
pub fn owned_response_columns(
    outcome: &QueryOutcome,
    workload: &Workload,
) -> Vec<crate::core::protocol::types::ColumnSpec> {
    if let CqlResult::Rows(raw) = &outcome.result {
        if !raw.metadata.columns.is_empty() {
            return raw.metadata.columns.clone();
        }
    }
    if let Workload::Execute { entry, .. } = workload {
        return entry.state().result_metadata.columns.clone();
    }
    Vec::new()
}
