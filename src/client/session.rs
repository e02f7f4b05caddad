// src/client/session.rs

//! The client facade: connects to the cluster, routes user calls into the
//! executor, and exposes topology, metadata and metrics handles.

use crate::client::statement::{Batch, BatchStatement, PreparedStatement, Statement};
use crate::config::{ClientConfig, ExecutionProfile, SslContext};
use crate::connection::connection::{Connection, ConnectionOptions};
use crate::connection::pool::PoolSizing;
use crate::core::cluster::control::{ControlConfig, ControlConnection};
use crate::core::cluster::host::HostRef;
use crate::core::cluster::metadata::Metadata;
use crate::core::cluster::registry::{HostRegistry, PoolingContext};
use crate::core::errors::ZirconError;
use crate::core::events::{ClusterEvent, EventBus};
use crate::core::execution::executor::{Executor, Workload};
use crate::core::execution::paging::{ResultSet, RowStream};
use crate::core::execution::prepared::PreparedCache;
use crate::core::metrics::MetricsRef;
use crate::core::policies::load_balancing::{
    DcAwareRoundRobinPolicy, LoadBalancingPolicy, QueryContext, RoundRobinPolicy, TokenAwarePolicy,
};
use crate::core::protocol::response::SchemaChangeTarget;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::net::lookup_host;
use tracing::{debug, info, warn};

struct SessionInner {
    config: ClientConfig,
    registry: Arc<HostRegistry>,
    metadata: Arc<Metadata>,
    event_bus: Arc<EventBus>,
    prepared: Arc<PreparedCache>,
    executor: Arc<Executor>,
    control: ControlConnection,
    default_profile: ExecutionProfile,
    keyspace: parking_lot::RwLock<Option<String>>,
    closed: AtomicBool,
}

/// A connected driver instance. Cheap to clone; all clones share the
/// topology view, the pools and the prepared cache.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Connects: resolves contact points, bootstraps the control connection,
    /// builds pools and starts the background listeners.
    pub async fn connect(config: ClientConfig) -> Result<Session, ZirconError> {
        config.validate()?;

        let contact_points = resolve_contact_points(&config.contact_points, config.port).await?;
        if contact_points.is_empty() {
            return Err(ZirconError::Config(
                "No contact point resolved to an address".into(),
            ));
        }

        let load_balancing = default_load_balancing(&config);
        let ssl = config
            .ssl
            .as_ref()
            .map(SslContext::from_options)
            .transpose()?
            .map(Arc::new);
        let connection_options = ConnectionOptions {
            connect_timeout: config.connect_timeout(),
            heartbeat_interval: config.heartbeat_interval(),
            auth_provider: config.auth_provider.clone(),
            ssl,
            max_streams: config.pooling.max_requests_per_connection,
        };

        let event_bus = Arc::new(EventBus::new());
        let registry = Arc::new(HostRegistry::new(event_bus.clone()));
        let metadata = Arc::new(Metadata::new());

        let control_config = ControlConfig {
            contact_points,
            max_protocol_version: config.max_protocol_version,
            connection_options: connection_options.clone(),
            status_up_delay: config.status_up_delay,
            metadata_sync_enabled: config.metadata_sync_enabled,
        };
        let (control, version) = ControlConnection::connect(
            control_config,
            registry.clone(),
            metadata.clone(),
            event_bus.clone(),
            config.policies.address_translator.clone(),
            load_balancing.clone(),
        )
        .await?;

        load_balancing.init(&registry.hosts());
        let pooling = PoolingContext {
            version,
            sizing: PoolSizing {
                core_connections_local: config.pooling.core_connections_per_host_local,
                core_connections_remote: config.pooling.core_connections_per_host_remote,
            },
            connection_options,
            reconnection_policy: config.policies.reconnection.clone(),
        };
        control.attach_pooling(pooling);

        let prepared = Arc::new(PreparedCache::new());
        let executor = Arc::new(Executor {
            registry: registry.clone(),
            metadata: metadata.clone(),
            prepared: prepared.clone(),
            load_balancing,
            retry_policy: config.policies.retry.clone(),
            speculative: config.policies.speculative_execution.clone(),
            timestamps: config.policies.timestamp_generator.clone(),
            metrics: config.metrics.clone(),
            version,
        });

        let default_profile = config.default_profile();
        let inner = Arc::new(SessionInner {
            config,
            registry,
            metadata,
            event_bus,
            prepared,
            executor,
            control,
            default_profile,
            keyspace: parking_lot::RwLock::new(None),
            closed: AtomicBool::new(false),
        });
        tokio::spawn(cluster_event_listener(inner.clone()));

        info!(
            "Session connected; {} host(s) known, protocol {}",
            inner.registry.hosts().len(),
            version
        );
        Ok(Session { inner })
    }

    /// Executes a statement. With bound values and `query.prepare` enabled
    /// (the default), the statement is transparently prepared and cached.
    pub async fn execute(
        &self,
        statement: impl Into<Statement>,
        profile: Option<&ExecutionProfile>,
    ) -> Result<ResultSet, ZirconError> {
        let statement = statement.into();
        self.ensure_open()?;

        let workload = self.workload_for(&statement).await?;
        let profile = self.profile_for(profile, statement.is_idempotent);
        self.run_to_result_set(workload, profile, None).await
    }

    /// Executes an already prepared statement.
    pub async fn execute_prepared(
        &self,
        prepared: &PreparedStatement,
        values: impl Into<crate::client::statement::QueryValues>,
        profile: Option<&ExecutionProfile>,
    ) -> Result<ResultSet, ZirconError> {
        self.ensure_open()?;
        let values = values.into().resolve(
            &prepared.entry.state().metadata,
            self.inner.config.encoding.use_undefined_as_unset,
        )?;
        let workload = Workload::Execute {
            entry: prepared.entry.clone(),
            values,
        };
        let profile = self.profile_for(profile, false);
        self.run_to_result_set(workload, profile, None).await
    }

    /// Executes a batch.
    pub async fn batch(
        &self,
        batch: &Batch,
        profile: Option<&ExecutionProfile>,
    ) -> Result<ResultSet, ZirconError> {
        self.ensure_open()?;
        if batch.is_empty() {
            return Err(ZirconError::InvalidQuery("Batch is empty".into()));
        }
        let mut entries = Vec::with_capacity(batch.len());
        for statement in &batch.statements {
            match statement {
                BatchStatement::Query { query, values } => {
                    let values = match values {
                        crate::client::statement::QueryValues::Named(_) => {
                            return Err(ZirconError::InvalidQuery(
                                "Named values in a batch require a prepared statement".into(),
                            ));
                        }
                        other => other
                            .resolve(&empty_metadata(), false)
                            .unwrap_or_default(),
                    };
                    entries.push(crate::core::protocol::request::BatchEntry::Query {
                        query: query.clone(),
                        values,
                        value_types: None,
                    });
                }
                BatchStatement::Prepared { statement, values } => {
                    let state = statement.entry.state();
                    let values = values.resolve(
                        &state.metadata,
                        self.inner.config.encoding.use_undefined_as_unset,
                    )?;
                    let value_types = state
                        .metadata
                        .columns
                        .iter()
                        .map(|c| c.data_type.clone())
                        .collect();
                    entries.push(crate::core::protocol::request::BatchEntry::Prepared {
                        id: state.id.clone(),
                        values,
                        value_types: Some(value_types),
                    });
                }
            }
        }
        let workload = Workload::Batch(crate::core::protocol::request::BatchRequest {
            kind: batch.kind,
            entries,
            consistency: None,
            serial_consistency: None,
            default_timestamp: None,
            keyspace: None,
        });
        let profile = self.profile_for(profile, batch.is_idempotent);
        self.run_to_result_set(workload, profile, None).await
    }

    /// Executes a statement and returns a lazy row stream that pages through
    /// the full result set on demand.
    pub async fn stream(
        &self,
        statement: impl Into<Statement>,
        profile: Option<&ExecutionProfile>,
    ) -> Result<RowStream, ZirconError> {
        let statement = statement.into();
        self.ensure_open()?;
        let workload = self.workload_for(&statement).await?;
        let profile = self.profile_for(profile, statement.is_idempotent);
        let keyspace = self.keyspace();

        let retry_counter = Arc::new(AtomicU32::new(0));
        let outcome = self
            .inner
            .executor
            .run(
                &workload,
                &profile,
                keyspace.as_deref(),
                None,
                retry_counter.clone(),
            )
            .await?;
        let first_page =
            ResultSet::from_outcome(outcome, &workload, self.inner.executor.version)?;
        Ok(RowStream::new(
            self.inner.executor.clone(),
            workload,
            profile,
            keyspace,
            first_page,
            retry_counter,
        ))
    }

    /// Fetches the page after `current`, or `None` at the end of the result.
    pub async fn next_page(
        &self,
        statement: impl Into<Statement>,
        current: &ResultSet,
        profile: Option<&ExecutionProfile>,
    ) -> Result<Option<ResultSet>, ZirconError> {
        let Some(cursor) = current.paging_state() else {
            return Ok(None);
        };
        let statement = statement.into();
        let workload = self.workload_for(&statement).await?;
        let profile = self.profile_for(profile, statement.is_idempotent);
        self.run_to_result_set(workload, profile, Some(cursor))
            .await
            .map(Some)
    }

    /// Prepares a statement, sharing in-flight preparations for the same
    /// query, and optionally fanning the PREPARE out to every host.
    pub async fn prepare(&self, query: impl Into<String>) -> Result<PreparedStatement, ZirconError> {
        self.ensure_open()?;
        let query = query.into();
        let keyspace = self.keyspace();
        let connection = self.any_connection().await?;
        let entry = self
            .inner
            .prepared
            .get_or_prepare(keyspace.as_deref(), &query, &connection)
            .await?;

        if self.inner.config.prepare_on_all_hosts {
            let inner = self.inner.clone();
            let entry_clone = entry.clone();
            let prepared_addr = connection.addr();
            tokio::spawn(async move {
                fanout_prepare(&inner, &entry_clone, prepared_addr).await;
            });
        }
        Ok(PreparedStatement { entry })
    }

    /// Binds the whole session (every pool) to a keyspace.
    pub async fn use_keyspace(&self, keyspace: &str) -> Result<(), ZirconError> {
        self.ensure_open()?;
        if !crate::connection::connection::is_valid_keyspace_name(keyspace) {
            return Err(ZirconError::InvalidKeyspaceName(keyspace.to_owned()));
        }
        self.execute(Statement::new(format!("USE \"{keyspace}\"")), None)
            .await?;
        for host in self.inner.registry.hosts() {
            if let Some(pool) = self.inner.registry.pool(host.address()) {
                if let Err(e) = pool.set_keyspace(keyspace).await {
                    warn!(
                        "Failed to bind pool for {} to keyspace {}: {}",
                        host.address(),
                        keyspace,
                        e
                    );
                }
            }
        }
        *self.inner.keyspace.write() = Some(keyspace.to_owned());
        Ok(())
    }

    /// Snapshot of the known hosts.
    pub fn hosts(&self) -> Vec<HostRef> {
        self.inner.registry.hosts()
    }

    /// The shared cluster metadata (schema catalog, ring, replicas).
    pub fn metadata(&self) -> Arc<Metadata> {
        self.inner.metadata.clone()
    }

    pub fn metrics(&self) -> MetricsRef {
        self.inner.executor.metrics.clone()
    }

    /// Subscribe to host / schema lifecycle events.
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ClusterEvent> {
        self.inner.event_bus.subscribe()
    }

    pub fn keyspace(&self) -> Option<String> {
        self.inner.keyspace.read().clone()
    }

    /// A named execution profile from the configuration.
    pub fn profile(&self, name: &str) -> Option<ExecutionProfile> {
        self.inner.config.profiles.get(name).cloned()
    }

    /// Shuts the driver down: stops the control connection and closes every
    /// pool. Calls after this fail with `ShuttingDown`.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Session shutting down");
        self.inner.control.shutdown();
        self.inner.registry.close_all();
    }

    // --- internals ---

    fn ensure_open(&self) -> Result<(), ZirconError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ZirconError::ShuttingDown);
        }
        Ok(())
    }

    fn profile_for(
        &self,
        profile: Option<&ExecutionProfile>,
        is_idempotent: bool,
    ) -> ExecutionProfile {
        let mut profile = profile.cloned().unwrap_or_else(|| self.inner.default_profile.clone());
        profile.is_idempotent |= is_idempotent;
        profile
    }

    /// Simple statements with values go through the prepared path when
    /// `query.prepare` is on: typed serialization and token routing both
    /// need the server's column metadata.
    async fn workload_for(&self, statement: &Statement) -> Result<Workload, ZirconError> {
        use crate::client::statement::QueryValues;
        match &statement.values {
            QueryValues::None => Ok(Workload::Query {
                query: statement.query.clone(),
                values: Vec::new(),
            }),
            QueryValues::Positional(values) if !self.inner.config.query.prepare => {
                Ok(Workload::Query {
                    query: statement.query.clone(),
                    values: values.clone(),
                })
            }
            values => {
                let prepared = self.prepare(statement.query.clone()).await?;
                let resolved = values.resolve(
                    &prepared.entry.state().metadata,
                    self.inner.config.encoding.use_undefined_as_unset,
                )?;
                Ok(Workload::Execute {
                    entry: prepared.entry,
                    values: resolved,
                })
            }
        }
    }

    async fn run_to_result_set(
        &self,
        workload: Workload,
        profile: ExecutionProfile,
        paging_state: Option<bytes::Bytes>,
    ) -> Result<ResultSet, ZirconError> {
        let keyspace = self.keyspace();
        let outcome = self
            .inner
            .executor
            .run(
                &workload,
                &profile,
                keyspace.as_deref(),
                paging_state,
                Arc::new(AtomicU32::new(0)),
            )
            .await?;
        ResultSet::from_outcome(outcome, &workload, self.inner.executor.version)
    }

    /// Borrows a connection from the first reachable host in a fresh plan.
    async fn any_connection(&self) -> Result<Connection, ZirconError> {
        let hosts = self.inner.registry.hosts();
        let mut plan = self
            .inner
            .executor
            .load_balancing
            .new_plan(&hosts, &QueryContext::default());
        let mut errors = HashMap::new();
        while let Some(host) = plan.next() {
            let Some(pool) = self.inner.registry.pool(host.address()) else {
                continue;
            };
            match pool.borrow().await {
                Ok(connection) => return Ok(connection),
                Err(e) => {
                    errors.insert(host.address(), e.to_string());
                }
            }
        }
        // Fall back to the control connection when no pool is usable yet
        // (e.g. prepare immediately after connect).
        if let Some(connection) = self.inner.control.connection() {
            if !connection.is_closed() {
                return Ok(connection);
            }
        }
        Err(ZirconError::NoHostAvailable { errors })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("hosts", &self.inner.registry.hosts().len())
            .field("keyspace", &self.keyspace())
            .field("closed", &self.inner.closed.load(Ordering::SeqCst))
            .finish()
    }
}

/// Default LBP: token-aware wrapping datacenter-aware round robin when a
/// local datacenter is configured, token-aware plain round robin otherwise.
fn default_load_balancing(config: &ClientConfig) -> Arc<dyn LoadBalancingPolicy> {
    if let Some(policy) = &config.policies.load_balancing {
        return policy.clone();
    }
    match &config.local_datacenter {
        Some(local_dc) => Arc::new(TokenAwarePolicy::new(DcAwareRoundRobinPolicy::new(
            local_dc.clone(),
        ))),
        None => Arc::new(TokenAwarePolicy::new(RoundRobinPolicy::new())),
    }
}

/// Resolves contact points: IP literals pass through, hostnames go through
/// DNS preferring IPv4 answers.
async fn resolve_contact_points(
    contact_points: &[String],
    default_port: u16,
) -> Result<Vec<SocketAddr>, ZirconError> {
    let mut resolved = Vec::with_capacity(contact_points.len());
    for point in contact_points {
        // Accept `host:port` or a bare `host` with the default port.
        let (host, port) = match point.rsplit_once(':') {
            Some((host, port)) if port.parse::<u16>().is_ok() && !host.contains(':') => {
                (host.to_owned(), port.parse::<u16>().expect("checked"))
            }
            _ => (point.clone(), default_port),
        };
        match lookup_host((host.as_str(), port)).await {
            Ok(addrs) => {
                // Prefer IPv4 answers; fall back to whatever came first.
                let addrs: Vec<SocketAddr> = addrs.collect();
                match addrs.iter().find(|a| a.is_ipv4()).or_else(|| addrs.first()) {
                    Some(addr) => resolved.push(*addr),
                    None => warn!("DNS returned no address for contact point {}", point),
                }
            }
            Err(e) => warn!("Failed to resolve contact point {}: {}", point, e),
        }
    }
    resolved.dedup();
    Ok(resolved)
}

fn empty_metadata() -> crate::core::protocol::response::PreparedMetadata {
    crate::core::protocol::response::PreparedMetadata {
        columns: Vec::new(),
        pk_indices: Vec::new(),
    }
}

/// Background listener keeping the prepared cache consistent with cluster
/// lifecycle: dead hosts forget their prepared state, schema changes
/// invalidate affected statements, and fresh hosts optionally receive every
/// cached PREPARE up front.
async fn cluster_event_listener(inner: Arc<SessionInner>) {
    let mut events = inner.event_bus.subscribe();
    loop {
        if inner.closed.load(Ordering::SeqCst) {
            return;
        }
        match events.recv().await {
            Ok(ClusterEvent::HostDown(addr)) | Ok(ClusterEvent::HostRemoved(addr)) => {
                inner.prepared.forget_host(addr);
            }
            Ok(ClusterEvent::HostAdded(addr)) => {
                if inner.config.prepare_on_all_hosts {
                    let inner = inner.clone();
                    tokio::spawn(async move {
                        prepare_all_on_host(&inner, addr).await;
                    });
                }
            }
            Ok(ClusterEvent::SchemaChanged(change)) => {
                if let SchemaChangeTarget::Keyspace { keyspace } = &change.target {
                    inner.prepared.invalidate_keyspace(keyspace);
                }
            }
            Ok(ClusterEvent::HostUp(_)) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("Session event listener lagged by {} events", skipped);
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Re-prepares every cached statement on one (new) host, best effort.
async fn prepare_all_on_host(inner: &SessionInner, addr: SocketAddr) {
    let Some(pool) = inner.registry.pool(addr) else {
        return;
    };
    let Ok(connection) = pool.borrow().await else {
        return;
    };
    for entry in inner.prepared.entries() {
        if entry.is_prepared_on(addr) {
            continue;
        }
        if let Err(e) = inner.prepared.reprepare_on(&entry, &connection).await {
            debug!("Eager prepare of {} on {} failed: {}", entry.fingerprint, addr, e);
        }
    }
}

/// Fans one statement's PREPARE out to every other host with a pool.
async fn fanout_prepare(
    inner: &SessionInner,
    entry: &Arc<crate::core::execution::prepared::PreparedEntry>,
    already_prepared: SocketAddr,
) {
    for host in inner.registry.hosts() {
        let addr = host.address();
        if addr == already_prepared || entry.is_prepared_on(addr) {
            continue;
        }
        let Some(pool) = inner.registry.pool(addr) else {
            continue;
        };
        let Ok(connection) = pool.borrow().await else {
            continue;
        };
        if let Err(e) = inner.prepared.reprepare_on(entry, &connection).await {
            debug!("Eager prepare on {} failed: {}", addr, e);
        }
    }
}
