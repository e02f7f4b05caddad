// src/core/execution/paging.rs

//! Result sets and lazy paging: a page of decoded rows with an opaque
//! continuation cursor, and a row stream that follows cursors on demand.

use crate::config::ExecutionProfile;
use crate::core::errors::ZirconError;
use crate::core::execution::executor::{Executor, QueryOutcome, Workload, owned_response_columns};
use crate::core::protocol::frame::ProtocolVersion;
use crate::core::protocol::response::{CqlResult, decode_row_values};
use crate::core::protocol::types::{ColumnSpec, Row};
use bytes::Bytes;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use uuid::Uuid;

/// One page of results, decoded. Non-row results decode to an empty page.
#[derive(Debug)]
pub struct ResultSet {
    pub columns: Vec<ColumnSpec>,
    pub rows: Vec<Row>,
    paging_state: Option<Bytes>,
    coordinator: SocketAddr,
    pub tracing_id: Option<Uuid>,
    pub warnings: Vec<String>,
}

impl ResultSet {
    pub fn from_outcome(
        outcome: QueryOutcome,
        workload: &Workload,
        version: ProtocolVersion,
    ) -> Result<Self, ZirconError> {
        let columns = owned_response_columns(&outcome, workload);
        let (rows, paging_state) = match &outcome.result {
            CqlResult::Rows(raw) => (
                decode_row_values(raw, &columns, version)?,
                raw.metadata.paging_state.clone(),
            ),
            _ => (Vec::new(), None),
        };
        Ok(ResultSet {
            columns,
            rows,
            paging_state,
            coordinator: outcome.coordinator,
            tracing_id: outcome.tracing_id,
            warnings: outcome.warnings,
        })
    }

    /// The host that answered this page (the speculative winner when
    /// speculative executions raced).
    pub fn coordinator(&self) -> SocketAddr {
        self.coordinator
    }

    /// Whether the server holds more rows beyond this page.
    pub fn has_more_pages(&self) -> bool {
        self.paging_state.is_some()
    }

    /// The cursor to pass to the next-page request.
    pub fn paging_state(&self) -> Option<Bytes> {
        self.paging_state.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Index of a column by name, case-sensitive.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// First cell of the first row under the given column name.
    pub fn first_value(&self, name: &str) -> Option<&crate::core::protocol::types::CqlValue> {
        let index = self.column_index(name)?;
        self.rows.first()?.get(index)?.as_ref()
    }
}

/// A lazy row sequence over a paged query. Rows are yielded from the current
/// page; the next page is fetched only when the current one is drained.
///
/// Paging reuses the originating statement (and its prepared id) with the
/// server cursor applied, and keeps the request's retry budget: exhausting
/// retries on page three is exhausting them for the whole stream.
pub struct RowStream {
    executor: Arc<Executor>,
    workload: Workload,
    profile: ExecutionProfile,
    keyspace: Option<String>,
    buffered: VecDeque<Row>,
    pub columns: Vec<ColumnSpec>,
    next_page: Option<Bytes>,
    exhausted: bool,
    retry_counter: Arc<AtomicU32>,
}

impl RowStream {
    pub(crate) fn new(
        executor: Arc<Executor>,
        workload: Workload,
        profile: ExecutionProfile,
        keyspace: Option<String>,
        first_page: ResultSet,
        retry_counter: Arc<AtomicU32>,
    ) -> Self {
        Self {
            executor,
            workload,
            profile,
            keyspace,
            columns: first_page.columns,
            next_page: first_page.paging_state,
            exhausted: false,
            buffered: first_page.rows.into(),
            retry_counter,
        }
    }

    /// The next row, fetching the next page when the buffer runs dry.
    /// `None` once the full result set is consumed.
    pub async fn next(&mut self) -> Option<Result<Row, ZirconError>> {
        loop {
            if let Some(row) = self.buffered.pop_front() {
                return Some(Ok(row));
            }
            if self.exhausted {
                return None;
            }
            let Some(cursor) = self.next_page.take() else {
                self.exhausted = true;
                return None;
            };
            match self.fetch_page(cursor).await {
                Ok(page) => {
                    self.next_page = page.paging_state();
                    if self.next_page.is_none() {
                        self.exhausted = true;
                    }
                    self.buffered = page.rows.into();
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
    }

    async fn fetch_page(&self, cursor: Bytes) -> Result<ResultSet, ZirconError> {
        let outcome = self
            .executor
            .run(
                &self.workload,
                &self.profile,
                self.keyspace.as_deref(),
                Some(cursor),
                self.retry_counter.clone(),
            )
            .await?;
        ResultSet::from_outcome(outcome, &self.workload, self.executor.version)
    }
}
