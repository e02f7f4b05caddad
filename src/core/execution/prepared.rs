// src/core/execution/prepared.rs

//! The prepared-statement cache: fingerprint → prepared metadata, with
//! per-host tracking of which nodes have seen the PREPARE, and single-flight
//! first-time preparation.

use crate::connection::connection::Connection;
use crate::core::errors::ZirconError;
use crate::core::protocol::request::Request;
use crate::core::protocol::response::{
    CqlResult, PreparedMetadata, Response, RowsMetadata,
};
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// Server-assigned state of a prepared statement. Replaced wholesale when a
/// re-prepare returns fresh metadata.
#[derive(Debug, Clone)]
pub struct PreparedState {
    pub id: Bytes,
    pub result_metadata_id: Option<Bytes>,
    pub metadata: PreparedMetadata,
    pub result_metadata: RowsMetadata,
}

/// One cached prepared statement, shared by every execution that uses it.
#[derive(Debug)]
pub struct PreparedEntry {
    pub query: String,
    /// Keyspace scope at prepare time; part of the fingerprint.
    pub keyspace: Option<String>,
    pub fingerprint: String,
    state: RwLock<PreparedState>,
    prepared_on: Mutex<HashSet<SocketAddr>>,
}

impl PreparedEntry {
    pub fn state(&self) -> PreparedState {
        self.state.read().clone()
    }

    pub fn id(&self) -> Bytes {
        self.state.read().id.clone()
    }

    pub fn update_state(&self, state: PreparedState) {
        *self.state.write() = state;
    }

    pub fn is_prepared_on(&self, addr: SocketAddr) -> bool {
        self.prepared_on.lock().contains(&addr)
    }

    pub fn mark_prepared_on(&self, addr: SocketAddr) {
        self.prepared_on.lock().insert(addr);
    }

    pub fn forget_host(&self, addr: SocketAddr) {
        self.prepared_on.lock().remove(&addr);
    }

    fn forget_all_hosts(&self) {
        self.prepared_on.lock().clear();
    }
}

/// The cache itself. Entries are never dropped during a session: prepared
/// statements are few and the metadata is small; schema changes only clear
/// the per-host tracking so execution re-prepares lazily.
#[derive(Debug, Default)]
pub struct PreparedCache {
    entries: DashMap<String, Arc<tokio::sync::OnceCell<Arc<PreparedEntry>>>>,
}

/// Fingerprint of (keyspace scope, query text).
pub fn fingerprint(keyspace: Option<&str>, query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(keyspace.unwrap_or_default().as_bytes());
    hasher.update([0u8]);
    hasher.update(query.as_bytes());
    hex::encode(hasher.finalize())
}

impl PreparedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fingerprint: &str) -> Option<Arc<PreparedEntry>> {
        self.entries
            .get(fingerprint)
            .and_then(|cell| cell.get().cloned())
    }

    /// Returns the cached entry, or prepares the statement on `connection`.
    /// Concurrent first-time callers for the same fingerprint share one
    /// in-flight PREPARE.
    pub async fn get_or_prepare(
        &self,
        keyspace: Option<&str>,
        query: &str,
        connection: &Connection,
    ) -> Result<Arc<PreparedEntry>, ZirconError> {
        let fp = fingerprint(keyspace, query);
        let cell = self
            .entries
            .entry(fp.clone())
            .or_insert_with(|| Arc::new(tokio::sync::OnceCell::new()))
            .clone();
        let entry = cell
            .get_or_try_init(|| async {
                let state = prepare_on(connection, query).await?;
                debug!(
                    "Prepared statement {} on {} ({} bind markers)",
                    hex::encode(&state.id),
                    connection.addr(),
                    state.metadata.columns.len()
                );
                let entry = Arc::new(PreparedEntry {
                    query: query.to_owned(),
                    keyspace: keyspace.map(str::to_owned),
                    fingerprint: fp.clone(),
                    state: RwLock::new(state),
                    prepared_on: Mutex::new(HashSet::new()),
                });
                entry.mark_prepared_on(connection.addr());
                Ok::<_, ZirconError>(entry)
            })
            .await?;
        Ok(entry.clone())
    }

    /// Re-prepares an entry against one specific host's connection, e.g.
    /// after an UNPREPARED error, and records the host.
    pub async fn reprepare_on(
        &self,
        entry: &PreparedEntry,
        connection: &Connection,
    ) -> Result<(), ZirconError> {
        let state = prepare_on(connection, &entry.query).await?;
        entry.update_state(state);
        entry.mark_prepared_on(connection.addr());
        Ok(())
    }

    /// Every cached entry, for eager fanout to new hosts.
    pub fn entries(&self) -> Vec<Arc<PreparedEntry>> {
        self.entries
            .iter()
            .filter_map(|cell| cell.value().get().cloned())
            .collect()
    }

    /// A host went away (or its connections did): its prepared state is
    /// unknown, so re-prepare lazily next time.
    pub fn forget_host(&self, addr: SocketAddr) {
        for entry in self.entries() {
            entry.forget_host(addr);
        }
    }

    /// Schema changed under a keyspace: statements scoped to it must be
    /// re-prepared before their next use on any host.
    pub fn invalidate_keyspace(&self, keyspace: &str) {
        for entry in self.entries() {
            if entry.keyspace.as_deref() == Some(keyspace) {
                entry.forget_all_hosts();
            }
        }
    }
}

/// Sends one PREPARE and converts the result.
async fn prepare_on(
    connection: &Connection,
    query: &str,
) -> Result<PreparedState, ZirconError> {
    let (response, _) = connection
        .send(&Request::Prepare {
            query: query.to_owned(),
        })
        .await?;
    match response {
        Response::Result(result) => match *result {
            CqlResult::Prepared(prepared) => Ok(PreparedState {
                id: prepared.id,
                result_metadata_id: prepared.result_metadata_id,
                metadata: prepared.metadata,
                result_metadata: prepared.result_metadata,
            }),
            other => Err(ZirconError::Protocol(format!(
                "Unexpected result for PREPARE: {other:?}"
            ))),
        },
        Response::Error { error, message } => Err(ZirconError::Db { error, message }),
        other => Err(ZirconError::Protocol(format!(
            "Unexpected response to PREPARE: {other:?}"
        ))),
    }
}
