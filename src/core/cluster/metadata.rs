// src/core/cluster/metadata.rs

//! The process-wide cluster metadata: the schema catalog, the partitioner
//! and its token ring, and per-keyspace replica maps. Written only by the
//! control connection; read-shared by everything else.

use crate::core::cluster::host::HostRef;
use crate::core::cluster::ring::{ReplicaMap, TokenRing};
use crate::core::cluster::schema::KeyspaceMetadata;
use crate::core::cluster::token::{Token, Tokenizer, tokenizer_for_partitioner};
use crate::core::errors::ZirconError;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Shared, mostly-read cluster metadata.
#[derive(Debug)]
pub struct Metadata {
    cluster_name: RwLock<Option<String>>,
    partitioner: RwLock<Option<String>>,
    tokenizer: RwLock<Option<Arc<dyn Tokenizer>>>,
    keyspaces: RwLock<HashMap<String, Arc<KeyspaceMetadata>>>,
    ring: RwLock<Arc<TokenRing>>,
    /// Replica maps are derived data: built on demand per keyspace and
    /// dropped whenever hosts, tokens or replication strategies change.
    replica_maps: RwLock<HashMap<String, Arc<ReplicaMap>>>,
    /// Bumped on every schema refresh; used by the single-flight guard to
    /// detect that a concurrent refresh already did the work.
    schema_epoch: AtomicU64,
    /// Per-keyspace refresh locks giving concurrent refreshes of the same
    /// keyspace a single in-flight fetch.
    refresh_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl Default for Metadata {
    fn default() -> Self {
        Self::new()
    }
}

impl Metadata {
    pub fn new() -> Self {
        Self {
            cluster_name: RwLock::new(None),
            partitioner: RwLock::new(None),
            tokenizer: RwLock::new(None),
            keyspaces: RwLock::new(HashMap::new()),
            ring: RwLock::new(Arc::new(TokenRing::default())),
            replica_maps: RwLock::new(HashMap::new()),
            schema_epoch: AtomicU64::new(0),
            refresh_locks: DashMap::new(),
        }
    }

    pub fn cluster_name(&self) -> Option<String> {
        self.cluster_name.read().clone()
    }

    pub fn set_cluster_name(&self, name: String) {
        *self.cluster_name.write() = Some(name);
    }

    pub fn partitioner(&self) -> Option<String> {
        self.partitioner.read().clone()
    }

    /// Records the partitioner and instantiates its tokenizer. An unknown
    /// partitioner disables token-aware routing but nothing else.
    pub fn set_partitioner(&self, partitioner: &str) {
        *self.partitioner.write() = Some(partitioner.to_owned());
        match tokenizer_for_partitioner(partitioner) {
            Ok(tokenizer) => *self.tokenizer.write() = Some(Arc::from(tokenizer)),
            Err(e) => {
                warn!("{e}");
                *self.tokenizer.write() = None;
            }
        }
    }

    pub fn tokenizer(&self) -> Option<Arc<dyn Tokenizer>> {
        self.tokenizer.read().clone()
    }

    /// Hashes a routing key under the active partitioner.
    pub fn token_for(&self, routing_key: &[u8]) -> Option<Token> {
        self.tokenizer().map(|t| t.hash(routing_key))
    }

    pub fn keyspace(&self, name: &str) -> Option<Arc<KeyspaceMetadata>> {
        self.keyspaces.read().get(name).cloned()
    }

    pub fn keyspace_names(&self) -> Vec<String> {
        self.keyspaces.read().keys().cloned().collect()
    }

    /// Installs or replaces one keyspace and invalidates its replica map.
    pub fn put_keyspace(&self, keyspace: KeyspaceMetadata) {
        let name = keyspace.name.clone();
        let strategy_changed = {
            let mut keyspaces = self.keyspaces.write();
            let strategy_changed = keyspaces
                .get(&name)
                .is_none_or(|existing| existing.strategy != keyspace.strategy);
            keyspaces.insert(name.clone(), Arc::new(keyspace));
            strategy_changed
        };
        if strategy_changed {
            self.replica_maps.write().remove(&name);
        }
        self.schema_epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub fn remove_keyspace(&self, name: &str) {
        self.keyspaces.write().remove(name);
        self.replica_maps.write().remove(name);
        self.schema_epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Replaces the whole catalog (control bootstrap).
    pub fn replace_keyspaces(&self, keyspaces: HashMap<String, KeyspaceMetadata>) {
        let mut guard = self.keyspaces.write();
        *guard = keyspaces
            .into_iter()
            .map(|(name, ks)| (name, Arc::new(ks)))
            .collect();
        drop(guard);
        self.replica_maps.write().clear();
        self.schema_epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub fn schema_epoch(&self) -> u64 {
        self.schema_epoch.load(Ordering::SeqCst)
    }

    /// The per-keyspace single-flight lock used by schema refreshes.
    pub fn refresh_lock(&self, keyspace: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.refresh_locks
            .entry(keyspace.to_owned())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Rebuilds the token ring from the current host set. Invalidates every
    /// replica map: they all embed ring positions.
    pub fn rebuild_ring(&self, hosts: &[HostRef]) {
        let Some(tokenizer) = self.tokenizer() else {
            return;
        };
        let ring = Arc::new(TokenRing::build(hosts, tokenizer.as_ref()));
        debug!("Token ring rebuilt with {} positions", ring.len());
        *self.ring.write() = ring;
        self.replica_maps.write().clear();
    }

    pub fn ring(&self) -> Arc<TokenRing> {
        self.ring.read().clone()
    }

    /// Drops all derived replica maps (host add/remove without token data).
    pub fn invalidate_replica_maps(&self) {
        self.replica_maps.write().clear();
    }

    /// The ordered replica set for a token in a keyspace. Builds and caches
    /// the keyspace's replica map on first use.
    pub fn replicas(&self, keyspace: &str, token: &Token) -> Vec<HostRef> {
        if let Some(map) = self.replica_maps.read().get(keyspace) {
            return map.replicas_for(token).to_vec();
        }
        let Some(keyspace_meta) = self.keyspace(keyspace) else {
            // Unknown keyspace: fall back to the primary.
            return self
                .ring()
                .primary(token)
                .map(|h| vec![h])
                .unwrap_or_default();
        };
        let map = Arc::new(ReplicaMap::build(self.ring(), &keyspace_meta.strategy));
        let replicas = map.replicas_for(token).to_vec();
        self.replica_maps
            .write()
            .insert(keyspace.to_owned(), map);
        replicas
    }
}

impl Metadata {
    /// Test-and-build hook used by token-aware routing: replicas for a
    /// routing key, empty when the partitioner is unknown.
    pub fn replicas_for_routing_key(
        &self,
        keyspace: &str,
        routing_key: &[u8],
    ) -> Result<Vec<HostRef>, ZirconError> {
        match self.token_for(routing_key) {
            Some(token) => Ok(self.replicas(keyspace, &token)),
            None => Ok(Vec::new()),
        }
    }
}
