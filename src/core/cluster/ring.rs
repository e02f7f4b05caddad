// src/core/cluster/ring.rs

//! The token ring and replica computation: a sorted sequence of
//! (token, primary host) pairs, walked clockwise to place replicas under
//! SimpleStrategy and NetworkTopologyStrategy.

use crate::core::cluster::host::HostRef;
use crate::core::cluster::token::{Token, Tokenizer};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

/// How a keyspace places its replicas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationStrategy {
    Simple {
        replication_factor: usize,
    },
    NetworkTopology {
        replication_factor_per_dc: HashMap<String, usize>,
    },
    /// `LocalStrategy` (system keyspaces): data lives on every node.
    Local,
    /// Unknown strategy class: replica placement falls back to the primary.
    Other {
        class: String,
    },
}

impl ReplicationStrategy {
    /// Builds a strategy from the class name and its options map, as found
    /// in the schema tables (any shape version).
    pub fn from_options(class: &str, options: &HashMap<String, String>) -> Self {
        if class.ends_with("SimpleStrategy") {
            let replication_factor = options
                .get("replication_factor")
                .and_then(|rf| rf.parse().ok())
                .unwrap_or(1);
            ReplicationStrategy::Simple { replication_factor }
        } else if class.ends_with("NetworkTopologyStrategy") {
            let replication_factor_per_dc = options
                .iter()
                .filter(|(key, _)| *key != "class" && *key != "replication_factor")
                .filter_map(|(dc, rf)| rf.parse().ok().map(|rf| (dc.clone(), rf)))
                .collect();
            ReplicationStrategy::NetworkTopology {
                replication_factor_per_dc,
            }
        } else if class.ends_with("LocalStrategy") {
            ReplicationStrategy::Local
        } else {
            ReplicationStrategy::Other {
                class: class.to_owned(),
            }
        }
    }
}

/// The sorted ring. Multiple entries per host are the norm with vnodes.
#[derive(Debug, Default)]
pub struct TokenRing {
    entries: Vec<(Token, HostRef)>,
}

impl TokenRing {
    /// Builds a ring from every host's token strings, parsed by the active
    /// tokenizer. Unparsable tokens are dropped with a warning rather than
    /// poisoning the whole ring.
    pub fn build(hosts: &[HostRef], tokenizer: &dyn Tokenizer) -> Self {
        let mut entries: Vec<(Token, HostRef)> = Vec::new();
        for host in hosts {
            for token_str in host.tokens() {
                match tokenizer.parse(&token_str) {
                    Ok(token) => entries.push((token, host.clone())),
                    Err(e) => {
                        warn!("Skipping token '{}' of host {}: {}", token_str, host, e);
                    }
                }
            }
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.dedup_by(|a, b| a.0 == b.0);
        TokenRing { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[(Token, HostRef)] {
        &self.entries
    }

    /// Index of the first entry at or after `token`, wrapping past the end.
    pub fn index_for(&self, token: &Token) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        let index = self
            .entries
            .partition_point(|(entry_token, _)| entry_token < token);
        Some(if index == self.entries.len() { 0 } else { index })
    }

    /// The host owning the range `token` falls into.
    pub fn primary(&self, token: &Token) -> Option<HostRef> {
        self.index_for(token)
            .map(|index| self.entries[index].1.clone())
    }
}

/// Replicas per ring position for one keyspace's strategy, precomputed when
/// the ring or the strategy changes.
#[derive(Debug)]
pub struct ReplicaMap {
    ring: Arc<TokenRing>,
    replicas: Vec<Vec<HostRef>>,
}

impl ReplicaMap {
    pub fn build(ring: Arc<TokenRing>, strategy: &ReplicationStrategy) -> Self {
        let replicas = match strategy {
            ReplicationStrategy::Simple { replication_factor } => {
                compute_simple(&ring, *replication_factor)
            }
            ReplicationStrategy::NetworkTopology {
                replication_factor_per_dc,
            } => compute_network_topology(&ring, replication_factor_per_dc),
            ReplicationStrategy::Local | ReplicationStrategy::Other { .. } => ring
                .entries()
                .iter()
                .map(|(_, host)| vec![host.clone()])
                .collect(),
        };
        ReplicaMap { ring, replicas }
    }

    /// The ordered replica set owning `token`.
    pub fn replicas_for(&self, token: &Token) -> &[HostRef] {
        match self.ring.index_for(token) {
            Some(index) => &self.replicas[index],
            None => &[],
        }
    }
}

/// SimpleStrategy: the next `rf` distinct hosts walking clockwise from the
/// primary.
fn compute_simple(ring: &TokenRing, replication_factor: usize) -> Vec<Vec<HostRef>> {
    let entries = ring.entries();
    let ring_len = entries.len();
    let mut result = Vec::with_capacity(ring_len);
    for start in 0..ring_len {
        let mut replicas: Vec<HostRef> = Vec::with_capacity(replication_factor);
        let mut seen: HashSet<SocketAddr> = HashSet::with_capacity(replication_factor);
        for offset in 0..ring_len {
            if replicas.len() == replication_factor {
                break;
            }
            let host = &entries[(start + offset) % ring_len].1;
            if seen.insert(host.address()) {
                replicas.push(host.clone());
            }
        }
        result.push(replicas);
    }
    result
}

/// NetworkTopologyStrategy. Walking clockwise from each position, a host is
/// accepted for its datacenter while the per-DC count is below rf, except
/// that a host on an already-seen rack is deferred until every distinct rack
/// of that DC is represented (all same-rack replicas placed after the
/// distinct-rack ones). The walk stops when every DC is satisfied or after
/// one full rotation, whichever comes first.
fn compute_network_topology(
    ring: &TokenRing,
    replication_factor_per_dc: &HashMap<String, usize>,
) -> Vec<Vec<HostRef>> {
    let entries = ring.entries();
    let ring_len = entries.len();

    // Distinct racks per datacenter, over all ring members.
    let mut racks_per_dc: HashMap<String, HashSet<Option<String>>> = HashMap::new();
    for (_, host) in entries {
        if let Some(dc) = host.datacenter() {
            racks_per_dc.entry(dc).or_default().insert(host.rack());
        }
    }

    let wanted: HashMap<&str, usize> = replication_factor_per_dc
        .iter()
        .filter(|(_, rf)| **rf > 0)
        .map(|(dc, rf)| (dc.as_str(), *rf))
        .collect();
    let total_wanted: usize = wanted.values().sum();

    let mut result = Vec::with_capacity(ring_len);
    for start in 0..ring_len {
        let mut replicas: Vec<HostRef> = Vec::with_capacity(total_wanted);
        let mut counts: HashMap<&str, usize> = HashMap::new();
        let mut racks_seen: HashMap<&str, HashSet<Option<String>>> = HashMap::new();
        let mut deferred: HashMap<&str, std::collections::VecDeque<HostRef>> = HashMap::new();
        let mut considered: HashSet<SocketAddr> = HashSet::new();
        let mut satisfied = 0usize;

        for offset in 0..ring_len {
            if satisfied == wanted.len() {
                break;
            }
            let host = &entries[(start + offset) % ring_len].1;
            if !considered.insert(host.address()) {
                continue;
            }
            let Some(dc) = host.datacenter() else {
                continue;
            };
            let Some((&dc_key, rf)) = wanted.get_key_value(dc.as_str()) else {
                continue;
            };
            let count = counts.entry(dc_key).or_insert(0);
            if *count >= *rf {
                continue;
            }

            let distinct_racks = racks_per_dc.get(&dc).map_or(1, |racks| racks.len());
            let rack_target = (*rf).min(distinct_racks);
            let seen = racks_seen.entry(dc_key).or_default();

            if seen.contains(&host.rack()) && seen.len() < rack_target {
                // Rack repeat before all racks are covered: goes to the tail.
                deferred.entry(dc_key).or_default().push_back(host.clone());
                continue;
            }

            seen.insert(host.rack());
            replicas.push(host.clone());
            *count += 1;

            // Once every rack is represented, drain the deferred repeats.
            if seen.len() >= rack_target {
                if let Some(waiting) = deferred.get_mut(dc_key) {
                    while *count < *rf {
                        match waiting.pop_front() {
                            Some(deferred_host) => {
                                replicas.push(deferred_host);
                                *count += 1;
                            }
                            None => break,
                        }
                    }
                }
            }
            if *count == *rf {
                satisfied += 1;
            }
        }
        result.push(replicas);
    }
    result
}
