// src/core/cluster/registry.rs

//! The host registry: every node the driver knows about, keyed by resolved
//! address, paired with its connection pool, with UP/DOWN lifecycle events
//! published on the cluster event bus.

use crate::connection::connection::ConnectionOptions;
use crate::connection::pool::{HostPool, PoolSizing};
use crate::core::cluster::host::{Host, HostDistance, HostRef, HostState};
use crate::core::errors::ZirconError;
use crate::core::events::{ClusterEvent, EventBus};
use crate::core::policies::load_balancing::LoadBalancingPolicy;
use crate::core::policies::reconnection::ReconnectionPolicy;
use crate::core::protocol::frame::ProtocolVersion;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything pools need at creation time, fixed after the control
/// connection negotiates the protocol version.
#[derive(Clone)]
pub struct PoolingContext {
    pub version: ProtocolVersion,
    pub sizing: PoolSizing,
    pub connection_options: ConnectionOptions,
    pub reconnection_policy: Arc<dyn ReconnectionPolicy>,
}

/// Registry of known hosts and their pools. The pairing keeps ownership a
/// single direction: registry → host, registry → pool.
pub struct HostRegistry {
    hosts: DashMap<SocketAddr, HostRef>,
    pools: DashMap<SocketAddr, HostPool>,
    event_bus: Arc<EventBus>,
}

impl HostRegistry {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            hosts: DashMap::new(),
            pools: DashMap::new(),
            event_bus,
        }
    }

    /// Adds a host if absent; returns the host and whether it was new.
    /// New hosts are announced on the bus.
    pub fn add_host(
        &self,
        address: SocketAddr,
        broadcast_address: SocketAddr,
        is_contact_point: bool,
    ) -> (HostRef, bool) {
        if let Some(existing) = self.hosts.get(&address) {
            return (existing.clone(), false);
        }
        let host: HostRef = Arc::new(Host::new(address, broadcast_address, is_contact_point));
        let added = self
            .hosts
            .insert(address, host.clone())
            .is_none();
        if added {
            info!("Discovered host {}", address);
            self.event_bus.publish(ClusterEvent::HostAdded(address));
        }
        (host, added)
    }

    /// Drops a host and closes its pool. Contact points are never removed.
    pub fn remove_host(&self, address: SocketAddr) -> bool {
        let Some(host) = self.host(address) else {
            return false;
        };
        if host.is_contact_point() {
            debug!("Not removing contact point {} despite absence from peers", address);
            return false;
        }
        self.hosts.remove(&address);
        if let Some((_, pool)) = self.pools.remove(&address) {
            pool.close();
        }
        info!("Removed host {}", address);
        self.event_bus.publish(ClusterEvent::HostRemoved(address));
        true
    }

    pub fn host(&self, address: SocketAddr) -> Option<HostRef> {
        self.hosts.get(&address).map(|entry| entry.clone())
    }

    /// Finds a host by the broadcast address the server reports in events.
    pub fn host_by_broadcast(&self, broadcast: SocketAddr) -> Option<HostRef> {
        self.hosts
            .iter()
            .find(|entry| {
                entry.value().broadcast_address() == broadcast
                    || entry.value().broadcast_address().ip() == broadcast.ip()
            })
            .map(|entry| entry.value().clone())
    }

    /// Snapshot of every known host.
    pub fn hosts(&self) -> Vec<HostRef> {
        self.hosts.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn pool(&self, address: SocketAddr) -> Option<HostPool> {
        self.pools.get(&address).map(|entry| entry.clone())
    }

    /// Creates (or returns) the pool for a host at the distance the load
    /// balancing policy assigned.
    pub fn ensure_pool(&self, address: SocketAddr, distance: HostDistance, ctx: &PoolingContext) -> HostPool {
        if let Some(pool) = self.pool(address) {
            pool.set_distance(distance);
            return pool;
        }
        let pool = HostPool::new(
            address,
            ctx.version,
            ctx.sizing,
            distance,
            ctx.connection_options.clone(),
            ctx.reconnection_policy.clone(),
        );
        self.pools.insert(address, pool.clone());
        pool
    }

    /// Re-applies the policy's distances to every host and pool.
    pub fn apply_distances(&self, policy: &dyn LoadBalancingPolicy, ctx: &PoolingContext) {
        for entry in self.hosts.iter() {
            let host = entry.value();
            let distance = policy.distance(host);
            self.ensure_pool(host.address(), distance, ctx);
        }
    }

    /// Marks a host DOWN immediately: state flips, its pool's connections
    /// are torn down (the pool itself stays, so reconnection can proceed),
    /// and the event goes out.
    pub fn mark_down(&self, address: SocketAddr) {
        let Some(host) = self.host(address) else {
            return;
        };
        let previous = host.set_state(HostState::Down);
        if previous == HostState::Down {
            return;
        }
        warn!("Host {} is DOWN", address);
        if let Some(pool) = self.pool(address) {
            pool.tear_down_connections();
        }
        self.event_bus.publish(ClusterEvent::HostDown(address));
    }

    /// Confirms a host UP. The caller must already have verified that the
    /// pool holds at least one live connection; only then is the event
    /// published externally.
    pub async fn mark_up(&self, address: SocketAddr) -> Result<(), ZirconError> {
        let Some(host) = self.host(address) else {
            return Err(ZirconError::Internal(format!(
                "mark_up for unknown host {address}"
            )));
        };
        let pool = self
            .pool(address)
            .ok_or(ZirconError::PoolUnavailable(address))?;
        pool.ensure_connected().await?;
        let previous = host.set_state(HostState::Up);
        if previous != HostState::Up {
            info!("Host {} is UP", address);
            self.event_bus.publish(ClusterEvent::HostUp(address));
        }
        Ok(())
    }

    /// Closes every pool (driver shutdown).
    pub fn close_all(&self) {
        for entry in self.pools.iter() {
            entry.value().close();
        }
        self.pools.clear();
    }
}

impl std::fmt::Debug for HostRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostRegistry")
            .field("hosts", &self.hosts.len())
            .field("pools", &self.pools.len())
            .finish()
    }
}
