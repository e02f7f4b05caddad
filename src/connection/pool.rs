// src/connection/pool.rs

//! The per-host connection pool: a bounded set of multiplexed connections
//! sized by the host's distance, with lazy creation and policy-driven
//! replacement of failed connections.

use crate::connection::connection::{Connection, ConnectionOptions};
use crate::core::cluster::host::HostDistance;
use crate::core::errors::ZirconError;
use crate::core::policies::reconnection::ReconnectionPolicy;
use crate::core::protocol::frame::ProtocolVersion;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

/// Pool sizing by distance.
#[derive(Debug, Clone, Copy)]
pub struct PoolSizing {
    pub core_connections_local: usize,
    pub core_connections_remote: usize,
}

impl Default for PoolSizing {
    fn default() -> Self {
        Self {
            core_connections_local: 2,
            core_connections_remote: 1,
        }
    }
}

impl PoolSizing {
    pub fn target(&self, distance: HostDistance) -> usize {
        match distance {
            HostDistance::Local => self.core_connections_local,
            HostDistance::Remote => self.core_connections_remote,
            HostDistance::Ignored => 0,
        }
    }
}

struct PoolInner {
    addr: SocketAddr,
    version: ProtocolVersion,
    sizing: PoolSizing,
    connection_options: ConnectionOptions,
    reconnection_policy: Arc<dyn ReconnectionPolicy>,
    connections: Mutex<Vec<Connection>>,
    /// Keyspace every pooled connection must be bound to.
    keyspace: Mutex<Option<String>>,
    distance: AtomicU8,
    closed: AtomicBool,
    refill: Notify,
}

impl PoolInner {
    fn distance(&self) -> HostDistance {
        match self.distance.load(Ordering::SeqCst) {
            0 => HostDistance::Local,
            1 => HostDistance::Remote,
            _ => HostDistance::Ignored,
        }
    }

    fn target_size(&self) -> usize {
        self.sizing.target(self.distance())
    }

    /// Drops closed connections and reports (live count, target).
    fn prune(&self) -> (usize, usize) {
        let mut connections = self.connections.lock();
        let before = connections.len();
        connections.retain(|c| !c.is_closed());
        let live = connections.len();
        if live < before {
            trace!(
                "Pool for {} pruned {} dead connection(s)",
                self.addr,
                before - live
            );
        }
        (live, self.target_size())
    }
}

/// A handle to the pool for one host. Clones share state.
#[derive(Clone)]
pub struct HostPool {
    inner: Arc<PoolInner>,
}

impl HostPool {
    pub fn new(
        addr: SocketAddr,
        version: ProtocolVersion,
        sizing: PoolSizing,
        distance: HostDistance,
        connection_options: ConnectionOptions,
        reconnection_policy: Arc<dyn ReconnectionPolicy>,
    ) -> Self {
        let inner = Arc::new(PoolInner {
            addr,
            version,
            sizing,
            connection_options,
            reconnection_policy,
            connections: Mutex::new(Vec::new()),
            keyspace: Mutex::new(None),
            distance: AtomicU8::new(distance_code(distance)),
            closed: AtomicBool::new(false),
            refill: Notify::new(),
        });
        tokio::spawn(replenish_loop(inner.clone()));
        HostPool { inner }
    }

    pub fn addr(&self) -> SocketAddr {
        self.inner.addr
    }

    pub fn distance(&self) -> HostDistance {
        self.inner.distance()
    }

    /// Re-targets the pool when the load balancing policy moves the host to
    /// a different distance. Shrinking closes surplus connections.
    pub fn set_distance(&self, distance: HostDistance) {
        self.inner
            .distance
            .store(distance_code(distance), Ordering::SeqCst);
        let target = self.inner.target_size();
        {
            let mut connections = self.inner.connections.lock();
            while connections.len() > target {
                if let Some(connection) = connections.pop() {
                    connection.close();
                }
            }
        }
        self.inner.refill.notify_one();
    }

    /// Current live connection count, observable before borrowing.
    pub fn size(&self) -> usize {
        self.inner.prune().0
    }

    pub fn in_flight(&self) -> usize {
        self.inner
            .connections
            .lock()
            .iter()
            .map(|c| c.in_flight())
            .sum()
    }

    /// The least-loaded live connection. If the pool is empty but entitled
    /// to connections, one is opened inline; `PoolUnavailable` otherwise.
    pub async fn borrow(&self) -> Result<Connection, ZirconError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ZirconError::PoolUnavailable(self.inner.addr));
        }
        let (live, target) = self.inner.prune();
        if live < target {
            self.inner.refill.notify_one();
        }
        if let Some(connection) = self.least_loaded() {
            return Ok(connection);
        }
        if target == 0 {
            return Err(ZirconError::PoolUnavailable(self.inner.addr));
        }

        // Cold pool: pay the connect cost inline once rather than failing
        // the request.
        let connection = self.open_connection().await?;
        Ok(self.install(connection))
    }

    fn least_loaded(&self) -> Option<Connection> {
        let connections = self.inner.connections.lock();
        connections
            .iter()
            .filter(|c| !c.is_closed())
            .min_by_key(|c| c.in_flight())
            .cloned()
    }

    /// Adds a freshly opened connection, unless a concurrent open already
    /// filled the pool — then the surplus is closed and the pooled one wins.
    fn install(&self, connection: Connection) -> Connection {
        let mut connections = self.inner.connections.lock();
        if connections.len() >= self.inner.target_size().max(1) {
            if let Some(existing) = connections.iter().find(|c| !c.is_closed()).cloned() {
                connection.close();
                return existing;
            }
        }
        connections.push(connection.clone());
        connection
    }

    async fn open_connection(&self) -> Result<Connection, ZirconError> {
        let connection = Connection::open(
            self.inner.addr,
            self.inner.version,
            &self.inner.connection_options,
        )
        .await?;
        let keyspace = self.inner.keyspace.lock().clone();
        if let Some(keyspace) = keyspace {
            connection.set_keyspace(&keyspace).await?;
        }
        Ok(connection)
    }

    /// Ensures at least one live connection exists, opening one if needed.
    /// The host-up path uses this before a host is announced as usable.
    pub async fn ensure_connected(&self) -> Result<(), ZirconError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ZirconError::PoolUnavailable(self.inner.addr));
        }
        if self.size() > 0 {
            return Ok(());
        }
        if self.inner.target_size() == 0 {
            return Err(ZirconError::PoolUnavailable(self.inner.addr));
        }
        let connection = self.open_connection().await?;
        let _ = self.install(connection);
        self.inner.refill.notify_one();
        Ok(())
    }

    /// Binds every pooled connection (and all future ones) to a keyspace.
    pub async fn set_keyspace(&self, keyspace: &str) -> Result<(), ZirconError> {
        *self.inner.keyspace.lock() = Some(keyspace.to_owned());
        let connections: Vec<Connection> = self.inner.connections.lock().clone();
        for connection in connections {
            connection.set_keyspace(keyspace).await?;
        }
        Ok(())
    }

    /// Tears down every connection; borrow attempts fail afterwards.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let mut connections = self.inner.connections.lock();
        for connection in connections.drain(..) {
            connection.close();
        }
        self.inner.refill.notify_one();
    }

    /// Closes current connections but keeps the pool usable, so the next
    /// borrow reconnects. Used when a host is marked DOWN.
    pub fn tear_down_connections(&self) {
        let mut connections = self.inner.connections.lock();
        for connection in connections.drain(..) {
            connection.close();
        }
    }

    /// Every live connection, for re-prepare fanout.
    pub fn live_connections(&self) -> Vec<Connection> {
        self.inner
            .connections
            .lock()
            .iter()
            .filter(|c| !c.is_closed())
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for HostPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostPool")
            .field("addr", &self.inner.addr)
            .field("size", &self.inner.connections.lock().len())
            .field("distance", &self.inner.distance())
            .finish()
    }
}

fn distance_code(distance: HostDistance) -> u8 {
    match distance {
        HostDistance::Local => 0,
        HostDistance::Remote => 1,
        HostDistance::Ignored => 2,
    }
}

/// Keeps the pool at its target size in the background, backing off per the
/// reconnection policy while the host stays unreachable.
async fn replenish_loop(inner: Arc<PoolInner>) {
    let mut schedule = None;
    loop {
        inner.refill.notified().await;
        if inner.closed.load(Ordering::SeqCst) {
            return;
        }
        loop {
            let (live, target) = inner.prune();
            if live >= target || inner.closed.load(Ordering::SeqCst) {
                schedule = None;
                break;
            }
            match Connection::open(inner.addr, inner.version, &inner.connection_options).await {
                Ok(connection) => {
                    let keyspace = inner.keyspace.lock().clone();
                    if let Some(keyspace) = keyspace {
                        if let Err(e) = connection.set_keyspace(&keyspace).await {
                            warn!(
                                "Failed to bind replacement connection to {} to keyspace: {}",
                                inner.addr, e
                            );
                            connection.close();
                            continue;
                        }
                    }
                    debug!("Pool for {} opened a connection", inner.addr);
                    let mut connections = inner.connections.lock();
                    if connections.len() < inner.target_size() {
                        connections.push(connection);
                    } else {
                        connection.close();
                    }
                    schedule = None;
                }
                Err(e) => {
                    let delay = schedule
                        .get_or_insert_with(|| inner.reconnection_policy.new_schedule())
                        .next_delay();
                    debug!(
                        "Pool for {} failed to open a connection ({}); next attempt in {:?}",
                        inner.addr, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    if inner.closed.load(Ordering::SeqCst) {
                        return;
                    }
                }
            }
        }
    }
}
