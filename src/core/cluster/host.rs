// src/core/cluster/host.rs

//! A known cluster node: identity, datacenter/rack placement, token
//! assignment, UP/DOWN lifecycle and the distance the load balancing policy
//! assigned to it.

use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use uuid::Uuid;

/// How the load balancing policy relates to a host. Pools size themselves
/// from this: `ignored` hosts get no connections at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HostDistance {
    Local,
    Remote,
    Ignored,
}

/// Host liveness as known to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Unknown,
    Up,
    Down,
}

impl HostState {
    fn code(self) -> u8 {
        match self {
            HostState::Unknown => 0,
            HostState::Up => 1,
            HostState::Down => 2,
        }
    }

    fn from_code(code: u8) -> Self {
        match code {
            1 => HostState::Up,
            2 => HostState::Down,
            _ => HostState::Unknown,
        }
    }
}

/// Mutable attributes refreshed from `system.local` / `system.peers`.
#[derive(Debug, Clone, Default)]
pub struct HostInfo {
    pub host_id: Option<Uuid>,
    pub datacenter: Option<String>,
    pub rack: Option<String>,
    /// Token strings as reported by the peers tables, parsed lazily by the
    /// active tokenizer when the ring is rebuilt.
    pub tokens: Vec<String>,
    pub release_version: Option<String>,
    pub schema_version: Option<Uuid>,
}

/// One known node. Shared snapshot-style: identity and address never change
/// for a given instance; placement data and state are interior-mutable.
#[derive(Debug)]
pub struct Host {
    /// The address the driver dials, after address translation.
    address: SocketAddr,
    /// The untranslated broadcast address, used to match topology events.
    broadcast_address: SocketAddr,
    info: RwLock<HostInfo>,
    state: AtomicU8,
    /// True when this host came from the configured contact points; such
    /// hosts are never removed just because they vanish from `system.peers`.
    is_contact_point: bool,
}

/// How hosts travel through the driver.
pub type HostRef = Arc<Host>;

impl Host {
    pub fn new(address: SocketAddr, broadcast_address: SocketAddr, is_contact_point: bool) -> Self {
        Self {
            address,
            broadcast_address,
            info: RwLock::new(HostInfo::default()),
            state: AtomicU8::new(HostState::Unknown.code()),
            is_contact_point,
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn broadcast_address(&self) -> SocketAddr {
        self.broadcast_address
    }

    pub fn is_contact_point(&self) -> bool {
        self.is_contact_point
    }

    pub fn state(&self) -> HostState {
        HostState::from_code(self.state.load(Ordering::SeqCst))
    }

    /// Returns the previous state so callers can decide whether a lifecycle
    /// event actually transitions anything.
    pub fn set_state(&self, state: HostState) -> HostState {
        HostState::from_code(self.state.swap(state.code(), Ordering::SeqCst))
    }

    pub fn is_up(&self) -> bool {
        self.state() == HostState::Up
    }

    pub fn datacenter(&self) -> Option<String> {
        self.info.read().datacenter.clone()
    }

    pub fn rack(&self) -> Option<String> {
        self.info.read().rack.clone()
    }

    pub fn tokens(&self) -> Vec<String> {
        self.info.read().tokens.clone()
    }

    pub fn host_id(&self) -> Option<Uuid> {
        self.info.read().host_id
    }

    pub fn release_version(&self) -> Option<String> {
        self.info.read().release_version.clone()
    }

    pub fn schema_version(&self) -> Option<Uuid> {
        self.info.read().schema_version
    }

    /// Replaces the peers-table attributes wholesale and reports whether the
    /// token assignment changed (which forces a ring rebuild).
    pub fn update_info(&self, new_info: HostInfo) -> bool {
        let mut info = self.info.write();
        let tokens_changed = info.tokens != new_info.tokens;
        *info = new_info;
        tokens_changed
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Host {}

impl std::hash::Hash for Host {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.address)
    }
}
