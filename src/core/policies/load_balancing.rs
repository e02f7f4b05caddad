// src/core/policies/load_balancing.rs

//! Load balancing policies: which hosts a request may be sent to, in what
//! order, and how far away each host is considered to be.
//!
//! A query plan is a lazy ordered sequence of hosts consumed one at a time
//! by the executor; `insert_first` lets the executor pin a preferred host to
//! the front (retries on the same coordinator, token-aware preemption).

use crate::core::cluster::host::{Host, HostDistance, HostRef};
use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Everything a policy may consult when building a plan. The executor fills
/// `replica_hint` from the token map when the statement carries a routing
/// key, so policies stay free of metadata plumbing.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    pub keyspace: Option<String>,
    pub routing_key: Option<Bytes>,
    /// Replicas owning the routing key, ring order, when known.
    pub replica_hint: Vec<HostRef>,
    /// Host the executor wants tried first (e.g. same-host retry).
    pub preferred_host: Option<HostRef>,
}

/// A lazy ordered host sequence. Hosts are deduplicated by address: a host
/// injected at the front will not be yielded again by the tail iterator.
pub struct QueryPlan {
    front: VecDeque<HostRef>,
    rest: Box<dyn Iterator<Item = HostRef> + Send>,
    yielded: HashSet<SocketAddr>,
}

impl QueryPlan {
    pub fn new(rest: impl Iterator<Item = HostRef> + Send + 'static) -> Self {
        Self {
            front: VecDeque::new(),
            rest: Box::new(rest),
            yielded: HashSet::new(),
        }
    }

    pub fn from_hosts(hosts: Vec<HostRef>) -> Self {
        Self::new(hosts.into_iter())
    }

    /// Injects a host to be yielded before everything else.
    pub fn insert_first(&mut self, host: HostRef) {
        self.front.push_front(host);
    }

    /// The next candidate host, or `None` when the plan is exhausted.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<HostRef> {
        while let Some(host) = self.front.pop_front() {
            if self.yielded.insert(host.address()) {
                return Some(host);
            }
        }
        for host in self.rest.by_ref() {
            if self.yielded.insert(host.address()) {
                return Some(host);
            }
        }
        None
    }
}

impl fmt::Debug for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryPlan")
            .field("front", &self.front)
            .field("yielded", &self.yielded)
            .finish_non_exhaustive()
    }
}

pub trait LoadBalancingPolicy: Send + Sync + fmt::Debug {
    /// Called once with the initial host set, before any plan is requested.
    fn init(&self, hosts: &[HostRef]);

    /// How far away a host is; pools size themselves from this.
    fn distance(&self, host: &Host) -> HostDistance;

    /// Builds the candidate sequence for one request over a snapshot of the
    /// known hosts.
    fn new_plan(&self, hosts: &[HostRef], ctx: &QueryContext) -> QueryPlan;
}

fn is_candidate(host: &HostRef) -> bool {
    host.is_up() || host.state() == crate::core::cluster::host::HostState::Unknown
}

/// Plain round-robin over every known host, all considered local.
#[derive(Debug, Default)]
pub struct RoundRobinPolicy {
    counter: AtomicUsize,
}

impl RoundRobinPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancingPolicy for RoundRobinPolicy {
    fn init(&self, _hosts: &[HostRef]) {}

    fn distance(&self, _host: &Host) -> HostDistance {
        HostDistance::Local
    }

    fn new_plan(&self, hosts: &[HostRef], ctx: &QueryContext) -> QueryPlan {
        let candidates: Vec<HostRef> = hosts.iter().filter(|h| is_candidate(h)).cloned().collect();
        let offset = if candidates.is_empty() {
            0
        } else {
            self.counter.fetch_add(1, Ordering::Relaxed) % candidates.len()
        };
        let rotated: Vec<HostRef> = candidates[offset..]
            .iter()
            .chain(candidates[..offset].iter())
            .cloned()
            .collect();
        let mut plan = QueryPlan::from_hosts(rotated);
        if let Some(preferred) = &ctx.preferred_host {
            plan.insert_first(preferred.clone());
        }
        plan
    }
}

/// Round-robin restricted to one datacenter, with an optional fixed number
/// of remote hosts per foreign datacenter as a last resort.
#[derive(Debug)]
pub struct DcAwareRoundRobinPolicy {
    local_dc: String,
    used_hosts_per_remote_dc: usize,
    counter: AtomicUsize,
}

impl DcAwareRoundRobinPolicy {
    pub fn new(local_dc: impl Into<String>) -> Self {
        Self::with_remote_hosts(local_dc, 0)
    }

    pub fn with_remote_hosts(local_dc: impl Into<String>, used_hosts_per_remote_dc: usize) -> Self {
        Self {
            local_dc: local_dc.into(),
            used_hosts_per_remote_dc,
            counter: AtomicUsize::new(0),
        }
    }

    pub fn local_dc(&self) -> &str {
        &self.local_dc
    }

    fn is_local(&self, host: &Host) -> bool {
        // A host with no datacenter yet (not refreshed) is treated as local
        // rather than silently unroutable.
        host.datacenter().as_deref().is_none_or(|dc| dc == self.local_dc)
    }

    /// The first `used_hosts_per_remote_dc` hosts of each foreign DC, in a
    /// stable order so `distance` and `new_plan` agree.
    fn remote_candidates(&self, hosts: &[HostRef]) -> Vec<HostRef> {
        let mut per_dc: HashMap<String, Vec<HostRef>> = HashMap::new();
        for host in hosts {
            if let Some(dc) = host.datacenter() {
                if dc != self.local_dc {
                    per_dc.entry(dc).or_default().push(host.clone());
                }
            }
        }
        let mut remote = Vec::new();
        let mut dcs: Vec<_> = per_dc.into_iter().collect();
        dcs.sort_by(|a, b| a.0.cmp(&b.0));
        for (_, mut dc_hosts) in dcs {
            dc_hosts.sort_by_key(|h| h.address());
            dc_hosts.truncate(self.used_hosts_per_remote_dc);
            remote.extend(dc_hosts);
        }
        remote
    }
}

impl LoadBalancingPolicy for DcAwareRoundRobinPolicy {
    fn init(&self, _hosts: &[HostRef]) {}

    fn distance(&self, host: &Host) -> HostDistance {
        if self.is_local(host) {
            HostDistance::Local
        } else if self.used_hosts_per_remote_dc > 0 {
            HostDistance::Remote
        } else {
            HostDistance::Ignored
        }
    }

    fn new_plan(&self, hosts: &[HostRef], ctx: &QueryContext) -> QueryPlan {
        let local: Vec<HostRef> = hosts
            .iter()
            .filter(|h| is_candidate(h) && self.is_local(h))
            .cloned()
            .collect();
        let offset = if local.is_empty() {
            0
        } else {
            self.counter.fetch_add(1, Ordering::Relaxed) % local.len()
        };
        let mut ordered: Vec<HostRef> = local[offset..]
            .iter()
            .chain(local[..offset].iter())
            .cloned()
            .collect();
        ordered.extend(
            self.remote_candidates(hosts)
                .into_iter()
                .filter(is_candidate),
        );

        let mut plan = QueryPlan::from_hosts(ordered);
        if let Some(preferred) = &ctx.preferred_host {
            plan.insert_first(preferred.clone());
        }
        plan
    }
}

/// Wraps another policy and preempts its plan with the replicas that own the
/// statement's routing key, so the coordinator is already a replica.
#[derive(Debug)]
pub struct TokenAwarePolicy<C: LoadBalancingPolicy> {
    child: C,
}

impl<C: LoadBalancingPolicy> TokenAwarePolicy<C> {
    pub fn new(child: C) -> Self {
        Self { child }
    }

    pub fn child(&self) -> &C {
        &self.child
    }
}

impl<C: LoadBalancingPolicy> LoadBalancingPolicy for TokenAwarePolicy<C> {
    fn init(&self, hosts: &[HostRef]) {
        self.child.init(hosts);
    }

    fn distance(&self, host: &Host) -> HostDistance {
        self.child.distance(host)
    }

    fn new_plan(&self, hosts: &[HostRef], ctx: &QueryContext) -> QueryPlan {
        let mut plan = self.child.new_plan(hosts, ctx);
        // Front-load in reverse so the final order matches the hint order.
        for replica in ctx
            .replica_hint
            .iter()
            .filter(|h| is_candidate(h) && self.child.distance(h) != HostDistance::Ignored)
            .rev()
        {
            plan.insert_first(replica.clone());
        }
        if let Some(preferred) = &ctx.preferred_host {
            plan.insert_first(preferred.clone());
        }
        plan
    }
}

/// Wraps another policy and filters both distances and plans down to an
/// explicit allow list of addresses.
#[derive(Debug)]
pub struct AllowListPolicy<C: LoadBalancingPolicy> {
    child: C,
    allowed: HashSet<SocketAddr>,
}

impl<C: LoadBalancingPolicy> AllowListPolicy<C> {
    pub fn new(child: C, allowed: impl IntoIterator<Item = SocketAddr>) -> Self {
        Self {
            child,
            allowed: allowed.into_iter().collect(),
        }
    }
}

impl<C: LoadBalancingPolicy> LoadBalancingPolicy for AllowListPolicy<C> {
    fn init(&self, hosts: &[HostRef]) {
        let allowed: Vec<HostRef> = hosts
            .iter()
            .filter(|h| self.allowed.contains(&h.address()))
            .cloned()
            .collect();
        self.child.init(&allowed);
    }

    fn distance(&self, host: &Host) -> HostDistance {
        if self.allowed.contains(&host.address()) {
            self.child.distance(host)
        } else {
            HostDistance::Ignored
        }
    }

    fn new_plan(&self, hosts: &[HostRef], ctx: &QueryContext) -> QueryPlan {
        let allowed: Vec<HostRef> = hosts
            .iter()
            .filter(|h| self.allowed.contains(&h.address()))
            .cloned()
            .collect();
        let mut ctx = ctx.clone();
        ctx.replica_hint
            .retain(|h| self.allowed.contains(&h.address()));
        if let Some(preferred) = &ctx.preferred_host {
            if !self.allowed.contains(&preferred.address()) {
                ctx.preferred_host = None;
            }
        }
        self.child.new_plan(&allowed, &ctx)
    }
}
