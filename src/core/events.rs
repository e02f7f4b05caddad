// src/core/events.rs

//! Defines the event bus for propagating cluster lifecycle changes from the
//! control connection and the pools to the rest of the driver.

use crate::core::protocol::response::SchemaChange;
use std::net::SocketAddr;
use tokio::sync::broadcast::{self, Sender as BroadcastSender};
use tracing::debug;

/// The capacity of the broadcast channel for cluster events.
/// Large enough that a slow subscriber does not lag during a topology storm.
const EVENT_BUS_CAPACITY: usize = 4096;

/// A cluster lifecycle change as observed by the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterEvent {
    /// A new host appeared in the peers tables.
    HostAdded(SocketAddr),
    /// A host disappeared from the peers tables and was dropped.
    HostRemoved(SocketAddr),
    /// A host is confirmed reachable again (its pool holds a connection).
    HostUp(SocketAddr),
    /// A host was marked unreachable.
    HostDown(SocketAddr),
    /// The schema catalog changed and has been refreshed.
    SchemaChanged(SchemaChange),
}

/// The central distribution hub for cluster events. Writers are the control
/// connection and the host registry; anyone may subscribe.
#[derive(Debug)]
pub struct EventBus {
    sender: BroadcastSender<ClusterEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { sender }
    }

    /// Publishes an event. It's okay if there are no active subscribers.
    pub fn publish(&self, event: ClusterEvent) {
        if self.sender.send(event.clone()).is_err() {
            debug!("Published a cluster event with no active subscribers: {event:?}");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.sender.subscribe()
    }
}
