// src/connection/mod.rs

//! Transport management: a multiplexed connection to one host, the SASL
//! authentication seam, stream-id accounting and the per-host pool.

pub mod auth;
#[allow(clippy::module_inception)]
pub mod connection;
pub mod pool;
pub mod stream;
pub mod stream_ids;

// Publicly re-export the primary types from the sub-modules.
// This creates a clean public API for the `connection` module, hiding the
// internal file structure from the rest of the crate.
pub use auth::{AuthProvider, Authenticator, PlainTextAuthProvider};
pub use connection::{Connection, ConnectionOptions};
pub use pool::{HostPool, PoolSizing};
pub use stream::AnyStream;
pub use stream_ids::StreamIdSet;
