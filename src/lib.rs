// src/lib.rs

//! Zircon: an asynchronous CQL driver for Apache Cassandra and DSE.
//!
//! The entry point is [`Session`]: configure a [`ClientConfig`], call
//! [`Session::connect`], and execute statements against the cluster.

pub mod client;
pub mod config;
pub mod connection;
pub mod core;

// Re-export
pub use crate::client::{Batch, PreparedStatement, QueryValues, Session, Statement};
pub use crate::config::{ClientConfig, ExecutionProfile};
pub use crate::core::errors::{DbError, ZirconError};
pub use crate::core::protocol::{Consistency, CqlDuration, CqlValue};
