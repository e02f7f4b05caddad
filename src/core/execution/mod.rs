// src/core/execution/mod.rs

//! The execution engine: the prepared cache, the per-request attempt state
//! machine, and lazy result paging.

pub mod executor;
pub mod paging;
pub mod prepared;

pub use executor::{Executor, QueryOutcome, Workload};
pub use paging::{ResultSet, RowStream};
pub use prepared::{PreparedCache, PreparedEntry};
