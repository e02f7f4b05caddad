// src/client/mod.rs

//! The user-facing surface: the session facade and statement types.

pub mod session;
pub mod statement;

pub use session::Session;
pub use statement::{Batch, BatchStatement, PreparedStatement, QueryValues, Statement};
