// src/core/errors.rs

//! Defines the primary error type for the entire driver.

use crate::core::protocol::consistency::Consistency;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

/// The kind of write that timed out, as reported by the server in a
/// WRITE_TIMEOUT error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    Simple,
    Batch,
    UnloggedBatch,
    Counter,
    BatchLog,
    Cas,
    View,
    Cdc,
}

impl WriteType {
    pub fn parse(s: &str) -> Self {
        match s {
            "SIMPLE" => WriteType::Simple,
            "BATCH" => WriteType::Batch,
            "UNLOGGED_BATCH" => WriteType::UnloggedBatch,
            "COUNTER" => WriteType::Counter,
            "BATCH_LOG" => WriteType::BatchLog,
            "CAS" => WriteType::Cas,
            "VIEW" => WriteType::View,
            _ => WriteType::Cdc,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WriteType::Simple => "SIMPLE",
            WriteType::Batch => "BATCH",
            WriteType::UnloggedBatch => "UNLOGGED_BATCH",
            WriteType::Counter => "COUNTER",
            WriteType::BatchLog => "BATCH_LOG",
            WriteType::Cas => "CAS",
            WriteType::View => "VIEW",
            WriteType::Cdc => "CDC",
        }
    }
}

/// A server-side error decoded from an ERROR response frame. The error code
/// selects the variant; type-specific fields follow the code and message on
/// the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum DbError {
    ServerError,
    ProtocolError,
    AuthenticationError,
    Unavailable {
        consistency: Consistency,
        required: i32,
        alive: i32,
    },
    Overloaded,
    IsBootstrapping,
    TruncateError,
    WriteTimeout {
        consistency: Consistency,
        received: i32,
        block_for: i32,
        write_type: WriteType,
    },
    ReadTimeout {
        consistency: Consistency,
        received: i32,
        block_for: i32,
        data_present: bool,
    },
    ReadFailure {
        consistency: Consistency,
        received: i32,
        block_for: i32,
        num_failures: i32,
        data_present: bool,
    },
    FunctionFailure {
        keyspace: String,
        function: String,
        arg_types: Vec<String>,
    },
    WriteFailure {
        consistency: Consistency,
        received: i32,
        block_for: i32,
        num_failures: i32,
        write_type: WriteType,
    },
    SyntaxError,
    Unauthorized,
    Invalid,
    ConfigError,
    AlreadyExists {
        keyspace: String,
        table: String,
    },
    Unprepared {
        prepared_id: Vec<u8>,
    },
    /// An error code the driver does not recognize; kept verbatim.
    Other(i32),
}

impl DbError {
    /// The numeric error code this variant was decoded from.
    pub fn code(&self) -> i32 {
        match self {
            DbError::ServerError => 0x0000,
            DbError::ProtocolError => 0x000A,
            DbError::AuthenticationError => 0x0100,
            DbError::Unavailable { .. } => 0x1000,
            DbError::Overloaded => 0x1001,
            DbError::IsBootstrapping => 0x1002,
            DbError::TruncateError => 0x1003,
            DbError::WriteTimeout { .. } => 0x1100,
            DbError::ReadTimeout { .. } => 0x1200,
            DbError::ReadFailure { .. } => 0x1300,
            DbError::FunctionFailure { .. } => 0x1400,
            DbError::WriteFailure { .. } => 0x1500,
            DbError::SyntaxError => 0x2000,
            DbError::Unauthorized => 0x2100,
            DbError::Invalid => 0x2200,
            DbError::ConfigError => 0x2300,
            DbError::AlreadyExists { .. } => 0x2400,
            DbError::Unprepared { .. } => 0x2500,
            DbError::Other(code) => *code,
        }
    }

    /// Whether the default retry policy may consider this error at all.
    /// Everything else is rethrown to the caller unchanged.
    pub fn is_retry_eligible(&self) -> bool {
        matches!(
            self,
            DbError::Unavailable { .. }
                | DbError::ReadTimeout { .. }
                | DbError::WriteTimeout { .. }
                | DbError::ReadFailure { .. }
                | DbError::WriteFailure { .. }
                | DbError::Overloaded
                | DbError::IsBootstrapping
                | DbError::TruncateError
        )
    }
}

/// The main error enum, representing all possible failures within the driver.
/// Using `thiserror` allows for clean error definitions and automatic `From`
/// trait implementations.
#[derive(Error, Debug)]
pub enum ZirconError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Incomplete data in stream")]
    IncompleteData,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Server protocol version {0:#04x} is not supported")]
    UnsupportedProtocolVersion(u8),

    #[error("Database error [{}]: {message}", .error.code())]
    Db { error: DbError, message: String },

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Connection is busy: all stream ids are in use")]
    ConnectionBusy,

    #[error("No connection pool open for host {0}")]
    PoolUnavailable(SocketAddr),

    #[error("Request timed out after {0:?}")]
    RequestTimeout(std::time::Duration),

    #[error("Connect timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error("Request was cancelled")]
    Cancelled,

    #[error("No host could serve the request; {} host(s) tried", .errors.len())]
    NoHostAvailable {
        /// Per-host cause of failure, keyed by the resolved address.
        errors: HashMap<SocketAddr, String>,
    },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Wrong number of values: expected {expected}, got {actual}")]
    WrongValueCount { expected: usize, actual: usize },

    #[error("Unknown named parameter '{0}'")]
    UnknownNamedParameter(String),

    #[error("Keyspace name '{0}' is not valid")]
    InvalidKeyspaceName(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Driver is shutting down")]
    ShuttingDown,

    #[error("Internal driver error: {0}")]
    Internal(String),
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for ZirconError {
    fn clone(&self) -> Self {
        match self {
            ZirconError::Io(e) => ZirconError::Io(Arc::clone(e)),
            ZirconError::IncompleteData => ZirconError::IncompleteData,
            ZirconError::Protocol(s) => ZirconError::Protocol(s.clone()),
            ZirconError::UnsupportedProtocolVersion(v) => {
                ZirconError::UnsupportedProtocolVersion(*v)
            }
            ZirconError::Db { error, message } => ZirconError::Db {
                error: error.clone(),
                message: message.clone(),
            },
            ZirconError::Authentication(s) => ZirconError::Authentication(s.clone()),
            ZirconError::ConnectionClosed => ZirconError::ConnectionClosed,
            ZirconError::ConnectionBusy => ZirconError::ConnectionBusy,
            ZirconError::PoolUnavailable(a) => ZirconError::PoolUnavailable(*a),
            ZirconError::RequestTimeout(d) => ZirconError::RequestTimeout(*d),
            ZirconError::ConnectTimeout(d) => ZirconError::ConnectTimeout(*d),
            ZirconError::Cancelled => ZirconError::Cancelled,
            ZirconError::NoHostAvailable { errors } => ZirconError::NoHostAvailable {
                errors: errors.clone(),
            },
            ZirconError::InvalidQuery(s) => ZirconError::InvalidQuery(s.clone()),
            ZirconError::TypeError(s) => ZirconError::TypeError(s.clone()),
            ZirconError::WrongValueCount { expected, actual } => ZirconError::WrongValueCount {
                expected: *expected,
                actual: *actual,
            },
            ZirconError::UnknownNamedParameter(s) => ZirconError::UnknownNamedParameter(s.clone()),
            ZirconError::InvalidKeyspaceName(s) => ZirconError::InvalidKeyspaceName(s.clone()),
            ZirconError::Metadata(s) => ZirconError::Metadata(s.clone()),
            ZirconError::Tls(s) => ZirconError::Tls(s.clone()),
            ZirconError::Config(s) => ZirconError::Config(s.clone()),
            ZirconError::ShuttingDown => ZirconError::ShuttingDown,
            ZirconError::Internal(s) => ZirconError::Internal(s.clone()),
        }
    }
}

impl PartialEq for ZirconError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ZirconError::Io(e1), ZirconError::Io(e2)) => e1.to_string() == e2.to_string(),
            (ZirconError::Protocol(s1), ZirconError::Protocol(s2)) => s1 == s2,
            (
                ZirconError::UnsupportedProtocolVersion(v1),
                ZirconError::UnsupportedProtocolVersion(v2),
            ) => v1 == v2,
            (
                ZirconError::Db {
                    error: e1,
                    message: m1,
                },
                ZirconError::Db {
                    error: e2,
                    message: m2,
                },
            ) => e1 == e2 && m1 == m2,
            (ZirconError::Authentication(s1), ZirconError::Authentication(s2)) => s1 == s2,
            (ZirconError::PoolUnavailable(a1), ZirconError::PoolUnavailable(a2)) => a1 == a2,
            (ZirconError::RequestTimeout(d1), ZirconError::RequestTimeout(d2)) => d1 == d2,
            (ZirconError::ConnectTimeout(d1), ZirconError::ConnectTimeout(d2)) => d1 == d2,
            (
                ZirconError::NoHostAvailable { errors: e1 },
                ZirconError::NoHostAvailable { errors: e2 },
            ) => e1 == e2,
            (ZirconError::InvalidQuery(s1), ZirconError::InvalidQuery(s2)) => s1 == s2,
            (ZirconError::TypeError(s1), ZirconError::TypeError(s2)) => s1 == s2,
            (
                ZirconError::WrongValueCount {
                    expected: e1,
                    actual: a1,
                },
                ZirconError::WrongValueCount {
                    expected: e2,
                    actual: a2,
                },
            ) => e1 == e2 && a1 == a2,
            (ZirconError::UnknownNamedParameter(s1), ZirconError::UnknownNamedParameter(s2)) => {
                s1 == s2
            }
            (ZirconError::InvalidKeyspaceName(s1), ZirconError::InvalidKeyspaceName(s2)) => {
                s1 == s2
            }
            (ZirconError::Metadata(s1), ZirconError::Metadata(s2)) => s1 == s2,
            (ZirconError::Tls(s1), ZirconError::Tls(s2)) => s1 == s2,
            (ZirconError::Config(s1), ZirconError::Config(s2)) => s1 == s2,
            (ZirconError::Internal(s1), ZirconError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

impl ZirconError {
    /// True when the failure is tied to the transport rather than to the
    /// request itself. Such errors are fatal to the Connection, not to the
    /// Request: the executor moves on to the next host in the plan.
    pub fn is_host_level(&self) -> bool {
        matches!(
            self,
            ZirconError::Io(_)
                | ZirconError::ConnectionClosed
                | ZirconError::ConnectionBusy
                | ZirconError::PoolUnavailable(_)
                | ZirconError::ConnectTimeout(_)
        )
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for ZirconError {
    fn from(e: std::io::Error) -> Self {
        ZirconError::Io(Arc::new(e))
    }
}

impl From<std::str::Utf8Error> for ZirconError {
    fn from(e: std::str::Utf8Error) -> Self {
        ZirconError::Protocol(format!("Invalid UTF-8 in frame: {e}"))
    }
}

impl From<std::string::FromUtf8Error> for ZirconError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        ZirconError::Protocol(format!("Invalid UTF-8 in frame: {e}"))
    }
}

impl From<uuid::Error> for ZirconError {
    fn from(e: uuid::Error) -> Self {
        ZirconError::Protocol(format!("Invalid UUID bytes: {e}"))
    }
}

impl From<serde_json::Error> for ZirconError {
    fn from(e: serde_json::Error) -> Self {
        ZirconError::Metadata(format!("Malformed replication options JSON: {e}"))
    }
}

impl From<rustls::Error> for ZirconError {
    fn from(e: rustls::Error) -> Self {
        ZirconError::Tls(e.to_string())
    }
}
