// src/client/statement.rs

//! User-facing statement types: simple statements, prepared handles, bound
//! values (positional or named) and batches.

use crate::core::errors::ZirconError;
use crate::core::execution::prepared::PreparedEntry;
use crate::core::protocol::response::PreparedMetadata;
use crate::core::protocol::types::CqlValue;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

/// Values bound to a statement. Named values are translated to positional
/// ones against prepared metadata before hitting the wire.
#[derive(Debug, Clone, Default)]
pub enum QueryValues {
    #[default]
    None,
    Positional(Vec<CqlValue>),
    Named(HashMap<String, CqlValue>),
}

impl QueryValues {
    pub fn is_empty(&self) -> bool {
        match self {
            QueryValues::None => true,
            QueryValues::Positional(values) => values.is_empty(),
            QueryValues::Named(values) => values.is_empty(),
        }
    }

    /// Resolves to positional values. Named lookups compare column names
    /// case-insensitively (CQL folds unquoted identifiers to lowercase).
    /// A missing name becomes `Unset` when the encoding options allow it,
    /// an error otherwise.
    pub fn resolve(
        &self,
        metadata: &PreparedMetadata,
        use_undefined_as_unset: bool,
    ) -> Result<Vec<CqlValue>, ZirconError> {
        match self {
            QueryValues::None => Ok(Vec::new()),
            QueryValues::Positional(values) => Ok(values.clone()),
            QueryValues::Named(named) => {
                let mut resolved = Vec::with_capacity(metadata.columns.len());
                for column in &metadata.columns {
                    let value = named
                        .iter()
                        .find(|(name, _)| name.eq_ignore_ascii_case(&column.name))
                        .map(|(_, v)| v.clone());
                    match value {
                        Some(value) => resolved.push(value),
                        None if use_undefined_as_unset => resolved.push(CqlValue::Unset),
                        None => {
                            return Err(ZirconError::UnknownNamedParameter(column.name.clone()));
                        }
                    }
                }
                // Reject stray names that match no bind marker.
                for name in named.keys() {
                    if !metadata
                        .columns
                        .iter()
                        .any(|c| c.name.eq_ignore_ascii_case(name))
                    {
                        return Err(ZirconError::UnknownNamedParameter(name.clone()));
                    }
                }
                Ok(resolved)
            }
        }
    }
}

impl From<Vec<CqlValue>> for QueryValues {
    fn from(values: Vec<CqlValue>) -> Self {
        if values.is_empty() {
            QueryValues::None
        } else {
            QueryValues::Positional(values)
        }
    }
}

impl From<HashMap<String, CqlValue>> for QueryValues {
    fn from(values: HashMap<String, CqlValue>) -> Self {
        if values.is_empty() {
            QueryValues::None
        } else {
            QueryValues::Named(values)
        }
    }
}

/// A CQL statement with its bound values.
#[derive(Debug, Clone)]
pub struct Statement {
    pub query: String,
    pub values: QueryValues,
    /// Marks the statement safe to replay; unlocks retries and speculative
    /// executions that would otherwise be withheld.
    pub is_idempotent: bool,
}

impl Statement {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            values: QueryValues::None,
            is_idempotent: false,
        }
    }

    pub fn with_values(mut self, values: impl Into<QueryValues>) -> Self {
        self.values = values.into();
        self
    }

    pub fn idempotent(mut self) -> Self {
        self.is_idempotent = true;
        self
    }
}

impl From<&str> for Statement {
    fn from(query: &str) -> Self {
        Statement::new(query)
    }
}

impl From<String> for Statement {
    fn from(query: String) -> Self {
        Statement::new(query)
    }
}

/// A handle to a server-side prepared statement, cheap to clone.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub(crate) entry: Arc<PreparedEntry>,
}

impl PreparedStatement {
    pub fn query(&self) -> &str {
        &self.entry.query
    }

    pub fn id(&self) -> Bytes {
        self.entry.id()
    }

    /// Bind-marker metadata as reported by the server.
    pub fn metadata(&self) -> PreparedMetadata {
        self.entry.state().metadata
    }

    pub fn keyspace(&self) -> Option<String> {
        self.entry.keyspace.clone()
    }
}

/// One entry of a batch.
#[derive(Debug, Clone)]
pub enum BatchStatement {
    Query {
        query: String,
        values: QueryValues,
    },
    Prepared {
        statement: PreparedStatement,
        values: QueryValues,
    },
}

/// A batch of statements executed atomically (per the chosen batch kind).
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub kind: crate::core::protocol::request::BatchKind,
    pub statements: Vec<BatchStatement>,
    pub is_idempotent: bool,
}

impl Batch {
    pub fn logged() -> Self {
        Self::default()
    }

    pub fn unlogged() -> Self {
        Self {
            kind: crate::core::protocol::request::BatchKind::Unlogged,
            ..Default::default()
        }
    }

    pub fn counter() -> Self {
        Self {
            kind: crate::core::protocol::request::BatchKind::Counter,
            ..Default::default()
        }
    }

    pub fn add_query(&mut self, query: impl Into<String>, values: impl Into<QueryValues>) {
        self.statements.push(BatchStatement::Query {
            query: query.into(),
            values: values.into(),
        });
    }

    pub fn add_prepared(&mut self, statement: PreparedStatement, values: impl Into<QueryValues>) {
        self.statements.push(BatchStatement::Prepared {
            statement,
            values: values.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}
