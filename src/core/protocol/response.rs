// src/core/protocol/response.rs

//! Response body decoders: ERROR, READY, AUTHENTICATE, SUPPORTED, RESULT,
//! EVENT, AUTH_CHALLENGE and AUTH_SUCCESS.

use crate::core::errors::{DbError, WriteType, ZirconError};
use crate::core::protocol::consistency::Consistency;
use crate::core::protocol::frame::{Frame, FrameFlags, Opcode, ProtocolVersion};
use crate::core::protocol::types::{ColumnSpec, DataType, TableSpec};
use crate::core::protocol::wire;
use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use uuid::Uuid;

// Rows/prepared metadata flags.
const ROWS_FLAG_GLOBAL_TABLES_SPEC: i32 = 0x0001;
const ROWS_FLAG_HAS_MORE_PAGES: i32 = 0x0002;
const ROWS_FLAG_NO_METADATA: i32 = 0x0004;
const ROWS_FLAG_METADATA_CHANGED: i32 = 0x0008;

/// Header-flag-driven extras that may precede any response body.
#[derive(Debug, Clone, Default)]
pub struct ResponseExtras {
    pub tracing_id: Option<Uuid>,
    pub warnings: Vec<String>,
    pub custom_payload: Option<HashMap<String, Option<Bytes>>>,
}

/// Column layout of a rows result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowsMetadata {
    pub columns: Vec<ColumnSpec>,
    pub paging_state: Option<Bytes>,
    pub new_metadata_id: Option<Bytes>,
    pub no_metadata: bool,
}

/// A rows result with cells kept raw; value decoding happens lazily against
/// whichever column metadata applies (the response's own, or the prepared
/// statement's when SKIP_METADATA was used).
#[derive(Debug, Clone)]
pub struct RawRows {
    pub metadata: RowsMetadata,
    pub rows_count: usize,
    pub cells: Vec<Option<Bytes>>,
}

/// Metadata attached to a PREPARED result.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedMetadata {
    pub columns: Vec<ColumnSpec>,
    /// Indices of the bind markers that form the partition key, when the
    /// server reports them (v4+).
    pub pk_indices: Vec<u16>,
}

#[derive(Debug, Clone)]
pub struct PreparedResult {
    pub id: Bytes,
    pub result_metadata_id: Option<Bytes>,
    pub metadata: PreparedMetadata,
    pub result_metadata: RowsMetadata,
}

/// The target of a schema change, uniform across protocol versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChangeTarget {
    Keyspace {
        keyspace: String,
    },
    Table {
        keyspace: String,
        table: String,
    },
    Type {
        keyspace: String,
        name: String,
    },
    Function {
        keyspace: String,
        name: String,
        arg_types: Vec<String>,
    },
    Aggregate {
        keyspace: String,
        name: String,
        arg_types: Vec<String>,
    },
}

impl SchemaChangeTarget {
    pub fn keyspace(&self) -> &str {
        match self {
            SchemaChangeTarget::Keyspace { keyspace }
            | SchemaChangeTarget::Table { keyspace, .. }
            | SchemaChangeTarget::Type { keyspace, .. }
            | SchemaChangeTarget::Function { keyspace, .. }
            | SchemaChangeTarget::Aggregate { keyspace, .. } => keyspace,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaChange {
    /// CREATED, UPDATED or DROPPED.
    pub change_type: String,
    pub target: SchemaChangeTarget,
}

/// A decoded RESULT body.
#[derive(Debug, Clone)]
pub enum CqlResult {
    Void,
    Rows(RawRows),
    SetKeyspace(String),
    Prepared(PreparedResult),
    SchemaChange(SchemaChange),
}

/// A server push event delivered on a REGISTERed connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    TopologyChange { change: String, address: SocketAddr },
    StatusChange { change: String, address: SocketAddr },
    SchemaChange(SchemaChange),
}

/// A decoded response frame.
#[derive(Debug, Clone)]
pub enum Response {
    Ready,
    Authenticate { authenticator: String },
    Supported { options: HashMap<String, Vec<String>> },
    Result(Box<CqlResult>),
    Event(ServerEvent),
    AuthChallenge { token: Option<Bytes> },
    AuthSuccess { token: Option<Bytes> },
    Error { error: DbError, message: String },
}

impl Response {
    /// Decodes the body of a response frame, honoring the header flags that
    /// prepend tracing ids, warnings and custom payloads to the body.
    pub fn decode(frame: &Frame) -> Result<(Response, ResponseExtras), ZirconError> {
        let mut body = frame.body.clone();
        let version = frame.version;

        let mut extras = ResponseExtras::default();
        if frame.flags.contains(FrameFlags::TRACING) {
            extras.tracing_id = Some(wire::read_uuid(&mut body)?);
        }
        if frame.flags.contains(FrameFlags::WARNING) {
            extras.warnings = wire::read_string_list(&mut body)?;
        }
        if frame.flags.contains(FrameFlags::CUSTOM_PAYLOAD) {
            extras.custom_payload = Some(wire::read_bytes_map(&mut body)?);
        }

        let response = match frame.opcode {
            Opcode::Ready => Response::Ready,
            Opcode::Authenticate => Response::Authenticate {
                authenticator: wire::read_string(&mut body)?,
            },
            Opcode::Supported => Response::Supported {
                options: wire::read_string_multimap(&mut body)?,
            },
            Opcode::Result => Response::Result(Box::new(decode_result(&mut body, version)?)),
            Opcode::Event => Response::Event(decode_event(&mut body, version)?),
            Opcode::AuthChallenge => Response::AuthChallenge {
                token: wire::read_bytes(&mut body)?,
            },
            Opcode::AuthSuccess => Response::AuthSuccess {
                token: wire::read_bytes(&mut body)?,
            },
            Opcode::Error => {
                let (error, message) = decode_error(&mut body)?;
                Response::Error { error, message }
            }
            other => {
                return Err(ZirconError::Protocol(format!(
                    "Opcode {other} is not valid in the response direction"
                )));
            }
        };
        Ok((response, extras))
    }
}

fn decode_error(body: &mut Bytes) -> Result<(DbError, String), ZirconError> {
    let code = wire::read_int(body)?;
    let message = wire::read_string(body)?;
    let error = match code {
        0x0000 => DbError::ServerError,
        0x000A => DbError::ProtocolError,
        0x0100 => DbError::AuthenticationError,
        0x1000 => DbError::Unavailable {
            consistency: Consistency::from_code(wire::read_short(body)?)?,
            required: wire::read_int(body)?,
            alive: wire::read_int(body)?,
        },
        0x1001 => DbError::Overloaded,
        0x1002 => DbError::IsBootstrapping,
        0x1003 => DbError::TruncateError,
        0x1100 => DbError::WriteTimeout {
            consistency: Consistency::from_code(wire::read_short(body)?)?,
            received: wire::read_int(body)?,
            block_for: wire::read_int(body)?,
            write_type: WriteType::parse(&wire::read_string(body)?),
        },
        0x1200 => DbError::ReadTimeout {
            consistency: Consistency::from_code(wire::read_short(body)?)?,
            received: wire::read_int(body)?,
            block_for: wire::read_int(body)?,
            data_present: wire::read_byte(body)? != 0,
        },
        0x1300 => DbError::ReadFailure {
            consistency: Consistency::from_code(wire::read_short(body)?)?,
            received: wire::read_int(body)?,
            block_for: wire::read_int(body)?,
            num_failures: wire::read_int(body)?,
            data_present: wire::read_byte(body)? != 0,
        },
        0x1400 => DbError::FunctionFailure {
            keyspace: wire::read_string(body)?,
            function: wire::read_string(body)?,
            arg_types: wire::read_string_list(body)?,
        },
        0x1500 => DbError::WriteFailure {
            consistency: Consistency::from_code(wire::read_short(body)?)?,
            received: wire::read_int(body)?,
            block_for: wire::read_int(body)?,
            num_failures: wire::read_int(body)?,
            write_type: WriteType::parse(&wire::read_string(body)?),
        },
        0x2000 => DbError::SyntaxError,
        0x2100 => DbError::Unauthorized,
        0x2200 => DbError::Invalid,
        0x2300 => DbError::ConfigError,
        0x2400 => DbError::AlreadyExists {
            keyspace: wire::read_string(body)?,
            table: wire::read_string(body)?,
        },
        0x2500 => DbError::Unprepared {
            prepared_id: wire::read_short_bytes(body)?.to_vec(),
        },
        other => DbError::Other(other),
    };
    Ok((error, message))
}

fn decode_result(body: &mut Bytes, version: ProtocolVersion) -> Result<CqlResult, ZirconError> {
    let kind = wire::read_int(body)?;
    Ok(match kind {
        0x0001 => CqlResult::Void,
        0x0002 => CqlResult::Rows(decode_rows(body, version)?),
        0x0003 => CqlResult::SetKeyspace(wire::read_string(body)?),
        0x0004 => CqlResult::Prepared(decode_prepared(body, version)?),
        0x0005 => CqlResult::SchemaChange(decode_schema_change(body, version)?),
        other => {
            return Err(ZirconError::Protocol(format!(
                "Unknown RESULT kind {other:#06x}"
            )));
        }
    })
}

/// Reads `<flags><columns_count>[paging_state][metadata_id][column specs]`.
fn decode_rows_metadata(
    body: &mut Bytes,
    version: ProtocolVersion,
) -> Result<(RowsMetadata, usize), ZirconError> {
    let flags = wire::read_int(body)?;
    let columns_count = wire::read_int(body)?;
    if columns_count < 0 {
        return Err(ZirconError::Protocol(format!(
            "Negative column count {columns_count}"
        )));
    }
    let columns_count = columns_count as usize;

    let mut metadata = RowsMetadata {
        no_metadata: flags & ROWS_FLAG_NO_METADATA != 0,
        ..Default::default()
    };
    if flags & ROWS_FLAG_HAS_MORE_PAGES != 0 {
        metadata.paging_state = wire::read_bytes(body)?;
    }
    if flags & ROWS_FLAG_METADATA_CHANGED != 0 && version == ProtocolVersion::V5 {
        metadata.new_metadata_id = Some(wire::read_short_bytes(body)?);
    }

    if !metadata.no_metadata {
        let global_spec = if flags & ROWS_FLAG_GLOBAL_TABLES_SPEC != 0 {
            Some(TableSpec {
                keyspace: wire::read_string(body)?,
                table: wire::read_string(body)?,
            })
        } else {
            None
        };
        metadata.columns = Vec::with_capacity(columns_count);
        for _ in 0..columns_count {
            let table_spec = match &global_spec {
                Some(spec) => spec.clone(),
                None => TableSpec {
                    keyspace: wire::read_string(body)?,
                    table: wire::read_string(body)?,
                },
            };
            let name = wire::read_string(body)?;
            let data_type = DataType::read(body)?;
            metadata.columns.push(ColumnSpec {
                table_spec,
                name,
                data_type,
            });
        }
    }
    Ok((metadata, columns_count))
}

fn decode_rows(body: &mut Bytes, version: ProtocolVersion) -> Result<RawRows, ZirconError> {
    let (metadata, columns_count) = decode_rows_metadata(body, version)?;
    let rows_count = wire::read_int(body)?;
    if rows_count < 0 {
        return Err(ZirconError::Protocol(format!(
            "Negative row count {rows_count}"
        )));
    }
    let rows_count = rows_count as usize;

    let mut cells = Vec::with_capacity(rows_count * columns_count);
    for _ in 0..rows_count * columns_count {
        cells.push(wire::read_bytes(body)?);
    }
    Ok(RawRows {
        metadata,
        rows_count,
        cells,
    })
}

fn decode_prepared(
    body: &mut Bytes,
    version: ProtocolVersion,
) -> Result<PreparedResult, ZirconError> {
    let id = wire::read_short_bytes(body)?;
    let result_metadata_id = if version == ProtocolVersion::V5 {
        Some(wire::read_short_bytes(body)?)
    } else {
        None
    };

    // Bind-marker metadata. Partition-key indices exist from v4.
    let flags = wire::read_int(body)?;
    let columns_count = wire::read_int(body)?.max(0) as usize;
    let pk_indices = if version.supports_unset() {
        let pk_count = wire::read_int(body)?.max(0) as usize;
        let mut indices = Vec::with_capacity(pk_count);
        for _ in 0..pk_count {
            indices.push(wire::read_short(body)?);
        }
        indices
    } else {
        Vec::new()
    };

    let global_spec = if flags & ROWS_FLAG_GLOBAL_TABLES_SPEC != 0 {
        Some(TableSpec {
            keyspace: wire::read_string(body)?,
            table: wire::read_string(body)?,
        })
    } else {
        None
    };
    let mut columns = Vec::with_capacity(columns_count);
    for _ in 0..columns_count {
        let table_spec = match &global_spec {
            Some(spec) => spec.clone(),
            None => TableSpec {
                keyspace: wire::read_string(body)?,
                table: wire::read_string(body)?,
            },
        };
        let name = wire::read_string(body)?;
        let data_type = DataType::read(body)?;
        columns.push(ColumnSpec {
            table_spec,
            name,
            data_type,
        });
    }

    // Result-set metadata follows from protocol v2 onward.
    let result_metadata = if version >= ProtocolVersion::V2 {
        decode_rows_metadata(body, version)?.0
    } else {
        RowsMetadata::default()
    };

    Ok(PreparedResult {
        id,
        result_metadata_id,
        metadata: PreparedMetadata {
            columns,
            pk_indices,
        },
        result_metadata,
    })
}

fn decode_schema_change(
    body: &mut Bytes,
    version: ProtocolVersion,
) -> Result<SchemaChange, ZirconError> {
    if version >= ProtocolVersion::V3 {
        let change_type = wire::read_string(body)?;
        let target_kind = wire::read_string(body)?;
        let target = match target_kind.as_str() {
            "KEYSPACE" => SchemaChangeTarget::Keyspace {
                keyspace: wire::read_string(body)?,
            },
            "TABLE" => SchemaChangeTarget::Table {
                keyspace: wire::read_string(body)?,
                table: wire::read_string(body)?,
            },
            "TYPE" => SchemaChangeTarget::Type {
                keyspace: wire::read_string(body)?,
                name: wire::read_string(body)?,
            },
            "FUNCTION" => SchemaChangeTarget::Function {
                keyspace: wire::read_string(body)?,
                name: wire::read_string(body)?,
                arg_types: wire::read_string_list(body)?,
            },
            "AGGREGATE" => SchemaChangeTarget::Aggregate {
                keyspace: wire::read_string(body)?,
                name: wire::read_string(body)?,
                arg_types: wire::read_string_list(body)?,
            },
            other => {
                return Err(ZirconError::Protocol(format!(
                    "Unknown schema change target '{other}'"
                )));
            }
        };
        Ok(SchemaChange {
            change_type,
            target,
        })
    } else {
        // v1/v2: <change><keyspace><table>, an empty table meaning the
        // keyspace itself changed.
        let change_type = wire::read_string(body)?;
        let keyspace = wire::read_string(body)?;
        let table = wire::read_string(body)?;
        let target = if table.is_empty() {
            SchemaChangeTarget::Keyspace { keyspace }
        } else {
            SchemaChangeTarget::Table { keyspace, table }
        };
        Ok(SchemaChange {
            change_type,
            target,
        })
    }
}

fn decode_event(body: &mut Bytes, version: ProtocolVersion) -> Result<ServerEvent, ZirconError> {
    let event_type = wire::read_string(body)?;
    Ok(match event_type.as_str() {
        "TOPOLOGY_CHANGE" => ServerEvent::TopologyChange {
            change: wire::read_string(body)?,
            address: wire::read_inet(body)?,
        },
        "STATUS_CHANGE" => ServerEvent::StatusChange {
            change: wire::read_string(body)?,
            address: wire::read_inet(body)?,
        },
        "SCHEMA_CHANGE" => ServerEvent::SchemaChange(decode_schema_change(body, version)?),
        other => {
            return Err(ZirconError::Protocol(format!(
                "Unknown event type '{other}'"
            )));
        }
    })
}

/// Decodes raw rows into typed values using the given column specs. The
/// specs come either from the rows metadata itself or, when SKIP_METADATA
/// was requested, from the prepared statement.
pub fn decode_row_values(
    raw: &RawRows,
    columns: &[ColumnSpec],
    version: ProtocolVersion,
) -> Result<Vec<crate::core::protocol::types::Row>, ZirconError> {
    use crate::core::protocol::codec::deserialize_value;

    let width = columns.len();
    if width == 0 && raw.rows_count > 0 && !raw.cells.is_empty() {
        return Err(ZirconError::Protocol(
            "Rows carry cells but no column metadata is available".into(),
        ));
    }
    let mut rows = Vec::with_capacity(raw.rows_count);
    for chunk in raw.cells.chunks(width.max(1)) {
        let mut row = Vec::with_capacity(width);
        for (cell, spec) in chunk.iter().zip(columns) {
            match cell {
                None => row.push(None),
                Some(payload) => row.push(Some(deserialize_value(
                    payload.clone(),
                    &spec.data_type,
                    version,
                )?)),
            }
        }
        rows.push(row);
    }
    Ok(rows)
}
