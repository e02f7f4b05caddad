// src/core/protocol/request.rs

//! Request body encoders: STARTUP, AUTH_RESPONSE, OPTIONS, QUERY, PREPARE,
//! EXECUTE, BATCH and REGISTER, across protocol v1 through v5 / DSE.

use crate::core::errors::ZirconError;
use crate::core::protocol::codec::{infer_type, serialize_value};
use crate::core::protocol::consistency::Consistency;
use crate::core::protocol::frame::{Opcode, ProtocolVersion};
use crate::core::protocol::types::{CqlValue, DataType};
use crate::core::protocol::wire;
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;

// QUERY/EXECUTE parameter flags. A [byte] through v4, widened to [int] in v5.
const FLAG_VALUES: u32 = 0x01;
const FLAG_SKIP_METADATA: u32 = 0x02;
const FLAG_PAGE_SIZE: u32 = 0x04;
const FLAG_WITH_PAGING_STATE: u32 = 0x08;
const FLAG_WITH_SERIAL_CONSISTENCY: u32 = 0x10;
const FLAG_WITH_DEFAULT_TIMESTAMP: u32 = 0x20;
const FLAG_WITH_KEYSPACE: u32 = 0x80;

// BATCH flags share the serial-consistency/timestamp/keyspace bits.
const BATCH_FLAG_WITH_SERIAL_CONSISTENCY: u32 = 0x10;
const BATCH_FLAG_WITH_DEFAULT_TIMESTAMP: u32 = 0x20;
const BATCH_FLAG_WITH_KEYSPACE: u32 = 0x80;

/// Execution parameters shared by QUERY and EXECUTE.
#[derive(Debug, Clone, Default)]
pub struct QueryParameters {
    pub consistency: Option<Consistency>,
    pub serial_consistency: Option<Consistency>,
    /// Positional values. Named parameters are resolved to positions before
    /// reaching this layer.
    pub values: Vec<CqlValue>,
    /// Column types from prepared metadata; when present, values are
    /// serialized against them instead of inferred types.
    pub value_types: Option<Vec<DataType>>,
    pub skip_metadata: bool,
    pub page_size: Option<i32>,
    pub paging_state: Option<Bytes>,
    pub default_timestamp: Option<i64>,
    /// Per-request keyspace, protocol v5 only.
    pub keyspace: Option<String>,
}

impl QueryParameters {
    fn effective_consistency(&self) -> Consistency {
        self.consistency.unwrap_or(Consistency::LocalOne)
    }

    fn serialize_values(
        &self,
        version: ProtocolVersion,
        dst: &mut BytesMut,
    ) -> Result<(), ZirconError> {
        let count: u16 = self
            .values
            .len()
            .try_into()
            .map_err(|_| ZirconError::TypeError("Too many bound values".into()))?;
        dst.put_u16(count);
        for (i, value) in self.values.iter().enumerate() {
            let data_type = match self.value_types.as_ref().and_then(|t| t.get(i)) {
                Some(t) => t.clone(),
                None => infer_type(value)?,
            };
            serialize_value(value, &data_type, version, dst)?;
        }
        Ok(())
    }

    /// Encodes the `<query_parameters>` block used from protocol v2 onward.
    fn encode(&self, version: ProtocolVersion, dst: &mut BytesMut) -> Result<(), ZirconError> {
        wire::write_consistency(dst, self.effective_consistency());

        let mut flags = 0u32;
        if !self.values.is_empty() {
            flags |= FLAG_VALUES;
        }
        if self.skip_metadata {
            flags |= FLAG_SKIP_METADATA;
        }
        if self.page_size.is_some() && version.supports_paging() {
            flags |= FLAG_PAGE_SIZE;
        }
        if self.paging_state.is_some() && version.supports_paging() {
            flags |= FLAG_WITH_PAGING_STATE;
        }
        if self.serial_consistency.is_some() {
            flags |= FLAG_WITH_SERIAL_CONSISTENCY;
        }
        if self.default_timestamp.is_some() && version.supports_per_query_timestamp() {
            flags |= FLAG_WITH_DEFAULT_TIMESTAMP;
        }
        if self.keyspace.is_some() && version == ProtocolVersion::V5 {
            flags |= FLAG_WITH_KEYSPACE;
        }

        if version == ProtocolVersion::V5 {
            dst.put_u32(flags);
        } else {
            dst.put_u8(flags as u8);
        }

        if flags & FLAG_VALUES != 0 {
            self.serialize_values(version, dst)?;
        }
        if flags & FLAG_PAGE_SIZE != 0 {
            wire::write_int(dst, self.page_size.expect("flag checked"));
        }
        if flags & FLAG_WITH_PAGING_STATE != 0 {
            wire::write_bytes(dst, self.paging_state.as_deref())?;
        }
        if flags & FLAG_WITH_SERIAL_CONSISTENCY != 0 {
            let serial = self.serial_consistency.expect("flag checked");
            if !serial.is_serial() {
                return Err(ZirconError::InvalidQuery(format!(
                    "{serial} is not a serial consistency level"
                )));
            }
            wire::write_consistency(dst, serial);
        }
        if flags & FLAG_WITH_DEFAULT_TIMESTAMP != 0 {
            wire::write_long(dst, self.default_timestamp.expect("flag checked"));
        }
        if flags & FLAG_WITH_KEYSPACE != 0 {
            wire::write_string(dst, self.keyspace.as_deref().expect("flag checked"))?;
        }
        Ok(())
    }
}

/// The kind of statement a batch entry carries.
#[derive(Debug, Clone)]
pub enum BatchEntry {
    Query {
        query: String,
        values: Vec<CqlValue>,
        value_types: Option<Vec<DataType>>,
    },
    Prepared {
        id: Bytes,
        values: Vec<CqlValue>,
        value_types: Option<Vec<DataType>>,
    },
}

/// Logged / unlogged / counter, as the BATCH body's leading byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchKind {
    #[default]
    Logged,
    Unlogged,
    Counter,
}

impl BatchKind {
    fn code(&self) -> u8 {
        match self {
            BatchKind::Logged => 0,
            BatchKind::Unlogged => 1,
            BatchKind::Counter => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub kind: BatchKind,
    pub entries: Vec<BatchEntry>,
    pub consistency: Option<Consistency>,
    pub serial_consistency: Option<Consistency>,
    pub default_timestamp: Option<i64>,
    pub keyspace: Option<String>,
}

/// A request the driver can send. `encode_body` produces the frame body for
/// the negotiated protocol version; the frame layer adds the header.
#[derive(Debug, Clone)]
pub enum Request {
    Startup {
        options: HashMap<String, String>,
    },
    Options,
    AuthResponse {
        token: Option<Bytes>,
    },
    /// Protocol v1 only; replaced by AUTH_RESPONSE from v2.
    Credentials {
        credentials: HashMap<String, String>,
    },
    Query {
        query: String,
        params: QueryParameters,
    },
    Prepare {
        query: String,
    },
    Execute {
        id: Bytes,
        result_metadata_id: Option<Bytes>,
        params: QueryParameters,
    },
    Batch(BatchRequest),
    Register {
        events: Vec<String>,
    },
}

impl Request {
    pub fn opcode(&self) -> Opcode {
        match self {
            Request::Startup { .. } => Opcode::Startup,
            Request::Options => Opcode::Options,
            Request::AuthResponse { .. } => Opcode::AuthResponse,
            Request::Credentials { .. } => Opcode::Credentials,
            Request::Query { .. } => Opcode::Query,
            Request::Prepare { .. } => Opcode::Prepare,
            Request::Execute { .. } => Opcode::Execute,
            Request::Batch(_) => Opcode::Batch,
            Request::Register { .. } => Opcode::Register,
        }
    }

    pub fn encode_body(&self, version: ProtocolVersion) -> Result<Bytes, ZirconError> {
        let mut body = BytesMut::new();
        match self {
            Request::Startup { options } => {
                wire::write_string_map(&mut body, options)?;
            }
            Request::Options => {}
            Request::AuthResponse { token } => {
                wire::write_bytes(&mut body, token.as_deref())?;
            }
            Request::Credentials { credentials } => {
                wire::write_string_map(&mut body, credentials)?;
            }
            Request::Query { query, params } => {
                wire::write_long_string(&mut body, query)?;
                if version == ProtocolVersion::V1 {
                    if !params.values.is_empty() {
                        return Err(ZirconError::InvalidQuery(
                            "Protocol v1 does not support bound values in QUERY".into(),
                        ));
                    }
                    wire::write_consistency(&mut body, params.effective_consistency());
                } else {
                    params.encode(version, &mut body)?;
                }
            }
            Request::Prepare { query } => {
                wire::write_long_string(&mut body, query)?;
                if version == ProtocolVersion::V5 {
                    // v5 PREPARE carries a flags [int]; no flag is ever set
                    // here because the per-request keyspace rides on EXECUTE.
                    body.put_u32(0);
                }
            }
            Request::Execute {
                id,
                result_metadata_id,
                params,
            } => {
                wire::write_short_bytes(&mut body, id)?;
                if version == ProtocolVersion::V5 {
                    let metadata_id = result_metadata_id.as_ref().ok_or_else(|| {
                        ZirconError::Protocol(
                            "EXECUTE on protocol v5 requires the result metadata id".into(),
                        )
                    })?;
                    wire::write_short_bytes(&mut body, metadata_id)?;
                }
                if version == ProtocolVersion::V1 {
                    encode_positional_values(&mut body, &params.values, params.value_types.as_deref(), version)?;
                    wire::write_consistency(&mut body, params.effective_consistency());
                } else {
                    params.encode(version, &mut body)?;
                }
            }
            Request::Batch(batch) => {
                if !version.supports_batch() {
                    return Err(ZirconError::InvalidQuery(
                        "BATCH requires protocol v2 or later".into(),
                    ));
                }
                body.put_u8(batch.kind.code());
                let count: u16 = batch
                    .entries
                    .len()
                    .try_into()
                    .map_err(|_| ZirconError::InvalidQuery("Batch too large".into()))?;
                body.put_u16(count);
                for entry in &batch.entries {
                    match entry {
                        BatchEntry::Query {
                            query,
                            values,
                            value_types,
                        } => {
                            body.put_u8(0);
                            wire::write_long_string(&mut body, query)?;
                            encode_positional_values(
                                &mut body,
                                values,
                                value_types.as_deref(),
                                version,
                            )?;
                        }
                        BatchEntry::Prepared {
                            id,
                            values,
                            value_types,
                        } => {
                            body.put_u8(1);
                            wire::write_short_bytes(&mut body, id)?;
                            encode_positional_values(
                                &mut body,
                                values,
                                value_types.as_deref(),
                                version,
                            )?;
                        }
                    }
                }
                wire::write_consistency(
                    &mut body,
                    batch.consistency.unwrap_or(Consistency::LocalOne),
                );
                if version >= ProtocolVersion::V3 {
                    let mut flags = 0u32;
                    if batch.serial_consistency.is_some() {
                        flags |= BATCH_FLAG_WITH_SERIAL_CONSISTENCY;
                    }
                    if batch.default_timestamp.is_some() {
                        flags |= BATCH_FLAG_WITH_DEFAULT_TIMESTAMP;
                    }
                    if batch.keyspace.is_some() && version == ProtocolVersion::V5 {
                        flags |= BATCH_FLAG_WITH_KEYSPACE;
                    }
                    if version == ProtocolVersion::V5 {
                        body.put_u32(flags);
                    } else {
                        body.put_u8(flags as u8);
                    }
                    if flags & BATCH_FLAG_WITH_SERIAL_CONSISTENCY != 0 {
                        wire::write_consistency(
                            &mut body,
                            batch.serial_consistency.expect("flag checked"),
                        );
                    }
                    if flags & BATCH_FLAG_WITH_DEFAULT_TIMESTAMP != 0 {
                        wire::write_long(&mut body, batch.default_timestamp.expect("flag checked"));
                    }
                    if flags & BATCH_FLAG_WITH_KEYSPACE != 0 {
                        wire::write_string(&mut body, batch.keyspace.as_deref().expect("flag checked"))?;
                    }
                }
            }
            Request::Register { events } => {
                wire::write_string_list(&mut body, events)?;
            }
        }
        Ok(body.freeze())
    }
}

/// `<n><value_1>..<value_n>` as used by v1 EXECUTE and batch entries.
fn encode_positional_values(
    dst: &mut BytesMut,
    values: &[CqlValue],
    value_types: Option<&[DataType]>,
    version: ProtocolVersion,
) -> Result<(), ZirconError> {
    let count: u16 = values
        .len()
        .try_into()
        .map_err(|_| ZirconError::TypeError("Too many bound values".into()))?;
    dst.put_u16(count);
    for (i, value) in values.iter().enumerate() {
        let data_type = match value_types.and_then(|t| t.get(i)) {
            Some(t) => t.clone(),
            None => infer_type(value)?,
        };
        serialize_value(value, &data_type, version, dst)?;
    }
    Ok(())
}
