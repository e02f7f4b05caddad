// src/core/protocol/mod.rs

//! The CQL native binary protocol: framing, request/response bodies and the
//! value codec.

pub mod codec;
pub mod consistency;
pub mod duration;
pub mod frame;
pub mod request;
pub mod response;
pub mod types;
pub mod wire;

pub use consistency::Consistency;
pub use duration::CqlDuration;
pub use frame::{Frame, FrameCodec, FrameFlags, Opcode, ProtocolVersion};
pub use request::{BatchEntry, BatchKind, BatchRequest, QueryParameters, Request};
pub use response::{CqlResult, RawRows, Response, ServerEvent};
pub use types::{ColumnSpec, CqlValue, DataType, Row, TableSpec};
