// src/core/protocol/frame.rs

//! Implements the CQL native protocol frame structure and the corresponding
//! `Encoder` and `Decoder` for network communication.
//!
//! A frame is a fixed header (8 bytes on protocol v1/v2, 9 bytes on v3+)
//! followed by an opaque body whose length the header carries. Both request
//! and response directions are framed the same way.

use crate::core::errors::ZirconError;
use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Upper bound on a frame body, mirroring the server's default
/// `native_transport_max_frame_size`. Anything larger is treated as a
/// malformed frame and is fatal to the connection.
const MAX_FRAME_LENGTH: usize = 256 * 1024 * 1024;

/// A protocol version the driver can speak. DSE versions are supersets of
/// v4 with their own version bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolVersion {
    V1,
    V2,
    V3,
    V4,
    V5,
    DseV1,
    DseV2,
}

impl ProtocolVersion {
    /// All versions the driver supports, best first. Version negotiation
    /// walks this list downward on PROTOCOL_ERROR.
    pub const DESCENDING: [ProtocolVersion; 7] = [
        ProtocolVersion::DseV2,
        ProtocolVersion::DseV1,
        ProtocolVersion::V5,
        ProtocolVersion::V4,
        ProtocolVersion::V3,
        ProtocolVersion::V2,
        ProtocolVersion::V1,
    ];

    /// The version nibble/byte carried in the frame header (request
    /// direction; responses have the top bit set).
    pub fn code(&self) -> u8 {
        match self {
            ProtocolVersion::V1 => 0x01,
            ProtocolVersion::V2 => 0x02,
            ProtocolVersion::V3 => 0x03,
            ProtocolVersion::V4 => 0x04,
            ProtocolVersion::V5 => 0x05,
            ProtocolVersion::DseV1 => 0x41,
            ProtocolVersion::DseV2 => 0x42,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, ZirconError> {
        Ok(match code & 0x7f {
            0x01 => ProtocolVersion::V1,
            0x02 => ProtocolVersion::V2,
            0x03 => ProtocolVersion::V3,
            0x04 => ProtocolVersion::V4,
            0x05 => ProtocolVersion::V5,
            0x41 => ProtocolVersion::DseV1,
            0x42 => ProtocolVersion::DseV2,
            other => return Err(ZirconError::UnsupportedProtocolVersion(other)),
        })
    }

    /// The next version to try when the server rejects this one, or `None`
    /// once the floor is reached.
    pub fn downgrade(&self) -> Option<ProtocolVersion> {
        match self {
            ProtocolVersion::DseV2 => Some(ProtocolVersion::DseV1),
            ProtocolVersion::DseV1 => Some(ProtocolVersion::V4),
            ProtocolVersion::V5 => Some(ProtocolVersion::V4),
            ProtocolVersion::V4 => Some(ProtocolVersion::V3),
            ProtocolVersion::V3 => Some(ProtocolVersion::V2),
            ProtocolVersion::V2 => Some(ProtocolVersion::V1),
            ProtocolVersion::V1 => None,
        }
    }

    /// Frame header length: v1/v2 use a single-byte stream id, v3+ two bytes.
    pub fn header_len(&self) -> usize {
        match self {
            ProtocolVersion::V1 | ProtocolVersion::V2 => 8,
            _ => 9,
        }
    }

    /// Number of stream ids a single connection can multiplex.
    pub fn max_streams(&self) -> usize {
        match self {
            ProtocolVersion::V1 | ProtocolVersion::V2 => 128,
            _ => 32768,
        }
    }

    /// Feature level relative to the OSS protocol. DSE versions behave as v4
    /// supersets for every feature the driver cares about.
    fn feature_level(&self) -> u8 {
        match self {
            ProtocolVersion::V1 => 1,
            ProtocolVersion::V2 => 2,
            ProtocolVersion::V3 => 3,
            ProtocolVersion::V4 => 4,
            ProtocolVersion::V5 => 5,
            ProtocolVersion::DseV1 | ProtocolVersion::DseV2 => 4,
        }
    }

    pub fn supports_unset(&self) -> bool {
        self.feature_level() >= 4
    }

    pub fn supports_custom_payload(&self) -> bool {
        self.feature_level() >= 4
    }

    pub fn supports_named_values(&self) -> bool {
        self.feature_level() >= 3
    }

    pub fn supports_paging(&self) -> bool {
        self.feature_level() >= 2
    }

    pub fn supports_batch(&self) -> bool {
        self.feature_level() >= 2
    }

    pub fn supports_per_query_timestamp(&self) -> bool {
        self.feature_level() >= 3
    }

    pub fn is_beta(&self) -> bool {
        matches!(self, ProtocolVersion::V5)
    }

    pub fn is_dse(&self) -> bool {
        matches!(self, ProtocolVersion::DseV1 | ProtocolVersion::DseV2)
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolVersion::DseV1 => write!(f, "DSEv1"),
            ProtocolVersion::DseV2 => write!(f, "DSEv2"),
            other => write!(f, "v{}", other.code()),
        }
    }
}

/// Frame opcodes. CREDENTIALS only exists on v1; AUTH_* replace it from v2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Opcode {
    Error,
    Startup,
    Ready,
    Authenticate,
    Credentials,
    Options,
    Supported,
    Query,
    Result,
    Prepare,
    Execute,
    Register,
    Event,
    Batch,
    AuthChallenge,
    AuthResponse,
    AuthSuccess,
}

impl Opcode {
    pub fn code(&self) -> u8 {
        match self {
            Opcode::Error => 0x00,
            Opcode::Startup => 0x01,
            Opcode::Ready => 0x02,
            Opcode::Authenticate => 0x03,
            Opcode::Credentials => 0x04,
            Opcode::Options => 0x05,
            Opcode::Supported => 0x06,
            Opcode::Query => 0x07,
            Opcode::Result => 0x08,
            Opcode::Prepare => 0x09,
            Opcode::Execute => 0x0A,
            Opcode::Register => 0x0B,
            Opcode::Event => 0x0C,
            Opcode::Batch => 0x0D,
            Opcode::AuthChallenge => 0x0E,
            Opcode::AuthResponse => 0x0F,
            Opcode::AuthSuccess => 0x10,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, ZirconError> {
        Ok(match code {
            0x00 => Opcode::Error,
            0x01 => Opcode::Startup,
            0x02 => Opcode::Ready,
            0x03 => Opcode::Authenticate,
            0x04 => Opcode::Credentials,
            0x05 => Opcode::Options,
            0x06 => Opcode::Supported,
            0x07 => Opcode::Query,
            0x08 => Opcode::Result,
            0x09 => Opcode::Prepare,
            0x0A => Opcode::Execute,
            0x0B => Opcode::Register,
            0x0C => Opcode::Event,
            0x0D => Opcode::Batch,
            0x0E => Opcode::AuthChallenge,
            0x0F => Opcode::AuthResponse,
            0x10 => Opcode::AuthSuccess,
            other => {
                return Err(ZirconError::Protocol(format!(
                    "Unknown opcode {other:#04x}"
                )));
            }
        })
    }
}

bitflags! {
    /// Header flags. WARNING and CUSTOM_PAYLOAD exist from v4, USE_BETA from v5.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FrameFlags: u8 {
        const COMPRESSION    = 0x01;
        const TRACING        = 0x02;
        const CUSTOM_PAYLOAD = 0x04;
        const WARNING        = 0x08;
        const USE_BETA       = 0x10;
    }
}

/// A complete frame, request or response. The body keeps whatever the header
/// said it contains; interpretation happens one layer up.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub version: ProtocolVersion,
    pub flags: FrameFlags,
    pub stream: i16,
    pub opcode: Opcode,
    pub body: Bytes,
}

impl Frame {
    pub fn request(
        version: ProtocolVersion,
        flags: FrameFlags,
        stream: i16,
        opcode: Opcode,
        body: Bytes,
    ) -> Self {
        Self {
            version,
            flags,
            stream,
            opcode,
            body,
        }
    }
}

/// A `tokio_util::codec` implementation for encoding and decoding CQL frames.
///
/// The codec is created once the protocol version for the connection is
/// chosen and reused for its whole lifetime; the header layout depends on it.
#[derive(Debug)]
pub struct FrameCodec {
    version: ProtocolVersion,
}

impl FrameCodec {
    pub fn new(version: ProtocolVersion) -> Self {
        Self { version }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ZirconError;

    /// Encodes a request frame: header bytes then the raw body.
    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.body.len() > MAX_FRAME_LENGTH {
            return Err(ZirconError::Protocol(format!(
                "Frame body of {} bytes exceeds the {MAX_FRAME_LENGTH} byte limit",
                item.body.len()
            )));
        }
        dst.reserve(self.version.header_len() + item.body.len());
        dst.put_u8(item.version.code());
        let mut flags = item.flags;
        if item.version.is_beta() {
            flags |= FrameFlags::USE_BETA;
        }
        dst.put_u8(flags.bits());
        match self.version {
            ProtocolVersion::V1 | ProtocolVersion::V2 => {
                if !(i8::MIN as i16..=i8::MAX as i16).contains(&item.stream) {
                    return Err(ZirconError::Protocol(format!(
                        "Stream id {} out of range for {}",
                        item.stream, self.version
                    )));
                }
                dst.put_i8(item.stream as i8);
            }
            _ => dst.put_i16(item.stream),
        }
        dst.put_u8(item.opcode.code());
        dst.put_u32(item.body.len() as u32);
        dst.put_slice(&item.body);
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ZirconError;

    /// Decodes one response frame from the accumulated buffer.
    ///
    /// Returns `Ok(None)` while the buffer does not yet contain a complete
    /// frame, letting the `Framed` stream wait for more data. The body is
    /// split off without copying.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header_len = self.version.header_len();
        if src.len() < header_len {
            return Ok(None);
        }

        // Peek the header without consuming so partial bodies stay buffered.
        let version = ProtocolVersion::from_code(src[0])?;
        let flags = FrameFlags::from_bits_truncate(src[1]);
        let (stream, opcode_at) = match self.version {
            ProtocolVersion::V1 | ProtocolVersion::V2 => (src[2] as i8 as i16, 3),
            _ => (i16::from_be_bytes([src[2], src[3]]), 4),
        };
        let opcode = Opcode::from_code(src[opcode_at])?;
        let body_len = u32::from_be_bytes([
            src[opcode_at + 1],
            src[opcode_at + 2],
            src[opcode_at + 3],
            src[opcode_at + 4],
        ]) as usize;

        if body_len > MAX_FRAME_LENGTH {
            return Err(ZirconError::Protocol(format!(
                "Frame body of {body_len} bytes exceeds the {MAX_FRAME_LENGTH} byte limit"
            )));
        }
        if src.len() < header_len + body_len {
            // Reserve what we already know is coming.
            src.reserve(header_len + body_len - src.len());
            return Ok(None);
        }

        src.advance(header_len);
        let body = src.split_to(body_len).freeze();

        if flags.contains(FrameFlags::COMPRESSION) {
            // The driver never negotiates compression, so a compressed
            // response is a peer violation and fatal to the connection.
            return Err(ZirconError::Protocol(
                "Received a compressed frame on a connection without negotiated compression".into(),
            ));
        }

        Ok(Some(Frame {
            version,
            flags,
            stream,
            opcode,
            body,
        }))
    }
}
