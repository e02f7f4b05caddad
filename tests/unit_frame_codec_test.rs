use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use zircon::core::protocol::frame::{Frame, FrameCodec, FrameFlags, Opcode, ProtocolVersion};

fn encode(codec: &mut FrameCodec, frame: Frame) -> BytesMut {
    let mut buf = BytesMut::new();
    codec.encode(frame, &mut buf).unwrap();
    buf
}

#[test]
fn test_v4_header_layout() {
    let mut codec = FrameCodec::new(ProtocolVersion::V4);
    let frame = Frame::request(
        ProtocolVersion::V4,
        FrameFlags::empty(),
        7,
        Opcode::Options,
        Bytes::new(),
    );
    let buf = encode(&mut codec, frame);
    assert_eq!(buf.len(), 9);
    assert_eq!(buf[0], 0x04);
    assert_eq!(buf[1], 0x00);
    assert_eq!(i16::from_be_bytes([buf[2], buf[3]]), 7);
    assert_eq!(buf[4], 0x05); // OPTIONS
    assert_eq!(u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]), 0);
}

#[test]
fn test_v2_header_is_eight_bytes_with_i8_stream() {
    let mut codec = FrameCodec::new(ProtocolVersion::V2);
    let frame = Frame::request(
        ProtocolVersion::V2,
        FrameFlags::empty(),
        113,
        Opcode::Startup,
        Bytes::from_static(b"xy"),
    );
    let buf = encode(&mut codec, frame);
    assert_eq!(buf.len(), 8 + 2);
    assert_eq!(buf[0], 0x02);
    assert_eq!(buf[2] as i8, 113);
    assert_eq!(buf[3], 0x01); // STARTUP
}

#[test]
fn test_v2_stream_out_of_range_is_rejected() {
    let mut codec = FrameCodec::new(ProtocolVersion::V2);
    let frame = Frame::request(
        ProtocolVersion::V2,
        FrameFlags::empty(),
        1000,
        Opcode::Options,
        Bytes::new(),
    );
    let mut buf = BytesMut::new();
    assert!(codec.encode(frame, &mut buf).is_err());
}

#[test]
fn test_decode_roundtrip() {
    let mut codec = FrameCodec::new(ProtocolVersion::V4);
    let frame = Frame::request(
        ProtocolVersion::V4,
        FrameFlags::empty(),
        42,
        Opcode::Query,
        Bytes::from_static(b"hello world"),
    );
    let mut buf = encode(&mut codec, frame.clone());
    let decoded = codec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(decoded, frame);
    assert!(buf.is_empty());
}

#[test]
fn test_decode_waits_for_partial_header_and_body() {
    let mut codec = FrameCodec::new(ProtocolVersion::V4);
    let frame = Frame::request(
        ProtocolVersion::V4,
        FrameFlags::empty(),
        1,
        Opcode::Query,
        Bytes::from_static(b"0123456789"),
    );
    let full = encode(&mut codec, frame.clone());

    let mut buf = BytesMut::new();
    // Feed one byte at a time; only the final byte completes the frame.
    for (i, byte) in full.iter().enumerate() {
        buf.put_u8(*byte);
        let result = codec.decode(&mut buf).unwrap();
        if i + 1 < full.len() {
            assert!(result.is_none(), "frame decoded early at byte {i}");
        } else {
            assert_eq!(result.unwrap(), frame);
        }
    }
}

#[test]
fn test_decode_two_frames_from_one_buffer() {
    let mut codec = FrameCodec::new(ProtocolVersion::V4);
    let first = Frame::request(
        ProtocolVersion::V4,
        FrameFlags::empty(),
        1,
        Opcode::Query,
        Bytes::from_static(b"one"),
    );
    let second = Frame::request(
        ProtocolVersion::V4,
        FrameFlags::empty(),
        2,
        Opcode::Prepare,
        Bytes::from_static(b"two!"),
    );
    let mut buf = encode(&mut codec, first.clone());
    buf.extend_from_slice(&encode(&mut codec, second.clone()));

    assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), first);
    assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), second);
    assert!(codec.decode(&mut buf).unwrap().is_none());
}

#[test]
fn test_unknown_opcode_is_fatal() {
    let mut codec = FrameCodec::new(ProtocolVersion::V4);
    let mut buf = BytesMut::new();
    buf.put_u8(0x84); // response v4
    buf.put_u8(0x00);
    buf.put_i16(0);
    buf.put_u8(0x7F); // bogus opcode
    buf.put_u32(0);
    assert!(codec.decode(&mut buf).is_err());
}

#[test]
fn test_unsupported_version_byte_is_fatal() {
    let mut codec = FrameCodec::new(ProtocolVersion::V4);
    let mut buf = BytesMut::new();
    buf.put_u8(0x09);
    buf.put_u8(0x00);
    buf.put_i16(0);
    buf.put_u8(0x05);
    buf.put_u32(0);
    assert!(codec.decode(&mut buf).is_err());
}

#[test]
fn test_compressed_response_is_rejected() {
    let mut codec = FrameCodec::new(ProtocolVersion::V4);
    let mut buf = BytesMut::new();
    buf.put_u8(0x84);
    buf.put_u8(0x01); // COMPRESSION flag
    buf.put_i16(0);
    buf.put_u8(0x08); // RESULT
    buf.put_u32(2);
    buf.put_slice(b"zz");
    assert!(codec.decode(&mut buf).is_err());
}

#[test]
fn test_version_negotiation_ladder() {
    assert_eq!(
        ProtocolVersion::DseV2.downgrade(),
        Some(ProtocolVersion::DseV1)
    );
    assert_eq!(ProtocolVersion::DseV1.downgrade(), Some(ProtocolVersion::V4));
    assert_eq!(ProtocolVersion::V5.downgrade(), Some(ProtocolVersion::V4));
    assert_eq!(ProtocolVersion::V2.downgrade(), Some(ProtocolVersion::V1));
    assert_eq!(ProtocolVersion::V1.downgrade(), None);
}

#[test]
fn test_dse_versions_behave_as_v4_supersets() {
    assert!(ProtocolVersion::DseV1.supports_unset());
    assert!(ProtocolVersion::DseV2.supports_custom_payload());
    assert_eq!(ProtocolVersion::DseV1.header_len(), 9);
    assert_eq!(ProtocolVersion::V1.max_streams(), 128);
    assert_eq!(ProtocolVersion::V4.max_streams(), 32768);
}
