use bytes::BytesMut;
use proptest::prelude::*;
use zircon::core::protocol::duration::{CqlDuration, decode_vint, encode_vint};

#[test]
fn test_parse_full_literal() {
    let parsed = CqlDuration::parse("1y2mo3d4h5m6s7ms8us9ns").unwrap();
    let nanos = 4 * 3_600_000_000_000i64
        + 5 * 60_000_000_000
        + 6 * 1_000_000_000
        + 7 * 1_000_000
        + 8 * 1_000
        + 9;
    assert_eq!(parsed, CqlDuration::new(14, 3, nanos).unwrap());
}

#[test]
fn test_parse_format_roundtrip() {
    let original = CqlDuration::parse("1y2mo3d4h5m6s7ms8us9ns").unwrap();
    let reparsed = CqlDuration::parse(&original.to_string()).unwrap();
    assert_eq!(original, reparsed);
}

#[test]
fn test_parse_weeks_and_negative() {
    assert_eq!(
        CqlDuration::parse("2w").unwrap(),
        CqlDuration::new(0, 14, 0).unwrap()
    );
    assert_eq!(
        CqlDuration::parse("-1y2d").unwrap(),
        CqlDuration::new(-12, -2, 0).unwrap()
    );
}

#[test]
fn test_units_must_decrease_and_not_repeat() {
    assert!(CqlDuration::parse("1s2h").is_err());
    assert!(CqlDuration::parse("1d2d").is_err());
    assert!(CqlDuration::parse("").is_err());
    assert!(CqlDuration::parse("5parsecs").is_err());
}

#[test]
fn test_mixed_signs_rejected() {
    assert!(CqlDuration::new(1, -1, 0).is_err());
    assert!(CqlDuration::new(0, 1, -5).is_err());
    assert!(CqlDuration::new(-1, -1, -1).is_ok());
}

#[test]
fn test_zero_formats_as_zero_seconds() {
    assert_eq!(CqlDuration::new(0, 0, 0).unwrap().to_string(), "0s");
}

#[test]
fn test_wire_roundtrip() {
    let duration = CqlDuration::new(14, 3, 123_456_789).unwrap();
    let mut buf = BytesMut::new();
    duration.encode(&mut buf);
    let mut bytes = buf.freeze();
    assert_eq!(CqlDuration::decode(&mut bytes).unwrap(), duration);
    assert!(bytes.is_empty());
}

#[test]
fn test_vint_known_encodings() {
    // Zigzag: 0 → 0x00, -1 → 0x01, 1 → 0x02.
    for (value, expected) in [(0i64, vec![0x00u8]), (-1, vec![0x01]), (1, vec![0x02])] {
        let mut buf = BytesMut::new();
        encode_vint(&mut buf, value);
        assert_eq!(buf.to_vec(), expected, "encoding of {value}");
    }
}

#[test]
fn test_vint_boundary_values() {
    for value in [
        0i64,
        1,
        -1,
        63,
        64,
        -64,
        -65,
        i32::MAX as i64,
        i32::MIN as i64,
        i64::MAX,
        i64::MIN,
    ] {
        let mut buf = BytesMut::new();
        encode_vint(&mut buf, value);
        let mut bytes = buf.freeze();
        assert_eq!(decode_vint(&mut bytes).unwrap(), value);
        assert!(bytes.is_empty(), "trailing bytes for {value}");
    }
}

proptest! {
    #[test]
    fn prop_vint_roundtrip(value in any::<i64>()) {
        let mut buf = BytesMut::new();
        encode_vint(&mut buf, value);
        let mut bytes = buf.freeze();
        prop_assert_eq!(decode_vint(&mut bytes).unwrap(), value);
        prop_assert!(bytes.is_empty());
    }

    #[test]
    fn prop_duration_wire_roundtrip(months in -1000i32..1000, days in -10000i32..10000, nanos in any::<i64>()) {
        let duration = CqlDuration { months, days, nanoseconds: nanos };
        let mut buf = BytesMut::new();
        duration.encode(&mut buf);
        let mut bytes = buf.freeze();
        prop_assert_eq!(CqlDuration::decode(&mut bytes).unwrap(), duration);
    }
}
