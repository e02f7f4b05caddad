use bytes::{Buf, Bytes, BytesMut};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use uuid::Uuid;
use zircon::core::protocol::codec::{deserialize_value, infer_type, serialize_value};
use zircon::core::protocol::duration::CqlDuration;
use zircon::core::protocol::frame::ProtocolVersion;
use zircon::core::protocol::types::{CqlValue, DataType};

/// Serializes one value slot and splits off the length prefix, returning
/// the raw payload (`None` for null/unset markers).
fn slot(value: &CqlValue, data_type: &DataType, version: ProtocolVersion) -> Option<Bytes> {
    let mut buf = BytesMut::new();
    serialize_value(value, data_type, version, &mut buf).unwrap();
    let mut bytes = buf.freeze();
    let len = bytes.get_i32();
    if len < 0 {
        return None;
    }
    Some(bytes.split_to(len as usize))
}

fn roundtrip(value: CqlValue, data_type: DataType) {
    let payload = slot(&value, &data_type, ProtocolVersion::V4).expect("non-null payload");
    let decoded = deserialize_value(payload, &data_type, ProtocolVersion::V4).unwrap();
    assert_eq!(decoded, value);
}

#[test]
fn test_scalar_roundtrips() {
    roundtrip(CqlValue::Int(-123456), DataType::Int);
    roundtrip(CqlValue::Bigint(i64::MIN), DataType::Bigint);
    roundtrip(CqlValue::Smallint(-5), DataType::Smallint);
    roundtrip(CqlValue::Tinyint(7), DataType::Tinyint);
    roundtrip(CqlValue::Boolean(true), DataType::Boolean);
    roundtrip(CqlValue::Double(3.5), DataType::Double);
    roundtrip(CqlValue::Float(-0.25), DataType::Float);
    roundtrip(CqlValue::Text("héllo".into()), DataType::Text);
    roundtrip(CqlValue::Ascii("plain".into()), DataType::Ascii);
    roundtrip(CqlValue::Blob(Bytes::from_static(b"\x00\x01\x02")), DataType::Blob);
    roundtrip(CqlValue::Timestamp(1_700_000_000_000), DataType::Timestamp);
    roundtrip(CqlValue::Date(1 << 31), DataType::Date);
    roundtrip(CqlValue::Time(86_399_999_999_999), DataType::Time);
    roundtrip(
        CqlValue::Uuid(Uuid::from_u128(0x0123456789abcdef0123456789abcdef)),
        DataType::Uuid,
    );
    roundtrip(
        CqlValue::Inet(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3))),
        DataType::Inet,
    );
    roundtrip(
        CqlValue::Inet(IpAddr::V6(Ipv6Addr::LOCALHOST)),
        DataType::Inet,
    );
    roundtrip(
        CqlValue::Varint(vec![0x01, 0x00]),
        DataType::Varint,
    );
    roundtrip(
        CqlValue::Decimal {
            scale: 2,
            unscaled: vec![0x04, 0xd2],
        },
        DataType::Decimal,
    );
    roundtrip(
        CqlValue::Duration(CqlDuration::new(1, 2, 3).unwrap()),
        DataType::Duration,
    );
}

#[test]
fn test_int_wire_layout_is_big_endian() {
    let payload = slot(&CqlValue::Int(0x01020304), &DataType::Int, ProtocolVersion::V4).unwrap();
    assert_eq!(payload.as_ref(), &[0x01, 0x02, 0x03, 0x04]);
}

#[test]
fn test_null_is_minus_one_and_unset_minus_two() {
    let mut buf = BytesMut::new();
    serialize_value(&CqlValue::Null, &DataType::Int, ProtocolVersion::V4, &mut buf).unwrap();
    assert_eq!(buf.as_ref(), (-1i32).to_be_bytes());

    let mut buf = BytesMut::new();
    serialize_value(&CqlValue::Unset, &DataType::Int, ProtocolVersion::V4, &mut buf).unwrap();
    assert_eq!(buf.as_ref(), (-2i32).to_be_bytes());
}

#[test]
fn test_unset_requires_protocol_v4() {
    let mut buf = BytesMut::new();
    assert!(
        serialize_value(&CqlValue::Unset, &DataType::Int, ProtocolVersion::V3, &mut buf).is_err()
    );
    // DSE versions are v4 supersets.
    assert!(
        serialize_value(&CqlValue::Unset, &DataType::Int, ProtocolVersion::DseV1, &mut buf)
            .is_ok()
    );
}

#[test]
fn test_collection_roundtrips() {
    roundtrip(
        CqlValue::List(vec![CqlValue::Int(1), CqlValue::Int(2), CqlValue::Int(3)]),
        DataType::List(Box::new(DataType::Int)),
    );
    roundtrip(
        CqlValue::Set(vec![CqlValue::Text("a".into()), CqlValue::Text("b".into())]),
        DataType::Set(Box::new(DataType::Text)),
    );
    roundtrip(
        CqlValue::Map(vec![
            (CqlValue::Text("k1".into()), CqlValue::Bigint(10)),
            (CqlValue::Text("k2".into()), CqlValue::Bigint(20)),
        ]),
        DataType::Map(Box::new(DataType::Text), Box::new(DataType::Bigint)),
    );
    // Nested.
    roundtrip(
        CqlValue::List(vec![CqlValue::Set(vec![CqlValue::Int(9)])]),
        DataType::List(Box::new(DataType::Set(Box::new(DataType::Int)))),
    );
}

#[test]
fn test_null_collection_elements_rejected() {
    let mut buf = BytesMut::new();
    let result = serialize_value(
        &CqlValue::List(vec![CqlValue::Int(1), CqlValue::Null]),
        &DataType::List(Box::new(DataType::Int)),
        ProtocolVersion::V4,
        &mut buf,
    );
    assert!(result.is_err());
}

#[test]
fn test_tuple_with_null_fields() {
    let value = CqlValue::Tuple(vec![
        Some(CqlValue::Int(1)),
        None,
        Some(CqlValue::Text("x".into())),
    ]);
    let data_type = DataType::Tuple(vec![DataType::Int, DataType::Bigint, DataType::Text]);
    roundtrip(value, data_type);
}

#[test]
fn test_udt_binds_fields_by_declared_order() {
    let data_type = DataType::Udt {
        keyspace: "ks".into(),
        name: "address".into(),
        fields: vec![
            ("street".into(), DataType::Text),
            ("number".into(), DataType::Int),
        ],
    };
    // Value carries fields in the opposite order; wire order must follow
    // the type declaration.
    let value = CqlValue::Udt {
        keyspace: "ks".into(),
        name: "address".into(),
        fields: vec![
            ("number".into(), Some(CqlValue::Int(42))),
            ("street".into(), Some(CqlValue::Text("main".into()))),
        ],
    };
    let payload = slot(&value, &data_type, ProtocolVersion::V4).unwrap();
    let decoded = deserialize_value(payload, &data_type, ProtocolVersion::V4).unwrap();
    assert_eq!(
        decoded,
        CqlValue::Udt {
            keyspace: "ks".into(),
            name: "address".into(),
            fields: vec![
                ("street".into(), Some(CqlValue::Text("main".into()))),
                ("number".into(), Some(CqlValue::Int(42))),
            ],
        }
    );
}

#[test]
fn test_udt_missing_trailing_fields_decode_as_none() {
    let data_type = DataType::Udt {
        keyspace: "ks".into(),
        name: "grown".into(),
        fields: vec![
            ("old".into(), DataType::Int),
            ("added_later".into(), DataType::Text),
        ],
    };
    // Payload written before the type grew: only the first field.
    let mut payload = BytesMut::new();
    payload.extend_from_slice(&4i32.to_be_bytes());
    payload.extend_from_slice(&7i32.to_be_bytes());
    let decoded =
        deserialize_value(payload.freeze(), &data_type, ProtocolVersion::V4).unwrap();
    assert_eq!(
        decoded,
        CqlValue::Udt {
            keyspace: "ks".into(),
            name: "grown".into(),
            fields: vec![
                ("old".into(), Some(CqlValue::Int(7))),
                ("added_later".into(), None),
            ],
        }
    );
}

#[test]
fn test_type_mismatch_is_an_error() {
    let mut buf = BytesMut::new();
    assert!(
        serialize_value(
            &CqlValue::Text("nope".into()),
            &DataType::Int,
            ProtocolVersion::V4,
            &mut buf
        )
        .is_err()
    );
}

#[test]
fn test_v2_collections_use_short_lengths() {
    let value = CqlValue::List(vec![CqlValue::Int(5)]);
    let data_type = DataType::List(Box::new(DataType::Int));
    let payload = slot(&value, &data_type, ProtocolVersion::V2).unwrap();
    // u16 count, u16 element length, 4 element bytes.
    assert_eq!(payload.len(), 2 + 2 + 4);
    let decoded = deserialize_value(payload, &data_type, ProtocolVersion::V2).unwrap();
    assert_eq!(decoded, value);
}

#[test]
fn test_infer_type_matches_values() {
    assert_eq!(infer_type(&CqlValue::Int(1)).unwrap(), DataType::Int);
    assert_eq!(
        infer_type(&CqlValue::List(vec![CqlValue::Text("x".into())])).unwrap(),
        DataType::List(Box::new(DataType::Text))
    );
    assert_eq!(
        infer_type(&CqlValue::Timeuuid(Uuid::nil())).unwrap(),
        DataType::Timeuuid
    );
}

#[test]
fn test_ascii_rejects_non_ascii() {
    let mut buf = BytesMut::new();
    assert!(
        serialize_value(
            &CqlValue::Ascii("café".into()),
            &DataType::Ascii,
            ProtocolVersion::V4,
            &mut buf
        )
        .is_err()
    );
}

#[test]
fn test_time_range_is_enforced() {
    let mut buf = BytesMut::new();
    assert!(
        serialize_value(
            &CqlValue::Time(86_400_000_000_000),
            &DataType::Time,
            ProtocolVersion::V4,
            &mut buf
        )
        .is_err()
    );
}
