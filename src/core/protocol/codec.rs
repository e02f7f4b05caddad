// src/core/protocol/codec.rs

//! Serialization of [`CqlValue`]s into the protocol's value payloads and the
//! reverse, driven by the [`DataType`] of the target column.
//!
//! A value slot on the wire is an i32 length followed by that many payload
//! bytes; length −1 means null and length −2 (v4+) means unset.

use crate::core::errors::ZirconError;
use crate::core::protocol::duration::CqlDuration;
use crate::core::protocol::frame::ProtocolVersion;
use crate::core::protocol::types::{CqlValue, DataType};
use crate::core::protocol::wire;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

fn type_mismatch(expected: &DataType, value: &CqlValue) -> ZirconError {
    ZirconError::TypeError(format!(
        "Cannot serialize {value:?} into a column of type {expected:?}"
    ))
}

/// Serializes one value slot (length prefix plus payload) for the given
/// column type. `Null` and `Unset` never inspect the type.
pub fn serialize_value(
    value: &CqlValue,
    data_type: &DataType,
    version: ProtocolVersion,
    dst: &mut BytesMut,
) -> Result<(), ZirconError> {
    match value {
        CqlValue::Null => {
            dst.put_i32(-1);
            return Ok(());
        }
        CqlValue::Unset => {
            if !version.supports_unset() {
                return Err(ZirconError::TypeError(format!(
                    "Unset values require protocol v4+, connection negotiated {version}"
                )));
            }
            wire::write_unset(dst);
            return Ok(());
        }
        _ => {}
    }

    let mut payload = BytesMut::new();
    serialize_payload(value, data_type, version, &mut payload)?;
    wire::write_bytes(dst, Some(&payload))
}

/// Serializes the raw payload of a non-null value without the length prefix.
/// Collection elements on v3+ reuse the same layout recursively.
fn serialize_payload(
    value: &CqlValue,
    data_type: &DataType,
    version: ProtocolVersion,
    dst: &mut BytesMut,
) -> Result<(), ZirconError> {
    match (data_type, value) {
        (DataType::Ascii, CqlValue::Ascii(s)) => {
            if !s.is_ascii() {
                return Err(ZirconError::TypeError(format!(
                    "Non-ASCII data in ascii column: {s:?}"
                )));
            }
            dst.put_slice(s.as_bytes());
        }
        (DataType::Text | DataType::Varchar, CqlValue::Text(s)) => {
            dst.put_slice(s.as_bytes());
        }
        (DataType::Text | DataType::Varchar, CqlValue::Ascii(s)) => {
            dst.put_slice(s.as_bytes());
        }
        (DataType::Bigint, CqlValue::Bigint(v)) => dst.put_i64(*v),
        (DataType::Counter, CqlValue::Counter(v) | CqlValue::Bigint(v)) => dst.put_i64(*v),
        (DataType::Blob | DataType::Custom(_), CqlValue::Blob(b)) => dst.put_slice(b),
        (DataType::Custom(_), CqlValue::Custom { data, .. }) => dst.put_slice(data),
        (DataType::Boolean, CqlValue::Boolean(b)) => dst.put_u8(u8::from(*b)),
        (DataType::Decimal, CqlValue::Decimal { scale, unscaled }) => {
            dst.put_i32(*scale);
            dst.put_slice(unscaled);
        }
        (DataType::Double, CqlValue::Double(v)) => dst.put_f64(*v),
        (DataType::Float, CqlValue::Float(v)) => dst.put_f32(*v),
        (DataType::Int, CqlValue::Int(v)) => dst.put_i32(*v),
        (DataType::Timestamp, CqlValue::Timestamp(ms)) => dst.put_i64(*ms),
        (DataType::Uuid, CqlValue::Uuid(u)) => dst.put_slice(u.as_bytes()),
        (DataType::Timeuuid, CqlValue::Timeuuid(u) | CqlValue::Uuid(u)) => {
            dst.put_slice(u.as_bytes());
        }
        (DataType::Varint, CqlValue::Varint(raw)) => dst.put_slice(raw),
        (DataType::Inet, CqlValue::Inet(addr)) => match addr {
            std::net::IpAddr::V4(v4) => dst.put_slice(&v4.octets()),
            std::net::IpAddr::V6(v6) => dst.put_slice(&v6.octets()),
        },
        (DataType::Date, CqlValue::Date(days)) => dst.put_u32(*days),
        (DataType::Time, CqlValue::Time(nanos)) => {
            if !(0..86_400_000_000_000).contains(nanos) {
                return Err(ZirconError::TypeError(format!(
                    "time value {nanos} out of the 0..86400e9 nanosecond range"
                )));
            }
            dst.put_i64(*nanos);
        }
        (DataType::Smallint, CqlValue::Smallint(v)) => dst.put_i16(*v),
        (DataType::Tinyint, CqlValue::Tinyint(v)) => dst.put_i8(*v),
        (DataType::Duration, CqlValue::Duration(d)) => d.encode(dst),
        (DataType::List(elem), CqlValue::List(items))
        | (DataType::Set(elem), CqlValue::Set(items))
        | (DataType::Set(elem), CqlValue::List(items)) => {
            write_collection_len(dst, items.len(), version)?;
            for item in items {
                serialize_element(item, elem, version, dst)?;
            }
        }
        (DataType::Map(key_type, value_type), CqlValue::Map(entries)) => {
            write_collection_len(dst, entries.len(), version)?;
            for (k, v) in entries {
                serialize_element(k, key_type, version, dst)?;
                serialize_element(v, value_type, version, dst)?;
            }
        }
        (DataType::Tuple(types), CqlValue::Tuple(fields)) => {
            if fields.len() > types.len() {
                return Err(ZirconError::TypeError(format!(
                    "Tuple has {} fields but the type has {}",
                    fields.len(),
                    types.len()
                )));
            }
            for (field, field_type) in fields.iter().zip(types) {
                match field {
                    None => dst.put_i32(-1),
                    Some(v) => serialize_value(v, field_type, version, dst)?,
                }
            }
        }
        (
            DataType::Udt { fields: types, .. },
            CqlValue::Udt {
                fields: values, ..
            },
        ) => {
            // UDT fields are positional on the wire; bind by declared order
            // and null out anything the value does not carry.
            for (field_name, field_type) in types {
                let bound = values
                    .iter()
                    .find(|(name, _)| name == field_name)
                    .and_then(|(_, v)| v.as_ref());
                match bound {
                    None => dst.put_i32(-1),
                    Some(v) => serialize_value(v, field_type, version, dst)?,
                }
            }
        }
        (expected, value) => return Err(type_mismatch(expected, value)),
    }
    Ok(())
}

/// Collection elements: i32-length framed on v3+, u16-length framed on v1/v2.
/// Null elements are not permitted inside collections.
fn serialize_element(
    value: &CqlValue,
    data_type: &DataType,
    version: ProtocolVersion,
    dst: &mut BytesMut,
) -> Result<(), ZirconError> {
    if value.is_null() || value.is_unset() {
        return Err(ZirconError::TypeError(
            "Null and unset are not permitted inside collections".into(),
        ));
    }
    let mut payload = BytesMut::new();
    serialize_payload(value, data_type, version, &mut payload)?;
    if version >= ProtocolVersion::V3 {
        wire::write_bytes(dst, Some(&payload))?;
    } else {
        wire::write_short_bytes(dst, &payload)?;
    }
    Ok(())
}

fn write_collection_len(
    dst: &mut BytesMut,
    len: usize,
    version: ProtocolVersion,
) -> Result<(), ZirconError> {
    if version >= ProtocolVersion::V3 {
        let len: i32 = len
            .try_into()
            .map_err(|_| ZirconError::TypeError("Collection too large".into()))?;
        dst.put_i32(len);
    } else {
        let len: u16 = len
            .try_into()
            .map_err(|_| ZirconError::TypeError("Collection too large for protocol v2".into()))?;
        dst.put_u16(len);
    }
    Ok(())
}

/// Deserializes a non-null cell payload into a [`CqlValue`].
pub fn deserialize_value(
    mut payload: Bytes,
    data_type: &DataType,
    version: ProtocolVersion,
) -> Result<CqlValue, ZirconError> {
    let buf = &mut payload;
    Ok(match data_type {
        DataType::Ascii => CqlValue::Ascii(take_string(buf)?),
        DataType::Text | DataType::Varchar => CqlValue::Text(take_string(buf)?),
        DataType::Bigint => CqlValue::Bigint(take_i64(buf, "bigint")?),
        DataType::Counter => CqlValue::Counter(take_i64(buf, "counter")?),
        DataType::Blob => CqlValue::Blob(buf.split_to(buf.len())),
        DataType::Custom(class) => CqlValue::Custom {
            class: class.clone(),
            data: buf.split_to(buf.len()),
        },
        DataType::Boolean => CqlValue::Boolean(take_exact::<1>(buf, "boolean")?[0] != 0),
        DataType::Decimal => {
            let scale = wire::read_int(buf)?;
            CqlValue::Decimal {
                scale,
                unscaled: buf.split_to(buf.len()).to_vec(),
            }
        }
        DataType::Double => CqlValue::Double(f64::from_be_bytes(take_exact::<8>(buf, "double")?)),
        DataType::Float => CqlValue::Float(f32::from_be_bytes(take_exact::<4>(buf, "float")?)),
        DataType::Int => CqlValue::Int(i32::from_be_bytes(take_exact::<4>(buf, "int")?)),
        DataType::Timestamp => CqlValue::Timestamp(take_i64(buf, "timestamp")?),
        DataType::Uuid => CqlValue::Uuid(Uuid::from_bytes(take_exact::<16>(buf, "uuid")?)),
        DataType::Timeuuid => CqlValue::Timeuuid(Uuid::from_bytes(take_exact::<16>(buf, "timeuuid")?)),
        DataType::Varint => CqlValue::Varint(buf.split_to(buf.len()).to_vec()),
        DataType::Inet => match buf.len() {
            4 => CqlValue::Inet(std::net::IpAddr::V4(take_exact::<4>(buf, "inet")?.into())),
            16 => CqlValue::Inet(std::net::IpAddr::V6(take_exact::<16>(buf, "inet")?.into())),
            other => {
                return Err(ZirconError::Protocol(format!(
                    "inet cell with invalid length {other}"
                )));
            }
        },
        DataType::Date => CqlValue::Date(u32::from_be_bytes(take_exact::<4>(buf, "date")?)),
        DataType::Time => CqlValue::Time(take_i64(buf, "time")?),
        DataType::Smallint => CqlValue::Smallint(i16::from_be_bytes(take_exact::<2>(buf, "smallint")?)),
        DataType::Tinyint => CqlValue::Tinyint(take_exact::<1>(buf, "tinyint")?[0] as i8),
        DataType::Duration => CqlValue::Duration(CqlDuration::decode(buf)?),
        DataType::List(elem) => CqlValue::List(read_collection(buf, elem, version)?),
        DataType::Set(elem) => CqlValue::Set(read_collection(buf, elem, version)?),
        DataType::Map(key_type, value_type) => {
            let count = read_collection_len(buf, version)?;
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let key = read_element(buf, key_type, version)?;
                let value = read_element(buf, value_type, version)?;
                entries.push((key, value));
            }
            CqlValue::Map(entries)
        }
        DataType::Tuple(types) => {
            let mut fields = Vec::with_capacity(types.len());
            for field_type in types {
                // Trailing tuple fields may be absent entirely.
                if !buf.has_remaining() {
                    fields.push(None);
                    continue;
                }
                match wire::read_bytes(buf)? {
                    None => fields.push(None),
                    Some(raw) => fields.push(Some(deserialize_value(raw, field_type, version)?)),
                }
            }
            CqlValue::Tuple(fields)
        }
        DataType::Udt {
            keyspace,
            name,
            fields: types,
        } => {
            let mut fields = Vec::with_capacity(types.len());
            for (field_name, field_type) in types {
                if !buf.has_remaining() {
                    // Columns added to the UDT after the row was written.
                    fields.push((field_name.clone(), None));
                    continue;
                }
                match wire::read_bytes(buf)? {
                    None => fields.push((field_name.clone(), None)),
                    Some(raw) => fields.push((
                        field_name.clone(),
                        Some(deserialize_value(raw, field_type, version)?),
                    )),
                }
            }
            CqlValue::Udt {
                keyspace: keyspace.clone(),
                name: name.clone(),
                fields,
            }
        }
    })
}

/// Serializes just the payload of a non-null value, as routing-key
/// construction needs it; `None` for null/unset, which cannot route.
pub fn serialize_routing_component(
    value: &CqlValue,
    data_type: &DataType,
    version: ProtocolVersion,
) -> Result<Option<Bytes>, ZirconError> {
    if value.is_null() || value.is_unset() {
        return Ok(None);
    }
    let mut payload = BytesMut::new();
    serialize_payload(value, data_type, version, &mut payload)?;
    Ok(Some(payload.freeze()))
}

/// Infers a wire type for a value bound to a non-prepared statement, where
/// no server-provided metadata exists. Nulls and unsets carry no payload and
/// need no type.
pub fn infer_type(value: &CqlValue) -> Result<DataType, ZirconError> {
    Ok(match value {
        CqlValue::Null | CqlValue::Unset => DataType::Blob,
        CqlValue::Ascii(_) => DataType::Ascii,
        CqlValue::Bigint(_) => DataType::Bigint,
        CqlValue::Blob(_) => DataType::Blob,
        CqlValue::Boolean(_) => DataType::Boolean,
        CqlValue::Counter(_) => DataType::Counter,
        CqlValue::Decimal { .. } => DataType::Decimal,
        CqlValue::Double(_) => DataType::Double,
        CqlValue::Float(_) => DataType::Float,
        CqlValue::Int(_) => DataType::Int,
        CqlValue::Text(_) => DataType::Text,
        CqlValue::Timestamp(_) => DataType::Timestamp,
        CqlValue::Uuid(_) => DataType::Uuid,
        CqlValue::Varint(_) => DataType::Varint,
        CqlValue::Timeuuid(_) => DataType::Timeuuid,
        CqlValue::Inet(_) => DataType::Inet,
        CqlValue::Date(_) => DataType::Date,
        CqlValue::Time(_) => DataType::Time,
        CqlValue::Smallint(_) => DataType::Smallint,
        CqlValue::Tinyint(_) => DataType::Tinyint,
        CqlValue::Duration(_) => DataType::Duration,
        CqlValue::List(items) => {
            let elem = items
                .first()
                .map(infer_type)
                .transpose()?
                .unwrap_or(DataType::Blob);
            DataType::List(Box::new(elem))
        }
        CqlValue::Set(items) => {
            let elem = items
                .first()
                .map(infer_type)
                .transpose()?
                .unwrap_or(DataType::Blob);
            DataType::Set(Box::new(elem))
        }
        CqlValue::Map(entries) => {
            let (key, value) = match entries.first() {
                Some((k, v)) => (infer_type(k)?, infer_type(v)?),
                None => (DataType::Blob, DataType::Blob),
            };
            DataType::Map(Box::new(key), Box::new(value))
        }
        CqlValue::Tuple(fields) => {
            let mut types = Vec::with_capacity(fields.len());
            for field in fields {
                types.push(match field {
                    Some(v) => infer_type(v)?,
                    None => DataType::Blob,
                });
            }
            DataType::Tuple(types)
        }
        CqlValue::Udt {
            keyspace,
            name,
            fields,
        } => {
            let mut types = Vec::with_capacity(fields.len());
            for (field_name, field) in fields {
                let field_type = match field {
                    Some(v) => infer_type(v)?,
                    None => DataType::Blob,
                };
                types.push((field_name.clone(), field_type));
            }
            DataType::Udt {
                keyspace: keyspace.clone(),
                name: name.clone(),
                fields: types,
            }
        }
        CqlValue::Custom { class, .. } => DataType::Custom(class.clone()),
    })
}

fn take_string(buf: &mut Bytes) -> Result<String, ZirconError> {
    let raw = buf.split_to(buf.len());
    Ok(std::str::from_utf8(&raw)?.to_owned())
}

fn take_i64(buf: &mut Bytes, what: &str) -> Result<i64, ZirconError> {
    Ok(i64::from_be_bytes(take_exact::<8>(buf, what)?))
}

fn take_exact<const N: usize>(buf: &mut Bytes, what: &str) -> Result<[u8; N], ZirconError> {
    if buf.len() != N {
        return Err(ZirconError::Protocol(format!(
            "{what} cell has length {}, expected {N}",
            buf.len()
        )));
    }
    let raw = buf.split_to(N);
    Ok(raw.as_ref().try_into().expect("length checked"))
}

fn read_collection_len(buf: &mut Bytes, version: ProtocolVersion) -> Result<usize, ZirconError> {
    if version >= ProtocolVersion::V3 {
        let len = wire::read_int(buf)?;
        if len < 0 {
            return Err(ZirconError::Protocol(format!(
                "Negative collection length {len}"
            )));
        }
        Ok(len as usize)
    } else {
        Ok(wire::read_short(buf)? as usize)
    }
}

fn read_element(
    buf: &mut Bytes,
    data_type: &DataType,
    version: ProtocolVersion,
) -> Result<CqlValue, ZirconError> {
    let raw = if version >= ProtocolVersion::V3 {
        wire::read_bytes(buf)?.ok_or_else(|| {
            ZirconError::Protocol("Null element inside a collection".into())
        })?
    } else {
        wire::read_short_bytes(buf)?
    };
    deserialize_value(raw, data_type, version)
}

fn read_collection(
    buf: &mut Bytes,
    elem: &DataType,
    version: ProtocolVersion,
) -> Result<Vec<CqlValue>, ZirconError> {
    let count = read_collection_len(buf, version)?;
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(read_element(buf, elem, version)?);
    }
    Ok(items)
}
