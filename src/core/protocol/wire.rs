// src/core/protocol/wire.rs

//! Primitive readers and writers for the notations of the CQL native
//! protocol: `[int]`, `[long]`, `[short]`, `[string]`, `[bytes]`,
//! `[string map]`, `[inet]` and friends.
//!
//! Readers consume from a `Bytes` cursor so that body payloads can be sliced
//! without copying; writers append to a `BytesMut`.

use crate::core::errors::ZirconError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use uuid::Uuid;

/// Ensures at least `n` readable bytes remain, or reports a truncated frame.
fn ensure(buf: &Bytes, n: usize) -> Result<(), ZirconError> {
    if buf.remaining() < n {
        return Err(ZirconError::Protocol(format!(
            "Truncated frame body: needed {n} more byte(s), {} available",
            buf.remaining()
        )));
    }
    Ok(())
}

pub fn read_byte(buf: &mut Bytes) -> Result<u8, ZirconError> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

pub fn read_short(buf: &mut Bytes) -> Result<u16, ZirconError> {
    ensure(buf, 2)?;
    Ok(buf.get_u16())
}

pub fn read_int(buf: &mut Bytes) -> Result<i32, ZirconError> {
    ensure(buf, 4)?;
    Ok(buf.get_i32())
}

pub fn read_long(buf: &mut Bytes) -> Result<i64, ZirconError> {
    ensure(buf, 8)?;
    Ok(buf.get_i64())
}

/// Reads `n` raw bytes as a zero-copy slice of the frame body.
pub fn read_raw(buf: &mut Bytes, n: usize) -> Result<Bytes, ZirconError> {
    ensure(buf, n)?;
    Ok(buf.split_to(n))
}

/// `[string]`: a UTF-8 string prefixed by its u16 length.
pub fn read_string(buf: &mut Bytes) -> Result<String, ZirconError> {
    let len = read_short(buf)? as usize;
    let raw = read_raw(buf, len)?;
    Ok(std::str::from_utf8(&raw)?.to_owned())
}

/// `[long string]`: a UTF-8 string prefixed by its i32 length.
pub fn read_long_string(buf: &mut Bytes) -> Result<String, ZirconError> {
    let len = read_int(buf)?;
    if len < 0 {
        return Err(ZirconError::Protocol(format!(
            "Negative [long string] length {len}"
        )));
    }
    let raw = read_raw(buf, len as usize)?;
    Ok(std::str::from_utf8(&raw)?.to_owned())
}

/// `[short bytes]`: a blob prefixed by its u16 length. Used for prepared ids
/// and paging-state-free contexts.
pub fn read_short_bytes(buf: &mut Bytes) -> Result<Bytes, ZirconError> {
    let len = read_short(buf)? as usize;
    read_raw(buf, len)
}

/// `[bytes]`: a blob prefixed by its i32 length; a negative length denotes
/// a null value.
pub fn read_bytes(buf: &mut Bytes) -> Result<Option<Bytes>, ZirconError> {
    let len = read_int(buf)?;
    if len < 0 {
        return Ok(None);
    }
    Ok(Some(read_raw(buf, len as usize)?))
}

/// `[string list]`: u16 count of `[string]`.
pub fn read_string_list(buf: &mut Bytes) -> Result<Vec<String>, ZirconError> {
    let count = read_short(buf)? as usize;
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(read_string(buf)?);
    }
    Ok(items)
}

/// `[string map]`: u16 count of `[string]` key/value pairs.
pub fn read_string_map(buf: &mut Bytes) -> Result<HashMap<String, String>, ZirconError> {
    let count = read_short(buf)? as usize;
    let mut map = HashMap::with_capacity(count);
    for _ in 0..count {
        let key = read_string(buf)?;
        let value = read_string(buf)?;
        map.insert(key, value);
    }
    Ok(map)
}

/// `[string multimap]`: u16 count of `[string]` → `[string list]` pairs.
/// SUPPORTED responses use this shape.
pub fn read_string_multimap(buf: &mut Bytes) -> Result<HashMap<String, Vec<String>>, ZirconError> {
    let count = read_short(buf)? as usize;
    let mut map = HashMap::with_capacity(count);
    for _ in 0..count {
        let key = read_string(buf)?;
        let values = read_string_list(buf)?;
        map.insert(key, values);
    }
    Ok(map)
}

/// `[bytes map]`: u16 count of `[string]` → `[bytes]` pairs (custom payloads).
pub fn read_bytes_map(buf: &mut Bytes) -> Result<HashMap<String, Option<Bytes>>, ZirconError> {
    let count = read_short(buf)? as usize;
    let mut map = HashMap::with_capacity(count);
    for _ in 0..count {
        let key = read_string(buf)?;
        let value = read_bytes(buf)?;
        map.insert(key, value);
    }
    Ok(map)
}

/// `[uuid]`: 16 raw bytes.
pub fn read_uuid(buf: &mut Bytes) -> Result<Uuid, ZirconError> {
    let raw = read_raw(buf, 16)?;
    Ok(Uuid::from_slice(&raw)?)
}

/// `[inetaddr]`: one length byte (4 or 16) followed by the address bytes.
pub fn read_inetaddr(buf: &mut Bytes) -> Result<IpAddr, ZirconError> {
    let len = read_byte(buf)? as usize;
    let raw = read_raw(buf, len)?;
    match len {
        4 => {
            let octets: [u8; 4] = raw.as_ref().try_into().expect("length checked");
            Ok(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        16 => {
            let octets: [u8; 16] = raw.as_ref().try_into().expect("length checked");
            Ok(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        other => Err(ZirconError::Protocol(format!(
            "Invalid inet address length {other}"
        ))),
    }
}

/// `[inet]`: `[inetaddr]` followed by an i32 port. STATUS_CHANGE and
/// TOPOLOGY_CHANGE events carry node addresses in this shape.
pub fn read_inet(buf: &mut Bytes) -> Result<SocketAddr, ZirconError> {
    let addr = read_inetaddr(buf)?;
    let port = read_int(buf)?;
    if !(0..=u16::MAX as i32).contains(&port) {
        return Err(ZirconError::Protocol(format!("Invalid inet port {port}")));
    }
    Ok(SocketAddr::new(addr, port as u16))
}

// --- Writers ---

pub fn write_byte(buf: &mut BytesMut, v: u8) {
    buf.put_u8(v);
}

pub fn write_short(buf: &mut BytesMut, v: u16) {
    buf.put_u16(v);
}

pub fn write_int(buf: &mut BytesMut, v: i32) {
    buf.put_i32(v);
}

pub fn write_long(buf: &mut BytesMut, v: i64) {
    buf.put_i64(v);
}

pub fn write_string(buf: &mut BytesMut, s: &str) -> Result<(), ZirconError> {
    let len: u16 = s
        .len()
        .try_into()
        .map_err(|_| ZirconError::Protocol(format!("[string] too long: {} bytes", s.len())))?;
    buf.put_u16(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

pub fn write_long_string(buf: &mut BytesMut, s: &str) -> Result<(), ZirconError> {
    let len: i32 = s
        .len()
        .try_into()
        .map_err(|_| ZirconError::Protocol(format!("[long string] too long: {} bytes", s.len())))?;
    buf.put_i32(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

pub fn write_short_bytes(buf: &mut BytesMut, b: &[u8]) -> Result<(), ZirconError> {
    let len: u16 = b
        .len()
        .try_into()
        .map_err(|_| ZirconError::Protocol(format!("[short bytes] too long: {} bytes", b.len())))?;
    buf.put_u16(len);
    buf.put_slice(b);
    Ok(())
}

pub fn write_bytes(buf: &mut BytesMut, b: Option<&[u8]>) -> Result<(), ZirconError> {
    match b {
        Some(b) => {
            let len: i32 = b
                .len()
                .try_into()
                .map_err(|_| ZirconError::Protocol(format!("[bytes] too long: {} bytes", b.len())))?;
            buf.put_i32(len);
            buf.put_slice(b);
        }
        None => buf.put_i32(-1),
    }
    Ok(())
}

/// Writes the `unset` marker for a value slot (protocol v4+ only; callers
/// gate on version).
pub fn write_unset(buf: &mut BytesMut) {
    buf.put_i32(-2);
}

pub fn write_string_list(buf: &mut BytesMut, items: &[String]) -> Result<(), ZirconError> {
    let count: u16 = items
        .len()
        .try_into()
        .map_err(|_| ZirconError::Protocol("[string list] too long".into()))?;
    buf.put_u16(count);
    for item in items {
        write_string(buf, item)?;
    }
    Ok(())
}

pub fn write_string_map(
    buf: &mut BytesMut,
    map: &HashMap<String, String>,
) -> Result<(), ZirconError> {
    let count: u16 = map
        .len()
        .try_into()
        .map_err(|_| ZirconError::Protocol("[string map] too long".into()))?;
    buf.put_u16(count);
    for (key, value) in map {
        write_string(buf, key)?;
        write_string(buf, value)?;
    }
    Ok(())
}

pub fn write_bytes_map(
    buf: &mut BytesMut,
    map: &HashMap<String, Bytes>,
) -> Result<(), ZirconError> {
    let count: u16 = map
        .len()
        .try_into()
        .map_err(|_| ZirconError::Protocol("[bytes map] too long".into()))?;
    buf.put_u16(count);
    for (key, value) in map {
        write_string(buf, key)?;
        write_bytes(buf, Some(value))?;
    }
    Ok(())
}

pub fn write_consistency(buf: &mut BytesMut, c: crate::core::protocol::consistency::Consistency) {
    buf.put_u16(c.code());
}

pub fn write_inetaddr(buf: &mut BytesMut, addr: &IpAddr) {
    match addr {
        IpAddr::V4(v4) => {
            buf.put_u8(4);
            buf.put_slice(&v4.octets());
        }
        IpAddr::V6(v6) => {
            buf.put_u8(16);
            buf.put_slice(&v6.octets());
        }
    }
}
