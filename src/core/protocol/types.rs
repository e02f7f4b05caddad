// src/core/protocol/types.rs

//! The CQL type system as seen on the wire: type codes in result metadata,
//! column specifications, and the in-memory value representation.

use crate::core::errors::ZirconError;
use crate::core::protocol::duration::CqlDuration;
use crate::core::protocol::wire;
use bytes::Bytes;
use std::net::IpAddr;
use uuid::Uuid;

/// A CQL data type, as described in RESULT metadata and PREPARED column
/// specifications. Parameterized types carry their element types.
#[derive(Debug, Clone, PartialEq)]
pub enum DataType {
    Custom(String),
    Ascii,
    Bigint,
    Blob,
    Boolean,
    Counter,
    Decimal,
    Double,
    Float,
    Int,
    Text,
    Timestamp,
    Uuid,
    Varchar,
    Varint,
    Timeuuid,
    Inet,
    Date,
    Time,
    Smallint,
    Tinyint,
    Duration,
    List(Box<DataType>),
    Map(Box<DataType>, Box<DataType>),
    Set(Box<DataType>),
    Udt {
        keyspace: String,
        name: String,
        fields: Vec<(String, DataType)>,
    },
    Tuple(Vec<DataType>),
}

impl DataType {
    /// Reads an `[option]` (type code plus parameters) from result metadata.
    pub fn read(buf: &mut Bytes) -> Result<Self, ZirconError> {
        let code = wire::read_short(buf)?;
        Ok(match code {
            0x0000 => DataType::Custom(wire::read_string(buf)?),
            0x0001 => DataType::Ascii,
            0x0002 => DataType::Bigint,
            0x0003 => DataType::Blob,
            0x0004 => DataType::Boolean,
            0x0005 => DataType::Counter,
            0x0006 => DataType::Decimal,
            0x0007 => DataType::Double,
            0x0008 => DataType::Float,
            0x0009 => DataType::Int,
            0x000A => DataType::Text,
            0x000B => DataType::Timestamp,
            0x000C => DataType::Uuid,
            0x000D => DataType::Varchar,
            0x000E => DataType::Varint,
            0x000F => DataType::Timeuuid,
            0x0010 => DataType::Inet,
            0x0011 => DataType::Date,
            0x0012 => DataType::Time,
            0x0013 => DataType::Smallint,
            0x0014 => DataType::Tinyint,
            0x0015 => DataType::Duration,
            0x0020 => DataType::List(Box::new(DataType::read(buf)?)),
            0x0021 => {
                let key = DataType::read(buf)?;
                let value = DataType::read(buf)?;
                DataType::Map(Box::new(key), Box::new(value))
            }
            0x0022 => DataType::Set(Box::new(DataType::read(buf)?)),
            0x0030 => {
                let keyspace = wire::read_string(buf)?;
                let name = wire::read_string(buf)?;
                let field_count = wire::read_short(buf)? as usize;
                let mut fields = Vec::with_capacity(field_count);
                for _ in 0..field_count {
                    let field_name = wire::read_string(buf)?;
                    let field_type = DataType::read(buf)?;
                    fields.push((field_name, field_type));
                }
                DataType::Udt {
                    keyspace,
                    name,
                    fields,
                }
            }
            0x0031 => {
                let count = wire::read_short(buf)? as usize;
                let mut types = Vec::with_capacity(count);
                for _ in 0..count {
                    types.push(DataType::read(buf)?);
                }
                DataType::Tuple(types)
            }
            other => {
                return Err(ZirconError::Protocol(format!(
                    "Unknown type code {other:#06x}"
                )));
            }
        })
    }

    /// Parses a type from its textual CQL name as stored in schema tables,
    /// e.g. `map<text, frozen<list<int>>>`. UDT references resolve lazily and
    /// are surfaced as `Custom` carrying the raw name.
    pub fn parse_cql_name(s: &str) -> Self {
        let s = s.trim();
        if let Some(inner) = strip_wrapper(s, "frozen") {
            return DataType::parse_cql_name(inner);
        }
        if let Some(inner) = strip_wrapper(s, "list") {
            return DataType::List(Box::new(DataType::parse_cql_name(inner)));
        }
        if let Some(inner) = strip_wrapper(s, "set") {
            return DataType::Set(Box::new(DataType::parse_cql_name(inner)));
        }
        if let Some(inner) = strip_wrapper(s, "map") {
            if let Some((k, v)) = split_top_level(inner) {
                return DataType::Map(
                    Box::new(DataType::parse_cql_name(k)),
                    Box::new(DataType::parse_cql_name(v)),
                );
            }
        }
        if let Some(inner) = strip_wrapper(s, "tuple") {
            let mut types = Vec::new();
            let mut rest = inner;
            while let Some((head, tail)) = split_top_level(rest) {
                types.push(DataType::parse_cql_name(head));
                rest = tail;
            }
            types.push(DataType::parse_cql_name(rest));
            return DataType::Tuple(types);
        }
        match s {
            "ascii" => DataType::Ascii,
            "bigint" => DataType::Bigint,
            "blob" => DataType::Blob,
            "boolean" => DataType::Boolean,
            "counter" => DataType::Counter,
            "decimal" => DataType::Decimal,
            "double" => DataType::Double,
            "float" => DataType::Float,
            "int" => DataType::Int,
            "text" => DataType::Text,
            "timestamp" => DataType::Timestamp,
            "uuid" => DataType::Uuid,
            "varchar" => DataType::Varchar,
            "varint" => DataType::Varint,
            "timeuuid" => DataType::Timeuuid,
            "inet" => DataType::Inet,
            "date" => DataType::Date,
            "time" => DataType::Time,
            "smallint" => DataType::Smallint,
            "tinyint" => DataType::Tinyint,
            "duration" => DataType::Duration,
            other => DataType::Custom(other.to_owned()),
        }
    }
}

fn strip_wrapper<'a>(s: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = s.strip_prefix(keyword)?.trim_start();
    let rest = rest.strip_prefix('<')?;
    let rest = rest.strip_suffix('>')?;
    Some(rest.trim())
}

/// Splits `a, b` at the first comma not nested inside angle brackets.
fn split_top_level(s: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => return Some((s[..i].trim(), s[i + 1..].trim())),
            _ => {}
        }
    }
    None
}

/// The table a column belongs to, from result metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub keyspace: String,
    pub table: String,
}

/// One column of a result set or prepared statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub table_spec: TableSpec,
    pub name: String,
    pub data_type: DataType,
}

/// A CQL value as bound to a statement or read from a row.
///
/// `Null` and `Unset` are distinct: null actively deletes (and creates a
/// tombstone), unset leaves the column untouched. Unset requires protocol
/// v4+ and is rejected locally on older versions.
#[derive(Debug, Clone, PartialEq)]
pub enum CqlValue {
    Null,
    Unset,
    Ascii(String),
    Bigint(i64),
    Blob(Bytes),
    Boolean(bool),
    Counter(i64),
    /// An arbitrary-precision decimal: scale plus big-endian two's-complement
    /// unscaled value, exactly as on the wire.
    Decimal {
        scale: i32,
        unscaled: Vec<u8>,
    },
    Double(f64),
    Float(f32),
    Int(i32),
    Text(String),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    Uuid(Uuid),
    /// Big-endian two's-complement arbitrary-precision integer.
    Varint(Vec<u8>),
    Timeuuid(Uuid),
    Inet(IpAddr),
    /// Days since the epoch, unsigned, with the epoch centered at 2^31.
    Date(u32),
    /// Nanoseconds since midnight.
    Time(i64),
    Smallint(i16),
    Tinyint(i8),
    Duration(CqlDuration),
    List(Vec<CqlValue>),
    Set(Vec<CqlValue>),
    Map(Vec<(CqlValue, CqlValue)>),
    /// Tuple fields may individually be null.
    Tuple(Vec<Option<CqlValue>>),
    Udt {
        keyspace: String,
        name: String,
        fields: Vec<(String, Option<CqlValue>)>,
    },
    Custom {
        class: String,
        data: Bytes,
    },
}

impl CqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CqlValue::Null)
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, CqlValue::Unset)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CqlValue::Text(s) | CqlValue::Ascii(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            CqlValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bigint(&self) -> Option<i64> {
        match self {
            CqlValue::Bigint(v) | CqlValue::Counter(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            CqlValue::Uuid(u) | CqlValue::Timeuuid(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_inet(&self) -> Option<IpAddr> {
        match self {
            CqlValue::Inet(a) => Some(*a),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&Bytes> {
        match self {
            CqlValue::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            CqlValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&[CqlValue]> {
        match self {
            CqlValue::Set(items) | CqlValue::List(items) => Some(items),
            _ => None,
        }
    }
}

/// One decoded row: a value per selected column, `None` for null cells.
pub type Row = Vec<Option<CqlValue>>;
