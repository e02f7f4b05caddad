// src/core/protocol/duration.rs

//! The CQL `duration` type: months, days and nanoseconds, each an
//! independently-signed component, vint-encoded on the wire. Includes the
//! textual format used in CQL literals (`1y2mo3d4h5m6s7ms8us9ns`).

use crate::core::errors::ZirconError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

const NANOS_PER_MICRO: i64 = 1_000;
const NANOS_PER_MILLI: i64 = 1_000_000;
const NANOS_PER_SECOND: i64 = 1_000_000_000;
const NANOS_PER_MINUTE: i64 = 60 * NANOS_PER_SECOND;
const NANOS_PER_HOUR: i64 = 60 * NANOS_PER_MINUTE;
const MONTHS_PER_YEAR: i32 = 12;

/// A CQL duration. All three components carry the sign; the server rejects
/// mixed signs, and so does [`CqlDuration::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CqlDuration {
    pub months: i32,
    pub days: i32,
    pub nanoseconds: i64,
}

impl CqlDuration {
    pub fn new(months: i32, days: i32, nanoseconds: i64) -> Result<Self, ZirconError> {
        let has_negative = months < 0 || days < 0 || nanoseconds < 0;
        let has_positive = months > 0 || days > 0 || nanoseconds > 0;
        if has_negative && has_positive {
            return Err(ZirconError::TypeError(
                "All duration components must have the same sign".into(),
            ));
        }
        Ok(Self {
            months,
            days,
            nanoseconds,
        })
    }

    /// Decodes three vints from a value payload.
    pub fn decode(buf: &mut Bytes) -> Result<Self, ZirconError> {
        let months = decode_vint(buf)? as i32;
        let days = decode_vint(buf)? as i32;
        let nanoseconds = decode_vint(buf)?;
        Ok(Self {
            months,
            days,
            nanoseconds,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        encode_vint(buf, self.months as i64);
        encode_vint(buf, self.days as i64);
        encode_vint(buf, self.nanoseconds);
    }

    /// Parses the CQL literal form, e.g. `"1y2mo3d4h5m6s7ms8us9ns"`.
    /// A single leading `-` negates every component. Units may be omitted
    /// but must appear in decreasing order and at most once.
    pub fn parse(input: &str) -> Result<Self, ZirconError> {
        let (negative, s) = match input.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, input),
        };
        if s.is_empty() {
            return Err(ZirconError::TypeError("Empty duration literal".into()));
        }

        let mut months: i64 = 0;
        let mut days: i64 = 0;
        let mut nanos: i64 = 0;
        let mut last_unit_rank = 0u8;

        let bytes = s.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            let digit_start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if digit_start == i {
                return Err(ZirconError::TypeError(format!(
                    "Invalid duration literal '{input}': expected a number at offset {i}"
                )));
            }
            let number: i64 = s[digit_start..i].parse().map_err(|_| {
                ZirconError::TypeError(format!("Duration component out of range in '{input}'"))
            })?;

            let unit_start = i;
            while i < bytes.len() && !bytes[i].is_ascii_digit() {
                i += 1;
            }
            let unit = &s[unit_start..i];
            let (rank, target, scale) = match unit {
                "y" => (1, Target::Months, MONTHS_PER_YEAR as i64),
                "mo" => (2, Target::Months, 1),
                "w" => (3, Target::Days, 7),
                "d" => (4, Target::Days, 1),
                "h" => (5, Target::Nanos, NANOS_PER_HOUR),
                "m" => (6, Target::Nanos, NANOS_PER_MINUTE),
                "s" => (7, Target::Nanos, NANOS_PER_SECOND),
                "ms" => (8, Target::Nanos, NANOS_PER_MILLI),
                "us" | "\u{00b5}s" => (9, Target::Nanos, NANOS_PER_MICRO),
                "ns" => (10, Target::Nanos, 1),
                other => {
                    return Err(ZirconError::TypeError(format!(
                        "Invalid duration unit '{other}' in '{input}'"
                    )));
                }
            };
            if rank <= last_unit_rank {
                return Err(ZirconError::TypeError(format!(
                    "Duration units must be unique and in decreasing order in '{input}'"
                )));
            }
            last_unit_rank = rank;

            let add = number
                .checked_mul(scale)
                .ok_or_else(|| ZirconError::TypeError(format!("Duration overflow in '{input}'")))?;
            let slot = match target {
                Target::Months => &mut months,
                Target::Days => &mut days,
                Target::Nanos => &mut nanos,
            };
            *slot = slot.checked_add(add).ok_or_else(|| {
                ZirconError::TypeError(format!("Duration overflow in '{input}'"))
            })?;
        }

        let sign = if negative { -1i64 } else { 1 };
        let months: i32 = (months * sign).try_into().map_err(|_| {
            ZirconError::TypeError(format!("Months out of range in duration '{input}'"))
        })?;
        let days: i32 = (days * sign).try_into().map_err(|_| {
            ZirconError::TypeError(format!("Days out of range in duration '{input}'"))
        })?;
        CqlDuration::new(months, days, nanos * sign)
    }
}

enum Target {
    Months,
    Days,
    Nanos,
}

impl fmt::Display for CqlDuration {
    /// Formats back into the literal form, largest unit first.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.months == 0 && self.days == 0 && self.nanoseconds == 0 {
            return write!(f, "0s");
        }
        if self.months < 0 || self.days < 0 || self.nanoseconds < 0 {
            write!(f, "-")?;
        }
        let months = self.months.unsigned_abs();
        let days = self.days.unsigned_abs();
        let mut nanos = self.nanoseconds.unsigned_abs();

        if months / 12 > 0 {
            write!(f, "{}y", months / 12)?;
        }
        if months % 12 > 0 {
            write!(f, "{}mo", months % 12)?;
        }
        if days > 0 {
            write!(f, "{days}d")?;
        }

        for (unit, size) in [
            ("h", NANOS_PER_HOUR as u64),
            ("m", NANOS_PER_MINUTE as u64),
            ("s", NANOS_PER_SECOND as u64),
            ("ms", NANOS_PER_MILLI as u64),
            ("us", NANOS_PER_MICRO as u64),
            ("ns", 1),
        ] {
            if nanos / size > 0 {
                write!(f, "{}{unit}", nanos / size)?;
                nanos %= size;
            }
        }
        Ok(())
    }
}

// --- vint codec ---
//
// Cassandra vints: the number of leading 1-bits in the first byte gives the
// number of extra bytes; the value is zigzag-encoded.

fn zigzag_encode(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn zigzag_decode(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

/// Encodes one signed vint.
pub fn encode_vint(buf: &mut BytesMut, value: i64) {
    let v = zigzag_encode(value);
    let lead = v.leading_zeros();
    // Number of value bits determines how many continuation bytes we need.
    let extra_bytes = match 64 - lead {
        0..=7 => 0usize,
        bits => ((bits as usize).saturating_sub(1)) / 7,
    }
    .min(8);

    if extra_bytes == 0 {
        buf.put_u8(v as u8);
        return;
    }
    if extra_bytes == 8 {
        buf.put_u8(0xFF);
        buf.put_u64(v);
        return;
    }

    let total_bytes = extra_bytes + 1;
    let mut bytes = [0u8; 9];
    let mut rest = v;
    for slot in (1..total_bytes).rev() {
        bytes[slot] = (rest & 0xFF) as u8;
        rest >>= 8;
    }
    // First byte: `extra_bytes` leading ones, a zero, then the value's top bits.
    let mask = !(0xFFu16 >> extra_bytes) as u8;
    bytes[0] = mask | (rest as u8);
    buf.put_slice(&bytes[..total_bytes]);
}

/// Decodes one signed vint.
pub fn decode_vint(buf: &mut Bytes) -> Result<i64, ZirconError> {
    if !buf.has_remaining() {
        return Err(ZirconError::Protocol("Truncated vint".into()));
    }
    let first = buf.get_u8();
    let extra_bytes = first.leading_ones() as usize;
    if buf.remaining() < extra_bytes {
        return Err(ZirconError::Protocol("Truncated vint".into()));
    }
    let mut value: u64 = if extra_bytes == 8 {
        0
    } else {
        (first & (0xFFu8 >> extra_bytes)) as u64
    };
    for _ in 0..extra_bytes {
        value = (value << 8) | buf.get_u8() as u64;
    }
    Ok(zigzag_decode(value))
}
