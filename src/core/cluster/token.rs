// src/core/cluster/token.rs

//! Partitioner tokens and the tokenizers that produce them: Murmur3 (the
//! Cassandra variant with Java signed-byte semantics, not standard murmur3),
//! RandomPartitioner (MD5 modulo 2^127) and byte-ordered lexicographic
//! tokens.

use crate::core::errors::ZirconError;
use md5::{Digest, Md5};

/// A position on the ring. A ring only ever holds one variant, chosen by the
/// partitioner `system.local` reports.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Token {
    Murmur(i64),
    /// RandomPartitioner tokens live in `0..2^127`.
    Random(u128),
    Bytes(Vec<u8>),
}

/// Hashes routing keys to tokens and parses the token strings found in the
/// peers tables.
pub trait Tokenizer: Send + Sync + std::fmt::Debug {
    fn hash(&self, routing_key: &[u8]) -> Token;
    fn parse(&self, s: &str) -> Result<Token, ZirconError>;
}

/// Picks the tokenizer matching a partitioner class name, e.g.
/// `org.apache.cassandra.dht.Murmur3Partitioner`.
pub fn tokenizer_for_partitioner(
    partitioner: &str,
) -> Result<Box<dyn Tokenizer>, ZirconError> {
    if partitioner.ends_with("Murmur3Partitioner") {
        Ok(Box::new(Murmur3Tokenizer))
    } else if partitioner.ends_with("RandomPartitioner") {
        Ok(Box::new(RandomTokenizer))
    } else if partitioner.ends_with("ByteOrderedPartitioner")
        || partitioner.ends_with("OrderedByteType")
    {
        Ok(Box::new(ByteOrderedTokenizer))
    } else {
        Err(ZirconError::Metadata(format!(
            "Unsupported partitioner '{partitioner}'; token-aware routing is unavailable"
        )))
    }
}

/// Cassandra's Murmur3Partitioner. The hash is MurmurHash3 x64/128 with the
/// original Java implementation's quirks (signed tail bytes), so results
/// match the server bit for bit; the token is the first 64-bit half with
/// `i64::MIN` normalized to `i64::MAX`.
#[derive(Debug, Clone, Copy)]
pub struct Murmur3Tokenizer;

impl Tokenizer for Murmur3Tokenizer {
    fn hash(&self, routing_key: &[u8]) -> Token {
        let h1 = murmur3_x64_128_h1(routing_key);
        let token = if h1 == i64::MIN { i64::MAX } else { h1 };
        Token::Murmur(token)
    }

    fn parse(&self, s: &str) -> Result<Token, ZirconError> {
        s.parse::<i64>()
            .map(Token::Murmur)
            .map_err(|_| ZirconError::Metadata(format!("Invalid murmur3 token '{s}'")))
    }
}

const C1: i64 = 0x87c3_7b91_1142_53d5_u64 as i64;
const C2: i64 = 0x4cf5_ad43_2745_937f_u64 as i64;

#[inline]
fn fmix(mut k: i64) -> i64 {
    k ^= ((k as u64) >> 33) as i64;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd_u64 as i64);
    k ^= ((k as u64) >> 33) as i64;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53_u64 as i64);
    k ^= ((k as u64) >> 33) as i64;
    k
}

/// First half of MurmurHash3 x64/128, Java semantics.
fn murmur3_x64_128_h1(data: &[u8]) -> i64 {
    let length = data.len();
    let nblocks = length / 16;
    let mut h1: i64 = 0;
    let mut h2: i64 = 0;

    for block in 0..nblocks {
        let at = block * 16;
        let mut k1 = i64::from_le_bytes(data[at..at + 8].try_into().expect("block size"));
        let mut k2 = i64::from_le_bytes(data[at + 8..at + 16].try_into().expect("block size"));

        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(31);
        k1 = k1.wrapping_mul(C2);
        h1 ^= k1;
        h1 = h1.rotate_left(27);
        h1 = h1.wrapping_add(h2);
        h1 = h1.wrapping_mul(5).wrapping_add(0x52dc_e729);

        k2 = k2.wrapping_mul(C2);
        k2 = k2.rotate_left(33);
        k2 = k2.wrapping_mul(C1);
        h2 ^= k2;
        h2 = h2.rotate_left(31);
        h2 = h2.wrapping_add(h1);
        h2 = h2.wrapping_mul(5).wrapping_add(0x3849_5ab5);
    }

    // Tail bytes are widened as signed, matching Java's byte-to-long cast.
    let tail = &data[nblocks * 16..];
    let mut k1: i64 = 0;
    let mut k2: i64 = 0;
    if tail.len() > 8 {
        for i in (8..tail.len()).rev() {
            k2 ^= (tail[i] as i8 as i64) << ((i - 8) * 8);
        }
        k2 = k2.wrapping_mul(C2);
        k2 = k2.rotate_left(33);
        k2 = k2.wrapping_mul(C1);
        h2 ^= k2;
    }
    if !tail.is_empty() {
        for i in (0..tail.len().min(8)).rev() {
            k1 ^= (tail[i] as i8 as i64) << (i * 8);
        }
        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(31);
        k1 = k1.wrapping_mul(C2);
        h1 ^= k1;
    }

    h1 ^= length as i64;
    h2 ^= length as i64;
    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);
    h1 = fmix(h1);
    h2 = fmix(h2);
    h1 = h1.wrapping_add(h2);
    h1
}

/// The legacy RandomPartitioner: `abs(md5(key)) mod 2^127`.
#[derive(Debug, Clone, Copy)]
pub struct RandomTokenizer;

const RANDOM_TOKEN_MODULUS: u128 = 1 << 127;

impl Tokenizer for RandomTokenizer {
    fn hash(&self, routing_key: &[u8]) -> Token {
        let digest = Md5::digest(routing_key);
        let raw = i128::from_be_bytes(digest.into());
        Token::Random(raw.unsigned_abs() % RANDOM_TOKEN_MODULUS)
    }

    fn parse(&self, s: &str) -> Result<Token, ZirconError> {
        let value = s
            .parse::<u128>()
            .map_err(|_| ZirconError::Metadata(format!("Invalid random token '{s}'")))?;
        Ok(Token::Random(value % RANDOM_TOKEN_MODULUS))
    }
}

/// ByteOrderedPartitioner: the key bytes are the token, compared
/// lexicographically. Token strings in the peers tables are hex.
#[derive(Debug, Clone, Copy)]
pub struct ByteOrderedTokenizer;

impl Tokenizer for ByteOrderedTokenizer {
    fn hash(&self, routing_key: &[u8]) -> Token {
        Token::Bytes(routing_key.to_vec())
    }

    fn parse(&self, s: &str) -> Result<Token, ZirconError> {
        match hex::decode(s.trim()) {
            Ok(bytes) => Ok(Token::Bytes(bytes)),
            // Very old servers report the raw ASCII form.
            Err(_) => Ok(Token::Bytes(s.as_bytes().to_vec())),
        }
    }
}
