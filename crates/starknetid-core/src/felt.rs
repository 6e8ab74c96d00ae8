//! The chain's native scalar.
//!
//! A felt is an unsigned integer below the field prime. Payloads carry felts
//! as `0x`-prefixed hex strings; address hashes are stored as 32 big-endian
//! bytes.

use std::fmt;
use std::str::FromStr;

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::IndexerError;

/// Width of an address hash in bytes.
pub const FELT_BYTES: usize = 32;

/// A field element, held as an unbounded unsigned integer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Felt(BigUint);

impl Felt {
    pub fn zero() -> Self {
        Self(BigUint::zero())
    }

    /// Parse a `0x`-prefixed hex string or a plain decimal string.
    pub fn parse(s: &str) -> Result<Self, IndexerError> {
        let s = s.trim();
        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some("") => Some(BigUint::zero()),
            Some(hex) => BigUint::parse_bytes(hex.as_bytes(), 16),
            None => BigUint::parse_bytes(s.as_bytes(), 10),
        };
        parsed
            .map(Self)
            .ok_or_else(|| IndexerError::Decode(format!("invalid felt: {s:?}")))
    }

    pub fn from_bytes_be(bytes: &[u8]) -> Self {
        Self(BigUint::from_bytes_be(bytes))
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }

    /// The zero felt is the mint/burn sentinel address.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Big-endian bytes, left-padded to [`FELT_BYTES`].
    pub fn to_bytes_be(&self) -> Vec<u8> {
        let raw = self.0.to_bytes_be();
        if raw.len() >= FELT_BYTES {
            return raw;
        }
        let mut out = vec![0u8; FELT_BYTES - raw.len()];
        out.extend_from_slice(&raw);
        out
    }

    /// Minimal big-endian bytes (`[0]` for zero).
    pub fn to_value_bytes(&self) -> Vec<u8> {
        self.0.to_bytes_be()
    }

    /// Short-string rendering: the bytes with leading zeros stripped, read as ASCII.
    pub fn to_ascii_string(&self) -> String {
        if self.is_zero() {
            return String::new();
        }
        String::from_utf8_lossy(&self.0.to_bytes_be()).into_owned()
    }

    pub fn to_decimal_string(&self) -> String {
        self.0.to_str_radix(10)
    }

    pub fn to_u64(&self) -> Result<u64, IndexerError> {
        self.0
            .to_u64()
            .ok_or_else(|| IndexerError::Decode(format!("felt {self} does not fit in u64")))
    }
}

impl From<u64> for Felt {
    fn from(v: u64) -> Self {
        Self(BigUint::from(v))
    }
}

impl From<BigUint> for Felt {
    fn from(v: BigUint) -> Self {
        Self(v)
    }
}

impl FromStr for Felt {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Felt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.0.to_str_radix(16))
    }
}

impl Serialize for Felt {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

struct FeltVisitor;

impl<'de> Visitor<'de> for FeltVisitor {
    type Value = Felt;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a hex or decimal felt string, or an unsigned integer")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Felt, E> {
        Felt::parse(v).map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Felt, E> {
        Ok(Felt::from(v))
    }
}

impl<'de> Deserialize<'de> for Felt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(FeltVisitor)
    }
}

// ─── Uint256 ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(untagged)]
enum Uint256Repr {
    Whole(Felt),
    Parts { low: Felt, high: Felt },
}

/// A 256-bit token id, encoded either as one felt or as `{low, high}` halves.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Uint256(pub Felt);

impl<'de> Deserialize<'de> for Uint256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Uint256Repr::deserialize(deserializer)? {
            Uint256Repr::Whole(f) => Self(f),
            Uint256Repr::Parts { low, high } => {
                Self(Felt::from((high.0 << 128usize) + low.0))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hex_and_decimal() {
        assert_eq!(Felt::parse("0x6B2E").unwrap(), Felt::from(0x6b2e));
        assert_eq!(Felt::parse("27438").unwrap(), Felt::from(0x6b2e));
        assert_eq!(Felt::parse("0x").unwrap(), Felt::zero());
        assert!(Felt::parse("0xzz").is_err());
        assert_eq!(Felt::from(255).to_string(), "0xff");
    }

    #[test]
    fn address_bytes_are_padded() {
        let f = Felt::from(0x0102);
        let bytes = f.to_bytes_be();
        assert_eq!(bytes.len(), FELT_BYTES);
        assert_eq!(&bytes[30..], &[1, 2]);
        assert_eq!(Felt::from_bytes_be(&bytes), f);
        assert_eq!(f.to_value_bytes(), vec![1, 2]);
    }

    #[test]
    fn ascii_rendering() {
        // "discord"
        let f = Felt::parse("0x646973636f7264").unwrap();
        assert_eq!(f.to_ascii_string(), "discord");
        assert_eq!(Felt::zero().to_ascii_string(), "");
    }

    #[test]
    fn deserializes_from_json() {
        let f: Felt = serde_json::from_str("\"0x10\"").unwrap();
        assert_eq!(f.to_u64().unwrap(), 16);
        let f: Felt = serde_json::from_str("42").unwrap();
        assert_eq!(f.to_decimal_string(), "42");
    }

    #[test]
    fn uint256_from_halves() {
        let u: Uint256 = serde_json::from_str(r#"{"low":"0x5","high":"0x0"}"#).unwrap();
        assert_eq!(u.0, Felt::from(5));
        let u: Uint256 = serde_json::from_str(r#"{"low":"0x0","high":"0x1"}"#).unwrap();
        assert_eq!(u.0.to_string(), format!("0x1{}", "0".repeat(32)));
        let u: Uint256 = serde_json::from_str("\"0x7\"").unwrap();
        assert_eq!(u.0, Felt::from(7));
    }
}
