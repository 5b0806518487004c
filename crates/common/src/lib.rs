//! ringkv-common: shared types for the ringkv project.
//!
//! Provides the 128-bit [`RingHash`] that positions both nodes and keys on
//! the consistent-hash ring, plus the wrap-around range test every node uses
//! to decide which keys it owns.

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of bytes in a ring position (MD5 digest width).
pub const HASH_BYTES: usize = 16;

// ---------------------------------------------------------------------------
// RingHash
// ---------------------------------------------------------------------------

/// A position on the hash ring.
///
/// Ordering is the derived lexicographic order over the raw bytes, which for
/// `[u8; N]` is an unsigned byte-by-byte comparison.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RingHash([u8; HASH_BYTES]);

impl RingHash {
    /// The all-zeros position.
    pub const ZERO: Self = Self([0u8; HASH_BYTES]);

    /// The all-ones position (largest on the ring).
    pub const MAX: Self = Self([0xffu8; HASH_BYTES]);

    /// Create a `RingHash` from raw bytes.
    pub fn from_bytes(bytes: [u8; HASH_BYTES]) -> Self {
        Self(bytes)
    }

    /// Return the raw bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_BYTES] {
        &self.0
    }

    /// MD5 digest of the UTF-8 bytes of `value`.
    pub fn of(value: &str) -> Self {
        let digest = Md5::digest(value.as_bytes());
        let mut bytes = [0u8; HASH_BYTES];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Full lowercase hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 32-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, HashParseError> {
        let raw = hex::decode(s).map_err(|e| HashParseError(e.to_string()))?;
        let bytes: [u8; HASH_BYTES] = raw
            .try_into()
            .map_err(|v: Vec<u8>| HashParseError(format!("expected 16 bytes, got {}", v.len())))?;
        Ok(Self(bytes))
    }

    /// Whether `self` lies in the ring interval `(lower, upper]`.
    ///
    /// The interval wraps past the top of the ring when `lower > upper`.
    /// When `lower == upper` the interval covers the whole ring, which is
    /// the single-node case.
    pub fn in_range(&self, lower: &RingHash, upper: &RingHash) -> bool {
        in_range(self, lower, upper)
    }
}

impl fmt::Debug for RingHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short hex for readability in logs.
        write!(f, "RingHash({}..)", &self.to_hex()[..8])
    }
}

impl fmt::Display for RingHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Error returned by [`RingHash::from_hex`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid ring hash: {0}")]
pub struct HashParseError(String);

/// Hash a key (or an `address:port` string) onto the ring.
pub fn hash_key(key: &str) -> RingHash {
    RingHash::of(key)
}

/// Exclusive-lower / inclusive-upper ring interval test with wrap-around.
pub fn in_range(value: &RingHash, lower: &RingHash, upper: &RingHash) -> bool {
    match lower.cmp(upper) {
        std::cmp::Ordering::Less => value > lower && value <= upper,
        std::cmp::Ordering::Greater => value > lower || value <= upper,
        std::cmp::Ordering::Equal => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
