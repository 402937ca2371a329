//! Fuzzy digests and shingle sets supplied by the hashing stage.

use std::fmt;

use serde::{Serialize, Serializer};

use super::{DIGEST_LEN, SHINGLE_COUNT};
use crate::types::error::{FuzzyError, FuzzyResult};

/// Fixed-length binary fingerprint of message content. Opaque byte key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// Wrap a raw 64-byte fingerprint.
    pub fn new(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Build a digest from a slice, checking its length.
    pub fn from_slice(bytes: &[u8]) -> FuzzyResult<Self> {
        if bytes.len() != DIGEST_LEN {
            return Err(FuzzyError::InvalidDigest {
                expected: DIGEST_LEN,
                got: bytes.len(),
            });
        }
        let mut raw = [0u8; DIGEST_LEN];
        raw.copy_from_slice(bytes);
        Ok(Self(raw))
    }

    /// Parse a digest from its lowercase or uppercase hex rendering.
    pub fn from_hex(s: &str) -> FuzzyResult<Self> {
        let s = s.trim();
        if s.len() != DIGEST_LEN * 2 || !s.is_ascii() {
            return Err(FuzzyError::InvalidDigest {
                expected: DIGEST_LEN,
                got: s.len() / 2,
            });
        }
        let mut raw = [0u8; DIGEST_LEN];
        for (i, byte) in raw.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| {
                FuzzyError::InvalidDigest {
                    expected: DIGEST_LEN,
                    got: i,
                }
            })?;
        }
        Ok(Self(raw))
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 8 bytes are enough to tell digests apart in logs.
        let short: String = self.0[..8].iter().map(|b| format!("{b:02x}")).collect();
        write!(f, "Digest({short}..)")
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Fixed-count ordered sequence of partial-hash keys derived from message content.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShingleSet([u64; SHINGLE_COUNT]);

impl ShingleSet {
    /// Wrap a full set of shingle values.
    pub fn new(values: [u64; SHINGLE_COUNT]) -> Self {
        Self(values)
    }

    /// Build a shingle set from a slice, checking its length.
    pub fn from_slice(values: &[u64]) -> FuzzyResult<Self> {
        if values.len() != SHINGLE_COUNT {
            return Err(FuzzyError::InvalidShingles {
                expected: SHINGLE_COUNT,
                got: values.len(),
            });
        }
        let mut raw = [0u64; SHINGLE_COUNT];
        raw.copy_from_slice(values);
        Ok(Self(raw))
    }

    /// The shingle values in position order.
    pub fn values(&self) -> &[u64; SHINGLE_COUNT] {
        &self.0
    }

    /// Number of positions at which both sets carry the same value.
    pub fn shared_with(&self, other: &ShingleSet) -> usize {
        self.0
            .iter()
            .zip(other.0.iter())
            .filter(|(a, b)| a == b)
            .count()
    }
}

impl fmt::Debug for ShingleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShingleSet({:016x}..)", self.0[0])
    }
}
