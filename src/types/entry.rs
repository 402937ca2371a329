//! Stored entries, request commands and check replies.

use serde::Serialize;

use super::digest::{Digest, ShingleSet};

/// A stored fuzzy hash entry. Keyed uniquely by digest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry {
    /// The fingerprint this entry is keyed by.
    pub digest: Digest,
    /// Small integer classification tag (list number).
    pub flag: u32,
    /// Accumulated weight.
    pub weight: u64,
    /// When the digest was first committed (Unix epoch seconds).
    pub created_at: u64,
    /// When the digest was last committed (Unix epoch seconds).
    pub last_seen: u64,
    /// Time to live in seconds; 0 means the entry only expires by sweep threshold.
    pub ttl: u64,
    /// Shingles for approximate matching, when the hasher produced them.
    #[serde(skip)]
    pub shingles: Option<ShingleSet>,
}

impl Entry {
    /// Seconds elapsed since `last_seen` at `now`. Clock skew counts as zero.
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_seen)
    }

    /// Whether the entry is past its own ttl at `now`.
    pub fn ttl_expired(&self, now: u64) -> bool {
        self.ttl > 0 && self.age(now) > self.ttl
    }
}

/// A digest request as produced by the hashing stage: used for add and del.
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyCmd {
    /// Fingerprint to add or delete.
    pub digest: Digest,
    /// Optional shingles for approximate matching.
    pub shingles: Option<ShingleSet>,
    /// Classification tag.
    pub flag: u32,
    /// Weight to store.
    pub weight: u64,
}

impl FuzzyCmd {
    /// A command for `digest` with flag 0, weight 1 and no shingles.
    pub fn new(digest: Digest) -> Self {
        Self {
            digest,
            shingles: None,
            flag: 0,
            weight: 1,
        }
    }

    /// Attach shingles.
    pub fn shingles(mut self, shingles: ShingleSet) -> Self {
        self.shingles = Some(shingles);
        self
    }

    /// Set the flag.
    pub fn flag(mut self, flag: u32) -> Self {
        self.flag = flag;
        self
    }

    /// Set the weight.
    pub fn weight(mut self, weight: u64) -> Self {
        self.weight = weight;
        self
    }
}

/// A read-only lookup request.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckCmd {
    /// Fingerprint to look up exactly.
    pub digest: Digest,
    /// Shingles for the approximate fallback.
    pub shingles: Option<ShingleSet>,
    /// Only match entries carrying this flag.
    pub flag_filter: Option<u32>,
}

impl CheckCmd {
    /// Exact lookup only, no flag filter.
    pub fn new(digest: Digest) -> Self {
        Self {
            digest,
            shingles: None,
            flag_filter: None,
        }
    }

    /// Enable the approximate fallback.
    pub fn shingles(mut self, shingles: ShingleSet) -> Self {
        self.shingles = Some(shingles);
        self
    }

    /// Restrict matches to one flag.
    pub fn flag_filter(mut self, flag: u32) -> Self {
        self.flag_filter = Some(flag);
        self
    }
}

impl From<&FuzzyCmd> for CheckCmd {
    fn from(cmd: &FuzzyCmd) -> Self {
        Self {
            digest: cmd.digest,
            shingles: cmd.shingles,
            flag_filter: None,
        }
    }
}

/// Result of a check. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reply {
    /// Match probability in [0, 1].
    pub probability: f64,
    /// Weight of the matched entry.
    pub weight: u64,
    /// Flag of the matched entry.
    pub flag: u32,
}

impl Reply {
    /// The reply for a lookup that matched nothing.
    pub fn miss() -> Self {
        Self {
            probability: 0.0,
            weight: 0,
            flag: 0,
        }
    }

    /// Whether anything matched.
    pub fn is_match(&self) -> bool {
        self.probability > 0.0
    }
}
