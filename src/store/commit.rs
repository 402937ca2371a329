//! Committed units of change, as applied to the entry table and journaled.

use crate::types::{Digest, ShingleSet};

/// A single staged mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Upsert a digest.
    Add {
        digest: Digest,
        flag: u32,
        weight: u64,
        ttl: u64,
        shingles: Option<ShingleSet>,
    },
    /// Remove a digest and its index references.
    Delete { digest: Digest },
}

impl Operation {
    /// The digest this operation targets.
    pub fn digest(&self) -> &Digest {
        match self {
            Operation::Add { digest, .. } | Operation::Delete { digest } => digest,
        }
    }
}

/// A committed transaction: what `finish_update` applies and the journal replays.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitRecord {
    /// Monotonic journal sequence number.
    pub sequence: u64,
    /// Commit time (Unix epoch seconds); becomes `last_seen` of added entries.
    pub committed_at: u64,
    /// Source that owned the transaction.
    pub source: String,
    /// Whether the source version is incremented.
    pub version_bump: bool,
    /// Operations in application order.
    pub ops: Vec<Operation>,
}
