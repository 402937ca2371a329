//! Expiry sweep: hard-deletes expired entries and prunes orphaned index refs.

use serde::Serialize;

use crate::config::ExpiryPolicy;
use crate::store::EntryTable;
use crate::types::Entry;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Entries hard-deleted because they expired.
    pub expired: usize,
    /// Index references pruned because their digest is gone.
    pub orphans_pruned: usize,
}

/// Applies the configured expiry rule to an entry table.
#[derive(Debug, Clone, Copy)]
pub struct Sweeper {
    policy: ExpiryPolicy,
}

impl Sweeper {
    /// Create a sweeper for `policy`.
    pub fn new(policy: ExpiryPolicy) -> Self {
        Self { policy }
    }

    /// Whether `entry` is expired at `now` given the sweep threshold `expire`.
    pub fn is_expired(&self, entry: &Entry, expire: u64, now: u64) -> bool {
        let limit = match self.policy {
            ExpiryPolicy::Threshold => expire,
            ExpiryPolicy::EntryTtl if entry.ttl > 0 => entry.ttl,
            ExpiryPolicy::EntryTtl => expire,
        };
        entry.age(now) > limit
    }

    /// Remove expired entries and, optionally, orphaned index references.
    pub fn sweep(
        &self,
        table: &mut EntryTable,
        expire: u64,
        clean_orphaned: bool,
        now: u64,
    ) -> SweepReport {
        let expired = table.remove_where(|e| self.is_expired(e, expire, now));
        let orphans_pruned = if clean_orphaned {
            table.prune_orphans()
        } else {
            0
        };
        SweepReport {
            expired,
            orphans_pruned,
        }
    }
}
