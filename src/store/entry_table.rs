//! Core table structure: entries keyed by digest, with the similarity index.

use std::collections::{BTreeMap, HashMap};

use log::debug;

use crate::index::{Candidate, CandidateInfo, SimilarityIndex};
use crate::types::{CheckCmd, Digest, Entry, Reply, ShingleSet, MAX_CANDIDATES, SHINGLE_COUNT};

use super::commit::{CommitRecord, Operation};

/// The committed state of a store: the ground truth of what exists.
#[derive(Debug, Clone)]
pub struct EntryTable {
    /// All entries, keyed by digest.
    entries: HashMap<Digest, Entry>,
    /// Reverse shingle index, derived from `entries`.
    index: SimilarityIndex,
    /// Last committed version per source.
    versions: BTreeMap<String, u64>,
    /// Identity of the physical store.
    store_id: u64,
    /// Highest journal sequence applied.
    last_sequence: u64,
}

impl EntryTable {
    /// Create a new empty table.
    pub fn new(store_id: u64) -> Self {
        Self {
            entries: HashMap::new(),
            index: SimilarityIndex::new(),
            versions: BTreeMap::new(),
            store_id,
            last_sequence: 0,
        }
    }

    /// Create from pre-existing data (used by readers and migration).
    ///
    /// Later entries win over earlier ones carrying the same digest. The
    /// similarity index is rebuilt from the entries.
    pub fn from_parts(
        entries: Vec<Entry>,
        versions: BTreeMap<String, u64>,
        store_id: u64,
        last_sequence: u64,
    ) -> Self {
        let mut map = HashMap::with_capacity(entries.len());
        for entry in entries {
            map.insert(entry.digest, entry);
        }
        let index = SimilarityIndex::from_entries(map.values());
        Self {
            entries: map,
            index,
            versions,
            store_id,
            last_sequence,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get an entry by digest.
    pub fn get(&self, digest: &Digest) -> Option<&Entry> {
        self.entries.get(digest)
    }

    /// Whether a digest is present.
    pub fn contains(&self, digest: &Digest) -> bool {
        self.entries.contains_key(digest)
    }

    /// Entries in digest order, for deterministic serialization.
    pub fn entries_sorted(&self) -> Vec<&Entry> {
        let mut all: Vec<&Entry> = self.entries.values().collect();
        all.sort_by(|a, b| a.digest.cmp(&b.digest));
        all
    }

    /// Iterate entries in arbitrary order.
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    /// The similarity index.
    pub fn index(&self) -> &SimilarityIndex {
        &self.index
    }

    /// Mutable access to the similarity index, for maintenance.
    pub fn index_mut(&mut self) -> &mut SimilarityIndex {
        &mut self.index
    }

    /// Store identity.
    pub fn store_id(&self) -> u64 {
        self.store_id
    }

    /// Highest journal sequence applied to this table.
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Last committed version for `source`, 0 if unknown.
    pub fn version(&self, source: &str) -> u64 {
        self.versions.get(source).copied().unwrap_or(0)
    }

    /// All source versions.
    pub fn versions(&self) -> &BTreeMap<String, u64> {
        &self.versions
    }

    /// Insert or replace an entry, keeping the similarity index in step.
    ///
    /// An existing entry keeps its `created_at`; `last_seen` moves to `now`.
    pub fn upsert(
        &mut self,
        digest: Digest,
        flag: u32,
        weight: u64,
        ttl: u64,
        shingles: Option<ShingleSet>,
        now: u64,
    ) {
        let created_at = match self.entries.get(&digest) {
            Some(old) => {
                if old.shingles != shingles {
                    if let Some(old_shingles) = &old.shingles {
                        self.index.remove(&digest, old_shingles);
                    }
                }
                old.created_at.min(now)
            }
            None => now,
        };

        if let Some(new_shingles) = &shingles {
            self.index.insert(digest, new_shingles);
        }

        self.entries.insert(
            digest,
            Entry {
                digest,
                flag,
                weight,
                created_at,
                last_seen: now,
                ttl,
                shingles,
            },
        );
    }

    /// Remove an entry and its index references.
    pub fn remove(&mut self, digest: &Digest) -> Option<Entry> {
        let removed = self.entries.remove(digest)?;
        if let Some(shingles) = &removed.shingles {
            self.index.remove(digest, shingles);
        }
        Some(removed)
    }

    /// Apply a committed transaction. Infallible: validation happens at staging.
    pub fn apply(&mut self, record: &CommitRecord) {
        for op in &record.ops {
            match op {
                Operation::Add {
                    digest,
                    flag,
                    weight,
                    ttl,
                    shingles,
                } => self.upsert(*digest, *flag, *weight, *ttl, *shingles, record.committed_at),
                Operation::Delete { digest } => {
                    self.remove(digest);
                }
            }
        }
        if record.version_bump {
            *self.versions.entry(record.source.clone()).or_insert(0) += 1;
        }
        self.last_sequence = self.last_sequence.max(record.sequence);
        debug!(
            "applied commit #{} from '{}': {} ops, {} entries",
            record.sequence,
            record.source,
            record.ops.len(),
            self.entries.len()
        );
    }

    /// Look up a digest, falling back to approximate matching through shingles.
    ///
    /// Entries older than `expire` seconds are excluded from scoring but never
    /// removed. `min_shared` is the minimum shared shingle count a candidate
    /// needs to score.
    pub fn check(&self, cmd: &CheckCmd, expire: u64, now: u64, min_shared: usize) -> Reply {
        if let Some(entry) = self.entries.get(&cmd.digest) {
            if flag_matches(cmd.flag_filter, entry) && entry.age(now) <= expire {
                return Reply {
                    probability: 1.0,
                    weight: entry.weight,
                    flag: entry.flag,
                };
            }
        }

        let Some(shingles) = &cmd.shingles else {
            return Reply::miss();
        };

        let ranked = self.ranked_candidates(shingles, cmd.flag_filter, expire, now, min_shared);
        match ranked.first() {
            Some(best) => Reply {
                probability: best.shared as f64 / SHINGLE_COUNT as f64,
                weight: best.weight,
                flag: best.flag,
            },
            None => Reply::miss(),
        }
    }

    /// Top candidates for `shingles` among fresh entries passing `flag_filter`.
    pub fn ranked_candidates(
        &self,
        shingles: &ShingleSet,
        flag_filter: Option<u32>,
        expire: u64,
        now: u64,
        min_shared: usize,
    ) -> Vec<Candidate> {
        self.index
            .candidates(shingles, min_shared, MAX_CANDIDATES, |digest| {
                let entry = self.entries.get(digest)?;
                if !flag_matches(flag_filter, entry) || entry.age(now) > expire {
                    return None;
                }
                Some(CandidateInfo {
                    weight: entry.weight,
                    last_seen: entry.last_seen,
                    flag: entry.flag,
                })
            })
    }

    /// Remove every entry for which `is_expired` holds. Returns how many went.
    pub fn remove_where<F>(&mut self, is_expired: F) -> usize
    where
        F: Fn(&Entry) -> bool,
    {
        let doomed: Vec<Digest> = self
            .entries
            .values()
            .filter(|e| is_expired(e))
            .map(|e| e.digest)
            .collect();
        for digest in &doomed {
            self.remove(digest);
        }
        doomed.len()
    }

    /// Count entries past their own ttl at `now`.
    pub fn ttl_expired_count(&self, now: u64) -> usize {
        self.entries.values().filter(|e| e.ttl_expired(now)).count()
    }

    /// Drop index references to digests missing from the table.
    pub fn prune_orphans(&mut self) -> usize {
        let entries = &self.entries;
        self.index.prune_orphans(|d| entries.contains_key(d))
    }

    /// Throw the index away and rebuild it from the entries alone.
    pub fn rebuild_index(&mut self) {
        self.index.rebuild(self.entries.values());
    }
}

fn flag_matches(filter: Option<u32>, entry: &Entry) -> bool {
    filter.map_or(true, |f| f == entry.flag)
}
