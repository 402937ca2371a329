//! Similarity index: maps each shingle key to the digests carrying it.

use std::collections::{BTreeSet, HashMap};

use crate::types::{Digest, Entry, ShingleSet};

/// A shingle as a reverse-index key: its position in the set and its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShingleKey {
    /// Position within the shingle set.
    pub position: u8,
    /// Shingle value at that position.
    pub hash: u64,
}

impl ShingleKey {
    /// All keys of a shingle set, in position order.
    pub fn all(shingles: &ShingleSet) -> impl Iterator<Item = ShingleKey> + '_ {
        shingles
            .values()
            .iter()
            .enumerate()
            .map(|(i, &hash)| ShingleKey {
                position: i as u8,
                hash,
            })
    }
}

/// A ranked approximate-match candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// The candidate digest.
    pub digest: Digest,
    /// Number of shingle keys shared with the query.
    pub shared: usize,
    /// Candidate weight, used as the first tiebreak.
    pub weight: u64,
    /// Candidate last_seen, used as the second tiebreak.
    pub last_seen: u64,
    /// Candidate flag, reported back to the caller.
    pub flag: u32,
}

/// Scoring view of a candidate supplied by the owner of the entry table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateInfo {
    /// Candidate weight.
    pub weight: u64,
    /// Candidate last_seen.
    pub last_seen: u64,
    /// Candidate flag.
    pub flag: u32,
}

/// Maps each shingle key to the set of digests carrying it.
///
/// Purely derived from the entry table: it can always be thrown away and
/// rebuilt with [`SimilarityIndex::rebuild`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimilarityIndex {
    buckets: HashMap<ShingleKey, BTreeSet<Digest>>,
}

impl SimilarityIndex {
    /// Create a new, empty index.
    pub fn new() -> Self {
        Self {
            buckets: HashMap::new(),
        }
    }

    /// Build an index from a set of entries.
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a Entry>) -> Self {
        let mut index = Self::new();
        index.rebuild(entries);
        index
    }

    /// Rebuild the entire index from the entry table.
    pub fn rebuild<'a>(&mut self, entries: impl IntoIterator<Item = &'a Entry>) {
        self.buckets.clear();
        for entry in entries {
            if let Some(shingles) = &entry.shingles {
                self.insert(entry.digest, shingles);
            }
        }
    }

    /// Add reverse mappings for every shingle of `digest`.
    pub fn insert(&mut self, digest: Digest, shingles: &ShingleSet) {
        for key in ShingleKey::all(shingles) {
            self.buckets.entry(key).or_default().insert(digest);
        }
    }

    /// Remove the reverse mappings for `digest`, dropping buckets left empty.
    pub fn remove(&mut self, digest: &Digest, shingles: &ShingleSet) {
        for key in ShingleKey::all(shingles) {
            if let Some(bucket) = self.buckets.get_mut(&key) {
                bucket.remove(digest);
                if bucket.is_empty() {
                    self.buckets.remove(&key);
                }
            }
        }
    }

    /// Digests stored under a single key.
    pub fn bucket(&self, key: &ShingleKey) -> Option<&BTreeSet<Digest>> {
        self.buckets.get(key)
    }

    /// Ranked candidates sharing at least `min_shared` keys with `shingles`.
    ///
    /// `lookup` returns `None` for digests that must be excluded (missing from
    /// the entry table, stale, or filtered out). Ordering: shared count
    /// descending, then weight descending, then most recent `last_seen`, then
    /// digest bytes for a stable result. At most `limit` candidates are kept.
    pub fn candidates<F>(
        &self,
        shingles: &ShingleSet,
        min_shared: usize,
        limit: usize,
        lookup: F,
    ) -> Vec<Candidate>
    where
        F: Fn(&Digest) -> Option<CandidateInfo>,
    {
        let mut counts: HashMap<Digest, usize> = HashMap::new();
        for key in ShingleKey::all(shingles) {
            if let Some(bucket) = self.buckets.get(&key) {
                for digest in bucket {
                    *counts.entry(*digest).or_insert(0) += 1;
                }
            }
        }

        let min_shared = min_shared.max(1);
        let mut ranked: Vec<Candidate> = counts
            .into_iter()
            .filter(|&(_, shared)| shared >= min_shared)
            .filter_map(|(digest, shared)| {
                lookup(&digest).map(|info| Candidate {
                    digest,
                    shared,
                    weight: info.weight,
                    last_seen: info.last_seen,
                    flag: info.flag,
                })
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.shared
                .cmp(&a.shared)
                .then(b.weight.cmp(&a.weight))
                .then(b.last_seen.cmp(&a.last_seen))
                .then(a.digest.cmp(&b.digest))
        });
        ranked.truncate(limit);
        ranked
    }

    /// Remove references to digests for which `live` returns false.
    /// Returns the number of references pruned.
    pub fn prune_orphans<F>(&mut self, live: F) -> usize
    where
        F: Fn(&Digest) -> bool,
    {
        let mut pruned = 0;
        self.buckets.retain(|_, bucket| {
            let before = bucket.len();
            bucket.retain(|d| live(d));
            pruned += before - bucket.len();
            !bucket.is_empty()
        });
        pruned
    }

    /// Number of distinct shingle keys.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Number of total references across all buckets.
    pub fn len(&self) -> usize {
        self.buckets.values().map(|b| b.len()).sum()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Clear the index.
    pub fn clear(&mut self) {
        self.buckets.clear();
    }
}
