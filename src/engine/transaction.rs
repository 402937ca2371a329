//! Transaction staging: adds and deletes collected under one source.

use std::collections::BTreeMap;

use crate::store::{CommitRecord, Operation};
use crate::types::{Digest, FuzzyCmd, FuzzyError, FuzzyResult, MAX_SOURCE_LEN};

/// An open staging area. Nothing staged here is visible to readers until
/// the owning backend commits it.
#[derive(Debug, Clone)]
pub struct Transaction {
    source: String,
    staged: BTreeMap<Digest, Operation>,
    began_at: u64,
}

impl Transaction {
    /// Open a staging area owned by `source`.
    pub fn begin(source: &str, now: u64) -> FuzzyResult<Self> {
        if source.is_empty() || source.len() > MAX_SOURCE_LEN {
            return Err(FuzzyError::InvalidSource(format!(
                "source must be 1..={MAX_SOURCE_LEN} bytes, got {}",
                source.len()
            )));
        }
        Ok(Self {
            source: source.to_string(),
            staged: BTreeMap::new(),
            began_at: now,
        })
    }

    /// The owning source.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// When the transaction was opened (Unix epoch seconds).
    pub fn began_at(&self) -> u64 {
        self.began_at
    }

    /// Seconds the transaction has been open at `now`.
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.began_at)
    }

    /// Stage an upsert. Replaces whatever is staged for the same digest.
    pub fn stage_add(&mut self, cmd: &FuzzyCmd, ttl: u64) {
        self.staged.insert(
            cmd.digest,
            Operation::Add {
                digest: cmd.digest,
                flag: cmd.flag,
                weight: cmd.weight,
                ttl,
                shingles: cmd.shingles,
            },
        );
    }

    /// Stage a tombstone. A staged add for the same digest is cancelled
    /// instead, leaving nothing staged for it.
    pub fn stage_del(&mut self, digest: &Digest) {
        match self.staged.get(digest) {
            Some(Operation::Add { .. }) => {
                self.staged.remove(digest);
            }
            _ => {
                self.staged
                    .insert(*digest, Operation::Delete { digest: *digest });
            }
        }
    }

    /// The operation currently staged for `digest`.
    pub fn staged(&self, digest: &Digest) -> Option<&Operation> {
        self.staged.get(digest)
    }

    /// Number of staged adds.
    pub fn staged_adds(&self) -> usize {
        self.staged
            .values()
            .filter(|op| matches!(op, Operation::Add { .. }))
            .count()
    }

    /// Number of staged deletes.
    pub fn staged_deletes(&self) -> usize {
        self.staged.len() - self.staged_adds()
    }

    /// Number of staged operations.
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    /// Whether nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Seal the staged operations into a commit record.
    pub fn into_record(self, sequence: u64, committed_at: u64, version_bump: bool) -> CommitRecord {
        CommitRecord {
            sequence,
            committed_at,
            source: self.source,
            version_bump,
            ops: self.staged.into_values().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DIGEST_LEN;

    fn cmd(b: u8) -> FuzzyCmd {
        FuzzyCmd::new(Digest::new([b; DIGEST_LEN])).flag(1).weight(2)
    }

    #[test]
    fn add_then_del_cancels() {
        let mut txn = Transaction::begin("src", 0).unwrap();
        txn.stage_add(&cmd(1), 60);
        txn.stage_del(&cmd(1).digest);
        assert!(txn.is_empty());
    }

    #[test]
    fn del_then_add_replaces() {
        let mut txn = Transaction::begin("src", 0).unwrap();
        txn.stage_del(&cmd(1).digest);
        txn.stage_add(&cmd(1), 60);
        assert_eq!(txn.staged_adds(), 1);
        assert_eq!(txn.staged_deletes(), 0);
    }

    #[test]
    fn repeated_add_is_idempotent() {
        let mut txn = Transaction::begin("src", 0).unwrap();
        txn.stage_add(&cmd(1), 60);
        txn.stage_add(&cmd(1).weight(9), 60);
        assert_eq!(txn.len(), 1);
        match txn.staged(&cmd(1).digest) {
            Some(Operation::Add { weight, .. }) => assert_eq!(*weight, 9),
            other => panic!("unexpected staged op {other:?}"),
        }
    }

    #[test]
    fn empty_source_rejected() {
        assert!(matches!(
            Transaction::begin("", 0),
            Err(FuzzyError::InvalidSource(_))
        ));
    }
}
