//! The fuzzy storage backend: open, check, transactional update, maintenance.
//!
//! Committed state lives in one [`EntryTable`] behind a `RwLock`. Readers take
//! the read side for the duration of a lookup; commits, sweeps and vacuums
//! publish their result under the write side, so a reader always sees either
//! the state before or after a mutation.
//!
//! Lock order is transaction slot, then journal, then table.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, info, warn};
use serde::Serialize;

use crate::config::BackendConfig;
use crate::format::{detect_layout, sidecar_path, Journal, Layout, StoreReader, StoreWriter};
use crate::index::Candidate;
use crate::store::EntryTable;
use crate::types::{
    new_store_id, now_secs, CheckCmd, Digest, Entry, FuzzyCmd, FuzzyError, FuzzyResult, Reply,
    ShingleSet,
};

use super::migration::migrate_legacy;
use super::sweeper::Sweeper;
use super::transaction::Transaction;

/// Point-in-time figures about an open backend.
#[derive(Debug, Clone, Serialize)]
pub struct BackendStats {
    pub id: String,
    pub path: String,
    pub entries: usize,
    pub shingled_entries: usize,
    pub index_buckets: usize,
    pub index_refs: usize,
    pub sources: usize,
    pub journal_bytes: u64,
    pub last_sequence: u64,
    pub open_transaction: Option<String>,
}

/// A transactional fuzzy-hash store.
///
/// All methods take `&self`; share the handle between threads with `Arc`.
pub struct FuzzyBackend {
    path: PathBuf,
    config: BackendConfig,
    table: RwLock<EntryTable>,
    txn: Mutex<Option<Transaction>>,
    journal: Mutex<Journal>,
    writer: StoreWriter,
    sweeper: Sweeper,
}

impl FuzzyBackend {
    /// Open or create a store at `path` with default settings.
    pub fn open(path: impl AsRef<Path>, vacuum: bool) -> FuzzyResult<Self> {
        let mut config = BackendConfig::new(path);
        config.vacuum_on_open = vacuum;
        Self::open_with_config(config)
    }

    /// Open or create the store described by `config`.
    ///
    /// A legacy file is migrated first when `migrate_legacy` is set. Any error
    /// here is fatal for the handle.
    pub fn open_with_config(config: BackendConfig) -> FuzzyResult<Self> {
        if config.path.is_empty() {
            return Err(FuzzyError::BadPath {
                path: String::new(),
                reason: "empty path".to_string(),
            });
        }
        let path = PathBuf::from(&config.path);
        Self::open_inner(&path, config).map_err(|e| path_error(&path, e))
    }

    fn open_inner(path: &Path, config: BackendConfig) -> FuzzyResult<Self> {
        let writer = StoreWriter::new(config.compress_shingles);
        let journal_path = sidecar_path(path, ".journal");

        let mut table = match detect_layout(path)? {
            Layout::Missing | Layout::Empty => {
                let table = EntryTable::new(new_store_id(path));
                writer.replace_file(&table, path)?;
                discard_orphan_journal(&journal_path, "left without a snapshot")?;
                info!("created fuzzy storage at {}", path.display());
                table
            }
            Layout::Legacy if config.migrate_legacy => {
                migrate_legacy(path, config.default_ttl, config.compress_shingles)?;
                // Legacy files never had a journal; one found here belongs to
                // a store the legacy file replaced.
                discard_orphan_journal(&journal_path, "predating the legacy file")?;
                StoreReader::read_from_file(path)?
            }
            Layout::Legacy => {
                return Err(FuzzyError::LegacyFormat(path.display().to_string()));
            }
            Layout::Current => StoreReader::read_from_file(path)?,
            Layout::Unknown => return Err(FuzzyError::InvalidMagic),
        };

        let (journal, pending) = Journal::open(&journal_path, table.last_sequence())?;
        for record in &pending {
            table.apply(record);
        }
        if !pending.is_empty() {
            info!(
                "replayed {} journal records into {}",
                pending.len(),
                path.display()
            );
        }

        let backend = Self {
            path: path.to_path_buf(),
            sweeper: Sweeper::new(config.expiry_policy),
            config,
            table: RwLock::new(table),
            txn: Mutex::new(None),
            journal: Mutex::new(journal),
            writer,
        };

        if backend.config.vacuum_on_open {
            backend.vacuum()?;
        }

        info!(
            "opened fuzzy storage {} (id {}, {} entries)",
            backend.path.display(),
            backend.id(),
            backend.count()
        );
        Ok(backend)
    }

    // ==================== Read path ====================

    /// Score `cmd` against committed state at the current time.
    pub fn check(&self, cmd: &CheckCmd, expire: u64) -> Reply {
        self.check_at(cmd, expire, now_secs())
    }

    /// Score `cmd` as of `now`. Entries idle for more than `expire` seconds
    /// are ignored for scoring; nothing is removed.
    pub fn check_at(&self, cmd: &CheckCmd, expire: u64, now: u64) -> Reply {
        self.read_table()
            .check(cmd, expire, now, self.config.min_shingle_matches)
    }

    /// Ranked approximate-match candidates for `shingles` as of `now`.
    pub fn candidates_at(
        &self,
        shingles: &ShingleSet,
        flag_filter: Option<u32>,
        expire: u64,
        now: u64,
    ) -> Vec<Candidate> {
        self.read_table().ranked_candidates(
            shingles,
            flag_filter,
            expire,
            now,
            self.config.min_shingle_matches,
        )
    }

    /// A committed entry by digest.
    pub fn entry(&self, digest: &Digest) -> Option<Entry> {
        self.read_table().get(digest).cloned()
    }

    // ==================== Transactions ====================

    /// Open the staging area for `source`.
    ///
    /// Fails fast with `Busy` while another transaction is open, unless that
    /// one has outlived `max_transaction_age` and is reclaimed.
    pub fn prepare_update(&self, source: &str) -> FuzzyResult<()> {
        self.prepare_update_at(source, now_secs())
    }

    /// [`prepare_update`](Self::prepare_update) with an explicit clock.
    pub fn prepare_update_at(&self, source: &str, now: u64) -> FuzzyResult<()> {
        let txn = Transaction::begin(source, now)?;
        let mut slot = self.lock_txn();
        self.reclaim_stale(&mut slot, now)?;
        debug!("transaction opened by '{}'", source);
        *slot = Some(txn);
        Ok(())
    }

    /// Stage an upsert in the open transaction.
    pub fn add(&self, cmd: &FuzzyCmd) -> FuzzyResult<()> {
        let mut slot = self.lock_txn();
        let txn = slot.as_mut().ok_or(FuzzyError::NoTransaction)?;
        txn.stage_add(cmd, self.config.default_ttl);
        Ok(())
    }

    /// Stage a delete in the open transaction.
    pub fn del(&self, digest: &Digest) -> FuzzyResult<()> {
        let mut slot = self.lock_txn();
        let txn = slot.as_mut().ok_or(FuzzyError::NoTransaction)?;
        txn.stage_del(digest);
        Ok(())
    }

    /// Drop the open transaction without applying it. Returns whether one
    /// was open.
    pub fn abort(&self) -> bool {
        match self.lock_txn().take() {
            Some(txn) => {
                debug!(
                    "transaction of '{}' aborted with {} staged ops",
                    txn.source(),
                    txn.len()
                );
                true
            }
            None => false,
        }
    }

    /// Commit the open transaction at the current time.
    pub fn finish_update(&self, source: &str, version_bump: bool) -> FuzzyResult<()> {
        self.finish_update_at(source, version_bump, now_secs())
    }

    /// Commit the open transaction, stamping entries with `now`.
    ///
    /// A different `source` than the owner is a `Conflict` and leaves the
    /// transaction open. Otherwise the commit is journaled durably before it
    /// becomes visible; if that write fails the transaction is discarded and
    /// committed state is unchanged.
    pub fn finish_update_at(&self, source: &str, version_bump: bool, now: u64) -> FuzzyResult<()> {
        let mut slot = self.lock_txn();
        match slot.as_ref() {
            None => return Err(FuzzyError::NoTransaction),
            Some(open) if open.source() != source => {
                return Err(FuzzyError::Conflict {
                    expected: open.source().to_string(),
                    got: source.to_string(),
                });
            }
            Some(_) => {}
        }
        let Some(txn) = slot.take() else {
            return Err(FuzzyError::NoTransaction);
        };

        if txn.is_empty() && !version_bump {
            debug!("empty transaction of '{}' finished", source);
            return Ok(());
        }

        let adds = txn.staged_adds();
        let deletes = txn.staged_deletes();
        let mut journal = self.lock_journal();
        let record = txn.into_record(journal.next_sequence(), now, version_bump);
        journal.append(&record)?;
        self.write_table().apply(&record);

        info!(
            "committed #{} from '{}': {} adds, {} deletes{}",
            record.sequence,
            source,
            adds,
            deletes,
            if version_bump { ", version bumped" } else { "" }
        );
        Ok(())
    }

    // ==================== Maintenance ====================

    /// Sweep expired entries at the current time.
    pub fn sync(&self, expire: u64, clean_orphaned: bool) -> FuzzyResult<usize> {
        self.sync_at(expire, clean_orphaned, now_secs())
    }

    /// Hard-delete entries expired at `now`, optionally prune orphaned index
    /// references, then checkpoint. Returns the number of expired entries.
    ///
    /// Rejected with `Busy` while a transaction is open.
    pub fn sync_at(&self, expire: u64, clean_orphaned: bool, now: u64) -> FuzzyResult<usize> {
        let mut slot = self.lock_txn();
        self.reclaim_stale(&mut slot, now)?;
        let mut journal = self.lock_journal();

        let mut next = self.read_table().clone();
        let report = self.sweeper.sweep(&mut next, expire, clean_orphaned, now);
        self.checkpoint(&mut journal, next)?;

        info!(
            "sync of {}: {} expired, {} orphaned index refs pruned",
            self.path.display(),
            report.expired,
            report.orphans_pruned
        );
        Ok(report.expired)
    }

    /// Rebuild the index and rewrite storage compactly, folding the journal
    /// into the snapshot.
    pub fn vacuum(&self) -> FuzzyResult<()> {
        let mut journal = self.lock_journal();
        let mut next = self.read_table().clone();
        next.rebuild_index();
        self.checkpoint(&mut journal, next)?;
        info!(
            "vacuumed {} ({} entries)",
            self.path.display(),
            self.count()
        );
        Ok(())
    }

    /// Rebuild the similarity index from the entry table. Returns whether
    /// the rebuilt index differs from the one it replaced.
    pub fn rebuild_index(&self) -> bool {
        let mut table = self.write_table();
        let before = table.index().clone();
        table.rebuild_index();
        let changed = *table.index() != before;
        if changed {
            warn!(
                "similarity index of {} was out of step with its entries; rebuilt",
                self.path.display()
            );
        }
        changed
    }

    /// Entries already past their own ttl but not yet swept.
    pub fn expired(&self) -> usize {
        self.expired_at(now_secs())
    }

    /// [`expired`](Self::expired) as of `now`.
    pub fn expired_at(&self, now: u64) -> usize {
        self.read_table().ttl_expired_count(now)
    }

    // ==================== Accessors ====================

    /// Number of live entries.
    pub fn count(&self) -> usize {
        self.read_table().len()
    }

    /// Last committed version of `source`, 0 if unknown.
    pub fn version(&self, source: &str) -> u64 {
        self.read_table().version(source)
    }

    /// Stable identity of the physical store.
    pub fn id(&self) -> String {
        format!("{:016x}", self.read_table().store_id())
    }

    /// The snapshot path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The configuration the backend was opened with.
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Whether a transaction is currently open.
    pub fn in_transaction(&self) -> bool {
        self.lock_txn().is_some()
    }

    /// Current figures for operational tooling.
    pub fn stats(&self) -> BackendStats {
        let open_transaction = self.lock_txn().as_ref().map(|t| t.source().to_string());
        let journal_bytes = self.lock_journal().len();
        let table = self.read_table();
        BackendStats {
            id: format!("{:016x}", table.store_id()),
            path: self.path.display().to_string(),
            entries: table.len(),
            shingled_entries: table.entries().filter(|e| e.shingles.is_some()).count(),
            index_buckets: table.index().bucket_count(),
            index_refs: table.index().len(),
            sources: table.versions().len(),
            journal_bytes,
            last_sequence: table.last_sequence(),
            open_transaction,
        }
    }

    /// Release the backend. An open transaction is aborted.
    pub fn close(self) -> FuzzyResult<()> {
        if let Some(txn) = self.lock_txn().take() {
            warn!(
                "closing {} with open transaction of '{}'; {} staged ops discarded",
                self.path.display(),
                txn.source(),
                txn.len()
            );
        }
        self.lock_journal().flush()?;
        info!("closed fuzzy storage {}", self.path.display());
        Ok(())
    }

    // ==================== Internals ====================

    /// Fail with `Busy` if a live transaction holds the slot; drop it if it
    /// has outlived `max_transaction_age`. An age limit of 0 never reclaims.
    fn reclaim_stale(&self, slot: &mut Option<Transaction>, now: u64) -> FuzzyResult<()> {
        let Some(open) = slot.as_ref() else {
            return Ok(());
        };
        let limit = self.config.max_transaction_age;
        if limit == 0 || open.age(now) <= limit {
            return Err(FuzzyError::Busy {
                owner: open.source().to_string(),
            });
        }
        warn!(
            "reclaiming transaction of '{}' abandoned for {}s; {} staged ops discarded",
            open.source(),
            open.age(now),
            open.len()
        );
        *slot = None;
        Ok(())
    }

    /// Make `next` the durable snapshot, publish it, then drop the journal
    /// it covers.
    ///
    /// Once the rename has landed `next` is what a reopen would load, so it
    /// is published even if the reset fails. Records left in the journal are
    /// at or below the snapshot's sequence and are skipped on replay.
    fn checkpoint(&self, journal: &mut Journal, next: EntryTable) -> FuzzyResult<()> {
        self.writer.replace_file(&next, &self.path)?;
        *self.write_table() = next;
        if let Err(e) = journal.reset() {
            warn!(
                "snapshot {} written but journal {} not reset: {}",
                self.path.display(),
                journal.path().display(),
                e
            );
            return Err(e);
        }
        Ok(())
    }

    fn read_table(&self) -> RwLockReadGuard<'_, EntryTable> {
        self.table.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_table(&self) -> RwLockWriteGuard<'_, EntryTable> {
        self.table.write().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_txn(&self) -> MutexGuard<'_, Option<Transaction>> {
        self.txn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_journal(&self) -> MutexGuard<'_, Journal> {
        self.journal.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for FuzzyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FuzzyBackend")
            .field("path", &self.path)
            .field("entries", &self.count())
            .finish()
    }
}

/// Remove a journal whose records do not belong to the snapshot at hand.
fn discard_orphan_journal(journal_path: &Path, why: &str) -> FuzzyResult<()> {
    if journal_path.exists() {
        warn!("discarding journal {} {}", journal_path.display(), why);
        std::fs::remove_file(journal_path)?;
    }
    Ok(())
}

/// IO failures while opening mean the path itself is unusable.
fn path_error(path: &Path, err: FuzzyError) -> FuzzyError {
    match err {
        FuzzyError::Io(e) => FuzzyError::BadPath {
            path: path.display().to_string(),
            reason: e.to_string(),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DIGEST_LEN;
    use tempfile::TempDir;

    const T: u64 = 1_700_000_000;

    fn digest(b: u8) -> Digest {
        Digest::new([b; DIGEST_LEN])
    }

    fn open(dir: &TempDir) -> FuzzyBackend {
        FuzzyBackend::open(dir.path().join("fuzzy.db"), false).unwrap()
    }

    #[test]
    fn failed_journal_write_discards_transaction() {
        let dir = TempDir::new().unwrap();
        let backend = open(&dir);
        backend.prepare_update_at("mirror", T).unwrap();
        backend.add(&FuzzyCmd::new(digest(1))).unwrap();
        backend.finish_update_at("mirror", true, T).unwrap();
        let journal_before = backend.stats().journal_bytes;

        backend.prepare_update_at("mirror", T + 1).unwrap();
        backend.add(&FuzzyCmd::new(digest(2))).unwrap();
        backend.del(&digest(1)).unwrap();
        backend.lock_journal().fail_next_append(16);
        let err = backend.finish_update_at("mirror", true, T + 1).unwrap_err();
        assert!(matches!(err, FuzzyError::Io(_)));

        assert!(!backend.in_transaction());
        assert_eq!(backend.version("mirror"), 1);
        assert_eq!(backend.count(), 1);
        assert!(backend.entry(&digest(1)).is_some());
        assert!(backend.entry(&digest(2)).is_none());
        assert_eq!(backend.stats().journal_bytes, journal_before);

        // The handle stays usable and nothing from the failed commit replays.
        backend.prepare_update_at("mirror", T + 2).unwrap();
        backend.add(&FuzzyCmd::new(digest(3))).unwrap();
        backend.finish_update_at("mirror", true, T + 2).unwrap();
        backend.close().unwrap();

        let reopened = open(&dir);
        assert_eq!(reopened.version("mirror"), 2);
        assert!(reopened.entry(&digest(1)).is_some());
        assert!(reopened.entry(&digest(2)).is_none());
        assert!(reopened.entry(&digest(3)).is_some());
    }

    #[test]
    fn failed_journal_reset_still_publishes_sweep() {
        let dir = TempDir::new().unwrap();
        let backend = open(&dir);
        backend.prepare_update_at("mirror", T).unwrap();
        backend.add(&FuzzyCmd::new(digest(1))).unwrap();
        backend.finish_update_at("mirror", true, T).unwrap();
        backend.prepare_update_at("mirror", T + 500).unwrap();
        backend.add(&FuzzyCmd::new(digest(2))).unwrap();
        backend.finish_update_at("mirror", true, T + 500).unwrap();

        backend.lock_journal().fail_next_reset();
        assert!(backend.sync_at(100, true, T + 550).is_err());

        // Memory matches the snapshot that landed on disk.
        assert_eq!(backend.count(), 1);
        assert!(backend.entry(&digest(1)).is_none());
        assert!(backend.stats().journal_bytes > 0);
        backend.close().unwrap();

        let reopened = open(&dir);
        assert_eq!(reopened.count(), 1);
        assert!(reopened.entry(&digest(1)).is_none());
        assert_eq!(reopened.version("mirror"), 2);
    }
}
