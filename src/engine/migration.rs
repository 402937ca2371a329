//! Legacy layout migration: converts a legacy file into a current snapshot.

use std::path::Path;

use log::info;
use serde::Serialize;

use crate::format::{read_legacy_records, StoreWriter};
use crate::store::EntryTable;
use crate::types::{new_store_id, FuzzyResult};

/// What a migration did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Records read from the legacy file.
    pub records_read: usize,
    /// Entries in the resulting snapshot.
    pub entries_written: usize,
    /// Records whose negative weight was clamped to 0.
    pub weights_clamped: usize,
    /// Records whose negative flag was clamped to 0.
    pub flags_clamped: usize,
    /// Records collapsed because an earlier record had the same digest.
    pub duplicates_collapsed: usize,
}

/// Convert the legacy file at `path` in place.
///
/// The current layout is written next to it, verified, and renamed over the
/// original; until that rename the legacy file is untouched.
pub fn migrate_legacy(
    path: &Path,
    default_ttl: u64,
    compress_shingles: bool,
) -> FuzzyResult<MigrationReport> {
    let records = read_legacy_records(path)?;
    let mut report = MigrationReport {
        records_read: records.len(),
        ..Default::default()
    };

    let mut table = EntryTable::new(new_store_id(path));
    for record in &records {
        let weight = if record.value < 0 {
            report.weights_clamped += 1;
            0
        } else {
            record.value as u64
        };
        let flag = if record.flag < 0 {
            report.flags_clamped += 1;
            0
        } else {
            record.flag as u32
        };
        if table.contains(&record.digest) {
            report.duplicates_collapsed += 1;
        }
        table.upsert(
            record.digest,
            flag,
            weight,
            default_ttl,
            None,
            record.time,
        );
    }
    report.entries_written = table.len();

    StoreWriter::new(compress_shingles).replace_file(&table, path)?;

    info!(
        "migrated legacy storage {}: {} records read, {} entries written, {} weights and {} flags clamped, {} duplicates collapsed",
        path.display(),
        report.records_read,
        report.entries_written,
        report.weights_clamped,
        report.flags_clamped,
        report.duplicates_collapsed
    );
    Ok(report)
}
