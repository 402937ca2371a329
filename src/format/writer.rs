//! Writes store snapshots from the in-memory entry table.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use log::debug;

use crate::store::EntryTable;
use crate::types::error::{FuzzyError, FuzzyResult};
use crate::types::header::{FileHeader, FLAG_COMPRESSED_SHINGLES, HEADER_SIZE};
use crate::types::{Entry, SHINGLE_COUNT};

use super::compression::compress_block;
use super::reader::StoreReader;
use super::sidecar_path;

/// Size of a single entry record on disk: 104 bytes.
pub const ENTRY_RECORD_SIZE: u64 = 104;

/// Writer for store snapshots.
pub struct StoreWriter {
    compress_shingles: bool,
}

impl StoreWriter {
    /// Create a new writer.
    pub fn new(compress_shingles: bool) -> Self {
        Self { compress_shingles }
    }

    /// Write a complete snapshot to `path`, replacing it only once the new
    /// file is durable and reads back with the expected entry count.
    pub fn replace_file(&self, table: &EntryTable, path: &Path) -> FuzzyResult<()> {
        let tmp_path = sidecar_path(path, ".tmp");
        let result = self
            .write_synced(table, &tmp_path)
            .and_then(|_| verify_snapshot(table, &tmp_path));
        if let Err(e) = result {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e);
        }

        if let Err(e) = std::fs::rename(&tmp_path, path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        sync_parent_dir(path);
        debug!("snapshot of {} entries written to {}", table.len(), path.display());
        Ok(())
    }

    /// Write a complete snapshot to a new file and fsync it.
    pub fn write_synced(&self, table: &EntryTable, path: &Path) -> FuzzyResult<()> {
        let file = File::create(path)?;
        let mut writer = std::io::BufWriter::new(file);
        self.write_to(table, &mut writer)?;
        let file = writer
            .into_inner()
            .map_err(|e| FuzzyError::Io(e.into_error()))?;
        file.sync_all()?;
        Ok(())
    }

    /// Write a complete snapshot to any writer.
    pub fn write_to(&self, table: &EntryTable, writer: &mut impl Write) -> FuzzyResult<()> {
        let entries = table.entries_sorted();
        let entry_count = entries.len() as u64;

        // Step 1: Shingle block, in entry order
        let mut shingle_raw: Vec<u8> = Vec::new();
        for entry in &entries {
            if let Some(shingles) = &entry.shingles {
                for value in shingles.values() {
                    shingle_raw.extend_from_slice(&value.to_le_bytes());
                }
            }
        }
        let shingle_block = if self.compress_shingles {
            compress_block(&shingle_raw)
        } else {
            shingle_raw
        };

        // Step 2: Source table
        let mut source_block: Vec<u8> = Vec::new();
        for (name, version) in table.versions() {
            source_block.extend_from_slice(&(name.len() as u16).to_le_bytes());
            source_block.extend_from_slice(name.as_bytes());
            source_block.extend_from_slice(&version.to_le_bytes());
        }

        // Step 3: Section offsets
        let entry_table_offset = HEADER_SIZE;
        let shingle_block_offset = entry_table_offset + entry_count * ENTRY_RECORD_SIZE;
        let source_table_offset = shingle_block_offset + shingle_block.len() as u64;

        let mut header = FileHeader::new(table.store_id());
        header.entry_count = entry_count;
        header.source_count = table.versions().len() as u32;
        header.flags = if self.compress_shingles {
            FLAG_COMPRESSED_SHINGLES
        } else {
            0
        };
        header.entry_table_offset = entry_table_offset;
        header.shingle_block_offset = shingle_block_offset;
        header.source_table_offset = source_table_offset;
        header.last_sequence = table.last_sequence();
        header.write_to(writer)?;

        // Step 4: Entry table
        for entry in &entries {
            write_entry_record(writer, entry)?;
        }

        // Step 5: Shingle block and source table
        writer.write_all(&shingle_block)?;
        writer.write_all(&source_block)?;

        writer.flush()?;
        Ok(())
    }
}

/// Read the freshly written snapshot back and compare it with the table.
fn verify_snapshot(table: &EntryTable, path: &Path) -> FuzzyResult<()> {
    let reader = StoreReader::open(path)?;
    let header = reader.header();
    if header.entry_count != table.len() as u64 || header.store_id != table.store_id() {
        return Err(FuzzyError::Corrupt(0));
    }
    let shingled = table.entries().filter(|e| e.shingles.is_some()).count();
    let block = reader.shingle_block()?;
    if block.len() != shingled * SHINGLE_COUNT * 8 {
        return Err(FuzzyError::Corrupt(header.shingle_block_offset));
    }
    Ok(())
}

/// Persist the rename itself. Directories cannot be opened for sync on every
/// platform, so failures are ignored.
fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent() {
        let dir = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        if let Ok(handle) = File::open(dir) {
            let _ = handle.sync_all();
        }
    }
}

/// Write a single 104-byte entry record.
fn write_entry_record(writer: &mut impl Write, entry: &Entry) -> FuzzyResult<()> {
    writer.write_all(entry.digest.as_bytes())?; // 64 bytes
    writer.write_all(&entry.flag.to_le_bytes())?; // 4 bytes
    writer.write_all(&[entry.shingles.is_some() as u8])?; // 1 byte
    writer.write_all(&[0u8; 3])?; // 3 bytes padding
    writer.write_all(&entry.weight.to_le_bytes())?; // 8 bytes
    writer.write_all(&entry.created_at.to_le_bytes())?; // 8 bytes
    writer.write_all(&entry.last_seen.to_le_bytes())?; // 8 bytes
    writer.write_all(&entry.ttl.to_le_bytes())?; // 8 bytes
                                                 // Total: 64+4+1+3+8+8+8+8 = 104
    Ok(())
}
