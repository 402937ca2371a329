//! Memory-mapped reader for store snapshots.

use std::collections::BTreeMap;
use std::path::Path;

use memmap2::Mmap;

use crate::store::EntryTable;
use crate::types::error::{FuzzyError, FuzzyResult};
use crate::types::header::{le_u16, le_u32, le_u64, FileHeader, HEADER_SIZE};
use crate::types::{Digest, Entry, ShingleSet, SHINGLE_COUNT};

use super::compression::decompress_block;
use super::writer::ENTRY_RECORD_SIZE;

/// Size in bytes of one shingle set in the raw shingle block.
const SHINGLE_SET_SIZE: usize = SHINGLE_COUNT * 8;

/// Read-only memory-mapped access to a store snapshot.
pub struct StoreReader {
    mmap: Mmap,
    header: FileHeader,
}

impl StoreReader {
    /// Open a snapshot for memory-mapped read access and validate its layout.
    pub fn open(path: &Path) -> FuzzyResult<Self> {
        let file = std::fs::File::open(path)?;
        if file.metadata()?.len() < HEADER_SIZE {
            return Err(FuzzyError::Truncated);
        }
        // SAFETY: snapshots are only ever replaced by rename, never written in place.
        let mmap = unsafe { Mmap::map(&file)? };

        let header = FileHeader::read_from(&mut std::io::Cursor::new(&mmap[..64]))?;

        let len = mmap.len() as u64;
        let entries_end = header
            .entry_count
            .checked_mul(ENTRY_RECORD_SIZE)
            .and_then(|n| n.checked_add(header.entry_table_offset))
            .ok_or(FuzzyError::Corrupt(8))?;
        if header.entry_table_offset < HEADER_SIZE
            || entries_end > header.shingle_block_offset
            || header.shingle_block_offset > header.source_table_offset
            || header.source_table_offset > len
        {
            return Err(FuzzyError::Truncated);
        }

        Ok(Self { mmap, header })
    }

    /// Read a whole snapshot into an entry table.
    pub fn read_from_file(path: &Path) -> FuzzyResult<EntryTable> {
        Self::open(path)?.read_table()
    }

    /// Get the file header.
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Decode entry record `i`, without shingles. Returns the entry and
    /// whether it owns a shingle set in the shingle block.
    pub fn entry(&self, i: u64) -> FuzzyResult<(Entry, bool)> {
        if i >= self.header.entry_count {
            return Err(FuzzyError::Corrupt(i));
        }
        let offset = (self.header.entry_table_offset + i * ENTRY_RECORD_SIZE) as usize;
        let record = &self.mmap[offset..offset + ENTRY_RECORD_SIZE as usize];
        parse_entry_record(record, offset as u64)
    }

    /// The raw (decompressed) shingle block.
    pub fn shingle_block(&self) -> FuzzyResult<Vec<u8>> {
        let start = self.header.shingle_block_offset as usize;
        let end = self.header.source_table_offset as usize;
        let block = &self.mmap[start..end];
        if self.header.shingles_compressed() {
            decompress_block(block)
        } else {
            Ok(block.to_vec())
        }
    }

    /// Decode the source version table.
    pub fn sources(&self) -> FuzzyResult<BTreeMap<String, u64>> {
        let mut sources = BTreeMap::new();
        let data = &self.mmap[..];
        let mut pos = self.header.source_table_offset as usize;
        for _ in 0..self.header.source_count {
            if pos + 2 > data.len() {
                return Err(FuzzyError::Truncated);
            }
            let name_len = le_u16(&data[pos..pos + 2]) as usize;
            pos += 2;
            if pos + name_len + 8 > data.len() {
                return Err(FuzzyError::Truncated);
            }
            let name = std::str::from_utf8(&data[pos..pos + name_len])
                .map_err(|_| FuzzyError::Corrupt(pos as u64))?
                .to_string();
            pos += name_len;
            let version = le_u64(&data[pos..pos + 8]);
            pos += 8;
            sources.insert(name, version);
        }
        Ok(sources)
    }

    /// Decode every section into an entry table. The similarity index is
    /// rebuilt from the decoded entries.
    pub fn read_table(&self) -> FuzzyResult<EntryTable> {
        let shingle_raw = self.shingle_block()?;
        if shingle_raw.len() % SHINGLE_SET_SIZE != 0 {
            return Err(FuzzyError::Corrupt(self.header.shingle_block_offset));
        }
        let mut shingle_sets = shingle_raw.chunks_exact(SHINGLE_SET_SIZE);

        let mut entries = Vec::with_capacity(self.header.entry_count as usize);
        for i in 0..self.header.entry_count {
            let (mut entry, has_shingles) = self.entry(i)?;
            if has_shingles {
                let chunk = shingle_sets
                    .next()
                    .ok_or(FuzzyError::Corrupt(self.header.shingle_block_offset))?;
                entry.shingles = Some(parse_shingle_set(chunk));
            }
            entries.push(entry);
        }
        if shingle_sets.next().is_some() {
            return Err(FuzzyError::Corrupt(self.header.shingle_block_offset));
        }

        Ok(EntryTable::from_parts(
            entries,
            self.sources()?,
            self.header.store_id,
            self.header.last_sequence,
        ))
    }
}

/// Decode 32 little-endian u64 values.
pub(crate) fn parse_shingle_set(data: &[u8]) -> ShingleSet {
    let mut values = [0u64; SHINGLE_COUNT];
    for (value, chunk) in values.iter_mut().zip(data.chunks_exact(8)) {
        *value = le_u64(chunk);
    }
    ShingleSet::new(values)
}

/// Parse a 104-byte entry record.
fn parse_entry_record(data: &[u8], offset: u64) -> FuzzyResult<(Entry, bool)> {
    let digest = Digest::from_slice(&data[0..64])?;
    let flag = le_u32(&data[64..68]);
    let has_shingles = match data[68] {
        0 => false,
        1 => true,
        _ => return Err(FuzzyError::Corrupt(offset + 68)),
    };
    // bytes 69..72: padding
    let weight = le_u64(&data[72..80]);
    let created_at = le_u64(&data[80..88]);
    let last_seen = le_u64(&data[88..96]);
    let ttl = le_u64(&data[96..104]);

    let entry = Entry {
        digest,
        flag,
        weight,
        created_at,
        last_seen: last_seen.max(created_at),
        ttl,
        shingles: None, // Filled from the shingle block
    };
    Ok((entry, has_shingles))
}
