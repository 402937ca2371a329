//! File header for store snapshots.

use std::io::{Read, Write};

use crate::types::error::{FuzzyError, FuzzyResult};
use crate::types::{FORMAT_VERSION, STORE_MAGIC};

/// Header flag: the shingle block is LZ4 compressed.
pub const FLAG_COMPRESSED_SHINGLES: u32 = 0x1;

/// Header of a store snapshot. Fixed size: 64 bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileHeader {
    /// Magic bytes: "FZST".
    pub magic: [u8; 4],
    /// Format version (currently 1).
    pub version: u32,
    /// Number of entries in the entry table.
    pub entry_count: u64,
    /// Number of records in the source table.
    pub source_count: u32,
    /// Layout flags.
    pub flags: u32,
    /// Identity of this physical store, fixed at creation.
    pub store_id: u64,
    /// Byte offset where the entry table starts.
    pub entry_table_offset: u64,
    /// Byte offset where the shingle block starts.
    pub shingle_block_offset: u64,
    /// Byte offset where the source table starts.
    pub source_table_offset: u64,
    /// Highest journal sequence folded into this snapshot.
    pub last_sequence: u64,
}

/// The fixed size of a FileHeader on disk: 64 bytes.
pub const HEADER_SIZE: u64 = 64;

impl FileHeader {
    /// Create a new header for an empty store.
    pub fn new(store_id: u64) -> Self {
        Self {
            magic: STORE_MAGIC,
            version: FORMAT_VERSION,
            entry_count: 0,
            source_count: 0,
            flags: 0,
            store_id,
            entry_table_offset: HEADER_SIZE,
            shingle_block_offset: HEADER_SIZE,
            source_table_offset: HEADER_SIZE,
            last_sequence: 0,
        }
    }

    /// Whether the shingle block is compressed.
    pub fn shingles_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED_SHINGLES != 0
    }

    /// Write this header to the given writer. Writes exactly 64 bytes.
    ///
    /// Layout (all little-endian):
    /// - 0x00..0x04: magic (4 bytes)
    /// - 0x04..0x08: version (u32)
    /// - 0x08..0x10: entry_count (u64)
    /// - 0x10..0x14: source_count (u32)
    /// - 0x14..0x18: flags (u32)
    /// - 0x18..0x20: store_id (u64)
    /// - 0x20..0x28: entry_table_offset (u64)
    /// - 0x28..0x30: shingle_block_offset (u64)
    /// - 0x30..0x38: source_table_offset (u64)
    /// - 0x38..0x40: last_sequence (u64)
    pub fn write_to(&self, writer: &mut impl Write) -> FuzzyResult<()> {
        writer.write_all(&self.magic)?;
        writer.write_all(&self.version.to_le_bytes())?;
        writer.write_all(&self.entry_count.to_le_bytes())?;
        writer.write_all(&self.source_count.to_le_bytes())?;
        writer.write_all(&self.flags.to_le_bytes())?;
        writer.write_all(&self.store_id.to_le_bytes())?;
        writer.write_all(&self.entry_table_offset.to_le_bytes())?;
        writer.write_all(&self.shingle_block_offset.to_le_bytes())?;
        writer.write_all(&self.source_table_offset.to_le_bytes())?;
        writer.write_all(&self.last_sequence.to_le_bytes())?;
        Ok(())
    }

    /// Read a header from the given reader. Reads exactly 64 bytes.
    pub fn read_from(reader: &mut impl Read) -> FuzzyResult<Self> {
        let mut buf = [0u8; 64];
        reader.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                FuzzyError::Truncated
            } else {
                FuzzyError::Io(e)
            }
        })?;

        let magic = [buf[0], buf[1], buf[2], buf[3]];
        if magic != STORE_MAGIC {
            return Err(FuzzyError::InvalidMagic);
        }

        let version = le_u32(&buf[4..8]);
        if version != FORMAT_VERSION {
            return Err(FuzzyError::UnsupportedVersion(version));
        }

        Ok(Self {
            magic,
            version,
            entry_count: le_u64(&buf[8..16]),
            source_count: le_u32(&buf[16..20]),
            flags: le_u32(&buf[20..24]),
            store_id: le_u64(&buf[24..32]),
            entry_table_offset: le_u64(&buf[32..40]),
            shingle_block_offset: le_u64(&buf[40..48]),
            source_table_offset: le_u64(&buf[48..56]),
            last_sequence: le_u64(&buf[56..64]),
        })
    }
}

/// Decode a little-endian u16 from exactly two bytes.
pub(crate) fn le_u16(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

/// Decode a little-endian u32 from exactly four bytes.
pub(crate) fn le_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(raw)
}

/// Decode a little-endian u64 from exactly eight bytes.
pub(crate) fn le_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(raw)
}
