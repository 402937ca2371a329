//! Sequential reader for the legacy flat-record layout.
//!
//! ```text
//! [magic "rsf\0"]
//! [value: i32][flag: i32][time: u64][hash_pipe: 64 bytes][block_size: u32]  x N
//! ```

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::types::error::{FuzzyError, FuzzyResult};
use crate::types::header::{le_u32, le_u64};
use crate::types::{Digest, DIGEST_LEN, LEGACY_MAGIC};

/// Size of a single legacy record: 84 bytes.
pub const LEGACY_RECORD_SIZE: usize = 84;

/// One record of the legacy layout.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyRecord {
    /// Signed weight; legacy stores allowed negative values.
    pub value: i32,
    /// Classification tag.
    pub flag: i32,
    /// Last update time (Unix epoch seconds).
    pub time: u64,
    /// The fuzzy hash pipe, reused verbatim as the digest.
    pub digest: Digest,
    /// Block size the hash was computed with; not carried over.
    pub block_size: u32,
}

/// Reads every record of a legacy file, in file order.
pub fn read_legacy_records(path: &Path) -> FuzzyResult<Vec<LegacyRecord>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 4];
    read_full(&mut reader, &mut magic)?;
    if magic != LEGACY_MAGIC {
        return Err(FuzzyError::InvalidMagic);
    }

    let mut records = Vec::new();
    let mut buf = [0u8; LEGACY_RECORD_SIZE];
    loop {
        let n = read_up_to(&mut reader, &mut buf)?;
        if n == 0 {
            break;
        }
        if n < LEGACY_RECORD_SIZE {
            return Err(FuzzyError::Truncated);
        }
        records.push(parse_legacy_record(&buf)?);
    }
    Ok(records)
}

fn parse_legacy_record(data: &[u8; LEGACY_RECORD_SIZE]) -> FuzzyResult<LegacyRecord> {
    Ok(LegacyRecord {
        value: le_u32(&data[0..4]) as i32,
        flag: le_u32(&data[4..8]) as i32,
        time: le_u64(&data[8..16]),
        digest: Digest::from_slice(&data[16..16 + DIGEST_LEN])?,
        block_size: le_u32(&data[80..84]),
    })
}

fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> FuzzyResult<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FuzzyError::Truncated
        } else {
            FuzzyError::Io(e)
        }
    })
}

/// Fill `buf` as far as the reader allows; returns the byte count read.
fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> FuzzyResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
