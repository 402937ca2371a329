//! Append-only commit journal.
//!
//! Every committed transaction is appended as one framed record before it
//! becomes visible in memory:
//!
//! ```text
//! [payload_len: u32][payload][crc32(payload): u32]
//! ```
//!
//! The snapshot header remembers the highest sequence it already contains, so
//! replay after a checkpoint never applies a record twice. Replay stops at the
//! first truncated or corrupt record and cuts the file back to the last good
//! one: that tail can only come from a crash mid-append.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::store::{CommitRecord, Operation};
use crate::types::error::{FuzzyError, FuzzyResult};
use crate::types::header::{le_u16, le_u32, le_u64};
use crate::types::{Digest, DIGEST_LEN, SHINGLE_COUNT};

use super::reader::parse_shingle_set;

const OP_ADD: u8 = 1;
const OP_DELETE: u8 = 2;

/// Frame overhead: length prefix plus checksum.
const FRAME_OVERHEAD: u64 = 8;

/// Append-only journal of committed transactions.
pub struct Journal {
    path: PathBuf,
    file: File,
    len: u64,
    next_sequence: u64,
    #[cfg(test)]
    fail_after_bytes: Option<usize>,
    #[cfg(test)]
    fail_reset: bool,
}

impl Journal {
    /// Open or create the journal and return the records newer than
    /// `after_sequence`, in commit order.
    pub fn open(path: &Path, after_sequence: u64) -> FuzzyResult<(Self, Vec<CommitRecord>)> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let mut records = Vec::new();
        let mut valid_len = 0usize;
        let mut max_sequence = after_sequence;
        while valid_len < data.len() {
            match read_frame(&data[valid_len..]) {
                Some((record, used)) => {
                    max_sequence = max_sequence.max(record.sequence);
                    if record.sequence > after_sequence {
                        records.push(record);
                    }
                    valid_len += used;
                }
                None => break,
            }
        }

        if valid_len < data.len() {
            warn!(
                "journal {}: discarding {} bytes of torn tail",
                path.display(),
                data.len() - valid_len
            );
            file.set_len(valid_len as u64)?;
            file.sync_all()?;
        }
        debug!(
            "journal {}: {} records to replay",
            path.display(),
            records.len()
        );

        Ok((
            Self {
                path: path.to_path_buf(),
                file,
                len: valid_len as u64,
                next_sequence: max_sequence + 1,
                #[cfg(test)]
                fail_after_bytes: None,
                #[cfg(test)]
                fail_reset: false,
            },
            records,
        ))
    }

    /// Sequence number the next commit must carry.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Current journal length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the journal holds no records.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The journal path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably append a record. On failure the file is cut back to its
    /// previous length, so a failed commit leaves no trace.
    pub fn append(&mut self, record: &CommitRecord) -> FuzzyResult<()> {
        let payload = encode_record(record);
        let mut frame = Vec::with_capacity(payload.len() + FRAME_OVERHEAD as usize);
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&payload);
        frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());

        if let Err(e) = self.write_frame(&frame) {
            warn!(
                "journal {}: append of commit #{} failed, rolling back: {}",
                self.path.display(),
                record.sequence,
                e
            );
            // Best effort: a leftover tail is also cut at the next open.
            let _ = self.file.set_len(self.len);
            let _ = self.file.sync_all();
            return Err(e);
        }

        self.len += frame.len() as u64;
        self.next_sequence = record.sequence + 1;
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8]) -> FuzzyResult<()> {
        self.file.seek(SeekFrom::Start(self.len))?;
        #[cfg(test)]
        if let Some(limit) = self.fail_after_bytes.take() {
            self.file.write_all(&frame[..limit.min(frame.len())])?;
            return Err(FuzzyError::Io(std::io::Error::other("injected write failure")));
        }
        self.file.write_all(frame)?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Force everything written so far to stable storage.
    pub fn flush(&mut self) -> FuzzyResult<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Drop every record: called once a snapshot containing them is durable.
    pub fn reset(&mut self) -> FuzzyResult<()> {
        #[cfg(test)]
        if std::mem::take(&mut self.fail_reset) {
            return Err(FuzzyError::Io(std::io::Error::other("injected reset failure")));
        }
        self.file.set_len(0)?;
        self.file.sync_all()?;
        self.len = 0;
        Ok(())
    }
}

#[cfg(test)]
impl Journal {
    /// Make the next append write `bytes` of its frame and then fail.
    pub(crate) fn fail_next_append(&mut self, bytes: usize) {
        self.fail_after_bytes = Some(bytes);
    }

    /// Make the next reset fail before touching the file.
    pub(crate) fn fail_next_reset(&mut self) {
        self.fail_reset = true;
    }
}

/// Decode one frame from the start of `data`. Returns the record and the
/// number of bytes consumed, or `None` for a truncated or corrupt frame.
fn read_frame(data: &[u8]) -> Option<(CommitRecord, usize)> {
    if data.len() < 4 {
        return None;
    }
    let payload_len = le_u32(&data[0..4]) as usize;
    let total = payload_len.checked_add(FRAME_OVERHEAD as usize)?;
    if data.len() < total {
        return None;
    }
    let payload = &data[4..4 + payload_len];
    let crc = le_u32(&data[4 + payload_len..total]);
    if crc32fast::hash(payload) != crc {
        return None;
    }
    decode_record(payload).ok().map(|record| (record, total))
}

/// Encode a commit record payload.
pub fn encode_record(record: &CommitRecord) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&record.sequence.to_le_bytes());
    buf.extend_from_slice(&record.committed_at.to_le_bytes());
    buf.push(record.version_bump as u8);
    buf.extend_from_slice(&(record.source.len() as u16).to_le_bytes());
    buf.extend_from_slice(record.source.as_bytes());
    buf.extend_from_slice(&(record.ops.len() as u32).to_le_bytes());
    for op in &record.ops {
        match op {
            Operation::Add {
                digest,
                flag,
                weight,
                ttl,
                shingles,
            } => {
                buf.push(OP_ADD);
                buf.extend_from_slice(digest.as_bytes());
                buf.extend_from_slice(&flag.to_le_bytes());
                buf.extend_from_slice(&weight.to_le_bytes());
                buf.extend_from_slice(&ttl.to_le_bytes());
                match shingles {
                    Some(set) => {
                        buf.push(1);
                        for value in set.values() {
                            buf.extend_from_slice(&value.to_le_bytes());
                        }
                    }
                    None => buf.push(0),
                }
            }
            Operation::Delete { digest } => {
                buf.push(OP_DELETE);
                buf.extend_from_slice(digest.as_bytes());
            }
        }
    }
    buf
}

/// Decode a commit record payload.
pub fn decode_record(data: &[u8]) -> FuzzyResult<CommitRecord> {
    let mut cur = ByteCursor::new(data);
    let sequence = le_u64(cur.take(8)?);
    let committed_at = le_u64(cur.take(8)?);
    let version_bump = cur.take(1)?[0] != 0;
    let source_len = le_u16(cur.take(2)?) as usize;
    let source = std::str::from_utf8(cur.take(source_len)?)
        .map_err(|_| FuzzyError::Corrupt(cur.pos as u64))?
        .to_string();
    let op_count = le_u32(cur.take(4)?) as usize;

    let mut ops = Vec::with_capacity(op_count.min(4096));
    for _ in 0..op_count {
        let kind = cur.take(1)?[0];
        let digest = Digest::from_slice(cur.take(DIGEST_LEN)?)?;
        match kind {
            OP_ADD => {
                let flag = le_u32(cur.take(4)?);
                let weight = le_u64(cur.take(8)?);
                let ttl = le_u64(cur.take(8)?);
                let shingles = match cur.take(1)?[0] {
                    0 => None,
                    1 => Some(parse_shingle_set(cur.take(SHINGLE_COUNT * 8)?)),
                    _ => return Err(FuzzyError::Corrupt(cur.pos as u64)),
                };
                ops.push(Operation::Add {
                    digest,
                    flag,
                    weight,
                    ttl,
                    shingles,
                });
            }
            OP_DELETE => ops.push(Operation::Delete { digest }),
            _ => return Err(FuzzyError::Corrupt(cur.pos as u64)),
        }
    }

    if cur.pos != data.len() {
        return Err(FuzzyError::Corrupt(cur.pos as u64));
    }

    Ok(CommitRecord {
        sequence,
        committed_at,
        source,
        version_bump,
        ops,
    })
}

/// Bounds-checked forward reader over a byte slice.
struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> FuzzyResult<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(FuzzyError::Truncated)?;
        if end > self.data.len() {
            return Err(FuzzyError::Truncated);
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }
}
