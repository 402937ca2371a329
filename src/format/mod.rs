//! On-disk layouts: snapshot, journal, and the legacy format.

pub mod compression;
pub mod journal;
pub mod legacy;
pub mod reader;
pub mod writer;

use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};

pub use journal::Journal;
pub use legacy::{read_legacy_records, LegacyRecord};
pub use reader::StoreReader;
pub use writer::StoreWriter;

use crate::types::error::FuzzyResult;
use crate::types::{LEGACY_MAGIC, STORE_MAGIC};

/// What an existing path holds, judged from its first bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Nothing at the path yet.
    Missing,
    /// A zero-length file.
    Empty,
    /// A current-format snapshot.
    Current,
    /// The legacy flat-record layout.
    Legacy,
    /// Anything else.
    Unknown,
}

/// Inspect the header of `path` without reading the rest of it.
pub fn detect_layout(path: &Path) -> FuzzyResult<Layout> {
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Layout::Missing),
        Err(e) => return Err(e.into()),
    };
    let mut magic = [0u8; 4];
    let mut filled = 0;
    while filled < magic.len() {
        let n = file.read(&mut magic[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(match filled {
        0 => Layout::Empty,
        4 if magic == STORE_MAGIC => Layout::Current,
        4 if magic == LEGACY_MAGIC => Layout::Legacy,
        _ => Layout::Unknown,
    })
}

/// `path` with `suffix` appended to its final component ("store.db" -> "store.db.journal").
pub fn sidecar_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
