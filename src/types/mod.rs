//! All data types for the fuzzy storage engine.

pub mod digest;
pub mod entry;
pub mod error;
pub mod header;

pub use digest::{Digest, ShingleSet};
pub use entry::{CheckCmd, Entry, FuzzyCmd, Reply};
pub use error::{FuzzyError, FuzzyResult};
pub use header::{FileHeader, HEADER_SIZE};

/// Magic bytes at the start of every store snapshot.
pub const STORE_MAGIC: [u8; 4] = [0x46, 0x5A, 0x53, 0x54]; // "FZST"

/// Magic bytes of the legacy flat-record layout.
pub const LEGACY_MAGIC: [u8; 4] = [0x72, 0x73, 0x66, 0x00]; // "rsf\0"

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Length of a fuzzy digest in bytes.
pub const DIGEST_LEN: usize = 64;

/// Number of shingles in a shingle set.
pub const SHINGLE_COUNT: usize = 32;

/// Maximum number of ranked candidates kept by a similarity lookup.
pub const MAX_CANDIDATES: usize = 10;

/// Maximum length of a source name in bytes.
pub const MAX_SOURCE_LEN: usize = 1024;

/// Returns the current time as Unix epoch seconds.
pub fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Generate the identity of a new physical store at `path`.
///
/// Mixes the creation time with the path so that two stores created in the
/// same instant at different locations still differ. Never zero.
pub fn new_store_id(path: &std::path::Path) -> u64 {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
    let path_hash = crc32fast::hash(path.as_os_str().to_string_lossy().as_bytes()) as u64;
    (nanos ^ (path_hash << 32) ^ path_hash.rotate_left(17)).max(1)
}
