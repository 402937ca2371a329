//! Fuzzy storage: a transactional store of content fingerprints.
//!
//! Keeps fuzzy digests of message content with their weights and flags,
//! answers exact and approximate (shingle-based) lookups, and applies updates
//! in single-writer transactions that are journaled before they become
//! visible. Maintenance sweeps expired entries and compacts storage; files in
//! the legacy flat-record layout are migrated on open.

pub mod cli;
pub mod config;
pub mod engine;
pub mod format;
pub mod index;
pub mod store;
pub mod types;

// Re-export commonly used types at the crate root
pub use config::{load_config, parse_config, BackendConfig, ExpiryPolicy};
pub use engine::{BackendStats, FuzzyBackend, MigrationReport, SweepReport, Transaction};
pub use format::{StoreReader, StoreWriter};
pub use index::{Candidate, SimilarityIndex};
pub use store::{CommitRecord, EntryTable, Operation};
pub use types::{
    now_secs, CheckCmd, Digest, Entry, FileHeader, FuzzyCmd, FuzzyError, FuzzyResult, Reply,
    ShingleSet, DIGEST_LEN, FORMAT_VERSION, MAX_CANDIDATES, SHINGLE_COUNT,
};
