//! Error types for the fuzzy storage engine.

use thiserror::Error;

/// All errors that can occur in the fuzzy storage engine.
#[derive(Error, Debug)]
pub enum FuzzyError {
    /// Invalid magic bytes in file header.
    #[error("Invalid magic bytes in file header")]
    InvalidMagic,

    /// Unsupported format version.
    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u32),

    /// File is empty or truncated.
    #[error("File is empty or truncated")]
    Truncated,

    /// Corrupt data at a given offset.
    #[error("Corrupt data at offset {0}")]
    Corrupt(u64),

    /// The file uses the legacy layout and migration was not requested.
    #[error("Legacy storage layout at {0}; migration required")]
    LegacyFormat(String),

    /// The storage path cannot be used.
    #[error("Cannot open storage at {path}: {reason}")]
    BadPath { path: String, reason: String },

    /// Another transaction already holds the staging slot.
    #[error("Backend busy: transaction already open for source '{owner}'")]
    Busy { owner: String },

    /// `finish_update` was called by a different source than the owner.
    #[error("Transaction conflict: owned by '{expected}', finished by '{got}'")]
    Conflict { expected: String, got: String },

    /// An update operation was issued without an open transaction.
    #[error("No transaction is open")]
    NoTransaction,

    /// Digest has the wrong length.
    #[error("Invalid digest length: expected {expected}, got {got}")]
    InvalidDigest { expected: usize, got: usize },

    /// Shingle set has the wrong number of values.
    #[error("Invalid shingle count: expected {expected}, got {got}")]
    InvalidShingles { expected: usize, got: usize },

    /// Source name is empty or too long.
    #[error("Invalid source name: {0}")]
    InvalidSource(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Compression error.
    #[error("Compression error: {0}")]
    Compression(String),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl FuzzyError {
    /// Whether the caller may retry the same operation later.
    pub fn is_transient(&self) -> bool {
        matches!(self, FuzzyError::Busy { .. })
    }

    /// Whether the error belongs to the open-time class that must not be retried
    /// without operator intervention.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FuzzyError::InvalidMagic
                | FuzzyError::UnsupportedVersion(_)
                | FuzzyError::Truncated
                | FuzzyError::Corrupt(_)
                | FuzzyError::LegacyFormat(_)
                | FuzzyError::BadPath { .. }
        )
    }
}

/// Convenience result type for fuzzy storage operations.
pub type FuzzyResult<T> = Result<T, FuzzyError>;
