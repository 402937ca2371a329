//! High-level operations: the backend, its transactions and maintenance.

pub mod backend;
pub mod migration;
pub mod sweeper;
pub mod transaction;

pub use backend::{BackendStats, FuzzyBackend};
pub use migration::{migrate_legacy, MigrationReport};
pub use sweeper::{SweepReport, Sweeper};
pub use transaction::Transaction;
