//! In-memory store state: the entry table, its index and source versions.

pub mod commit;
pub mod entry_table;

pub use commit::{CommitRecord, Operation};
pub use entry_table::EntryTable;
