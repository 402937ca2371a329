//! Derived lookup structures. Each index is incrementally updateable and
//! fully reconstructible from the entry table.

pub mod shingle_index;

pub use shingle_index::{Candidate, CandidateInfo, ShingleKey, SimilarityIndex};
