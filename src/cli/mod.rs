//! Command-line tooling for operating a fuzzy store.

pub mod commands;
