//! Startup configuration for the fuzzy backend.

pub mod loader;

pub use loader::{
    load_config, parse_config, parse_duration, substitute_variables, BackendConfig, ExpiryPolicy,
    MAX_SUBSTITUTION_DEPTH,
};
