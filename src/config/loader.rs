//! Backend configuration loading from TOML.

use std::collections::BTreeMap;
use std::path::Path;

use log::warn;
use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{FuzzyError, FuzzyResult};

/// Maximum nesting of `${name}` substitutions.
pub const MAX_SUBSTITUTION_DEPTH: usize = 8;

/// How `sync` decides that an entry has expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryPolicy {
    /// Expire when `now - last_seen` exceeds the threshold passed to `sync`.
    #[default]
    Threshold,
    /// Use each entry's own ttl when set, the `sync` threshold otherwise.
    EntryTtl,
}

/// Startup parameters of a fuzzy backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Path to the store snapshot.
    pub path: String,
    /// Ttl stamped on newly added entries, in seconds.
    #[serde(default = "default_ttl", deserialize_with = "de_duration")]
    pub default_ttl: u64,
    /// Compact storage right after open.
    #[serde(default)]
    pub vacuum_on_open: bool,
    /// Convert a legacy file found at `path` instead of failing.
    #[serde(default = "default_true")]
    pub migrate_legacy: bool,
    /// Expiry rule used by `sync`.
    #[serde(default)]
    pub expiry_policy: ExpiryPolicy,
    /// Seconds after which an abandoned transaction may be reclaimed.
    #[serde(default = "default_max_transaction_age", deserialize_with = "de_duration")]
    pub max_transaction_age: u64,
    /// Minimum shared shingles for an approximate match to score.
    #[serde(default = "default_min_shingle_matches")]
    pub min_shingle_matches: usize,
    /// LZ4-compress the shingle block of snapshots.
    #[serde(default = "default_true")]
    pub compress_shingles: bool,
}

fn default_ttl() -> u64 {
    2 * 86_400
}

fn default_true() -> bool {
    true
}

fn default_max_transaction_age() -> u64 {
    300
}

fn default_min_shingle_matches() -> usize {
    1
}

impl BackendConfig {
    /// Defaults for a store at `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_string_lossy().into_owned(),
            default_ttl: default_ttl(),
            vacuum_on_open: false,
            migrate_legacy: true,
            expiry_policy: ExpiryPolicy::default(),
            max_transaction_age: default_max_transaction_age(),
            min_shingle_matches: default_min_shingle_matches(),
            compress_shingles: true,
        }
    }
}

/// Load configuration from a TOML file.
pub fn load_config(path: &Path) -> FuzzyResult<BackendConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        FuzzyError::Config(format!("Failed to read config file {}: {e}", path.display()))
    })?;
    parse_config(&content)
}

/// Parse configuration text. A `[variables]` table provides `${name}`
/// substitutions applied to every other string value.
pub fn parse_config(content: &str) -> FuzzyResult<BackendConfig> {
    let mut value: toml::Value = toml::from_str(content)
        .map_err(|e| FuzzyError::Config(format!("Failed to parse config: {e}")))?;

    let mut variables = BTreeMap::new();
    if let Some(table) = value.as_table_mut() {
        if let Some(toml::Value::Table(vars)) = table.remove("variables") {
            for (name, v) in vars {
                match v {
                    toml::Value::String(s) => {
                        variables.insert(name, s);
                    }
                    other => {
                        variables.insert(name, other.to_string());
                    }
                }
            }
        }
    }

    substitute_in_value(&mut value, &variables)?;

    value
        .try_into::<BackendConfig>()
        .map_err(|e| FuzzyError::Config(format!("Invalid config: {e}")))
}

fn substitute_in_value(
    value: &mut toml::Value,
    variables: &BTreeMap<String, String>,
) -> FuzzyResult<()> {
    match value {
        toml::Value::String(s) => *s = substitute_variables(s, variables)?,
        toml::Value::Array(items) => {
            for item in items {
                substitute_in_value(item, variables)?;
            }
        }
        toml::Value::Table(table) => {
            for (_, item) in table.iter_mut() {
                substitute_in_value(item, variables)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Replace every `${name}` in `input`. Variable values are expanded
/// recursively; unknown names become the empty string.
pub fn substitute_variables(
    input: &str,
    variables: &BTreeMap<String, String>,
) -> FuzzyResult<String> {
    substitute_at_depth(input, variables, 0)
}

fn substitute_at_depth(
    input: &str,
    variables: &BTreeMap<String, String>,
    depth: usize,
) -> FuzzyResult<String> {
    if depth > MAX_SUBSTITUTION_DEPTH {
        return Err(FuzzyError::Config(format!(
            "variable substitution nested deeper than {MAX_SUBSTITUTION_DEPTH} levels in '{input}'"
        )));
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated: keep the text as is.
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let name = &after[..end];
        match variables.get(name) {
            Some(v) => out.push_str(&substitute_at_depth(v, variables, depth + 1)?),
            None => warn!("config variable '{name}' is not defined"),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Parse a duration: bare seconds or a number with an `s`, `m`, `h` or `d` suffix.
pub fn parse_duration(text: &str) -> FuzzyResult<u64> {
    let text = text.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, unit) = text.split_at(split);
    let amount: u64 = digits
        .parse()
        .map_err(|_| FuzzyError::Config(format!("invalid duration '{text}'")))?;
    let scale = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        other => {
            return Err(FuzzyError::Config(format!(
                "unknown duration unit '{other}' in '{text}'"
            )))
        }
    };
    amount
        .checked_mul(scale)
        .ok_or_else(|| FuzzyError::Config(format!("duration '{text}' overflows")))
}

fn de_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Secs(secs) => Ok(secs),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}
