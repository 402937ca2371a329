//! CLI command implementations.

use std::path::Path;

use crate::config::{load_config, BackendConfig};
use crate::engine::{migrate_legacy, FuzzyBackend};
use crate::format::{detect_layout, Layout};
use crate::types::{
    CheckCmd, Digest, FuzzyCmd, FuzzyError, FuzzyResult, ShingleSet, FORMAT_VERSION,
};

/// Build the backend configuration for the store at `file`, starting from
/// `config` when given. The positional store path always wins.
pub fn resolve_config(file: &Path, config: Option<&Path>) -> FuzzyResult<BackendConfig> {
    let mut cfg = match config {
        Some(path) => load_config(path)?,
        None => BackendConfig::new(file),
    };
    cfg.path = file.to_string_lossy().into_owned();
    Ok(cfg)
}

/// Parse a comma-separated list of shingle values.
pub fn parse_shingles(text: &str) -> FuzzyResult<ShingleSet> {
    let values = text
        .split(',')
        .map(|t| {
            t.trim()
                .parse::<u64>()
                .map_err(|_| FuzzyError::Config(format!("invalid shingle value '{}'", t.trim())))
        })
        .collect::<FuzzyResult<Vec<u64>>>()?;
    ShingleSet::from_slice(&values)
}

/// Create a new empty store.
pub fn cmd_create(config: BackendConfig) -> FuzzyResult<()> {
    let path = config.path.clone();
    if detect_layout(Path::new(&path))? != Layout::Missing {
        return Err(FuzzyError::BadPath {
            path,
            reason: "already exists".to_string(),
        });
    }
    let backend = FuzzyBackend::open_with_config(config)?;
    let id = backend.id();
    backend.close()?;
    println!("Created {} (id {})", path, id);
    Ok(())
}

/// Display information about a store.
pub fn cmd_info(config: BackendConfig, json: bool) -> FuzzyResult<()> {
    let backend = open_existing(config)?;
    let stats = backend.stats();
    let expired = backend.expired();
    let file_size = std::fs::metadata(backend.path())?.len();

    if json {
        let info = serde_json::json!({
            "format_version": FORMAT_VERSION,
            "stats": stats,
            "expired_unswept": expired,
            "file_size": file_size,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&info).unwrap_or_default()
        );
    } else {
        println!("File: {}", stats.path);
        println!("Id: {}", stats.id);
        println!("Version: {}", FORMAT_VERSION);
        println!("Entries: {}", stats.entries);
        println!("  With shingles: {}", stats.shingled_entries);
        println!("  Past ttl, unswept: {}", expired);
        println!(
            "Index: {} buckets, {} refs",
            stats.index_buckets, stats.index_refs
        );
        println!("Sources: {}", stats.sources);
        println!("Journal: {}", format_size(stats.journal_bytes));
        println!("File size: {}", format_size(file_size));
    }
    backend.close()
}

/// Look up a digest.
pub fn cmd_check(
    config: BackendConfig,
    digest: &str,
    shingles: Option<&str>,
    flag: Option<u32>,
    expire: u64,
    json: bool,
) -> FuzzyResult<()> {
    let mut cmd = CheckCmd::new(Digest::from_hex(digest)?);
    if let Some(text) = shingles {
        cmd = cmd.shingles(parse_shingles(text)?);
    }
    if let Some(f) = flag {
        cmd = cmd.flag_filter(f);
    }

    let backend = open_existing(config)?;
    let reply = backend.check(&cmd, expire);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&reply).unwrap_or_default()
        );
    } else if reply.is_match() {
        println!(
            "Match: probability {:.3}, weight {}, flag {}",
            reply.probability, reply.weight, reply.flag
        );
    } else {
        println!("No match");
    }
    backend.close()
}

/// Add (or refresh) a digest in one committed transaction.
pub fn cmd_add(
    config: BackendConfig,
    source: &str,
    digest: &str,
    shingles: Option<&str>,
    flag: u32,
    weight: u64,
    json: bool,
) -> FuzzyResult<()> {
    let mut cmd = FuzzyCmd::new(Digest::from_hex(digest)?)
        .flag(flag)
        .weight(weight);
    if let Some(text) = shingles {
        cmd = cmd.shingles(parse_shingles(text)?);
    }

    let backend = open_existing(config)?;
    backend.prepare_update(source)?;
    backend.add(&cmd)?;
    backend.finish_update(source, true)?;
    let version = backend.version(source);

    if json {
        let out = serde_json::json!({
            "added": cmd.digest,
            "flag": flag,
            "weight": weight,
            "source": source,
            "version": version,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&out).unwrap_or_default()
        );
    } else {
        println!(
            "Added {} (flag {}, weight {}); {} now at version {}",
            cmd.digest, flag, weight, source, version
        );
    }
    backend.close()
}

/// Delete a digest in one committed transaction.
pub fn cmd_del(config: BackendConfig, source: &str, digest: &str, json: bool) -> FuzzyResult<()> {
    let digest = Digest::from_hex(digest)?;
    let backend = open_existing(config)?;
    let existed = backend.entry(&digest).is_some();
    backend.prepare_update(source)?;
    backend.del(&digest)?;
    backend.finish_update(source, true)?;

    if json {
        let out = serde_json::json!({
            "deleted": digest,
            "existed": existed,
            "version": backend.version(source),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&out).unwrap_or_default()
        );
    } else if existed {
        println!("Deleted {}", digest);
    } else {
        println!("{} was not stored", digest);
    }
    backend.close()
}

/// Sweep expired entries and checkpoint.
pub fn cmd_sync(
    config: BackendConfig,
    expire: u64,
    clean_orphaned: bool,
    json: bool,
) -> FuzzyResult<()> {
    let backend = open_existing(config)?;
    let expired = backend.sync(expire, clean_orphaned)?;
    let remaining = backend.count();

    if json {
        let out = serde_json::json!({
            "expired": expired,
            "remaining": remaining,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&out).unwrap_or_default()
        );
    } else {
        println!("Expired {} entries, {} remaining", expired, remaining);
    }
    backend.close()
}

/// Compact storage.
pub fn cmd_vacuum(config: BackendConfig, json: bool) -> FuzzyResult<()> {
    let path = config.path.clone();
    let backend = open_existing(config)?;
    let before = std::fs::metadata(&path)?.len() + journal_size(&path);
    backend.vacuum()?;
    let after = std::fs::metadata(&path)?.len();

    if json {
        let out = serde_json::json!({
            "entries": backend.count(),
            "bytes_before": before,
            "bytes_after": after,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&out).unwrap_or_default()
        );
    } else {
        println!(
            "Vacuumed {}: {} -> {}",
            path,
            format_size(before),
            format_size(after)
        );
    }
    backend.close()
}

/// Convert a legacy file in place without opening it as a backend.
pub fn cmd_migrate(config: BackendConfig, json: bool) -> FuzzyResult<()> {
    let path = Path::new(&config.path);
    match detect_layout(path)? {
        Layout::Legacy => {}
        Layout::Current => {
            println!("{} is already in the current format", path.display());
            return Ok(());
        }
        Layout::Missing => {
            return Err(FuzzyError::BadPath {
                path: config.path.clone(),
                reason: "no such file".to_string(),
            })
        }
        Layout::Empty | Layout::Unknown => return Err(FuzzyError::InvalidMagic),
    }

    let report = migrate_legacy(path, config.default_ttl, config.compress_shingles)?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).unwrap_or_default()
        );
    } else {
        println!("Migrated {}", path.display());
        println!("  Records read: {}", report.records_read);
        println!("  Entries written: {}", report.entries_written);
        println!("  Weights clamped: {}", report.weights_clamped);
        println!("  Flags clamped: {}", report.flags_clamped);
        println!("  Duplicates collapsed: {}", report.duplicates_collapsed);
    }
    Ok(())
}

/// Print the committed version of a source.
pub fn cmd_version(config: BackendConfig, source: &str, json: bool) -> FuzzyResult<()> {
    let backend = open_existing(config)?;
    let version = backend.version(source);
    if json {
        let out = serde_json::json!({
            "source": source,
            "version": version,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&out).unwrap_or_default()
        );
    } else {
        println!("{}: {}", source, version);
    }
    backend.close()
}

/// Open a store that must already exist. Only `create` makes new stores and
/// only `migrate` converts legacy files.
fn open_existing(mut config: BackendConfig) -> FuzzyResult<FuzzyBackend> {
    if detect_layout(Path::new(&config.path))? == Layout::Missing {
        return Err(FuzzyError::BadPath {
            path: config.path,
            reason: "no such store (see `fzs create`)".to_string(),
        });
    }
    config.migrate_legacy = false;
    FuzzyBackend::open_with_config(config)
}

fn journal_size(path: &str) -> u64 {
    let journal = crate::format::sidecar_path(Path::new(path), ".journal");
    std::fs::metadata(journal).map(|m| m.len()).unwrap_or(0)
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
