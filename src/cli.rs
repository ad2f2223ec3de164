//! Command-line interface for inspecting and invalidating a cache directory
//!
//! This module handles parsing of CLI arguments using clap and runs each
//! subcommand against a file-backed [`CacheEngine`].

use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;

use crate::cache::{serializer, CacheEngine, CacheIdentity};
use crate::config::{CacheConfig, DEFAULT_NAMESPACE};
use crate::error::CacheError;

/// Error types for CLI commands
#[derive(Debug, Error)]
pub enum CliError {
    /// A type tag argument was empty
    #[error("Type tag must not be empty; use invalidate-all to clear everything")]
    EmptyTypeTag,

    /// `show` was asked for an identity with no readable entry
    #[error("No cached entry for '{0}'")]
    EntryNotFound(String),

    /// The cache itself failed
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Writing command output failed
    #[error("Failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

/// Inspect and invalidate a stalecache directory
#[derive(Parser, Debug)]
#[command(name = "stalecache")]
#[command(about = "Inspect and invalidate a disk-backed stalecache directory")]
#[command(version)]
pub struct Cli {
    /// Cache directory to operate on (defaults to the platform cache dir)
    #[arg(long, global = true, env = "STALECACHE_DIR", value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Application namespace used to derive the default cache directory
    #[arg(long, global = true, default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// List every cached identity with its timestamps
    List,
    /// Print the timestamps and size of one stored entry
    Show { type_tag: String, id: String },
    /// Remove one cached entry
    Invalidate { type_tag: String, id: String },
    /// Remove every entry whose type tag starts with PREFIX
    InvalidateType { prefix: String },
    /// Remove every entry and all refresh bookkeeping
    InvalidateAll,
}

impl Cli {
    /// Resolves the cache location from the parsed arguments
    pub fn config(&self) -> Result<CacheConfig, CliError> {
        match &self.cache_dir {
            Some(dir) => Ok(CacheConfig::with_dir(&self.namespace, dir.clone())),
            None => Ok(CacheConfig::new(&self.namespace)?),
        }
    }
}

fn require_type_tag(type_tag: &str) -> Result<(), CliError> {
    if type_tag.is_empty() {
        return Err(CliError::EmptyTypeTag);
    }
    Ok(())
}

fn format_stamp(stamp: Option<chrono::DateTime<chrono::Utc>>) -> String {
    stamp
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| "-".to_string())
}

/// Runs the parsed command, writing human-readable output to `out`
pub fn run(cli: &Cli, out: &mut impl Write) -> Result<(), CliError> {
    let config = cli.config()?;
    let engine = CacheEngine::open(&config);

    match &cli.command {
        Command::List => {
            for identity in engine.entries().identities() {
                let cached_at = engine
                    .entries()
                    .read(&identity)
                    .and_then(|bytes| serializer::peek_cached_at(&bytes));
                let refreshed = engine.metadata().last_refresh(&identity.metadata_key());
                writeln!(
                    out,
                    "{}\tcached_at={}\trefreshed={}",
                    identity,
                    format_stamp(cached_at),
                    format_stamp(refreshed)
                )?;
            }
        }
        Command::Show { type_tag, id } => {
            let identity = CacheIdentity::new(type_tag.as_str(), id.as_str());
            let bytes = engine
                .entries()
                .read(&identity)
                .ok_or_else(|| CliError::EntryNotFound(identity.to_string()))?;
            let refreshed = engine.metadata().last_refresh(&identity.metadata_key());
            writeln!(out, "{}", identity)?;
            writeln!(out, "cached_at\t{}", format_stamp(serializer::peek_cached_at(&bytes)))?;
            writeln!(out, "refreshed\t{}", format_stamp(refreshed))?;
            writeln!(out, "size\t{} bytes", bytes.len())?;
        }
        Command::Invalidate { type_tag, id } => {
            engine.invalidate(type_tag, id)?;
            writeln!(out, "Invalidated {}/{}", type_tag, id)?;
        }
        Command::InvalidateType { prefix } => {
            require_type_tag(prefix)?;
            let removed = engine.invalidate_type(prefix)?;
            writeln!(out, "Invalidated {} entries", removed)?;
        }
        Command::InvalidateAll => {
            let removed = engine.invalidate_all()?;
            writeln!(out, "Invalidated {} entries", removed)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{EntryStore, FileEntryStore};
    use tempfile::TempDir;

    fn cli_for(dir: &TempDir, args: &[&str]) -> Cli {
        let dir_arg = dir.path().to_string_lossy().into_owned();
        let mut full = vec!["stalecache", "--cache-dir", dir_arg.as_str()];
        full.extend_from_slice(args);
        Cli::parse_from(full)
    }

    fn run_to_string(cli: &Cli) -> Result<String, CliError> {
        let mut out = Vec::new();
        run(cli, &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    fn seed<T: serializer::Cacheable>(dir: &TempDir, identity: &CacheIdentity, value: &T) {
        let store = FileEntryStore::with_dir(dir.path().to_path_buf());
        store
            .write(identity, &serializer::encode(value).unwrap())
            .unwrap();
    }

    #[test]
    fn test_cli_parse_subcommands() {
        let cli = Cli::parse_from(["stalecache", "invalidate", "Card", "all"]);
        assert_eq!(
            cli.command,
            Command::Invalidate {
                type_tag: "Card".into(),
                id: "all".into()
            }
        );
        assert_eq!(cli.namespace, DEFAULT_NAMESPACE);

        let cli = Cli::parse_from(["stalecache", "invalidate-type", "Card"]);
        assert_eq!(cli.command, Command::InvalidateType { prefix: "Card".into() });
    }

    #[test]
    fn test_cache_dir_flag_overrides_default() {
        let cli = Cli::parse_from(["stalecache", "--cache-dir", "/tmp/x", "list"]);
        let config = cli.config().unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/x"));
    }

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn test_list_prints_identities() {
        let dir = TempDir::new().unwrap();
        seed(&dir, &CacheIdentity::new("Card", "all"), &names(&["A", "B"]));

        let output = run_to_string(&cli_for(&dir, &["list"])).unwrap();
        assert!(output.starts_with("Card/all\tcached_at="));
        assert!(output.contains("refreshed=-"));
    }

    #[test]
    fn test_show_prints_entry_details() {
        let dir = TempDir::new().unwrap();
        let identity = CacheIdentity::new("Card", "all");
        let at = chrono::Utc::now();
        let bytes = serializer::encode_at(&names(&["A", "B"]), at).unwrap();
        FileEntryStore::with_dir(dir.path().to_path_buf())
            .write(&identity, &bytes)
            .unwrap();

        let output = run_to_string(&cli_for(&dir, &["show", "Card", "all"])).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[0], "Card/all");
        assert_eq!(lines[1], format!("cached_at\t{}", at.to_rfc3339()));
        assert_eq!(lines[2], "refreshed\t-");
        assert_eq!(lines[3], format!("size\t{} bytes", bytes.len()));
    }

    #[test]
    fn test_show_missing_entry_errors() {
        let dir = TempDir::new().unwrap();
        let result = run_to_string(&cli_for(&dir, &["show", "Card", "none"]));
        assert!(matches!(result, Err(CliError::EntryNotFound(_))));
    }

    #[test]
    fn test_invalidate_commands() {
        let dir = TempDir::new().unwrap();
        seed(&dir, &CacheIdentity::new("CardList", "a"), &1_u32);
        seed(&dir, &CacheIdentity::new("CardList", "b"), &2_u32);
        seed(&dir, &CacheIdentity::new("Song", "1"), &3_u32);

        run_to_string(&cli_for(&dir, &["invalidate", "CardList", "a"])).unwrap();
        let output = run_to_string(&cli_for(&dir, &["invalidate-type", "Card"])).unwrap();
        assert_eq!(output.trim(), "Invalidated 1 entries");
        let output = run_to_string(&cli_for(&dir, &["invalidate-all"])).unwrap();
        assert_eq!(output.trim(), "Invalidated 1 entries");
    }

    #[test]
    fn test_empty_type_tag_is_rejected() {
        let dir = TempDir::new().unwrap();
        let result = run_to_string(&cli_for(&dir, &["invalidate-type", ""]));
        assert!(matches!(result, Err(CliError::EmptyTypeTag)));
        assert!(result.unwrap_err().to_string().contains("invalidate-all"));
    }

    #[test]
    fn test_invalidate_accepts_empty_type_tag() {
        let dir = TempDir::new().unwrap();
        let untagged = CacheIdentity::new("", "orphan");
        seed(&dir, &untagged, &1_u32);
        seed(&dir, &CacheIdentity::new("Song", "1"), &2_u32);

        let output = run_to_string(&cli_for(&dir, &["invalidate", "", "orphan"])).unwrap();
        assert_eq!(output.trim(), "Invalidated /orphan");

        let store = FileEntryStore::with_dir(dir.path().to_path_buf());
        assert!(store.read(&untagged).is_none());
        assert_eq!(store.identities(), vec![CacheIdentity::new("Song", "1")]);
    }
}
