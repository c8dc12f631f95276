// SPDX-License-Identifier: MIT
//
// SpoolTag: Filament Spool Tag Reader
// Copyright (c) 2025 SpoolTag Contributors
//
// https://github.com/spooltag/spooltag

//! SpoolTag command-line tool
//!
//! Exercises the reader core without hardware: derives keys for a UID, scans
//! a saved tag dump through the simulated transport, decodes a dump directly,
//! and inspects or wipes the file-backed caches.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   replay    ┌──────────────┐   decode    ┌──────────────┐
//! │   Tag dump   │ ──────────> │  TagScanner  │ ──────────> │ JSON report  │
//! │   (file)     │ (simulated) │   (caches)   │             │   (stdout)   │
//! └──────────────┘             └──────────────┘             └──────────────┘
//!                                     │
//!                                state dir
//!                             (key/tag caches)
//! ```
//!
//! Logs go to stderr as JSON; results go to stdout.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use spooltag_core::{
    config::ReaderConfig,
    decoder,
    kdf,
    keys::TagUid,
    store::{FileStore, KeyValueStore},
    tag::RawSectorMap,
    transport::{SimulatedTag, TagTransport},
    Error, ScanDiagnostics, TagScanner,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// State directory used when the configuration names none
const DEFAULT_STATE_DIR: &str = ".spooltag";

#[derive(Parser, Debug)]
#[command(name = "spooltag")]
#[command(about = "SpoolTag - Filament spool tag reader", long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// YAML configuration file (defaults to SPOOLTAG_* environment variables)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the sixteen sector keys derived from a UID
    Keys {
        /// Tag UID in hex
        #[arg(long)]
        uid: String,
    },

    /// Scan a tag dump through the simulated transport
    Scan {
        /// Tag UID in hex
        #[arg(long)]
        uid: String,

        /// Full memory dump (binary or hex text)
        #[arg(long)]
        dump: PathBuf,

        /// Lock a sector so it rejects every key (repeatable)
        #[arg(long = "fail-sector")]
        fail_sectors: Vec<usize>,

        /// Protect sectors with the UID's derived keys instead of the dump trailers
        #[arg(long)]
        derived_keys: bool,

        /// Skip the full-tag cache fast path
        #[arg(long)]
        no_cache: bool,
    },

    /// Decode a tag dump without authentication
    Decode {
        /// Full memory dump (binary or hex text)
        #[arg(long)]
        dump: PathBuf,
    },

    /// Inspect or wipe the persistent caches
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Print cache sizes and counters
    Stats {
        /// Emit Prometheus text format instead of JSON
        #[arg(long)]
        prometheus: bool,
    },
    /// Remove every cached key set and tag image
    Clear,
}

#[derive(Serialize)]
struct KeysOutput {
    uid: String,
    keys: Vec<String>,
}

#[derive(Serialize)]
struct CacheOutput {
    memory_entries: usize,
    persistent_entries: usize,
    stats: spooltag_core::cache::StatsSnapshot,
}

#[derive(Serialize)]
struct StatsOutput {
    state_dir: PathBuf,
    key_cache: CacheOutput,
    tag_cache: CacheOutput,
}

#[derive(Serialize)]
struct FailureOutput<'a> {
    uid: String,
    error: String,
    auth_failure: bool,
    retryable: bool,
    diagnostics: &'a ScanDiagnostics,
}

fn load_config(path: Option<&Path>) -> Result<ReaderConfig> {
    match path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            ReaderConfig::from_yaml_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))
        }
        None => {
            info!("Loading configuration from environment variables");
            ReaderConfig::from_env().context("Failed to load configuration from environment")
        }
    }
}

fn build_scanner(config: &ReaderConfig) -> Result<(TagScanner, PathBuf)> {
    let state_dir = config
        .state_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));
    let store: Arc<dyn KeyValueStore> = Arc::new(
        FileStore::new(&state_dir)
            .with_context(|| format!("Failed to open state directory {}", state_dir.display()))?,
    );
    let clock = Arc::new(spooltag_core::clock::SystemClock);
    Ok((TagScanner::from_config(config, store, clock), state_dir))
}

fn parse_uid(uid: &str) -> Result<TagUid> {
    uid.parse::<TagUid>()
        .with_context(|| format!("Invalid UID {:?}", uid))
}

/// Read a dump file, accepting raw bytes or hex text
fn read_dump(path: &Path) -> Result<Vec<u8>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read dump {}", path.display()))?;

    if let Ok(text) = std::str::from_utf8(&bytes) {
        let compact: String = text.split_whitespace().collect();
        if !compact.is_empty() {
            if let Ok(decoded) = spooltag_core::encoding::decode_hex(&compact) {
                return Ok(decoded);
            }
        }
    }
    Ok(bytes)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_keys(uid: &str) -> Result<()> {
    let uid = parse_uid(uid)?;
    let keys = kdf::try_derive_keys(uid.as_bytes())?;
    print_json(&KeysOutput {
        uid: uid.to_hex(),
        keys: keys.to_hex_strings(),
    })
}

async fn cmd_scan(
    config: &ReaderConfig,
    uid: &str,
    dump: &Path,
    fail_sectors: &[usize],
    derived_keys: bool,
    no_cache: bool,
) -> Result<()> {
    let uid = parse_uid(uid)?;
    let (scanner, _) = build_scanner(config)?;

    if !no_cache {
        let cached = {
            let scanner = scanner.clone();
            let uid = uid.clone();
            tokio::task::spawn_blocking(move || scanner.lookup_cached(&uid))
                .await
                .context("Cache lookup task failed")?
        };
        if let Some(report) = cached {
            info!(uid = %uid, "Served from tag cache");
            return print_json(&report);
        }
    }

    let bytes = read_dump(dump)?;
    let mut tag = SimulatedTag::from_dump(&bytes);
    if tag.sector_count() == 0 {
        bail!("Dump {} holds no complete sector", dump.display());
    }
    if derived_keys {
        let keys = scanner.key_cache().get(&uid)?;
        tag = tag.with_derived_keys(&keys);
    }
    for &sector in fail_sectors {
        tag = tag.with_locked_sector(sector);
    }

    let cancel = CancellationToken::new();
    let worker = {
        let scanner = scanner.clone();
        let uid = uid.clone();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            let mut diagnostics = ScanDiagnostics::new();
            let result = scanner.scan_blocking_with(&uid, &mut tag, &cancel, &mut diagnostics);
            (result, diagnostics)
        })
    };

    let (result, diagnostics) = tokio::select! {
        joined = worker => joined.context("Scan task failed")?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling scan");
            cancel.cancel();
            bail!(Error::Cancelled);
        }
    };

    match result {
        Ok(report) => print_json(&report),
        Err(e) => {
            print_json(&FailureOutput {
                uid: uid.to_hex(),
                error: e.to_string(),
                auth_failure: e.is_auth_error(),
                retryable: e.is_retryable(),
                diagnostics: &diagnostics,
            })?;
            Err(e).context("Scan failed")
        }
    }
}

fn cmd_decode(dump: &Path) -> Result<()> {
    let bytes = read_dump(dump)?;
    let raw = RawSectorMap::from_full_dump(&bytes);
    let record = decoder::try_decode(&raw)
        .with_context(|| format!("Failed to decode {}", dump.display()))?;
    print_json(&record)
}

fn cmd_cache(config: &ReaderConfig, action: CacheAction) -> Result<()> {
    let (scanner, state_dir) = build_scanner(config)?;
    let keys = scanner.key_cache();
    let tags = scanner.tag_cache();

    match action {
        CacheAction::Stats { prometheus: true } => {
            print!("{}", keys.statistics().prometheus_format("key"));
            print!("{}", tags.statistics().prometheus_format("tag"));
            Ok(())
        }
        CacheAction::Stats { prometheus: false } => print_json(&StatsOutput {
            state_dir,
            key_cache: CacheOutput {
                memory_entries: keys.memory_len(),
                persistent_entries: keys.persistent_len(),
                stats: keys.stats(),
            },
            tag_cache: CacheOutput {
                memory_entries: tags.memory_len(),
                persistent_entries: tags.persistent_len(),
                stats: tags.stats(),
            },
        }),
        CacheAction::Clear => {
            keys.clear_all();
            tags.clear_all();
            info!("Caches in {} cleared", state_dir.display());
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Initialize tracing
    let log_level = args
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    // RUST_LOG overrides --log-level when set
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .json()
        .init();

    info!("SpoolTag v{}", spooltag_core::VERSION);

    match args.command {
        Command::Keys { uid } => cmd_keys(&uid),
        Command::Decode { dump } => cmd_decode(&dump),
        Command::Scan {
            uid,
            dump,
            fail_sectors,
            derived_keys,
            no_cache,
        } => {
            let config = load_config(args.config.as_deref())?;
            cmd_scan(&config, &uid, &dump, &fail_sectors, derived_keys, no_cache).await
        }
        Command::Cache { action } => {
            let config = load_config(args.config.as_deref())?;
            cmd_cache(&config, action)
        }
    }
}
