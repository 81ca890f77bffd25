//! chordcache maintenance entry point.
//!
//! Runs one maintenance command against the configured store and prints the
//! result as JSON on stdout. Logging goes to stderr so the output stays
//! machine-readable.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chordcache_core::cache::DeleteOutcome;
use chordcache_core::{AppConfig, ChordCache};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Local chord-sheet cache maintenance
#[derive(Parser)]
#[command(name = "chordcache")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Override the configured database path
    #[arg(long, env = "CHORDCACHE_DB_PATH")]
    db: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge records that share a canonical key
    Cleanup,

    /// Delete expired chord sheets and search results
    Purge,

    /// List saved chord sheets
    #[command(alias = "ls")]
    Saved,

    /// Show store counters
    Stats,

    /// Show one chord sheet
    Get {
        /// `artist-title` path or artist name
        path: String,
        /// Title, when the first argument is an artist name
        title: Option<String>,
    },

    /// Delete a cached chord sheet (saved sheets are refused)
    #[command(alias = "rm")]
    Delete { path: String },

    /// Turn a saved chord sheet back into a cached one
    Unsave { path: String },

    /// Undo a delete that is still within its grace period
    Restore { path: String },
}

#[derive(Serialize)]
struct Changed<'a> {
    path: &'a str,
    changed: bool,
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let out = if pretty { serde_json::to_string_pretty(value)? } else { serde_json::to_string(value)? };
    println!("{out}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load().context("loading configuration")?;
    if let Some(db) = cli.db {
        config.db_path = db;
        config.in_memory = false;
    }

    tracing::info!(db_path = %config.db_path.display(), in_memory = config.in_memory, "starting chordcache");
    let cache = ChordCache::from_config(&config);

    match cli.command {
        Commands::Cleanup => {
            let report = cache.run_duplicate_cleanup().await?;
            print_json(&report, cli.pretty)?;
        }
        Commands::Purge => {
            let report = cache.purge_expired().await?;
            print_json(&report, cli.pretty)?;
        }
        Commands::Saved => {
            let saved = cache.sheets().get_all_saved().await?;
            print_json(&saved, cli.pretty)?;
        }
        Commands::Stats => {
            let stats = cache.stats().await?;
            print_json(&stats, cli.pretty)?;
        }
        Commands::Get { path, title } => {
            let record = match title {
                Some(title) => cache.sheets().get((path.as_str(), title.as_str())).await?,
                None => cache.sheets().get(path.as_str()).await?,
            };
            print_json(&record, cli.pretty)?;
        }
        Commands::Delete { path } => {
            let outcome = cache.sheets().delete(path.as_str()).await?;
            if outcome == DeleteOutcome::RefusedSaved {
                tracing::warn!(path = %path, "refusing to delete a saved chord sheet, unsave it first");
            }
            print_json(&outcome, cli.pretty)?;
        }
        Commands::Unsave { path } => {
            let changed = cache.sheets().unsave(path.as_str()).await?;
            print_json(&Changed { path: &path, changed }, cli.pretty)?;
        }
        Commands::Restore { path } => {
            let changed = cache.sheets().restore(path.as_str()).await?;
            print_json(&Changed { path: &path, changed }, cli.pretty)?;
        }
    }

    if cache.connection().is_degraded() {
        tracing::warn!("store was unavailable, changes made by this run were not persisted");
    }
    cache.close().await;

    Ok(())
}
