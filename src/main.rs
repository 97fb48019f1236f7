//! # bulksync CLI
//!
//! ## Usage
//!
//! ```bash
//! bulksync --config ./config/bulksync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `bulksync init` | Create the SQLite mirror and run schema migrations |
//! | `bulksync sync` | Load a snapshot and replicate the delta to CouchDB |
//! | `bulksync stats` | Show mirror counts, the last run and lock status |
//! | `bulksync unlock` | Clear a run lock left by a crashed sync |
//!
//! ## Exit codes
//!
//! `0` when every document was replicated, `2` when the run finished but
//! some documents or chunks failed (they are retried next run), `1` on a
//! fatal error.
//!
//! Log verbosity follows `RUST_LOG` (default `info`); logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bulksync::sync_cmd::{self, SyncArgs};
use bulksync::{config, db, lock, migrate, stats};

/// bulksync: replicate CSV snapshots into CouchDB, sending only what changed.
#[derive(Parser)]
#[command(name = "bulksync", version)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/bulksync.toml`. A missing file means defaults.
    #[arg(long, global = true, default_value = "./config/bulksync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the mirror database.
    ///
    /// Creates the SQLite file and the staging, cache, run_lock and
    /// sync_runs tables. Safe to run repeatedly.
    Init,

    /// Load a snapshot and replicate new, changed and deleted records.
    Sync {
        /// CSV snapshot to load (overrides `source.csv`).
        #[arg(long)]
        csv: Option<PathBuf>,

        /// CouchDB base URL (overrides `remote.url`).
        #[arg(long)]
        url: Option<String>,

        /// Remote database name (overrides `remote.database`).
        #[arg(long)]
        database: Option<String>,

        /// Rows per chunk (overrides `sync.chunk_size`).
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Load and count the delta sets without contacting CouchDB.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show mirror statistics.
    Stats,

    /// Remove the run lock regardless of holder.
    Unlock,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Mirror initialized at {}", cfg.db.path.display());
        }
        Commands::Sync {
            csv,
            url,
            database,
            chunk_size,
            dry_run,
        } => {
            let args = SyncArgs {
                csv,
                url,
                database,
                chunk_size,
                dry_run,
            };
            let report = sync_cmd::run_sync(&cfg, &args).await?;
            if !report.is_clean() {
                return Ok(ExitCode::from(2));
            }
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Unlock => {
            let pool = db::connect(&cfg).await?;
            migrate::apply(&pool).await?;
            match lock::force_unlock(&pool).await? {
                Some(info) => println!("Removed lock held by {}", info.holder),
                None => println!("No lock was held."),
            }
            pool.close().await;
        }
    }

    Ok(ExitCode::SUCCESS)
}
