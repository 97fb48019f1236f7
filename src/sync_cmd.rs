//! The `bulksync sync` command.
//!
//! Wires the CSV source, the SQLite mirror and the CouchDB client into one
//! pipeline run under the run lock, records the run in `sync_runs`, and
//! prints a summary.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use sqlx::SqlitePool;
use tracing::{info, warn};

use bulksync_core::{run_pipeline, DeltaKind, SyncOptions, SyncReport};

use crate::config::Config;
use crate::connector_csv::CsvSource;
use crate::couch::CouchClient;
use crate::db;
use crate::lock::RunLock;
use crate::migrate;
use crate::sqlite_store::SqliteMirror;

/// Placeholder endpoint for dry runs without a configured URL. Never contacted.
const DRY_RUN_URL: &str = "http://127.0.0.1:5984";

/// Failed items printed per delta set before the list is cut short.
const MAX_LISTED_FAILURES: usize = 20;

/// CLI overrides for one sync run.
#[derive(Debug, Clone, Default)]
pub struct SyncArgs {
    pub csv: Option<PathBuf>,
    pub url: Option<String>,
    pub database: Option<String>,
    pub chunk_size: Option<usize>,
    pub dry_run: bool,
}

fn apply_overrides(config: &Config, args: &SyncArgs) -> Result<Config> {
    let mut config = config.clone();
    if let Some(csv) = &args.csv {
        config.source.csv = Some(csv.clone());
    }
    if let Some(url) = &args.url {
        config.remote.url = Some(url.clone());
    }
    if let Some(database) = &args.database {
        config.remote.database = database.clone();
    }
    if let Some(chunk_size) = args.chunk_size {
        config.sync.chunk_size = chunk_size;
    }
    config.normalize();
    config.validate()?;
    Ok(config)
}

/// Run one sync. Returns the report; per-item failures are in the report,
/// not the error.
pub async fn run_sync(config: &Config, args: &SyncArgs) -> Result<SyncReport> {
    let config = apply_overrides(config, args)?;

    let csv_path = config
        .source
        .csv
        .clone()
        .context("no snapshot given: pass --csv or set source.csv")?;
    let url = match (&config.remote.url, args.dry_run) {
        (Some(url), _) => url.clone(),
        (None, true) => DRY_RUN_URL.to_string(),
        (None, false) => bail!("no remote given: pass --url or set remote.url"),
    };

    let source = CsvSource::open(&csv_path)?;
    let remote = CouchClient::new(&url, &config.remote.database, &config.remote)?;

    let pool = db::connect(&config).await?;
    migrate::apply(&pool).await?;

    let lock = RunLock::acquire(&pool).await?;
    let started_at = chrono::Utc::now().timestamp();

    if !args.dry_run {
        if let Err(e) = remote.ensure_database().await {
            warn!(error = %e, "could not ensure remote database exists");
        }
    }

    let options = SyncOptions {
        chunk_size: config.sync.chunk_size,
        guid_field: config.source.guid_field.clone(),
        dry_run: args.dry_run,
    };
    info!(
        csv = %csv_path.display(),
        remote = %remote.db_url(),
        chunk_size = options.chunk_size,
        dry_run = options.dry_run,
        "starting sync"
    );

    let mirror = SqliteMirror::new(pool.clone());
    let result = run_pipeline(source, &mirror, &remote, &options).await;

    let recorded = match &result {
        Ok(report) => record_run(&pool, started_at, args.dry_run, report).await,
        Err(_) => Ok(()),
    };
    lock.release().await?;
    pool.close().await;

    let report = result?;
    recorded?;

    print_summary(&csv_path, &report);
    Ok(report)
}

async fn record_run(
    pool: &SqlitePool,
    started_at: i64,
    dry_run: bool,
    report: &SyncReport,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sync_runs (
            started_at, finished_at, dry_run, loaded, skipped,
            new_ok, new_failed, changed_ok, changed_failed, deleted_ok, deleted_failed
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(started_at)
    .bind(chrono::Utc::now().timestamp())
    .bind(dry_run)
    .bind(report.load.loaded as i64)
    .bind(report.load.skipped as i64)
    .bind(report.new.succeeded as i64)
    .bind(report.new.failed_count() as i64)
    .bind(report.changed.succeeded as i64)
    .bind(report.changed.failed_count() as i64)
    .bind(report.deleted.succeeded as i64)
    .bind(report.deleted.failed_count() as i64)
    .execute(pool)
    .await?;
    Ok(())
}

fn print_summary(csv_path: &std::path::Path, report: &SyncReport) {
    if let Some([new, changed, deleted]) = report.planned {
        println!("sync {} (dry-run)", csv_path.display());
        println!("  loaded: {} records", report.load.loaded);
        println!("  skipped: {}", report.load.skipped);
        println!("  new: {}", new);
        println!("  changed: {}", changed);
        println!("  deleted: {}", deleted);
        return;
    }

    println!("sync {}", csv_path.display());
    println!("  loaded: {} records", report.load.loaded);
    println!("  skipped: {}", report.load.skipped);
    for kind in DeltaKind::ALL {
        let set = report.set(kind);
        println!(
            "  {}: {} ok, {} failed ({} chunks, {} failed)",
            kind,
            set.succeeded,
            set.failed_count(),
            set.chunks,
            set.failed_chunks
        );
        for item in set.failed.iter().take(MAX_LISTED_FAILURES) {
            println!("    {}: {}", item.guid, item.error);
        }
        if set.failed.len() > MAX_LISTED_FAILURES {
            println!("    ... and {} more", set.failed.len() - MAX_LISTED_FAILURES);
        }
    }
    if report.is_clean() {
        println!("ok");
    } else {
        println!("completed with {} failures", report.failed_total());
    }
}
