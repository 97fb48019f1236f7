//! Mirror statistics and health overview.
//!
//! Shows how big the staging and cache tables are, how many cache rows still
//! wait for their remote revision, what the last run did, and whether the
//! run lock is held. Used by `bulksync stats`.

use anyhow::Result;
use sqlx::Row;

use bulksync_core::store::MirrorStore;

use crate::config::Config;
use crate::db;
use crate::lock;
use crate::migrate;
use crate::sqlite_store::SqliteMirror;

/// One row of `sync_runs`.
struct RunRow {
    finished_at: i64,
    dry_run: bool,
    loaded: i64,
    skipped: i64,
    new_ok: i64,
    new_failed: i64,
    changed_ok: i64,
    changed_failed: i64,
    deleted_ok: i64,
    deleted_failed: i64,
}

/// Run the stats command: query the mirror and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;

    let mirror = SqliteMirror::new(pool.clone());
    let counts = mirror.counts().await?;
    let unconfirmed = mirror.unconfirmed_count().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("bulksync Mirror Stats");
    println!("====================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Staging:     {}", counts.staging);
    println!("  Cache:       {}", counts.cache);
    if unconfirmed > 0 {
        println!("  Unconfirmed: {}", unconfirmed);
    }

    let last_run = sqlx::query(
        r#"
        SELECT finished_at, dry_run, loaded, skipped,
               new_ok, new_failed, changed_ok, changed_failed, deleted_ok, deleted_failed
        FROM sync_runs
        ORDER BY id DESC
        LIMIT 1
        "#,
    )
    .fetch_optional(&pool)
    .await?
    .map(|row| RunRow {
        finished_at: row.get("finished_at"),
        dry_run: row.get("dry_run"),
        loaded: row.get("loaded"),
        skipped: row.get("skipped"),
        new_ok: row.get("new_ok"),
        new_failed: row.get("new_failed"),
        changed_ok: row.get("changed_ok"),
        changed_failed: row.get("changed_failed"),
        deleted_ok: row.get("deleted_ok"),
        deleted_failed: row.get("deleted_failed"),
    });

    println!();
    match last_run {
        Some(run) => {
            println!(
                "  Last run:    {}{}",
                format_ts_relative(run.finished_at),
                if run.dry_run { " (dry-run)" } else { "" }
            );
            println!("  {:<10} {:>8} {:>8}", "SET", "OK", "FAILED");
            println!("  {}", "-".repeat(28));
            println!("  {:<10} {:>8} {:>8}", "loaded", run.loaded, run.skipped);
            println!("  {:<10} {:>8} {:>8}", "new", run.new_ok, run.new_failed);
            println!(
                "  {:<10} {:>8} {:>8}",
                "changed", run.changed_ok, run.changed_failed
            );
            println!(
                "  {:<10} {:>8} {:>8}",
                "deleted", run.deleted_ok, run.deleted_failed
            );
        }
        None => println!("  Last run:    never"),
    }

    println!();
    match lock::current(&pool).await? {
        Some(info) => println!(
            "  Lock:        held by {} since {}",
            info.holder,
            format_ts_relative(info.acquired_at)
        ),
        None => println!("  Lock:        free"),
    }
    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp relative to now (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        format_ts_iso(ts)
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        plural(delta / 60, "min")
    } else if delta < 86400 {
        plural(delta / 3600, "hour")
    } else if delta < 86400 * 30 {
        plural(delta / 86400, "day")
    } else {
        format_ts_iso(ts)
    }
}

fn plural(n: i64, unit: &str) -> String {
    format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" })
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
