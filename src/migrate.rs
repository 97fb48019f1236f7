//! Mirror schema migrations (idempotent).
//!
//! | Table | Purpose |
//! |-------|---------|
//! | `staging` | The snapshot being loaded by the current run |
//! | `cache` | Last replicated state, with remote id and revision |
//! | `run_lock` | At most one row while a sync holds the mirror |
//! | `sync_runs` | One summary row per finished run |

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the database file and every table.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create any missing tables and indexes on an open pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS staging (
            guid TEXT PRIMARY KEY,
            fingerprint TEXT NOT NULL,
            payload TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cache (
            guid TEXT PRIMARY KEY,
            fingerprint TEXT NOT NULL,
            remote_id TEXT NOT NULL,
            remote_revision TEXT NOT NULL DEFAULT '',
            payload TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS run_lock (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            holder TEXT NOT NULL,
            acquired_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at INTEGER NOT NULL,
            finished_at INTEGER NOT NULL,
            dry_run INTEGER NOT NULL,
            loaded INTEGER NOT NULL,
            skipped INTEGER NOT NULL,
            new_ok INTEGER NOT NULL,
            new_failed INTEGER NOT NULL,
            changed_ok INTEGER NOT NULL,
            changed_failed INTEGER NOT NULL,
            deleted_ok INTEGER NOT NULL,
            deleted_failed INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cache_remote_id ON cache(remote_id)")
        .execute(pool)
        .await?;

    Ok(())
}
