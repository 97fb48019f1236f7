//! Run lock: keeps two syncs from writing the same mirror at once.
//!
//! The lock is a single row in `run_lock` (its `CHECK (id = 1)` allows no
//! second row). It survives a crash, so a killed run leaves it behind;
//! `bulksync unlock` clears it.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};
use uuid::Uuid;

/// A held run lock. Call [`RunLock::release`] when the run ends.
#[derive(Debug)]
pub struct RunLock {
    pool: SqlitePool,
    holder: String,
}

/// Who holds the lock and since when (unix seconds).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    pub holder: String,
    pub acquired_at: i64,
}

impl RunLock {
    /// Take the lock or fail naming the current holder.
    pub async fn acquire(pool: &SqlitePool) -> Result<Self> {
        let holder = format!("pid:{}:{}", std::process::id(), Uuid::new_v4().simple());
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO run_lock (id, holder, acquired_at) VALUES (1, ?, ?)",
        )
        .bind(&holder)
        .bind(chrono::Utc::now().timestamp())
        .execute(pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            match current(pool).await? {
                Some(info) => bail!(
                    "another sync holds the mirror lock ({}, since {}); run `bulksync unlock` if it is stale",
                    info.holder,
                    info.acquired_at
                ),
                None => bail!("could not acquire the mirror lock"),
            }
        }

        info!(holder = %holder, "run lock acquired");
        Ok(Self {
            pool: pool.clone(),
            holder,
        })
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Drop the lock if we still hold it.
    pub async fn release(self) -> Result<()> {
        let removed = sqlx::query("DELETE FROM run_lock WHERE id = 1 AND holder = ?")
            .bind(&self.holder)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if removed == 0 {
            warn!(holder = %self.holder, "run lock was already gone on release");
        }
        Ok(())
    }
}

/// The current lock holder, if any.
pub async fn current(pool: &SqlitePool) -> Result<Option<LockInfo>> {
    let row = sqlx::query("SELECT holder, acquired_at FROM run_lock WHERE id = 1")
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| LockInfo {
        holder: r.get("holder"),
        acquired_at: r.get("acquired_at"),
    }))
}

/// Remove the lock regardless of holder. Returns what was removed.
pub async fn force_unlock(pool: &SqlitePool) -> Result<Option<LockInfo>> {
    let existing = current(pool).await?;
    sqlx::query("DELETE FROM run_lock").execute(pool).await?;
    Ok(existing)
}
