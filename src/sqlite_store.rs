//! SQLite-backed [`MirrorStore`] implementation.
//!
//! Delta sets are computed in SQL as joins on the `guid` primary keys of
//! `staging` and `cache`, paged by guid. All statements are parameterized
//! against the fixed schema in [`crate::migrate`].

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use bulksync_core::models::MirrorCounts;
use bulksync_core::store::MirrorStore;
use bulksync_core::{CacheEntry, DeltaEntry, DeltaKind, StagingEntry, SyncError};

const NEW_PAGE: &str = r#"
    SELECT s.guid, s.fingerprint, s.payload
    FROM staging s
    LEFT JOIN cache c ON c.guid = s.guid
    WHERE c.guid IS NULL AND s.guid > ?
    ORDER BY s.guid
    LIMIT ?
"#;

const CHANGED_PAGE: &str = r#"
    SELECT s.guid, s.fingerprint, s.payload, c.remote_id, c.remote_revision
    FROM staging s
    JOIN cache c ON c.guid = s.guid
    WHERE s.fingerprint <> c.fingerprint AND s.guid > ?
    ORDER BY s.guid
    LIMIT ?
"#;

const DELETED_PAGE: &str = r#"
    SELECT c.guid, c.fingerprint, c.payload, c.remote_id, c.remote_revision
    FROM cache c
    LEFT JOIN staging s ON s.guid = c.guid
    WHERE s.guid IS NULL AND c.guid > ?
    ORDER BY c.guid
    LIMIT ?
"#;

/// SQLite implementation of [`MirrorStore`].
///
/// Wraps a [`SqlitePool`]; every write method runs in its own transaction.
pub struct SqliteMirror {
    pool: SqlitePool,
}

impl SqliteMirror {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cache rows claimed after a create conflict whose revision is not yet
    /// known. The next run resolves them against the remote store.
    pub async fn unconfirmed_count(&self) -> Result<u64, SyncError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache WHERE remote_revision = ''")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(n as u64)
    }
}

fn store_err(e: sqlx::Error) -> SyncError {
    SyncError::StoreQuery(e.to_string())
}

fn delta_from_row(row: &SqliteRow, with_remote: bool) -> Result<DeltaEntry, sqlx::Error> {
    let (remote_id, remote_revision) = if with_remote {
        (
            Some(row.try_get::<String, _>("remote_id")?),
            Some(row.try_get::<String, _>("remote_revision")?),
        )
    } else {
        (None, None)
    };
    Ok(DeltaEntry {
        guid: row.try_get("guid")?,
        fingerprint: row.try_get("fingerprint")?,
        payload: row.try_get("payload")?,
        remote_id,
        remote_revision,
    })
}

#[async_trait]
impl MirrorStore for SqliteMirror {
    async fn reset_staging(&self) -> Result<(), SyncError> {
        sqlx::query("DELETE FROM staging")
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn insert_staging(&self, entries: &[StagingEntry]) -> Result<(), SyncError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        for e in entries {
            sqlx::query(
                r#"
                INSERT INTO staging (guid, fingerprint, payload)
                VALUES (?, ?, ?)
                ON CONFLICT(guid) DO UPDATE SET
                    fingerprint = excluded.fingerprint,
                    payload = excluded.payload
                "#,
            )
            .bind(&e.guid)
            .bind(&e.fingerprint)
            .bind(&e.payload)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }
        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    async fn delta_page(
        &self,
        kind: DeltaKind,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DeltaEntry>, SyncError> {
        let (sql, with_remote) = match kind {
            DeltaKind::New => (NEW_PAGE, false),
            DeltaKind::Changed => (CHANGED_PAGE, true),
            DeltaKind::Deleted => (DELETED_PAGE, true),
        };
        debug!(kind = %kind, after = after.unwrap_or(""), limit, "fetching delta page");

        // Guids are never empty, so "" sorts before every row.
        let rows = sqlx::query(sql)
            .bind(after.unwrap_or(""))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;

        rows.iter()
            .map(|row| delta_from_row(row, with_remote).map_err(store_err))
            .collect()
    }

    async fn commit_replicated(&self, entries: &[CacheEntry]) -> Result<(), SyncError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        for e in entries {
            sqlx::query(
                r#"
                INSERT INTO cache (guid, fingerprint, remote_id, remote_revision, payload)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(guid) DO UPDATE SET
                    fingerprint = excluded.fingerprint,
                    remote_id = excluded.remote_id,
                    remote_revision = excluded.remote_revision,
                    payload = excluded.payload
                "#,
            )
            .bind(&e.guid)
            .bind(&e.fingerprint)
            .bind(&e.remote_id)
            .bind(&e.remote_revision)
            .bind(&e.payload)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }
        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    async fn remove_cached(&self, guids: &[String]) -> Result<(), SyncError> {
        if guids.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        for guid in guids {
            sqlx::query("DELETE FROM cache WHERE guid = ?")
                .bind(guid)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
        }
        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    async fn cached(&self, guid: &str) -> Result<Option<CacheEntry>, SyncError> {
        let row = sqlx::query(
            "SELECT guid, fingerprint, remote_id, remote_revision, payload FROM cache WHERE guid = ?",
        )
        .bind(guid)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.map(|r| -> Result<CacheEntry, sqlx::Error> {
            Ok(CacheEntry {
                guid: r.try_get("guid")?,
                fingerprint: r.try_get("fingerprint")?,
                remote_id: r.try_get("remote_id")?,
                remote_revision: r.try_get("remote_revision")?,
                payload: r.try_get("payload")?,
            })
        })
        .transpose()
        .map_err(store_err)
    }

    async fn counts(&self) -> Result<MirrorCounts, SyncError> {
        let staging: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM staging")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        let cache: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(MirrorCounts {
            staging: staging as u64,
            cache: cache as u64,
        })
    }
}
