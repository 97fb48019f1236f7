//! Local mirror store abstraction.
//!
//! The [`MirrorStore`] trait defines the storage operations a sync run
//! needs: replacing the staging snapshot, paging through delta sets, and
//! recording confirmed remote writes in the cache. Backends: SQLite in the
//! `bulksync` crate, and [`memory::InMemoryMirror`] here for tests.
//!
//! Every write method is one transaction: either all rows of the call are
//! committed or none are.

pub mod memory;

use async_trait::async_trait;

use crate::error::SyncError;
use crate::models::{CacheEntry, DeltaEntry, DeltaKind, MirrorCounts, StagingEntry};

/// Durable staging + cache tables keyed by guid.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`reset_staging`](MirrorStore::reset_staging) | Discard the previous snapshot |
/// | [`insert_staging`](MirrorStore::insert_staging) | Append one chunk of the snapshot |
/// | [`delta_page`](MirrorStore::delta_page) | Keyset page of a delta set |
/// | [`commit_replicated`](MirrorStore::commit_replicated) | Upsert confirmed cache rows |
/// | [`remove_cached`](MirrorStore::remove_cached) | Drop cache rows after remote delete |
/// | [`cached`](MirrorStore::cached) | Look up one cache row |
/// | [`counts`](MirrorStore::counts) | Table sizes |
#[async_trait]
pub trait MirrorStore: Send + Sync {
    /// Remove every staging row.
    async fn reset_staging(&self) -> Result<(), SyncError>;

    /// Insert a chunk of staging rows. A repeated guid replaces the
    /// earlier row.
    async fn insert_staging(&self, entries: &[StagingEntry]) -> Result<(), SyncError>;

    /// Up to `limit` members of the `kind` delta set with guid strictly
    /// greater than `after`, ordered by guid.
    async fn delta_page(
        &self,
        kind: DeltaKind,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DeltaEntry>, SyncError>;

    /// Insert or overwrite cache rows.
    async fn commit_replicated(&self, entries: &[CacheEntry]) -> Result<(), SyncError>;

    /// Delete cache rows by guid. Unknown guids are ignored.
    async fn remove_cached(&self, guids: &[String]) -> Result<(), SyncError>;

    async fn cached(&self, guid: &str) -> Result<Option<CacheEntry>, SyncError>;

    async fn counts(&self) -> Result<MirrorCounts, SyncError>;
}
