//! Delta calculator: New / Changed / Deleted sets as single-pass cursors.
//!
//! Each cursor pages through one delta set with keyset pagination on guid,
//! so a set of any size is never held in memory at once. The replicator
//! mutates the cache between pages; resuming strictly after the last guid
//! seen keeps every member visited exactly once regardless of what those
//! writes do to earlier rows.
//!
//! No ordering across runs is promised. Within a run pages come back in
//! guid order because that is the paging key.

use crate::error::SyncError;
use crate::models::{DeltaEntry, DeltaKind};
use crate::store::MirrorStore;

/// A finite, non-restartable cursor over one delta set.
pub struct DeltaCursor<'a, M: MirrorStore + ?Sized> {
    mirror: &'a M,
    kind: DeltaKind,
    chunk_size: usize,
    after: Option<String>,
    done: bool,
}

impl<'a, M: MirrorStore + ?Sized> DeltaCursor<'a, M> {
    pub fn new(mirror: &'a M, kind: DeltaKind, chunk_size: usize) -> Self {
        Self {
            mirror,
            kind,
            chunk_size: chunk_size.max(1),
            after: None,
            done: false,
        }
    }

    pub fn kind(&self) -> DeltaKind {
        self.kind
    }

    /// The next page, or `None` once the set is exhausted.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<DeltaEntry>>, SyncError> {
        if self.done {
            return Ok(None);
        }
        let page = self
            .mirror
            .delta_page(self.kind, self.after.as_deref(), self.chunk_size)
            .await?;

        if page.len() < self.chunk_size {
            self.done = true;
        }
        match page.last() {
            Some(last) => {
                self.after = Some(last.guid.clone());
                Ok(Some(page))
            }
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }
}

/// Guids in staging but not in cache.
pub fn compute_new<M: MirrorStore + ?Sized>(mirror: &M, chunk_size: usize) -> DeltaCursor<'_, M> {
    DeltaCursor::new(mirror, DeltaKind::New, chunk_size)
}

/// Guids in both tables whose fingerprints differ.
pub fn compute_changed<M: MirrorStore + ?Sized>(
    mirror: &M,
    chunk_size: usize,
) -> DeltaCursor<'_, M> {
    DeltaCursor::new(mirror, DeltaKind::Changed, chunk_size)
}

/// Guids in cache but not in staging.
pub fn compute_deleted<M: MirrorStore + ?Sized>(
    mirror: &M,
    chunk_size: usize,
) -> DeltaCursor<'_, M> {
    DeltaCursor::new(mirror, DeltaKind::Deleted, chunk_size)
}

/// Drain a cursor into its guids.
pub async fn collect_guids<M: MirrorStore + ?Sized>(
    mut cursor: DeltaCursor<'_, M>,
) -> Result<Vec<String>, SyncError> {
    let mut guids = Vec::new();
    while let Some(page) = cursor.next_chunk().await? {
        guids.extend(page.into_iter().map(|e| e.guid));
    }
    Ok(guids)
}

/// Drain a cursor, counting members.
pub async fn count<M: MirrorStore + ?Sized>(mut cursor: DeltaCursor<'_, M>) -> Result<u64, SyncError> {
    let mut n = 0u64;
    while let Some(page) = cursor.next_chunk().await? {
        n += page.len() as u64;
    }
    Ok(n)
}
