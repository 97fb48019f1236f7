//! In-memory [`MirrorStore`] implementation for tests.
//!
//! Uses `BTreeMap`s behind `std::sync::RwLock`, so keyset paging by guid
//! falls out of the map ordering.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::SyncError;
use crate::models::{CacheEntry, DeltaEntry, DeltaKind, MirrorCounts, StagingEntry};

use super::MirrorStore;

/// In-memory mirror. Not durable.
pub struct InMemoryMirror {
    staging: RwLock<BTreeMap<String, StagingEntry>>,
    cache: RwLock<BTreeMap<String, CacheEntry>>,
}

impl InMemoryMirror {
    pub fn new() -> Self {
        Self {
            staging: RwLock::new(BTreeMap::new()),
            cache: RwLock::new(BTreeMap::new()),
        }
    }

    /// Snapshot of every cache row, in guid order.
    pub fn cache_entries(&self) -> Vec<CacheEntry> {
        self.cache
            .read()
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every staging row, in guid order.
    pub fn staging_entries(&self) -> Vec<StagingEntry> {
        self.staging
            .read()
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for InMemoryMirror {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> SyncError {
    SyncError::StoreQuery("in-memory mirror lock poisoned".to_string())
}

fn after_bound(after: Option<&str>) -> (Bound<String>, Bound<String>) {
    match after {
        Some(a) => (Bound::Excluded(a.to_string()), Bound::Unbounded),
        None => (Bound::Unbounded, Bound::Unbounded),
    }
}

#[async_trait]
impl MirrorStore for InMemoryMirror {
    async fn reset_staging(&self) -> Result<(), SyncError> {
        self.staging.write().map_err(poisoned)?.clear();
        Ok(())
    }

    async fn insert_staging(&self, entries: &[StagingEntry]) -> Result<(), SyncError> {
        let mut staging = self.staging.write().map_err(poisoned)?;
        for e in entries {
            staging.insert(e.guid.clone(), e.clone());
        }
        Ok(())
    }

    async fn delta_page(
        &self,
        kind: DeltaKind,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DeltaEntry>, SyncError> {
        let staging = self.staging.read().map_err(poisoned)?;
        let cache = self.cache.read().map_err(poisoned)?;
        let range = after_bound(after);

        let page = match kind {
            DeltaKind::New => staging
                .range(range)
                .filter(|(guid, _)| !cache.contains_key(*guid))
                .take(limit)
                .map(|(_, s)| DeltaEntry {
                    guid: s.guid.clone(),
                    fingerprint: s.fingerprint.clone(),
                    payload: s.payload.clone(),
                    remote_id: None,
                    remote_revision: None,
                })
                .collect(),
            DeltaKind::Changed => staging
                .range(range)
                .filter_map(|(guid, s)| {
                    cache
                        .get(guid)
                        .filter(|c| c.fingerprint != s.fingerprint)
                        .map(|c| DeltaEntry {
                            guid: s.guid.clone(),
                            fingerprint: s.fingerprint.clone(),
                            payload: s.payload.clone(),
                            remote_id: Some(c.remote_id.clone()),
                            remote_revision: Some(c.remote_revision.clone()),
                        })
                })
                .take(limit)
                .collect(),
            DeltaKind::Deleted => cache
                .range(range)
                .filter(|(guid, _)| !staging.contains_key(*guid))
                .take(limit)
                .map(|(_, c)| DeltaEntry {
                    guid: c.guid.clone(),
                    fingerprint: c.fingerprint.clone(),
                    payload: c.payload.clone(),
                    remote_id: Some(c.remote_id.clone()),
                    remote_revision: Some(c.remote_revision.clone()),
                })
                .collect(),
        };
        Ok(page)
    }

    async fn commit_replicated(&self, entries: &[CacheEntry]) -> Result<(), SyncError> {
        let mut cache = self.cache.write().map_err(poisoned)?;
        for e in entries {
            cache.insert(e.guid.clone(), e.clone());
        }
        Ok(())
    }

    async fn remove_cached(&self, guids: &[String]) -> Result<(), SyncError> {
        let mut cache = self.cache.write().map_err(poisoned)?;
        for g in guids {
            cache.remove(g);
        }
        Ok(())
    }

    async fn cached(&self, guid: &str) -> Result<Option<CacheEntry>, SyncError> {
        Ok(self.cache.read().map_err(poisoned)?.get(guid).cloned())
    }

    async fn counts(&self) -> Result<MirrorCounts, SyncError> {
        Ok(MirrorCounts {
            staging: self.staging.read().map_err(poisoned)?.len() as u64,
            cache: self.cache.read().map_err(poisoned)?.len() as u64,
        })
    }
}
