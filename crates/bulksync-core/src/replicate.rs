//! Batch replicator: applies delta sets to the remote store.
//!
//! Each delta set is processed chunk by chunk:
//!
//! ```text
//! fetch page ─▶ build docs ─▶ bulk call ─▶ confirm outcomes ─▶ commit cache
//!     ▲                                                             │
//!     └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only documents the remote store reports as written reach the cache, and
//! the cache rows of one chunk are committed in a single local transaction.
//!
//! One exception: a create that conflicts means the id already exists
//! remotely, typically because an earlier delivery of the same batch was
//! applied and its response lost. The id is then cached with an empty
//! revision and fingerprint ("unconfirmed"), so the next run updates that
//! document instead of minting a duplicate. Unconfirmed rows have their
//! revision looked up before an update or delete; one whose document is
//! gone remotely is created again (Changed) or just dropped (Deleted).
//!
//! Conflicts and rejections are collected as [`FailedItem`]s; the cache
//! stays stale for those guids so the next run proposes them again. A bulk
//! call that fails outright fails its chunk and the set moves on. Local
//! store errors are fatal and propagate.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::delta::DeltaCursor;
use crate::error::{FailedItem, SyncError};
use crate::models::{CacheEntry, DeltaEntry, DeltaKind};
use crate::remote::{DocOutcome, DocRef, DocumentStore, RemoteDoc};
use crate::store::MirrorStore;

/// Result of applying one delta set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetReport {
    pub succeeded: u64,
    pub failed: Vec<FailedItem>,
    /// Chunks fetched from the delta cursor.
    pub chunks: u64,
    /// Chunks whose bulk call failed as a whole.
    pub failed_chunks: u64,
}

impl SetReport {
    pub fn failed_count(&self) -> u64 {
        self.failed.len() as u64
    }

    pub fn attempted(&self) -> u64 {
        self.succeeded + self.failed_count()
    }

    fn fail(&mut self, guid: &str, error: SyncError) {
        warn!(guid, error = %error, "document not replicated");
        self.failed.push(FailedItem {
            guid: guid.to_string(),
            error,
        });
    }
}

/// Applies delta sets from a mirror to a remote store.
pub struct Replicator<'a, M: MirrorStore + ?Sized, R: DocumentStore + ?Sized> {
    mirror: &'a M,
    remote: &'a R,
    chunk_size: usize,
}

impl<'a, M, R> Replicator<'a, M, R>
where
    M: MirrorStore + ?Sized,
    R: DocumentStore + ?Sized,
{
    pub fn new(mirror: &'a M, remote: &'a R, chunk_size: usize) -> Self {
        Self {
            mirror,
            remote,
            chunk_size: chunk_size.max(1),
        }
    }

    pub async fn apply(&self, kind: DeltaKind) -> Result<SetReport, SyncError> {
        match kind {
            DeltaKind::New => self.apply_new().await,
            DeltaKind::Changed => self.apply_changed().await,
            DeltaKind::Deleted => self.apply_deleted().await,
        }
    }

    /// Create a remote document for every new guid.
    pub async fn apply_new(&self) -> Result<SetReport, SyncError> {
        self.apply_upserts(DeltaKind::New).await
    }

    /// Push the new content of every changed guid at its cached revision.
    pub async fn apply_changed(&self) -> Result<SetReport, SyncError> {
        self.apply_upserts(DeltaKind::Changed).await
    }

    /// Delete the remote document of every guid gone from the snapshot.
    pub async fn apply_deleted(&self) -> Result<SetReport, SyncError> {
        let mut cursor = DeltaCursor::new(self.mirror, DeltaKind::Deleted, self.chunk_size);
        let mut report = SetReport::default();

        while let Some(page) = cursor.next_chunk().await? {
            report.chunks += 1;
            self.delete_chunk(page, report.chunks, &mut report).await?;
        }

        info!(
            kind = %DeltaKind::Deleted,
            succeeded = report.succeeded,
            failed = report.failed_count(),
            "delta set applied"
        );
        Ok(report)
    }

    async fn apply_upserts(&self, kind: DeltaKind) -> Result<SetReport, SyncError> {
        let mut cursor = DeltaCursor::new(self.mirror, kind, self.chunk_size);
        let mut report = SetReport::default();

        while let Some(page) = cursor.next_chunk().await? {
            report.chunks += 1;
            self.upsert_chunk(kind, page, report.chunks, &mut report)
                .await?;
        }

        info!(
            kind = %kind,
            succeeded = report.succeeded,
            failed = report.failed_count(),
            "delta set applied"
        );
        Ok(report)
    }

    async fn upsert_chunk(
        &self,
        kind: DeltaKind,
        page: Vec<DeltaEntry>,
        chunk_no: u64,
        report: &mut SetReport,
    ) -> Result<(), SyncError> {
        let unresolved: Vec<String> = page.iter().filter_map(unresolved_id).collect();
        let known = match self.lookup_revisions(&unresolved).await {
            Ok(known) => known,
            Err(e) => {
                report.failed_chunks += 1;
                warn!(kind = %kind, chunk = chunk_no, error = %e, "revision lookup failed");
                for entry in &page {
                    report.fail(&entry.guid, e.clone());
                }
                return Ok(());
            }
        };

        let mut docs = Vec::with_capacity(page.len());
        let mut pending: HashMap<String, (DeltaEntry, bool)> = HashMap::with_capacity(page.len());

        for entry in page {
            let body = match parse_payload(&entry.payload) {
                Ok(body) => body,
                Err(reason) => {
                    let id = entry.remote_id.clone().unwrap_or_default();
                    report.fail(&entry.guid, SyncError::RemoteRejected { id, reason });
                    continue;
                }
            };
            let (id, rev) = match (&entry.remote_id, &entry.remote_revision) {
                (Some(id), rev) if !id.is_empty() => {
                    let rev = rev
                        .clone()
                        .filter(|r| !r.is_empty())
                        .or_else(|| known.get(id).cloned());
                    (id.clone(), rev)
                }
                _ => (new_doc_id(), None),
            };
            let creating = rev.is_none();
            docs.push(RemoteDoc {
                id: id.clone(),
                rev,
                body,
            });
            pending.insert(id, (entry, creating));
        }

        if docs.is_empty() {
            return Ok(());
        }

        info!(kind = %kind, chunk = chunk_no, docs = docs.len(), "submitting chunk");
        let outcomes = match self.remote.bulk_upsert(&docs).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                report.failed_chunks += 1;
                warn!(kind = %kind, chunk = chunk_no, error = %e, "bulk call failed");
                for (entry, _) in pending.values() {
                    report.fail(&entry.guid, e.clone());
                }
                return Ok(());
            }
        };

        let mut confirmed = Vec::with_capacity(outcomes.len());
        // Ids that already exist remotely at an unknown revision.
        let mut claimed = Vec::new();
        for outcome in outcomes {
            let Some((entry, creating)) = pending.remove(outcome.id()) else {
                debug!(id = outcome.id(), "outcome for a document not in this chunk");
                continue;
            };
            match outcome {
                DocOutcome::Written { id, rev } => {
                    confirmed.push(CacheEntry {
                        guid: entry.guid,
                        fingerprint: entry.fingerprint,
                        remote_id: id,
                        remote_revision: rev,
                        payload: entry.payload,
                    });
                }
                DocOutcome::Conflict { id, reason } if creating => {
                    report.fail(
                        &entry.guid,
                        SyncError::RemoteConflict {
                            id: id.clone(),
                            reason,
                        },
                    );
                    // Empty fingerprint and revision: the next run proposes
                    // this guid as Changed and resolves the revision first.
                    claimed.push(CacheEntry {
                        guid: entry.guid,
                        fingerprint: String::new(),
                        remote_id: id,
                        remote_revision: String::new(),
                        payload: entry.payload,
                    });
                }
                failed => {
                    if let Some(err) = failed.error() {
                        report.fail(&entry.guid, err);
                    }
                }
            }
        }
        for (id, (entry, _)) in pending {
            report.fail(
                &entry.guid,
                SyncError::RemoteRejected {
                    id,
                    reason: "no result returned".to_string(),
                },
            );
        }

        report.succeeded += confirmed.len() as u64;
        confirmed.extend(claimed);
        self.mirror.commit_replicated(&confirmed).await?;
        Ok(())
    }

    async fn delete_chunk(
        &self,
        page: Vec<DeltaEntry>,
        chunk_no: u64,
        report: &mut SetReport,
    ) -> Result<(), SyncError> {
        let mut refs = Vec::with_capacity(page.len());
        let mut pending: HashMap<String, String> = HashMap::with_capacity(page.len());
        // No remote document to delete; the cache row just goes.
        let mut removed: Vec<String> = Vec::new();
        let mut unresolved: Vec<(String, String)> = Vec::new();

        for entry in page {
            let id = entry.remote_id.unwrap_or_default();
            let rev = entry.remote_revision.unwrap_or_default();
            if id.is_empty() {
                removed.push(entry.guid);
            } else if rev.is_empty() {
                unresolved.push((id, entry.guid));
            } else {
                refs.push(DocRef { id: id.clone(), rev });
                pending.insert(id, entry.guid);
            }
        }

        if !unresolved.is_empty() {
            let ids: Vec<String> = unresolved.iter().map(|(id, _)| id.clone()).collect();
            match self.lookup_revisions(&ids).await {
                Ok(known) => {
                    for (id, guid) in unresolved {
                        match known.get(&id) {
                            Some(rev) => {
                                refs.push(DocRef {
                                    id: id.clone(),
                                    rev: rev.clone(),
                                });
                                pending.insert(id, guid);
                            }
                            None => removed.push(guid),
                        }
                    }
                }
                Err(e) => {
                    report.failed_chunks += 1;
                    warn!(kind = %DeltaKind::Deleted, chunk = chunk_no, error = %e, "revision lookup failed");
                    for guid in unresolved.iter().map(|(_, g)| g).chain(pending.values()) {
                        report.fail(guid, e.clone());
                    }
                    refs.clear();
                    pending.clear();
                }
            }
        }

        if !refs.is_empty() {
            info!(kind = %DeltaKind::Deleted, chunk = chunk_no, docs = refs.len(), "submitting chunk");
            match self.remote.bulk_delete(&refs).await {
                Ok(outcomes) => {
                    for outcome in outcomes {
                        let Some(guid) = pending.remove(outcome.id()) else {
                            debug!(id = outcome.id(), "outcome for a document not in this chunk");
                            continue;
                        };
                        match outcome.error() {
                            None => removed.push(guid),
                            Some(err) => report.fail(&guid, err),
                        }
                    }
                    for (id, guid) in pending {
                        report.fail(
                            &guid,
                            SyncError::RemoteRejected {
                                id,
                                reason: "no result returned".to_string(),
                            },
                        );
                    }
                }
                Err(e) => {
                    report.failed_chunks += 1;
                    warn!(kind = %DeltaKind::Deleted, chunk = chunk_no, error = %e, "bulk call failed");
                    for guid in pending.values() {
                        report.fail(guid, e.clone());
                    }
                }
            }
        }

        if !removed.is_empty() {
            self.mirror.remove_cached(&removed).await?;
            report.succeeded += removed.len() as u64;
        }
        Ok(())
    }

    async fn lookup_revisions(&self, ids: &[String]) -> Result<HashMap<String, String>, SyncError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        debug!(ids = ids.len(), "resolving unknown revisions");
        self.remote.current_revisions(ids).await
    }
}

/// Remote id of an entry whose revision is not known locally.
fn unresolved_id(entry: &DeltaEntry) -> Option<String> {
    match (&entry.remote_id, &entry.remote_revision) {
        (Some(id), rev) if !id.is_empty() && rev.as_deref().unwrap_or("").is_empty() => {
            Some(id.clone())
        }
        _ => None,
    }
}

/// A fresh remote document id: 32 lower-case hex chars.
fn new_doc_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn parse_payload(payload: &str) -> Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("payload is not a JSON object".to_string()),
        Err(e) => Err(format!("payload is not valid JSON: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StagingEntry;
    use crate::remote::memory::InMemoryDocumentStore;
    use crate::store::memory::InMemoryMirror;

    fn staged(guid: &str, name: &str) -> StagingEntry {
        StagingEntry {
            guid: guid.to_string(),
            fingerprint: format!("fp-{}", name),
            payload: format!(r#"{{"occurrenceid":"{}","name":"{}"}}"#, guid, name),
        }
    }

    async fn stage(mirror: &InMemoryMirror, rows: &[StagingEntry]) {
        mirror.reset_staging().await.unwrap();
        mirror.insert_staging(rows).await.unwrap();
    }

    #[tokio::test]
    async fn new_documents_reach_remote_and_cache() {
        let mirror = InMemoryMirror::new();
        let remote = InMemoryDocumentStore::new();
        stage(&mirror, &[staged("a", "x"), staged("b", "y"), staged("c", "z")]).await;

        let report = Replicator::new(&mirror, &remote, 2).apply_new().await.unwrap();
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.chunks, 2);
        assert_eq!(remote.len(), 3);

        for entry in mirror.cache_entries() {
            assert_eq!(entry.remote_id.len(), 32);
            let (rev, body) = remote.get(&entry.remote_id).unwrap();
            assert_eq!(rev, entry.remote_revision);
            assert_eq!(body["occurrenceid"], Value::String(entry.guid.clone()));
        }
    }

    #[tokio::test]
    async fn changed_documents_carry_cached_revision() {
        let mirror = InMemoryMirror::new();
        let remote = InMemoryDocumentStore::new();
        stage(&mirror, &[staged("a", "x")]).await;
        Replicator::new(&mirror, &remote, 10).apply_new().await.unwrap();
        let before = mirror.cached("a").await.unwrap().unwrap();

        stage(&mirror, &[staged("a", "x2")]).await;
        let report = Replicator::new(&mirror, &remote, 10)
            .apply_changed()
            .await
            .unwrap();
        assert_eq!(report.succeeded, 1);

        let after = mirror.cached("a").await.unwrap().unwrap();
        assert_eq!(after.remote_id, before.remote_id);
        assert_eq!(after.fingerprint, "fp-x2");
        assert!(after.remote_revision.starts_with("2-"));
        let (_, body) = remote.get(&after.remote_id).unwrap();
        assert_eq!(body["name"], Value::String("x2".to_string()));
    }

    #[tokio::test]
    async fn conflict_leaves_cache_untouched() {
        let mirror = InMemoryMirror::new();
        let remote = InMemoryDocumentStore::new();
        stage(&mirror, &[staged("a", "x")]).await;
        Replicator::new(&mirror, &remote, 10).apply_new().await.unwrap();
        let before = mirror.cached("a").await.unwrap().unwrap();
        remote.touch(&before.remote_id);

        stage(&mirror, &[staged("a", "x2")]).await;
        let report = Replicator::new(&mirror, &remote, 10)
            .apply_changed()
            .await
            .unwrap();
        assert_eq!(report.succeeded, 0);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(
            report.failed[0].error,
            SyncError::RemoteConflict { .. }
        ));
        assert_eq!(mirror.cached("a").await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn rejected_new_document_is_not_cached() {
        let mirror = InMemoryMirror::new();
        let remote = InMemoryDocumentStore::new();
        stage(&mirror, &[staged("a", "x")]).await;
        mirror
            .insert_staging(&[StagingEntry {
                guid: "b".to_string(),
                fingerprint: "fp".to_string(),
                payload: "[1, 2]".to_string(),
            }])
            .await
            .unwrap();

        let report = Replicator::new(&mirror, &remote, 10).apply_new().await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed[0].guid, "b");
        assert!(mirror.cached("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_bulk_call_fails_only_its_chunk() {
        let mirror = InMemoryMirror::new();
        let remote = InMemoryDocumentStore::new();
        stage(
            &mirror,
            &[staged("a", "1"), staged("b", "2"), staged("c", "3"), staged("d", "4")],
        )
        .await;
        remote.fail_call(2);

        let report = Replicator::new(&mirror, &remote, 2).apply_new().await.unwrap();
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed_chunks, 1);
        let mut failed: Vec<_> = report.failed.iter().map(|f| f.guid.as_str()).collect();
        failed.sort();
        assert_eq!(failed, vec!["c", "d"]);
        assert!(mirror.cached("a").await.unwrap().is_some());
        assert!(mirror.cached("c").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_failure_keeps_cache_entry() {
        let mirror = InMemoryMirror::new();
        let remote = InMemoryDocumentStore::new();
        stage(&mirror, &[staged("a", "x"), staged("b", "y")]).await;
        Replicator::new(&mirror, &remote, 10).apply_new().await.unwrap();
        let b = mirror.cached("b").await.unwrap().unwrap();
        remote.reject_id(b.remote_id.clone());

        stage(&mirror, &[]).await;
        let report = Replicator::new(&mirror, &remote, 10)
            .apply_deleted()
            .await
            .unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed[0].guid, "b");
        assert!(mirror.cached("a").await.unwrap().is_none());
        assert_eq!(mirror.cached("b").await.unwrap(), Some(b));
        assert_eq!(remote.len(), 1);
    }

    #[tokio::test]
    async fn unconfirmed_row_without_remote_document_is_dropped_locally() {
        let mirror = InMemoryMirror::new();
        let remote = InMemoryDocumentStore::new();
        mirror
            .commit_replicated(&[CacheEntry {
                guid: "ghost".to_string(),
                fingerprint: String::new(),
                remote_id: "abc".to_string(),
                remote_revision: String::new(),
                payload: "{}".to_string(),
            }])
            .await
            .unwrap();

        let report = Replicator::new(&mirror, &remote, 10)
            .apply_deleted()
            .await
            .unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(remote.calls(), 0);
        assert_eq!(mirror.counts().await.unwrap().cache, 0);
    }

    #[tokio::test]
    async fn redelivered_create_is_claimed_not_duplicated() {
        let mirror = InMemoryMirror::new();
        let remote = InMemoryDocumentStore::new();
        stage(&mirror, &[staged("a", "x"), staged("b", "y")]).await;
        remote.redeliver_call(1);

        let report = Replicator::new(&mirror, &remote, 10).apply_new().await.unwrap();
        assert_eq!(report.succeeded, 0);
        assert_eq!(report.failed_count(), 2);
        assert_eq!(remote.len(), 2);

        let claimed = mirror.cached("a").await.unwrap().unwrap();
        assert!(claimed.remote_revision.is_empty());
        assert!(claimed.fingerprint.is_empty());
        assert!(remote.get(&claimed.remote_id).is_some());

        // The claimed ids now show up as Changed and are updated in place.
        let report = Replicator::new(&mirror, &remote, 10)
            .apply_changed()
            .await
            .unwrap();
        assert_eq!(report.succeeded, 2);
        assert_eq!(remote.len(), 2);

        let a = mirror.cached("a").await.unwrap().unwrap();
        assert_eq!(a.remote_id, claimed.remote_id);
        assert_eq!(a.fingerprint, "fp-x");
        let (rev, _) = remote.get(&a.remote_id).unwrap();
        assert_eq!(rev, a.remote_revision);
        assert!(rev.starts_with("2-"));
    }

    #[tokio::test]
    async fn unconfirmed_row_is_deleted_at_its_current_revision() {
        let mirror = InMemoryMirror::new();
        let remote = InMemoryDocumentStore::new();
        stage(&mirror, &[staged("a", "x")]).await;
        remote.redeliver_call(1);
        Replicator::new(&mirror, &remote, 10).apply_new().await.unwrap();
        assert_eq!(remote.len(), 1);

        stage(&mirror, &[]).await;
        let report = Replicator::new(&mirror, &remote, 10)
            .apply_deleted()
            .await
            .unwrap();
        assert_eq!(report.succeeded, 1);
        assert!(remote.is_empty());
        assert!(mirror.cached("a").await.unwrap().is_none());
    }
}
