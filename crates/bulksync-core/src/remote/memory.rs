//! In-memory [`DocumentStore`] with CouchDB-like revision rules.
//!
//! Revisions look like `"<generation>-<32 hex>"`. Writes must name the
//! current revision (or none, for a new id) or they conflict. Whole-call
//! failures and per-id rejections can be injected to exercise the
//! replicator's failure paths, including a batch that was applied but
//! whose response never arrived.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::SyncError;

use super::{DocOutcome, DocRef, DocumentStore, RemoteDoc};

#[derive(Debug, Clone)]
struct StoredDoc {
    rev: String,
    generation: u64,
    body: Map<String, Value>,
}

#[derive(Default)]
struct State {
    docs: HashMap<String, StoredDoc>,
    calls: usize,
    fail_calls: HashSet<usize>,
    redeliver_calls: HashSet<usize>,
    reject_ids: HashSet<String>,
}

/// In-memory remote store.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    state: Mutex<State>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `n`th bulk call (1-based, upserts and deletes counted
    /// together) fail as a whole.
    pub fn fail_call(&self, n: usize) {
        if let Ok(mut s) = self.state.lock() {
            s.fail_calls.insert(n);
        }
    }

    /// Apply the `n`th bulk upsert twice and answer with the second
    /// delivery's outcomes, as a client sees a retry after a lost response.
    pub fn redeliver_call(&self, n: usize) {
        if let Ok(mut s) = self.state.lock() {
            s.redeliver_calls.insert(n);
        }
    }

    /// Reject every write or delete of document `id`.
    pub fn reject_id(&self, id: impl Into<String>) {
        if let Ok(mut s) = self.state.lock() {
            s.reject_ids.insert(id.into());
        }
    }

    /// Bump a document's revision behind the syncer's back.
    pub fn touch(&self, id: &str) -> Option<String> {
        let mut s = self.state.lock().ok()?;
        let doc = s.docs.get_mut(id)?;
        doc.generation += 1;
        doc.rev = new_rev(doc.generation);
        Some(doc.rev.clone())
    }

    /// Current revision and body of a document.
    pub fn get(&self, id: &str) -> Option<(String, Map<String, Value>)> {
        let s = self.state.lock().ok()?;
        s.docs.get(id).map(|d| (d.rev.clone(), d.body.clone()))
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of bulk calls received so far. Revision lookups are not counted.
    pub fn calls(&self) -> usize {
        self.state.lock().map(|s| s.calls).unwrap_or(0)
    }
}

fn new_rev(generation: u64) -> String {
    format!("{}-{}", generation, Uuid::new_v4().simple())
}

fn lock(store: &InMemoryDocumentStore) -> Result<std::sync::MutexGuard<'_, State>, SyncError> {
    store
        .state
        .lock()
        .map_err(|_| SyncError::RemoteUnavailable("in-memory remote lock poisoned".to_string()))
}

fn begin_call(state: &mut State) -> Result<(), SyncError> {
    state.calls += 1;
    if state.fail_calls.contains(&state.calls) {
        return Err(SyncError::RemoteUnavailable(format!(
            "injected failure on call {}",
            state.calls
        )));
    }
    Ok(())
}

fn conflict(id: &str) -> DocOutcome {
    DocOutcome::Conflict {
        id: id.to_string(),
        reason: "Document update conflict.".to_string(),
    }
}

fn apply_upserts(state: &mut State, docs: &[RemoteDoc]) -> Vec<DocOutcome> {
    let mut outcomes = Vec::with_capacity(docs.len());
    for doc in docs {
        if state.reject_ids.contains(&doc.id) {
            outcomes.push(DocOutcome::Rejected {
                id: doc.id.clone(),
                reason: "forbidden".to_string(),
            });
            continue;
        }
        let current = state.docs.get(&doc.id).map(|d| (d.rev.clone(), d.generation));
        let generation = match (current, doc.rev.as_deref()) {
            (None, None) => 1,
            (Some((rev, generation)), Some(expected)) if rev == expected => generation + 1,
            _ => {
                outcomes.push(conflict(&doc.id));
                continue;
            }
        };
        let rev = new_rev(generation);
        state.docs.insert(
            doc.id.clone(),
            StoredDoc {
                rev: rev.clone(),
                generation,
                body: doc.body.clone(),
            },
        );
        outcomes.push(DocOutcome::Written {
            id: doc.id.clone(),
            rev,
        });
    }
    outcomes
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn bulk_upsert(&self, docs: &[RemoteDoc]) -> Result<Vec<DocOutcome>, SyncError> {
        let mut state = lock(self)?;
        begin_call(&mut state)?;

        let outcomes = apply_upserts(&mut state, docs);
        if state.redeliver_calls.contains(&state.calls) {
            // The first delivery's response is lost; the caller sees the replay.
            return Ok(apply_upserts(&mut state, docs));
        }
        Ok(outcomes)
    }

    async fn bulk_delete(&self, docs: &[DocRef]) -> Result<Vec<DocOutcome>, SyncError> {
        let mut state = lock(self)?;
        begin_call(&mut state)?;

        let mut outcomes = Vec::with_capacity(docs.len());
        for doc in docs {
            if state.reject_ids.contains(&doc.id) {
                outcomes.push(DocOutcome::Rejected {
                    id: doc.id.clone(),
                    reason: "forbidden".to_string(),
                });
                continue;
            }
            let matches = state
                .docs
                .get(&doc.id)
                .map(|d| d.rev == doc.rev)
                .unwrap_or(false);
            if !matches {
                outcomes.push(conflict(&doc.id));
                continue;
            }
            if let Some(removed) = state.docs.remove(&doc.id) {
                outcomes.push(DocOutcome::Written {
                    id: doc.id.clone(),
                    rev: new_rev(removed.generation + 1),
                });
            }
        }
        Ok(outcomes)
    }

    async fn current_revisions(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, String>, SyncError> {
        let state = lock(self)?;
        Ok(ids
            .iter()
            .filter_map(|id| state.docs.get(id).map(|d| (id.clone(), d.rev.clone())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, rev: Option<&str>) -> RemoteDoc {
        RemoteDoc {
            id: id.to_string(),
            rev: rev.map(str::to_string),
            body: Map::new(),
        }
    }

    fn written_rev(o: &DocOutcome) -> String {
        match o {
            DocOutcome::Written { rev, .. } => rev.clone(),
            other => panic!("expected write, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn update_requires_current_revision() {
        let remote = InMemoryDocumentStore::new();
        let out = remote.bulk_upsert(&[doc("d1", None)]).await.unwrap();
        let rev1 = written_rev(&out[0]);
        assert!(rev1.starts_with("1-"));

        let stale = remote.bulk_upsert(&[doc("d1", Some("1-nope"))]).await.unwrap();
        assert!(matches!(stale[0], DocOutcome::Conflict { .. }));

        let out = remote.bulk_upsert(&[doc("d1", Some(&rev1))]).await.unwrap();
        assert!(written_rev(&out[0]).starts_with("2-"));
    }

    #[tokio::test]
    async fn create_over_existing_id_conflicts() {
        let remote = InMemoryDocumentStore::new();
        remote.bulk_upsert(&[doc("d1", None)]).await.unwrap();
        let out = remote.bulk_upsert(&[doc("d1", None)]).await.unwrap();
        assert!(matches!(out[0], DocOutcome::Conflict { .. }));
    }

    #[tokio::test]
    async fn delete_removes_document() {
        let remote = InMemoryDocumentStore::new();
        let out = remote.bulk_upsert(&[doc("d1", None)]).await.unwrap();
        let rev = written_rev(&out[0]);
        let out = remote
            .bulk_delete(&[DocRef {
                id: "d1".to_string(),
                rev,
            }])
            .await
            .unwrap();
        assert!(matches!(out[0], DocOutcome::Written { .. }));
        assert!(remote.is_empty());
    }

    #[tokio::test]
    async fn injected_call_failure() {
        let remote = InMemoryDocumentStore::new();
        remote.fail_call(2);
        assert!(remote.bulk_upsert(&[doc("a", None)]).await.is_ok());
        assert!(matches!(
            remote.bulk_upsert(&[doc("b", None)]).await,
            Err(SyncError::RemoteUnavailable(_))
        ));
        assert!(remote.bulk_upsert(&[doc("b", None)]).await.is_ok());
        assert_eq!(remote.calls(), 3);
    }

    #[tokio::test]
    async fn redelivered_create_reports_conflict() {
        let remote = InMemoryDocumentStore::new();
        remote.redeliver_call(1);
        let out = remote.bulk_upsert(&[doc("d1", None)]).await.unwrap();
        assert!(matches!(out[0], DocOutcome::Conflict { .. }));
        assert_eq!(remote.len(), 1);
        assert_eq!(remote.calls(), 1);
    }

    #[tokio::test]
    async fn current_revisions_skips_missing_ids() {
        let remote = InMemoryDocumentStore::new();
        let out = remote.bulk_upsert(&[doc("d1", None)]).await.unwrap();
        let rev = written_rev(&out[0]);

        let revs = remote
            .current_revisions(&["d1".to_string(), "gone".to_string()])
            .await
            .unwrap();
        assert_eq!(revs.len(), 1);
        assert_eq!(revs["d1"], rev);
        assert_eq!(remote.calls(), 1);
    }
}
