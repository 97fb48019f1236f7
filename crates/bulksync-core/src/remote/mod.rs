//! Remote document store abstraction.
//!
//! The remote store is authoritative for document revisions. Bulk calls
//! accept a batch and report an outcome per document; a call that fails as
//! a whole returns [`SyncError::RemoteUnavailable`].

pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::SyncError;

/// A document to create or update.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDoc {
    pub id: String,
    /// Expected current revision; `None` creates the document.
    pub rev: Option<String>,
    pub body: Map<String, Value>,
}

/// A document to delete at a known revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocRef {
    pub id: String,
    pub rev: String,
}

/// Per-document result of a bulk call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocOutcome {
    /// The write was applied; `rev` is the new revision token.
    Written { id: String, rev: String },
    /// The expected revision was stale.
    Conflict { id: String, reason: String },
    /// The store refused the document for any other reason.
    Rejected { id: String, reason: String },
}

impl DocOutcome {
    pub fn id(&self) -> &str {
        match self {
            DocOutcome::Written { id, .. }
            | DocOutcome::Conflict { id, .. }
            | DocOutcome::Rejected { id, .. } => id,
        }
    }

    /// The per-document error for a failed outcome.
    pub fn error(&self) -> Option<SyncError> {
        match self {
            DocOutcome::Written { .. } => None,
            DocOutcome::Conflict { id, reason } => Some(SyncError::RemoteConflict {
                id: id.clone(),
                reason: reason.clone(),
            }),
            DocOutcome::Rejected { id, reason } => Some(SyncError::RemoteRejected {
                id: id.clone(),
                reason: reason.clone(),
            }),
        }
    }
}

/// A bulk document store with optimistic-concurrency revisions.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create or update a batch of documents.
    async fn bulk_upsert(&self, docs: &[RemoteDoc]) -> Result<Vec<DocOutcome>, SyncError>;

    /// Delete a batch of documents at their expected revisions.
    async fn bulk_delete(&self, docs: &[DocRef]) -> Result<Vec<DocOutcome>, SyncError>;

    /// Current revision of each id that exists remotely. Missing and
    /// deleted documents are absent from the map.
    async fn current_revisions(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, String>, SyncError>;
}
