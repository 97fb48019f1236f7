//! Error taxonomy shared by every stage of a sync run.
//!
//! Fatal errors ([`SyncError::SourceRead`], [`SyncError::StoreQuery`])
//! abort the run. Per-document errors are collected as [`FailedItem`]s and
//! reported at the end without stopping sibling chunks or delta sets.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// The snapshot could not be read to completion.
    #[error("source read failed: {0}")]
    SourceRead(String),

    /// The local mirror store is unavailable or returned an error.
    #[error("mirror store query failed: {0}")]
    StoreQuery(String),

    /// The remote store holds a newer revision than the one we sent.
    #[error("remote conflict on document {id}: {reason}")]
    RemoteConflict { id: String, reason: String },

    /// The remote store refused the document.
    #[error("remote rejected document {id}: {reason}")]
    RemoteRejected { id: String, reason: String },

    /// A whole bulk call failed (network, 5xx after retries, bad response).
    #[error("remote store unavailable: {0}")]
    RemoteUnavailable(String),

    /// A record lacks a usable guid.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SyncError {
    /// Whether this error ends the run rather than a single document.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::SourceRead(_) | SyncError::StoreQuery(_) | SyncError::InvalidConfig(_)
        )
    }
}

/// A document that could not be replicated during this run.
///
/// Its cache entry was left untouched, so the next run's delta
/// calculation proposes it again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedItem {
    pub guid: String,
    pub error: SyncError,
}
