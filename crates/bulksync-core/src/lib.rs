//! # bulksync core
//!
//! Runtime-agnostic logic for bulksync: the record model, content
//! fingerprints, the mirror store abstraction, delta calculation, batch
//! replication to a remote document store, and the orchestrator that ties
//! them into one run.
//!
//! This crate contains no tokio runtime, sqlx, or HTTP client. Native
//! backends (SQLite mirror, CouchDB client, CSV reader) live in the
//! `bulksync` crate and plug in through the [`store::MirrorStore`] and
//! [`remote::DocumentStore`] traits.
//!
//! ```text
//! CSV ──▶ loader ──▶ staging ─┐
//!                             ├─▶ delta ──▶ replicate ──▶ remote
//!                    cache ◀──┘                │
//!                      ▲───────────────────────┘ (confirmed writes only)
//! ```

pub mod delta;
pub mod error;
pub mod fingerprint;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod remote;
pub mod replicate;
pub mod store;

pub use error::{FailedItem, SyncError};
pub use models::{CacheEntry, DeltaEntry, DeltaKind, Record, StagingEntry};
pub use pipeline::{run_pipeline, SyncOptions, SyncReport};
