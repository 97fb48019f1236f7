//! Core data models for a sync run.
//!
//! Records come from the snapshot source, become [`StagingEntry`] rows,
//! and are compared against [`CacheEntry`] rows to produce
//! [`DeltaEntry`] pages.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// One source row: field name → string value.
///
/// Field names are expected to be trimmed and lower-cased by the source.
/// Backed by a `BTreeMap`, so iteration is always in field-name order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, String>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields in sorted name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The trimmed, non-empty value of the guid field.
    pub fn guid(&self, guid_field: &str) -> Result<&str, SyncError> {
        match self.get(guid_field).map(str::trim) {
            Some(guid) if !guid.is_empty() => Ok(guid),
            Some(_) => Err(SyncError::MalformedRecord(format!(
                "field '{}' is empty",
                guid_field
            ))),
            None => Err(SyncError::MalformedRecord(format!(
                "missing field '{}'",
                guid_field
            ))),
        }
    }

    /// JSON object text stored as the staging/cache payload.
    pub fn to_payload(&self) -> String {
        // A map of strings always serializes.
        serde_json::to_string(&self.fields).unwrap_or_else(|_| "{}".to_string())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// A row of the incoming snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingEntry {
    pub guid: String,
    pub fingerprint: String,
    pub payload: String,
}

/// A row of the last replicated state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub guid: String,
    pub fingerprint: String,
    pub remote_id: String,
    /// Empty when the document was never confirmed by the remote store.
    pub remote_revision: String,
    pub payload: String,
}

/// The three delta partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeltaKind {
    /// Guid in staging, absent from cache.
    New,
    /// Guid in both, fingerprints differ.
    Changed,
    /// Guid in cache, absent from staging.
    Deleted,
}

impl DeltaKind {
    pub const ALL: [DeltaKind; 3] = [DeltaKind::New, DeltaKind::Changed, DeltaKind::Deleted];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeltaKind::New => "new",
            DeltaKind::Changed => "changed",
            DeltaKind::Deleted => "deleted",
        }
    }
}

impl fmt::Display for DeltaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One member of a delta set, carrying what the replicator needs.
///
/// | Kind | fingerprint / payload | remote id / revision |
/// |------|-----------------------|----------------------|
/// | New | staging | none |
/// | Changed | staging (new value wins) | cache |
/// | Deleted | cache | cache |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaEntry {
    pub guid: String,
    pub fingerprint: String,
    pub payload: String,
    pub remote_id: Option<String>,
    pub remote_revision: Option<String>,
}

/// Row counts of the two mirror tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorCounts {
    pub staging: u64,
    pub cache: u64,
}
