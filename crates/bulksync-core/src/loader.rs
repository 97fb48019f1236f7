//! Snapshot loader: streams source records into the staging table.
//!
//! Staging is cleared first, then filled one chunk at a time so memory and
//! transaction size stay bounded. A source error aborts the load; the
//! caller must not compute deltas from a partial staging table.

use tracing::{info, warn};

use crate::error::SyncError;
use crate::fingerprint::fingerprint;
use crate::models::{Record, StagingEntry};
use crate::store::MirrorStore;

/// Outcome of one load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Records written to staging.
    pub loaded: u64,
    /// Records dropped for lacking a usable guid.
    pub skipped: u64,
}

/// Load a full snapshot into staging.
///
/// # Errors
///
/// - [`SyncError::InvalidConfig`] if `chunk_size` is zero.
/// - [`SyncError::SourceRead`] if the source yields an error.
/// - [`SyncError::StoreQuery`] if a staging write fails.
pub async fn load_snapshot<M, I>(
    source: I,
    mirror: &M,
    chunk_size: usize,
    guid_field: &str,
) -> Result<LoadStats, SyncError>
where
    M: MirrorStore + ?Sized,
    I: IntoIterator<Item = Result<Record, SyncError>>,
{
    if chunk_size == 0 {
        return Err(SyncError::InvalidConfig("chunk size must be > 0".to_string()));
    }

    mirror.reset_staging().await?;

    let mut stats = LoadStats::default();
    let mut chunk: Vec<StagingEntry> = Vec::with_capacity(chunk_size);

    for (line, item) in source.into_iter().enumerate() {
        let record = match item {
            Ok(r) => r,
            Err(SyncError::SourceRead(msg)) => return Err(SyncError::SourceRead(msg)),
            Err(e) => return Err(SyncError::SourceRead(e.to_string())),
        };

        let fp = match fingerprint(&record, guid_field) {
            Ok(fp) => fp,
            Err(e) => {
                warn!(record = line + 1, error = %e, "skipping record");
                stats.skipped += 1;
                continue;
            }
        };
        // fingerprint() already checked the guid
        let guid = record.guid(guid_field)?.to_string();

        chunk.push(StagingEntry {
            guid,
            fingerprint: fp,
            payload: record.to_payload(),
        });

        if chunk.len() >= chunk_size {
            flush(mirror, &mut chunk, &mut stats).await?;
        }
    }

    if !chunk.is_empty() {
        flush(mirror, &mut chunk, &mut stats).await?;
    }

    info!(
        loaded = stats.loaded,
        skipped = stats.skipped,
        "snapshot staged"
    );
    Ok(stats)
}

async fn flush<M: MirrorStore + ?Sized>(
    mirror: &M,
    chunk: &mut Vec<StagingEntry>,
    stats: &mut LoadStats,
) -> Result<(), SyncError> {
    info!(rows = chunk.len(), "inserting chunk into staging");
    mirror.insert_staging(chunk.as_slice()).await?;
    stats.loaded += chunk.len() as u64;
    chunk.clear();
    Ok(())
}
