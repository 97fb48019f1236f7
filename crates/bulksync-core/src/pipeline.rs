//! Sync orchestrator: one full run from snapshot to remote.
//!
//! Order is fixed: load staging, then New, Changed, Deleted. A failed load
//! aborts before any delta work and leaves the cache untouched. Failures
//! inside a delta set are per chunk or per document and never stop the
//! remaining sets.

use tracing::info;

use crate::delta::{self, DeltaCursor};
use crate::error::SyncError;
use crate::loader::{load_snapshot, LoadStats};
use crate::models::{DeltaKind, Record};
use crate::remote::DocumentStore;
use crate::replicate::{Replicator, SetReport};
use crate::store::MirrorStore;

/// Default guid column, as lower-cased by the CSV source.
pub const DEFAULT_GUID_FIELD: &str = "occurrenceid";

/// Default rows per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub chunk_size: usize,
    pub guid_field: String,
    /// Load and count the delta sets without touching the remote store.
    pub dry_run: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            guid_field: DEFAULT_GUID_FIELD.to_string(),
            dry_run: false,
        }
    }
}

/// Summary of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub load: LoadStats,
    pub new: SetReport,
    pub changed: SetReport,
    pub deleted: SetReport,
    /// Delta set sizes found by a dry run (`[new, changed, deleted]`).
    pub planned: Option<[u64; 3]>,
}

impl SyncReport {
    /// True when no document or chunk failed.
    pub fn is_clean(&self) -> bool {
        self.failed_total() == 0
            && self.new.failed_chunks + self.changed.failed_chunks + self.deleted.failed_chunks
                == 0
    }

    pub fn failed_total(&self) -> u64 {
        self.new.failed_count() + self.changed.failed_count() + self.deleted.failed_count()
    }

    pub fn set(&self, kind: DeltaKind) -> &SetReport {
        match kind {
            DeltaKind::New => &self.new,
            DeltaKind::Changed => &self.changed,
            DeltaKind::Deleted => &self.deleted,
        }
    }

    fn set_mut(&mut self, kind: DeltaKind) -> &mut SetReport {
        match kind {
            DeltaKind::New => &mut self.new,
            DeltaKind::Changed => &mut self.changed,
            DeltaKind::Deleted => &mut self.deleted,
        }
    }
}

/// Run the whole pipeline once.
///
/// # Errors
///
/// Fatal errors only: [`SyncError::SourceRead`] and
/// [`SyncError::InvalidConfig`] from the load (including a snapshot in
/// which every record was skipped), [`SyncError::StoreQuery`]
/// from any mirror access. Remote failures are reported in the
/// [`SyncReport`].
pub async fn run_pipeline<I, M, R>(
    source: I,
    mirror: &M,
    remote: &R,
    options: &SyncOptions,
) -> Result<SyncReport, SyncError>
where
    I: IntoIterator<Item = Result<Record, SyncError>>,
    M: MirrorStore + ?Sized,
    R: DocumentStore + ?Sized,
{
    let mut report = SyncReport {
        load: load_snapshot(source, mirror, options.chunk_size, &options.guid_field).await?,
        ..SyncReport::default()
    };

    // An all-malformed snapshot would otherwise read as empty and delete
    // every cached document remotely.
    if report.load.loaded == 0 && report.load.skipped > 0 {
        return Err(SyncError::InvalidConfig(format!(
            "all {} records lack the guid field '{}'",
            report.load.skipped, options.guid_field
        )));
    }

    if options.dry_run {
        let mut planned = [0u64; 3];
        for (slot, kind) in planned.iter_mut().zip(DeltaKind::ALL) {
            *slot = delta::count(DeltaCursor::new(mirror, kind, options.chunk_size)).await?;
        }
        info!(
            new = planned[0],
            changed = planned[1],
            deleted = planned[2],
            "dry run, remote untouched"
        );
        report.planned = Some(planned);
        return Ok(report);
    }

    let replicator = Replicator::new(mirror, remote, options.chunk_size);
    for kind in DeltaKind::ALL {
        *report.set_mut(kind) = replicator.apply(kind).await?;
    }

    info!(
        loaded = report.load.loaded,
        new = report.new.succeeded,
        changed = report.changed.succeeded,
        deleted = report.deleted.succeeded,
        failed = report.failed_total(),
        "sync finished"
    );
    Ok(report)
}
