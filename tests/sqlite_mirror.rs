//! SQLite mirror driven through the full pipeline against the in-memory
//! remote store.

use bulksync::connector_csv::CsvSource;
use bulksync::lock::{self, RunLock};
use bulksync::sqlite_store::SqliteMirror;
use bulksync::{db, migrate};
use bulksync_core::delta::{collect_guids, compute_changed, compute_deleted, compute_new};
use bulksync_core::remote::memory::InMemoryDocumentStore;
use bulksync_core::store::MirrorStore;
use bulksync_core::{run_pipeline, Record, SyncError, SyncOptions};
use tempfile::TempDir;

async fn open_mirror(tmp: &TempDir) -> SqliteMirror {
    let pool = db::connect_path(&tmp.path().join("mirror.sqlite"))
        .await
        .unwrap();
    migrate::apply(&pool).await.unwrap();
    SqliteMirror::new(pool)
}

fn snapshot(rows: &[(&str, &str)]) -> Vec<Result<Record, SyncError>> {
    rows.iter()
        .map(|(guid, name)| {
            let record: Record = [("occurrenceid", *guid), ("scientificname", *name)]
                .into_iter()
                .collect();
            Ok(record)
        })
        .collect()
}

fn opts(chunk_size: usize) -> SyncOptions {
    SyncOptions {
        chunk_size,
        ..SyncOptions::default()
    }
}

#[tokio::test]
async fn three_runs_track_new_changed_deleted() {
    let tmp = TempDir::new().unwrap();
    let mirror = open_mirror(&tmp).await;
    let remote = InMemoryDocumentStore::new();

    let first = run_pipeline(
        snapshot(&[("A", "Puma"), ("B", "Vultur")]),
        &mirror,
        &remote,
        &opts(10),
    )
    .await
    .unwrap();
    assert_eq!(first.new.succeeded, 2);
    assert!(first.is_clean());

    let a_before = mirror.cached("A").await.unwrap().unwrap();
    assert!(!a_before.remote_revision.is_empty());

    let second = run_pipeline(
        snapshot(&[("A", "Puma"), ("B", "Vultur gryphus")]),
        &mirror,
        &remote,
        &opts(10),
    )
    .await
    .unwrap();
    assert_eq!(second.new.attempted(), 0);
    assert_eq!(second.changed.succeeded, 1);
    assert_eq!(mirror.cached("A").await.unwrap().unwrap(), a_before);

    let b = mirror.cached("B").await.unwrap().unwrap();
    let (rev, body) = remote.get(&b.remote_id).unwrap();
    assert_eq!(rev, b.remote_revision);
    assert_eq!(body["scientificname"], "Vultur gryphus");

    let third = run_pipeline(snapshot(&[("A", "Puma")]), &mirror, &remote, &opts(10))
        .await
        .unwrap();
    assert_eq!(third.deleted.succeeded, 1);
    assert!(mirror.cached("B").await.unwrap().is_none());
    assert!(remote.get(&b.remote_id).is_none());

    let counts = mirror.counts().await.unwrap();
    assert_eq!((counts.staging, counts.cache), (1, 1));
}

#[tokio::test]
async fn failed_chunk_is_proposed_again() {
    let tmp = TempDir::new().unwrap();
    let mirror = open_mirror(&tmp).await;
    let remote = InMemoryDocumentStore::new();
    let rows = [("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")];

    remote.fail_call(2);
    let report = run_pipeline(snapshot(&rows), &mirror, &remote, &opts(2))
        .await
        .unwrap();
    assert_eq!(report.new.succeeded, 2);
    assert_eq!(report.new.failed_chunks, 1);
    assert!(!report.is_clean());

    let pending = collect_guids(compute_new(&mirror, 10)).await.unwrap();
    assert_eq!(pending, vec!["c".to_string(), "d".to_string()]);

    let retry = run_pipeline(snapshot(&rows), &mirror, &remote, &opts(2))
        .await
        .unwrap();
    assert_eq!(retry.new.succeeded, 2);
    assert!(retry.is_clean());
    assert_eq!(remote.len(), 4);
}

#[tokio::test]
async fn conflict_leaves_cache_for_next_run() {
    let tmp = TempDir::new().unwrap();
    let mirror = open_mirror(&tmp).await;
    let remote = InMemoryDocumentStore::new();

    run_pipeline(snapshot(&[("A", "x")]), &mirror, &remote, &opts(10))
        .await
        .unwrap();
    let cached = mirror.cached("A").await.unwrap().unwrap();
    remote.touch(&cached.remote_id).unwrap();

    let report = run_pipeline(snapshot(&[("A", "y")]), &mirror, &remote, &opts(10))
        .await
        .unwrap();
    assert_eq!(report.changed.failed_count(), 1);
    assert_eq!(mirror.cached("A").await.unwrap().unwrap(), cached);

    let still_changed = collect_guids(compute_changed(&mirror, 10)).await.unwrap();
    assert_eq!(still_changed, vec!["A".to_string()]);
}

#[tokio::test]
async fn lost_create_response_is_claimed_then_confirmed() {
    let tmp = TempDir::new().unwrap();
    let mirror = open_mirror(&tmp).await;
    let remote = InMemoryDocumentStore::new();
    remote.redeliver_call(1);
    let rows = [("a", "1"), ("b", "2")];

    let first = run_pipeline(snapshot(&rows), &mirror, &remote, &opts(10))
        .await
        .unwrap();
    assert_eq!(first.new.failed_count(), 2);
    assert_eq!(mirror.unconfirmed_count().await.unwrap(), 2);
    let claimed = mirror.cached("a").await.unwrap().unwrap();
    assert!(claimed.remote_revision.is_empty());
    assert!(remote.get(&claimed.remote_id).is_some());

    let second = run_pipeline(snapshot(&rows), &mirror, &remote, &opts(10))
        .await
        .unwrap();
    assert!(second.is_clean());
    assert_eq!(second.new.attempted(), 0);
    assert_eq!(second.changed.succeeded, 2);
    assert_eq!(mirror.unconfirmed_count().await.unwrap(), 0);
    assert_eq!(remote.len(), 2);
    let confirmed = mirror.cached("a").await.unwrap().unwrap();
    assert_eq!(confirmed.remote_id, claimed.remote_id);
}

#[tokio::test]
async fn unchanged_snapshot_makes_no_remote_calls() {
    let tmp = TempDir::new().unwrap();
    let mirror = open_mirror(&tmp).await;
    let remote = InMemoryDocumentStore::new();
    let rows = [("a", "1"), ("b", "2"), ("c", "3")];

    run_pipeline(snapshot(&rows), &mirror, &remote, &opts(2))
        .await
        .unwrap();
    let calls = remote.calls();

    let again = run_pipeline(snapshot(&rows), &mirror, &remote, &opts(2))
        .await
        .unwrap();
    assert_eq!(
        again.new.attempted() + again.changed.attempted() + again.deleted.attempted(),
        0
    );
    assert_eq!(remote.calls(), calls);
    assert!(collect_guids(compute_deleted(&mirror, 2))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn csv_snapshot_feeds_the_pipeline() {
    let tmp = TempDir::new().unwrap();
    let mirror = open_mirror(&tmp).await;
    let remote = InMemoryDocumentStore::new();

    let csv = "OccurrenceID,ScientificName\nurn:1, Puma concolor\nurn:2,Vultur gryphus\n";
    let source = CsvSource::from_reader(csv.as_bytes()).unwrap();
    let report = run_pipeline(source, &mirror, &remote, &opts(10))
        .await
        .unwrap();

    assert_eq!(report.load.loaded, 2);
    assert_eq!(report.new.succeeded, 2);
    let entry = mirror.cached("urn:1").await.unwrap().unwrap();
    let (_, body) = remote.get(&entry.remote_id).unwrap();
    assert_eq!(body["scientificname"], "Puma concolor");
}

#[tokio::test]
async fn run_lock_is_exclusive() {
    let tmp = TempDir::new().unwrap();
    let mirror = open_mirror(&tmp).await;
    let pool = mirror.pool().clone();

    let held = RunLock::acquire(&pool).await.unwrap();
    let err = RunLock::acquire(&pool).await.unwrap_err();
    assert!(err.to_string().contains(held.holder()));

    held.release().await.unwrap();
    assert!(lock::current(&pool).await.unwrap().is_none());

    let again = RunLock::acquire(&pool).await.unwrap();
    let removed = lock::force_unlock(&pool).await.unwrap().unwrap();
    assert_eq!(removed.holder, again.holder());
    assert!(lock::current(&pool).await.unwrap().is_none());
}
