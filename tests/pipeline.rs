//! End-to-end runs through the application context with in-memory
//! collaborators.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::Semaphore;

use common::{chunk_id_of, FakeEmbedder, Harness};
use dex_indexer::error::IndexError;
use dex_indexer::models::{IndexingRun, NewWatchTarget, ReportedStatus, RunStatus, WatchTargetUpdate};
use dex_indexer::runs::RunCatalog;
use dex_indexer::stats::IndexStats;
use dex_indexer::vector_store::{ChunkFilter, VectorStore};

fn txt_folder(path: std::path::PathBuf) -> NewWatchTarget {
    NewWatchTarget {
        file_types: Some(vec![".txt".to_string()]),
        ..NewWatchTarget::folder(path)
    }
}

#[tokio::test]
async fn test_failing_file_does_not_fail_run() {
    let h = Harness::new().await;
    let docs = h.folder("docs");
    let a = h.write("docs/a.txt", "alpha notes");
    h.write("docs/b.txt", "BROKEN file");
    let c = h.write("docs/c.txt", "gamma notes");
    h.write("docs/skip.md", "not on the allow-list");

    let target = h.ctx.add_target(txt_folder(docs)).await.unwrap();
    let run = h.ctx.index_now(&target.id).await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.total_files, 3);
    assert_eq!(run.processed_files, 3);
    assert_eq!(run.files_failed, 1);
    assert_eq!(run.chunks_stored, 2);
    assert_eq!(run.percentage, 100);
    assert!(run.error_message.is_none());
    assert_eq!(
        h.store.ids().unwrap(),
        vec![chunk_id_of(&a, 0), chunk_id_of(&c, 0)]
    );

    let stored = h.store.get(&chunk_id_of(&a, 0)).unwrap().unwrap();
    assert_eq!(stored.metadata.target_id, target.id);
    assert_eq!(stored.metadata.target_path, target.path_str());
    assert_eq!(stored.metadata.total_chunks, 1);

    let after = h.ctx.get_target(&target.id).await.unwrap();
    assert_eq!(
        after.last_indexed_at.map(|t| t.timestamp_millis()),
        Some(run.started_at.timestamp_millis())
    );
    assert_eq!(after.file_count, 3);
    assert!(after.next_scheduled_at.unwrap() > run.started_at);
}

#[tokio::test]
async fn test_reindex_is_idempotent() {
    let h = Harness::new().await;
    let docs = h.folder("docs");
    h.write("docs/a.txt", "alpha");
    h.write("docs/b.txt", "beta");
    let target = h.ctx.add_target(txt_folder(docs)).await.unwrap();

    h.ctx.index_now(&target.id).await.unwrap();
    let first = h.store.ids().unwrap();
    let run = h.ctx.index_now(&target.id).await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(h.store.ids().unwrap(), first);
    assert_eq!(h.store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_shrunk_file_leaves_no_stale_chunks() {
    let h = Harness::build(FakeEmbedder::new(), |c| {
        c.chunking.chunk_size = 10;
        c.chunking.chunk_overlap = 2;
    })
    .await;
    let docs = h.folder("docs");
    let a = h.write("docs/a.txt", "aaaa bbbb cccc dddd eeee ffff");
    let target = h.ctx.add_target(txt_folder(docs)).await.unwrap();

    let run = h.ctx.index_now(&target.id).await.unwrap();
    assert!(run.chunks_stored > 1);

    std::fs::write(&a, "aaaa").unwrap();
    h.ctx.index_now(&target.id).await.unwrap();
    assert_eq!(h.store.ids().unwrap(), vec![chunk_id_of(&a, 0)]);
}

#[tokio::test]
async fn test_empty_folder_completes_with_zero_files() {
    let h = Harness::new().await;
    let docs = h.folder("empty");
    let target = h.ctx.add_target(txt_folder(docs)).await.unwrap();

    let run = h.ctx.index_now(&target.id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.total_files, 0);
    assert_eq!(run.percentage, 100);
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_vanished_folder_ends_in_error() {
    let h = Harness::new().await;
    let docs = h.folder("docs");
    h.write("docs/a.txt", "alpha");
    let target = h.ctx.add_target(txt_folder(docs.clone())).await.unwrap();
    std::fs::remove_dir_all(&docs).unwrap();

    let run = h.ctx.index_now(&target.id).await.unwrap();
    assert_eq!(run.status, RunStatus::Error);
    assert!(run.error_message.unwrap().contains("does not exist"));
    assert!(h.ctx.get_target(&target.id).await.unwrap().last_indexed_at.is_none());
}

#[tokio::test]
async fn test_status_before_first_run() {
    let h = Harness::new().await;
    let target = h.ctx.add_target(txt_folder(h.folder("docs"))).await.unwrap();

    let report = h.ctx.run_status(&target.id).await.unwrap();
    assert_eq!(report.status, ReportedStatus::NotStarted);
    assert_eq!(report.progress, 0);
    assert!(matches!(
        h.ctx.run_status("no-such-id").await,
        Err(IndexError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_remove_target_drops_its_chunks_only() {
    let h = Harness::new().await;
    h.write("one/a.txt", "alpha");
    let b = h.write("two/b.txt", "beta");
    let one = h.ctx.add_target(txt_folder(h.folder("one"))).await.unwrap();
    let two = h.ctx.add_target(txt_folder(h.folder("two"))).await.unwrap();
    h.ctx.index_now(&one.id).await.unwrap();
    h.ctx.index_now(&two.id).await.unwrap();
    assert_eq!(h.store.count().await.unwrap(), 2);

    h.ctx.remove_target(&one.id).await.unwrap();

    assert_eq!(h.store.ids().unwrap(), vec![chunk_id_of(&b, 0)]);
    assert!(matches!(
        h.ctx.get_target(&one.id).await,
        Err(IndexError::NotFound(_))
    ));
    let runs = RunCatalog::new(h.ctx.pool().clone());
    assert!(runs.get(&one.id).await.unwrap().is_none());
    assert!(runs.get(&two.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_moving_a_target_forgets_old_chunks() {
    let h = Harness::new().await;
    h.write("old/a.txt", "alpha");
    h.write("new/b.txt", "beta");
    let target = h.ctx.add_target(txt_folder(h.folder("old"))).await.unwrap();
    h.ctx.index_now(&target.id).await.unwrap();

    let moved = h
        .ctx
        .update_target(
            &target.id,
            WatchTargetUpdate {
                path: Some(h.folder("new")),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(moved.last_indexed_at.is_none());
    assert_eq!(h.store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_duplicate_and_missing_paths_rejected() {
    let h = Harness::new().await;
    let docs = h.folder("docs");
    h.ctx.add_target(txt_folder(docs.clone())).await.unwrap();

    assert!(matches!(
        h.ctx.add_target(txt_folder(docs)).await,
        Err(IndexError::DuplicatePath(_))
    ));
    assert!(matches!(
        h.ctx.add_target(txt_folder(h.dir.path().join("nowhere"))).await,
        Err(IndexError::PathNotFound(_))
    ));
}

#[tokio::test]
async fn test_manual_trigger_is_exclusive_per_target() {
    let gate = Arc::new(Semaphore::new(0));
    let h = Harness::build(FakeEmbedder::gated(gate.clone()), |_| {}).await;
    h.write("docs/a.txt", "alpha");
    let target = h.ctx.add_target(txt_folder(h.folder("docs"))).await.unwrap();

    let accepted = h.ctx.trigger_index(&target.id).await.unwrap();
    assert!(matches!(
        accepted.status,
        ReportedStatus::Pending | ReportedStatus::Indexing
    ));

    assert!(matches!(
        h.ctx.trigger_index(&target.id).await,
        Err(IndexError::AlreadyRunning(_))
    ));
    assert!(matches!(
        h.ctx.index_now(&target.id).await,
        Err(IndexError::AlreadyRunning(_))
    ));
    assert!(matches!(
        h.ctx.remove_target(&target.id).await,
        Err(IndexError::AlreadyRunning(_))
    ));
    assert!(matches!(
        h.ctx.clear_run(&target.id).await,
        Err(IndexError::AlreadyRunning(_))
    ));

    gate.add_permits(1);
    let report = h.wait_terminal(&target.id).await;
    assert_eq!(report.status, ReportedStatus::Completed);
    assert_eq!(report.chunks_stored, 1);

    // The lock is released once the spawned run has finished its bookkeeping.
    h.wait_unlocked(&target.id).await;
    gate.add_permits(1);
    assert_eq!(
        h.ctx.index_now(&target.id).await.unwrap().status,
        RunStatus::Completed
    );
}

#[tokio::test]
async fn test_run_is_exclusive_across_processes() {
    let gate = Arc::new(Semaphore::new(0));
    let h = Harness::build(FakeEmbedder::gated(gate.clone()), |_| {}).await;
    h.write("docs/a.txt", "alpha");
    let target = h.ctx.add_target(txt_folder(h.folder("docs"))).await.unwrap();
    let other = h.second_context().await;

    h.ctx.trigger_index(&target.id).await.unwrap();
    h.wait_indexing(&target.id).await;

    assert!(matches!(
        other.index_now(&target.id).await,
        Err(IndexError::AlreadyRunning(_))
    ));
    assert!(matches!(
        other.trigger_index(&target.id).await,
        Err(IndexError::AlreadyRunning(_))
    ));
    assert!(matches!(
        other.remove_target(&target.id).await,
        Err(IndexError::AlreadyRunning(_))
    ));
    // The refused attempts left the live run untouched.
    assert_eq!(
        h.ctx.run_status(&target.id).await.unwrap().status,
        ReportedStatus::Indexing
    );

    gate.add_permits(1);
    assert_eq!(
        h.wait_terminal(&target.id).await.status,
        ReportedStatus::Completed
    );
    assert_eq!(
        other.index_now(&target.id).await.unwrap().status,
        RunStatus::Completed
    );
    other.shutdown().await;
}

#[tokio::test]
async fn test_startup_recovery_closes_orphaned_runs() {
    let h = Harness::new().await;
    let target = h.ctx.add_target(txt_folder(h.folder("docs"))).await.unwrap();
    let runs = RunCatalog::new(h.ctx.pool().clone());
    runs.save(&IndexingRun::begin(&target.id, chrono::Utc::now()))
        .await
        .unwrap();

    assert_eq!(h.ctx.recover_interrupted().await.unwrap(), 1);
    let report = h.ctx.run_status(&target.id).await.unwrap();
    assert_eq!(report.status, ReportedStatus::Error);
    assert_eq!(report.error_message.as_deref(), Some("interrupted by shutdown"));
    assert_eq!(h.ctx.recover_interrupted().await.unwrap(), 0);
}

#[tokio::test]
async fn test_clear_run() {
    let h = Harness::new().await;
    let target = h.ctx.add_target(txt_folder(h.folder("docs"))).await.unwrap();
    let runs = RunCatalog::new(h.ctx.pool().clone());
    runs.save(&IndexingRun::pending(&target.id, chrono::Utc::now()))
        .await
        .unwrap();

    let report = h.ctx.clear_run(&target.id).await.unwrap();
    assert_eq!(report.status, ReportedStatus::Error);
    assert_eq!(report.error_message.as_deref(), Some("cleared by operator"));
    assert!(matches!(
        h.ctx.clear_run(&target.id).await,
        Err(IndexError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_search_finds_indexed_chunks() {
    let h = Harness::new().await;
    h.write("docs/a.txt", "alpha");
    let target = h.ctx.add_target(txt_folder(h.folder("docs"))).await.unwrap();
    h.ctx.index_now(&target.id).await.unwrap();

    let hits = h
        .ctx
        .search("alpha", 5, &ChunkFilter::target(&target.id))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].text, "alpha");
    assert!((hits[0].score - 1.0).abs() < 1e-5);
}

#[tokio::test]
async fn test_stats_counts_targets_runs_and_chunks() {
    let h = Harness::new().await;
    h.write("one/a.txt", "alpha");
    h.write("two/b.txt", "beta");
    let one = h.ctx.add_target(txt_folder(h.folder("one"))).await.unwrap();
    let two = h
        .ctx
        .add_target(NewWatchTarget {
            enabled: Some(false),
            ..txt_folder(h.folder("two"))
        })
        .await
        .unwrap();

    assert_eq!(
        h.ctx.stats().await.unwrap(),
        IndexStats {
            targets_total: 2,
            targets_enabled: 1,
            ..Default::default()
        }
    );

    h.ctx.index_now(&one.id).await.unwrap();
    RunCatalog::new(h.ctx.pool().clone())
        .save(&IndexingRun::pending(&two.id, chrono::Utc::now()))
        .await
        .unwrap();

    assert_eq!(
        h.ctx.stats().await.unwrap(),
        IndexStats {
            targets_total: 2,
            targets_enabled: 1,
            targets_indexed: 1,
            runs_in_progress: 1,
            chunks: 1,
        }
    );
}
