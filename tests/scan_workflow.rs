//! End-to-end scan workflow against the real mock worker process.

mod common;

use std::sync::Arc;
use std::time::Duration;

use cylscan::scanner::{ScanEvent, Scanner, ScannerState};
use cylscan::storage::MemoryScanStore;
use cylscan::worker::WorkerSupervisor;
use cylscan::ScanError;

use common::{record_meta, session, worker_config};

fn scanner() -> Scanner {
    Scanner::new(WorkerSupervisor::new(worker_config())).with_settle(Duration::ZERO)
}

#[tokio::test]
async fn test_full_scan_captures_every_frame_and_returns_home() {
    let output = tempfile::tempdir().unwrap();
    let mut scanner = scanner();
    let mut events = scanner.subscribe();

    scanner
        .initialize(session(36, output.path()))
        .await
        .unwrap();
    assert_eq!(scanner.state(), ScannerState::Ready);

    let outcome = scanner.scan().await;
    assert!(outcome.success, "scan failed: {:?}", outcome.error);
    assert_eq!(outcome.frames_captured, 36);
    assert!(outcome.output_path.starts_with(output.path()));
    assert!(outcome.scan_id.is_none());

    // Every frame file exists, zero-indexed.
    for frame in 0..36 {
        let path = outcome.output_path.join(format!("frame_{frame:03}.png"));
        assert!(path.is_file(), "missing {}", path.display());
    }

    // The stage is back at home within tolerance.
    let status = scanner.status().await;
    assert!(status.initialized);
    assert!(status.position.rem_euclid(360.0) < 1e-6);

    // Progress events were emitted in order, one per frame, zero-indexed.
    let mut progress = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ScanEvent::Progress(p) = event {
            progress.push(p);
        }
    }
    assert_eq!(progress.len(), 36);
    for (i, p) in progress.iter().enumerate() {
        assert_eq!(p.frame_number, i as u32);
        assert_eq!(p.total_frames, 36);
        assert!(p.position >= 0.0 && p.position < 360.0);
    }

    scanner.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_scan_is_repeatable_from_ready() {
    let output = tempfile::tempdir().unwrap();
    let mut scanner = scanner();
    scanner.initialize(session(4, output.path())).await.unwrap();

    let first = scanner.scan().await;
    let second = scanner.scan().await;
    assert!(first.success);
    assert!(second.success);
    assert_ne!(first.output_path, second.output_path);

    scanner.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_scan_with_metadata_creates_one_record_with_all_frames() {
    let output = tempfile::tempdir().unwrap();
    let store = MemoryScanStore::new();
    let mut scanner = scanner().with_store(Arc::new(store.clone()));

    let session = session(12, output.path()).with_record(record_meta());
    scanner.initialize(session).await.unwrap();

    let outcome = scanner.scan().await;
    assert!(outcome.success, "scan failed: {:?}", outcome.error);

    let scans = store.scans();
    assert_eq!(scans.len(), 1);
    assert_eq!(outcome.scan_id, Some(scans[0].id));
    assert_eq!(scans[0].scan.frame_count, 12);
    assert_eq!(scans[0].scan.meta, record_meta());
    assert_eq!(scans[0].frames.len(), 12);
    for (i, frame) in scans[0].frames.iter().enumerate() {
        assert_eq!(frame.frame_index, i as u32);
        assert!(frame.path.is_file());
    }

    scanner.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_scan_without_metadata_leaves_no_record() {
    let output = tempfile::tempdir().unwrap();
    let store = MemoryScanStore::new();
    let mut scanner = scanner().with_store(Arc::new(store.clone()));

    scanner.initialize(session(4, output.path())).await.unwrap();
    let outcome = scanner.scan().await;

    assert!(outcome.success);
    assert!(outcome.scan_id.is_none());
    assert!(store.scans().is_empty());
    // Files are still on disk.
    assert!(outcome.output_path.join("frame_000.png").is_file());

    scanner.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_persistence_failure_is_distinct_and_keeps_files() {
    let output = tempfile::tempdir().unwrap();
    let store = MemoryScanStore::new();
    let mut scanner = scanner().with_store(Arc::new(store.clone()));

    let session = session(6, output.path()).with_record(record_meta());
    scanner.initialize(session).await.unwrap();

    store.inject_next_failure();
    let outcome = scanner.scan().await;

    // Capture succeeded; persistence did not. The two are distinguishable.
    assert!(!outcome.success);
    assert_eq!(outcome.frames_captured, 6);
    assert!(matches!(outcome.error, Some(ScanError::Persistence(_))));
    assert!(outcome.scan_id.is_none());
    assert!(store.scans().is_empty());

    // Captured files are never deleted by the orchestrator.
    for frame in 0..6 {
        assert!(outcome
            .output_path
            .join(format!("frame_{frame:03}.png"))
            .is_file());
    }

    scanner.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cleanup_returns_scanner_to_uninitialized() {
    let output = tempfile::tempdir().unwrap();
    let mut scanner = scanner();
    scanner.initialize(session(4, output.path())).await.unwrap();

    let outcome = scanner.cleanup().await.unwrap();
    assert!(outcome.success);
    assert!(!outcome.initialized);
    assert_eq!(scanner.state(), ScannerState::Uninitialized);

    // Cleanup again: idempotent no-op.
    let outcome = scanner.cleanup().await.unwrap();
    assert!(outcome.success);
    assert!(!outcome.initialized);

    // A new session can be initialized afterwards.
    scanner.initialize(session(4, output.path())).await.unwrap();
    assert_eq!(scanner.state(), ScannerState::Ready);
    scanner.shutdown().await.unwrap();
}
