//! In-memory scan store for tests.
//!
//! Holds everything under one lock so the create is trivially atomic, and
//! supports one-shot failure injection to exercise the orchestrator's
//! persistence-failure path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{AppResult, ScanError};
use crate::storage::{validate_frames, FrameRecord, ScanRecord, ScanStore};

/// One fully persisted scan.
#[derive(Clone, Debug)]
pub struct StoredScan {
    pub id: Uuid,
    pub scan: ScanRecord,
    pub frames: Vec<FrameRecord>,
}

#[derive(Clone, Default)]
pub struct MemoryScanStore {
    scans: Arc<Mutex<Vec<StoredScan>>>,
    fail_next: Arc<AtomicBool>,
}

impl MemoryScanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next create fail without writing anything.
    pub fn inject_next_failure(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Snapshot of everything persisted so far.
    pub fn scans(&self) -> Vec<StoredScan> {
        self.scans.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ScanStore for MemoryScanStore {
    async fn create_scan_with_images(
        &self,
        scan: &ScanRecord,
        frames: &[FrameRecord],
    ) -> AppResult<Uuid> {
        validate_frames(scan, frames)?;

        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ScanError::Persistence("injected store failure".into()));
        }

        let id = Uuid::new_v4();
        let mut scans = self.scans.lock().unwrap_or_else(|e| e.into_inner());
        scans.push(StoredScan {
            id,
            scan: scan.clone(),
            frames: frames.to_vec(),
        });
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::{sample_frames, sample_record};

    #[tokio::test]
    async fn test_create_persists_scan_and_frames_together() {
        let store = MemoryScanStore::new();
        let id = store
            .create_scan_with_images(&sample_record(3), &sample_frames(3))
            .await
            .unwrap();

        let scans = store.scans();
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0].id, id);
        assert_eq!(scans[0].frames.len(), 3);
    }

    #[tokio::test]
    async fn test_injected_failure_writes_nothing() {
        let store = MemoryScanStore::new();
        store.inject_next_failure();

        let err = store
            .create_scan_with_images(&sample_record(3), &sample_frames(3))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Persistence(_)));
        assert!(store.scans().is_empty());

        // Failure is consumed; the retry succeeds.
        store
            .create_scan_with_images(&sample_record(3), &sample_frames(3))
            .await
            .unwrap();
        assert_eq!(store.scans().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_frame_list_writes_nothing() {
        let store = MemoryScanStore::new();
        let err = store
            .create_scan_with_images(&sample_record(3), &sample_frames(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Persistence(_)));
        assert!(store.scans().is_empty());
    }
}
