//! Transactional scan-record persistence.
//!
//! The persisted store is touched only by the orchestrator, through one
//! operation: create a scan record together with its ordered per-frame image
//! records, atomically. A scan is never observable with a partial image set.
//! The production database lives behind this trait; this crate ships a
//! file-backed manifest store and an in-memory store for tests.

pub mod manifest;
pub mod memory;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppResult, ScanError};
use crate::scanner::session::ScanRecordMeta;

pub use manifest::ManifestScanStore;
pub use memory::MemoryScanStore;

/// The scan row: identifying metadata plus capture facts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    #[serde(flatten)]
    pub meta: ScanRecordMeta,
    pub captured_at: DateTime<Utc>,
    pub frame_count: u32,
    pub output_path: PathBuf,
}

/// One per-frame image row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    /// Zero-based frame index; indices must be contiguous from 0.
    pub frame_index: u32,
    /// Turntable position at capture time, degrees in `[0, 360)`.
    pub angle_degrees: f64,
    pub path: PathBuf,
}

/// Atomic "create scan with images" contract.
#[async_trait]
pub trait ScanStore: Send + Sync {
    /// Create the scan record and all frame records together, returning the
    /// new scan identifier. Either everything is written or nothing is.
    async fn create_scan_with_images(
        &self,
        scan: &ScanRecord,
        frames: &[FrameRecord],
    ) -> AppResult<Uuid>;
}

/// Enforce the frame numbering convention at the persistence boundary:
/// zero-based, contiguous, and matching the record's frame count.
pub(crate) fn validate_frames(scan: &ScanRecord, frames: &[FrameRecord]) -> AppResult<()> {
    if frames.len() as u32 != scan.frame_count {
        return Err(ScanError::Persistence(format!(
            "frame list length {} does not match frame_count {}",
            frames.len(),
            scan.frame_count
        )));
    }
    for (expected, frame) in frames.iter().enumerate() {
        if frame.frame_index != expected as u32 {
            return Err(ScanError::Persistence(format!(
                "frame indices must be contiguous from 0; found {} at position {}",
                frame.frame_index, expected
            )));
        }
    }
    Ok(())
}
