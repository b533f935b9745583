//! File-backed scan store.
//!
//! Each scan becomes one JSON manifest next to the captured frames. The
//! manifest is written to a temporary name and renamed into place, so readers
//! either see a complete scan (record plus every frame row) or no scan at
//! all.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{AppResult, ScanError};
use crate::storage::{validate_frames, FrameRecord, ScanRecord, ScanStore};

/// Complete on-disk form of one persisted scan.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanManifest {
    pub id: Uuid,
    pub scan: ScanRecord,
    pub frames: Vec<FrameRecord>,
}

/// Writes one `scan-<id>.json` manifest per scan under a fixed directory.
#[derive(Clone, Debug)]
pub struct ManifestScanStore {
    dir: PathBuf,
}

impl ManifestScanStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn manifest_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("scan-{id}.json"))
    }

    /// Read a manifest back.
    pub async fn read(path: &Path) -> AppResult<ScanManifest> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ScanError::Persistence(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| ScanError::Persistence(format!("parse {}: {e}", path.display())))
    }

    /// List every manifest currently in the store directory.
    pub async fn list(&self) -> AppResult<Vec<ScanManifest>> {
        let mut manifests = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(manifests),
            Err(e) => return Err(ScanError::Persistence(format!("list store: {e}"))),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ScanError::Persistence(format!("list store: {e}")))?
        {
            let path = entry.path();
            let is_manifest = path.extension().is_some_and(|ext| ext == "json")
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("scan-"));
            if is_manifest {
                manifests.push(Self::read(&path).await?);
            }
        }
        Ok(manifests)
    }
}

#[async_trait]
impl ScanStore for ManifestScanStore {
    async fn create_scan_with_images(
        &self,
        scan: &ScanRecord,
        frames: &[FrameRecord],
    ) -> AppResult<Uuid> {
        validate_frames(scan, frames)?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ScanError::Persistence(format!("create store directory: {e}")))?;

        let id = Uuid::new_v4();
        let manifest = ScanManifest {
            id,
            scan: scan.clone(),
            frames: frames.to_vec(),
        };
        let text = serde_json::to_string_pretty(&manifest)
            .map_err(|e| ScanError::Persistence(format!("serialize manifest: {e}")))?;

        let final_path = self.manifest_path(id);
        let tmp_path = self.dir.join(format!(".scan-{id}.json.tmp"));
        tokio::fs::write(&tmp_path, text.as_bytes())
            .await
            .map_err(|e| ScanError::Persistence(format!("write manifest: {e}")))?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(ScanError::Persistence(format!("publish manifest: {e}")));
        }

        info!(%id, path = %final_path.display(), "scan record persisted");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::{sample_frames, sample_record};

    #[tokio::test]
    async fn test_manifest_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestScanStore::new(dir.path());

        let record = sample_record(4);
        let frames = sample_frames(4);
        let id = store
            .create_scan_with_images(&record, &frames)
            .await
            .unwrap();

        let manifest = ManifestScanStore::read(&store.manifest_path(id)).await.unwrap();
        assert_eq!(manifest.id, id);
        assert_eq!(manifest.scan, record);
        assert_eq!(manifest.frames, frames);
    }

    #[tokio::test]
    async fn test_no_partial_manifest_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestScanStore::new(dir.path());

        // Invalid frame list fails before anything touches the filesystem.
        let err = store
            .create_scan_with_images(&sample_record(4), &sample_frames(3))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Persistence(_)));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_finds_all_manifests() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestScanStore::new(dir.path());
        for _ in 0..3 {
            store
                .create_scan_with_images(&sample_record(2), &sample_frames(2))
                .await
                .unwrap();
        }
        assert_eq!(store.list().await.unwrap().len(), 3);
    }
}
