//! Scan session configuration and persistence metadata.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{AppResult, ScanError};
use crate::hardware::types::{CameraSettings, TurntableSettings};

/// Everything needed to run one scan: device settings plus workflow knobs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanSettings {
    pub camera: CameraSettings,
    pub turntable: TurntableSettings,
    /// Frames per full rotation.
    pub num_frames: u32,
    /// Directory scans are written under.
    pub output_dir: PathBuf,
}

impl ScanSettings {
    /// Propagate the scan-level frame count into both device settings, the
    /// way the worker expects them to agree.
    pub fn reconcile(&mut self) {
        self.camera.num_frames = self.num_frames;
        self.turntable.num_frames = self.num_frames;
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.num_frames == 0 {
            return Err(ScanError::InvalidSettings("num_frames must be positive".into()));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(ScanError::InvalidSettings("output_dir cannot be empty".into()));
        }
        self.camera.validate()?;
        self.turntable.validate()
    }
}

/// Identifying metadata for the persisted scan record.
///
/// All fields are required: a record is either fully identified or not
/// created at all. Presentation layers holding partial data go through
/// [`ScanRecordMeta::from_fields`], which yields `None` unless every field is
/// present.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanRecordMeta {
    /// Owning experiment.
    pub experiment_id: i64,
    /// Instrument operator.
    pub phenotyper_id: i64,
    /// Scanned plant's barcode.
    pub plant_barcode: String,
    /// Accession the plant belongs to.
    pub accession_name: String,
    /// Plant age in days at scan time.
    pub plant_age_days: u32,
    /// Imaging wave this scan belongs to.
    pub wave_number: u32,
}

impl ScanRecordMeta {
    /// Assemble metadata from optional fields; `None` if any is missing.
    pub fn from_fields(
        experiment_id: Option<i64>,
        phenotyper_id: Option<i64>,
        plant_barcode: Option<String>,
        accession_name: Option<String>,
        plant_age_days: Option<u32>,
        wave_number: Option<u32>,
    ) -> Option<Self> {
        Some(Self {
            experiment_id: experiment_id?,
            phenotyper_id: phenotyper_id?,
            plant_barcode: plant_barcode?,
            accession_name: accession_name?,
            plant_age_days: plant_age_days?,
            wave_number: wave_number?,
        })
    }
}

/// One controller session: settings plus optional persistence metadata.
///
/// Without metadata the scan is legal — captured files stay on disk and no
/// database trace is created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanSession {
    pub settings: ScanSettings,
    #[serde(default)]
    pub record: Option<ScanRecordMeta>,
}

impl ScanSession {
    pub fn new(settings: ScanSettings) -> Self {
        Self {
            settings,
            record: None,
        }
    }

    pub fn with_record(mut self, record: ScanRecordMeta) -> Self {
        self.record = Some(record);
        self
    }
}
