//! Shared helpers for integration tests: a worker configuration pointing at
//! the real `mock_worker` binary, and session builders.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use cylscan::config::WorkerConfig;
use cylscan::hardware::types::{CameraSettings, TurntableSettings};
use cylscan::scanner::{ScanRecordMeta, ScanSession, ScanSettings};

pub fn worker_config() -> WorkerConfig {
    WorkerConfig {
        executable: PathBuf::from(env!("CARGO_BIN_EXE_mock_worker")),
        command_timeout: Duration::from_secs(5),
        restart_delay: Duration::from_millis(50),
        ..WorkerConfig::default()
    }
}

pub fn worker_config_with_env(vars: &[(&str, &str)]) -> WorkerConfig {
    let mut config = worker_config();
    for (key, value) in vars {
        config.env.insert((*key).to_string(), (*value).to_string());
    }
    config
}

pub fn session(num_frames: u32, output_dir: &Path) -> ScanSession {
    ScanSession::new(ScanSettings {
        camera: CameraSettings::default(),
        turntable: TurntableSettings::default(),
        num_frames,
        output_dir: output_dir.to_path_buf(),
    })
}

pub fn record_meta() -> ScanRecordMeta {
    ScanRecordMeta {
        experiment_id: 7,
        phenotyper_id: 2,
        plant_barcode: "BC-0042".to_string(),
        accession_name: "Col-0".to_string(),
        plant_age_days: 21,
        wave_number: 1,
    }
}
