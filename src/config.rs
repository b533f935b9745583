//! Configuration system using Figment.
//!
//! Settings are loaded in three layers, later layers overriding earlier ones:
//!
//! 1. Built-in defaults
//! 2. `cylscan.toml` (or an explicit file passed on the command line)
//! 3. Environment variables prefixed with `CYLSCAN_`, using `__` as the
//!    section separator:
//!
//! ```text
//! CYLSCAN_WORKER__EXECUTABLE=/opt/bloom/worker
//! CYLSCAN_SCAN__NUM_FRAMES=36
//! CYLSCAN_WORKER__COMMAND_TIMEOUT=10s
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::hardware::types::{CameraSettings, TurntableSettings};

pub const DEFAULT_CONFIG_FILE: &str = "cylscan.toml";
const ENV_PREFIX: &str = "CYLSCAN_";

/// Top-level application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub camera: CameraSettings,
    #[serde(default)]
    pub turntable: TurntableSettings,
}

/// Worker process invocation and protocol timing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Path to the hardware worker executable.
    pub executable: PathBuf,
    /// Arguments selecting the worker's long-lived stdio mode.
    #[serde(default = "defaults::worker_args")]
    pub args: Vec<String>,
    /// How long to wait for the ready status line after spawning.
    #[serde(with = "humantime_serde", default = "defaults::startup_timeout")]
    pub startup_timeout: Duration,
    /// How long a correlated command may wait for its terminal message.
    #[serde(with = "humantime_serde", default = "defaults::command_timeout")]
    pub command_timeout: Duration,
    /// Pause between stop and start during a restart.
    #[serde(with = "humantime_serde", default = "defaults::restart_delay")]
    pub restart_delay: Duration,
    /// Ask the worker to simulate hardware instead of driving real devices.
    #[serde(default = "defaults::use_mock_hardware")]
    pub use_mock_hardware: bool,
    /// Extra environment variables for the worker process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("bloom-hardware"),
            args: defaults::worker_args(),
            startup_timeout: defaults::startup_timeout(),
            command_timeout: defaults::command_timeout(),
            restart_delay: defaults::restart_delay(),
            use_mock_hardware: defaults::use_mock_hardware(),
            env: BTreeMap::new(),
        }
    }
}

/// Scan workflow configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Directory scans are written under; each scan gets its own subdirectory.
    #[serde(default = "defaults::output_dir")]
    pub output_dir: PathBuf,
    /// Frames per full rotation.
    #[serde(default = "defaults::num_frames")]
    pub num_frames: u32,
    /// Mechanical settling delay between rotation and capture.
    #[serde(with = "humantime_serde", default = "defaults::settle")]
    pub settle: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            output_dir: defaults::output_dir(),
            num_frames: defaults::num_frames(),
            settle: defaults::settle(),
        }
    }
}

impl Settings {
    /// Load configuration from defaults, an optional TOML file, and the
    /// environment.
    pub fn load(config_file: Option<&Path>) -> AppResult<Self> {
        let file = config_file
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Semantic validation beyond what parsing can catch.
    pub fn validate(&self) -> AppResult<()> {
        use crate::error::ScanError;

        if self.worker.executable.as_os_str().is_empty() {
            return Err(ScanError::InvalidSettings(
                "worker.executable cannot be empty".into(),
            ));
        }
        if self.worker.startup_timeout.is_zero() || self.worker.command_timeout.is_zero() {
            return Err(ScanError::InvalidSettings(
                "worker timeouts must be positive".into(),
            ));
        }
        if self.scan.num_frames == 0 {
            return Err(ScanError::InvalidSettings(
                "scan.num_frames must be positive".into(),
            ));
        }
        if self.scan.output_dir.as_os_str().is_empty() {
            return Err(ScanError::InvalidSettings(
                "scan.output_dir cannot be empty".into(),
            ));
        }
        self.camera.validate()?;
        self.turntable.validate()?;
        Ok(())
    }
}

mod defaults {
    use std::path::PathBuf;
    use std::time::Duration;

    pub fn worker_args() -> Vec<String> {
        vec!["--ipc".to_string()]
    }
    pub fn startup_timeout() -> Duration {
        Duration::from_secs(5)
    }
    pub fn command_timeout() -> Duration {
        Duration::from_secs(30)
    }
    pub fn restart_delay() -> Duration {
        Duration::from_millis(500)
    }
    pub fn use_mock_hardware() -> bool {
        true
    }
    pub fn output_dir() -> PathBuf {
        PathBuf::from("./scans")
    }
    pub fn num_frames() -> u32 {
        72
    }
    pub fn settle() -> Duration {
        Duration::from_millis(50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.worker.args, vec!["--ipc".to_string()]);
        assert_eq!(settings.worker.startup_timeout, Duration::from_secs(5));
        assert_eq!(settings.worker.command_timeout, Duration::from_secs(30));
        assert_eq!(settings.scan.num_frames, 72);
    }

    #[test]
    fn test_zero_frames_rejected() {
        let mut settings = Settings::default();
        settings.scan.num_frames = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let settings = Settings::default();
        let text = toml_text(&settings);
        let parsed: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::string(&text))
            .extract()
            .unwrap();
        assert_eq!(parsed.scan.num_frames, settings.scan.num_frames);
        assert_eq!(parsed.worker.executable, settings.worker.executable);
    }

    fn toml_text(settings: &Settings) -> String {
        format!(
            "[worker]\nexecutable = \"{}\"\n\n[scan]\nnum_frames = {}\n",
            settings.worker.executable.display(),
            settings.scan.num_frames
        )
    }
}
