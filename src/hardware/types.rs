//! Device settings and typed worker response payloads.
//!
//! Field names follow the worker's wire contract exactly — the structs here
//! serialize straight into the `settings` object of a device command and
//! deserialize straight out of `DATA` payloads.

use serde::{Deserialize, Serialize};

use crate::error::{AppResult, ScanError};

/// Imaging device configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraSettings {
    /// IP address of the camera (e.g. "10.0.0.23").
    pub camera_ip_address: String,
    /// Exposure time in microseconds.
    pub exposure_time: f64,
    /// Raw gain value.
    pub gain: f64,
    #[serde(default = "defaults::gamma")]
    pub gamma: f64,
    #[serde(default = "defaults::num_frames")]
    pub num_frames: u32,
    #[serde(default = "defaults::camera_seconds_per_rot")]
    pub seconds_per_rot: f64,
    /// Not supported on all cameras.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<f64>,
    /// Not supported on all cameras.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contrast: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            camera_ip_address: "10.0.0.23".to_string(),
            exposure_time: 10_000.0,
            gain: 0.0,
            gamma: defaults::gamma(),
            num_frames: defaults::num_frames(),
            seconds_per_rot: defaults::camera_seconds_per_rot(),
            brightness: None,
            contrast: None,
            width: None,
            height: None,
        }
    }
}

impl CameraSettings {
    pub fn validate(&self) -> AppResult<()> {
        if self.camera_ip_address.is_empty() {
            return Err(ScanError::InvalidSettings(
                "camera_ip_address cannot be empty".into(),
            ));
        }
        if self.exposure_time <= 0.0 {
            return Err(ScanError::InvalidSettings(format!(
                "exposure_time must be positive, got {}",
                self.exposure_time
            )));
        }
        if self.num_frames == 0 {
            return Err(ScanError::InvalidSettings("num_frames must be positive".into()));
        }
        Ok(())
    }
}

/// A partial camera reconfiguration. Only the populated fields are sent.
#[derive(Clone, Debug, Default, Serialize)]
pub struct CameraAdjustments {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exposure_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gain: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gamma: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contrast: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// Rotation stage configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurntableSettings {
    /// DAQ device name (e.g. "cDAQ1Mod1").
    pub device_name: String,
    #[serde(default = "defaults::sampling_rate")]
    pub sampling_rate: u32,
    /// Digital output line for the stepper step signal.
    #[serde(default)]
    pub step_pin: u32,
    /// Digital output line for the stepper direction signal.
    #[serde(default = "defaults::dir_pin")]
    pub dir_pin: u32,
    /// Steps for one full 360 degree rotation.
    #[serde(default = "defaults::steps_per_revolution")]
    pub steps_per_revolution: u32,
    #[serde(default = "defaults::num_frames")]
    pub num_frames: u32,
    #[serde(default = "defaults::turntable_seconds_per_rot")]
    pub seconds_per_rot: f64,
}

impl Default for TurntableSettings {
    fn default() -> Self {
        Self {
            device_name: "cDAQ1Mod1".to_string(),
            sampling_rate: defaults::sampling_rate(),
            step_pin: 0,
            dir_pin: defaults::dir_pin(),
            steps_per_revolution: defaults::steps_per_revolution(),
            num_frames: defaults::num_frames(),
            seconds_per_rot: defaults::turntable_seconds_per_rot(),
        }
    }
}

impl TurntableSettings {
    pub fn validate(&self) -> AppResult<()> {
        if self.sampling_rate == 0 {
            return Err(ScanError::InvalidSettings("sampling_rate must be positive".into()));
        }
        if self.steps_per_revolution == 0 {
            return Err(ScanError::InvalidSettings(
                "steps_per_revolution must be positive".into(),
            ));
        }
        if self.num_frames == 0 {
            return Err(ScanError::InvalidSettings("num_frames must be positive".into()));
        }
        if self.seconds_per_rot <= 0.0 {
            return Err(ScanError::InvalidSettings(format!(
                "seconds_per_rot must be positive, got {}",
                self.seconds_per_rot
            )));
        }
        if self.step_pin == self.dir_pin {
            return Err(ScanError::InvalidSettings(format!(
                "step_pin and dir_pin must be different, both are {}",
                self.step_pin
            )));
        }
        Ok(())
    }
}

mod defaults {
    pub fn gamma() -> f64 {
        1.0
    }
    pub fn num_frames() -> u32 {
        72
    }
    pub fn camera_seconds_per_rot() -> f64 {
        36.0
    }
    pub fn turntable_seconds_per_rot() -> f64 {
        7.0
    }
    pub fn sampling_rate() -> u32 {
        40_000
    }
    pub fn dir_pin() -> u32 {
        1
    }
    pub fn steps_per_revolution() -> u32 {
        6400
    }
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Camera `status` payload.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct CameraStatus {
    pub connected: bool,
    #[serde(rename = "mock", default)]
    pub is_simulated: bool,
    #[serde(default)]
    pub available: bool,
}

/// Turntable `status` payload.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct TurntableStatus {
    pub initialized: bool,
    #[serde(default)]
    pub position: f64,
    #[serde(rename = "mock", default)]
    pub is_simulated: bool,
    #[serde(default)]
    pub available: bool,
}

/// Library/device availability for one hardware domain, from `check_hardware`.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct DeviceAvailability {
    #[serde(default)]
    pub library_available: bool,
    #[serde(default)]
    pub devices_found: u32,
    #[serde(default)]
    pub available: bool,
}

/// Full `check_hardware` payload.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct HardwareStatus {
    #[serde(default)]
    pub camera: DeviceAvailability,
    #[serde(default)]
    pub daq: DeviceAvailability,
}

/// One detected physical device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    /// Hardware domain ("camera" or "daq").
    pub kind: &'static str,
    /// Enumeration index on the bus.
    pub index: u32,
}

/// A captured frame after payload decoding.
#[derive(Clone, Debug)]
pub struct CapturedFrame {
    /// Decoded PNG bytes.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Direction for discrete stepping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepDirection {
    Clockwise,
    CounterClockwise,
}

impl StepDirection {
    /// Wire encoding: 1 = clockwise, -1 = counter-clockwise.
    pub fn as_i8(self) -> i8 {
        match self {
            StepDirection::Clockwise => 1,
            StepDirection::CounterClockwise => -1,
        }
    }
}
