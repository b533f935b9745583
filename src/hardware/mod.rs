//! Typed device adapters layered over the worker protocol.
//!
//! An adapter owns nothing but a [`WorkerClient`] handle: it builds typed
//! commands, awaits the correlated `DATA` payload, and deserializes it into a
//! response struct. A payload whose `success` flag is false becomes a typed
//! [`ScanError::Operation`] value — adapters never panic on hardware refusal.

pub mod camera;
pub mod turntable;
pub mod types;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{AppResult, ScanError};
use crate::protocol::{Command, CommandDomain};
use crate::worker::WorkerClient;

pub use camera::CameraController;
pub use turntable::TurntableController;
pub use types::{
    CameraAdjustments, CameraSettings, CameraStatus, CapturedFrame, DeviceAvailability,
    DeviceDescriptor, HardwareStatus, StepDirection, TurntableSettings, TurntableStatus,
};

/// Deserialize a `DATA` payload, mapping `success: false` to a typed failure.
pub(crate) fn decode_reply<T: DeserializeOwned>(value: Value) -> AppResult<T> {
    if value.get("success").and_then(Value::as_bool) == Some(false) {
        let message = value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("operation failed")
            .to_string();
        return Err(ScanError::Operation(message));
    }
    serde_json::from_value(value).map_err(|e| ScanError::Decode(e.to_string()))
}

/// Liveness probe; returns the worker's reply message.
pub async fn ping(worker: &WorkerClient) -> AppResult<String> {
    let value = worker.send(&Command::bare(CommandDomain::Ping)).await?;
    Ok(value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("pong")
        .to_string())
}

/// Query the worker's own version string.
pub async fn worker_version(worker: &WorkerClient) -> AppResult<String> {
    let value = worker
        .send(&Command::bare(CommandDomain::GetVersion))
        .await?;
    value
        .get("version")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ScanError::Decode("version payload missing 'version'".into()))
}

/// Enumerate hardware libraries and attached devices.
pub async fn check_hardware(worker: &WorkerClient) -> AppResult<types::HardwareStatus> {
    let value = worker
        .send(&Command::bare(CommandDomain::CheckHardware))
        .await?;
    serde_json::from_value(value).map_err(|e| ScanError::Decode(e.to_string()))
}
