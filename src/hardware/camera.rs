//! Imaging adapter.
//!
//! Wraps the worker's `camera` command domain. Capture is request/response;
//! streaming is push-based — once started, the worker emits unsolicited
//! `Frame` events which subscribers pick up via [`CameraController::frames`]
//! without touching command correlation.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{AppResult, ScanError};
use crate::hardware::decode_reply;
use crate::hardware::types::{
    CameraAdjustments, CameraSettings, CameraStatus, CapturedFrame, DeviceDescriptor,
};
use crate::protocol::{Command, CommandDomain};
use crate::worker::{WorkerClient, WorkerEvent};

#[derive(Debug, Deserialize)]
struct ConnectReply {
    connected: bool,
}

#[derive(Debug, Deserialize)]
struct ConfigureReply {
    configured: bool,
}

#[derive(Debug, Deserialize)]
struct StreamReply {
    streaming: bool,
}

#[derive(Debug, Deserialize)]
struct CaptureReply {
    image: String,
    width: u32,
    height: u32,
}

/// Typed operation surface for the imaging device.
pub struct CameraController {
    worker: WorkerClient,
}

impl CameraController {
    pub fn new(worker: WorkerClient) -> Self {
        Self { worker }
    }

    /// Open the camera with the given settings.
    pub async fn connect(&self, settings: &CameraSettings) -> AppResult<bool> {
        settings.validate()?;
        let command = Command::action(CommandDomain::Camera, "connect")
            .with_serialized("settings", settings)?;
        let reply: ConnectReply = decode_reply(self.worker.send(&command).await?)?;
        Ok(reply.connected)
    }

    /// Close the camera. Returns true once the worker reports it released.
    pub async fn disconnect(&self) -> AppResult<bool> {
        let command = Command::action(CommandDomain::Camera, "disconnect");
        let reply: ConnectReply = decode_reply(self.worker.send(&command).await?)?;
        Ok(!reply.connected)
    }

    /// Apply a partial reconfiguration to the connected camera.
    pub async fn configure(&self, adjustments: &CameraAdjustments) -> AppResult<bool> {
        let command = Command::action(CommandDomain::Camera, "configure")
            .with_serialized("settings", adjustments)?;
        let reply: ConfigureReply = decode_reply(self.worker.send(&command).await?)?;
        Ok(reply.configured)
    }

    /// Capture one frame and decode its payload.
    ///
    /// Settings are optional: a connected camera captures with its current
    /// configuration.
    pub async fn capture(&self, settings: Option<&CameraSettings>) -> AppResult<CapturedFrame> {
        let mut command = Command::action(CommandDomain::Camera, "capture");
        if let Some(settings) = settings {
            command = command.with_serialized("settings", settings)?;
        }
        let reply: CaptureReply = decode_reply(self.worker.send(&command).await?)?;
        let data = decode_frame_payload(&reply.image)?;
        debug!(
            width = reply.width,
            height = reply.height,
            bytes = data.len(),
            "captured frame"
        );
        Ok(CapturedFrame {
            data,
            width: reply.width,
            height: reply.height,
        })
    }

    pub async fn status(&self) -> AppResult<CameraStatus> {
        let command = Command::action(CommandDomain::Camera, "status");
        decode_reply(self.worker.send(&command).await?)
    }

    /// Start push-based streaming; frames arrive as [`WorkerEvent::Frame`].
    pub async fn start_stream(&self, settings: Option<&CameraSettings>) -> AppResult<bool> {
        let mut command = Command::action(CommandDomain::Camera, "start_stream");
        if let Some(settings) = settings {
            command = command.with_serialized("settings", settings)?;
        }
        let reply: StreamReply = decode_reply(self.worker.send(&command).await?)?;
        Ok(reply.streaming)
    }

    pub async fn stop_stream(&self) -> AppResult<bool> {
        let command = Command::action(CommandDomain::Camera, "stop_stream");
        let reply: StreamReply = decode_reply(self.worker.send(&command).await?)?;
        Ok(!reply.streaming)
    }

    /// Subscribe to unsolicited worker events; streaming frames arrive as
    /// [`WorkerEvent::Frame`] alongside trigger and image-path notifications.
    pub fn frames(&self) -> broadcast::Receiver<WorkerEvent> {
        self.worker.subscribe()
    }

    /// Enumerate attached imaging devices.
    pub async fn detect_devices(&self) -> AppResult<Vec<DeviceDescriptor>> {
        let status = super::check_hardware(&self.worker).await?;
        Ok((0..status.camera.devices_found)
            .map(|index| DeviceDescriptor {
                kind: "camera",
                index,
            })
            .collect())
    }

    /// Hardware trigger arming is a known capability gap of this camera
    /// backend, reported distinctly from transient failures.
    pub async fn arm_trigger(&self) -> AppResult<()> {
        Err(ScanError::NotSupported("camera hardware trigger"))
    }
}

/// Decode a frame payload, tolerating either a bare base64 string or a
/// `data:image/png;base64,` URI.
pub fn decode_frame_payload(payload: &str) -> AppResult<Vec<u8>> {
    let encoded = payload
        .rsplit_once("base64,")
        .map(|(_, tail)| tail)
        .unwrap_or(payload);
    BASE64
        .decode(encoded.trim())
        .map_err(|e| ScanError::Decode(format!("invalid frame payload: {e}")))
}
