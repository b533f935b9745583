//! Rotation adapter.
//!
//! Wraps the worker's `daq` command domain for the stepper-driven turntable.
//! Positions reported by the worker are re-normalized into `[0, 360)` on
//! receipt; positive rotation is clockwise and relative rotations accumulate
//! modulo 360.

use serde::Deserialize;

use crate::error::{AppResult, ScanError};
use crate::hardware::decode_reply;
use crate::hardware::types::{StepDirection, TurntableSettings, TurntableStatus};
use crate::protocol::{Command, CommandDomain};
use crate::worker::WorkerClient;

#[derive(Debug, Deserialize)]
struct InitReply {
    initialized: bool,
}

#[derive(Debug, Deserialize)]
struct PositionReply {
    position: f64,
}

/// Normalize an angle into `[0, 360)`.
pub fn normalize_degrees(degrees: f64) -> f64 {
    degrees.rem_euclid(360.0)
}

/// Typed operation surface for the rotation stage.
pub struct TurntableController {
    worker: WorkerClient,
}

impl TurntableController {
    pub fn new(worker: WorkerClient) -> Self {
        Self { worker }
    }

    /// Bring up the stage hardware. Returns the reported initialized flag.
    pub async fn initialize(&self, settings: &TurntableSettings) -> AppResult<bool> {
        settings.validate()?;
        let command = Command::action(CommandDomain::Daq, "initialize")
            .with_serialized("settings", settings)?;
        let reply: InitReply = decode_reply(self.worker.send(&command).await?)?;
        Ok(reply.initialized)
    }

    /// Release the stage. Returns the reported initialized flag (false).
    pub async fn cleanup(&self) -> AppResult<bool> {
        let command = Command::action(CommandDomain::Daq, "cleanup");
        let reply: InitReply = decode_reply(self.worker.send(&command).await?)?;
        Ok(reply.initialized)
    }

    /// Rotate by a relative angle; positive is clockwise. Returns the new
    /// absolute position in `[0, 360)`.
    pub async fn rotate(&self, degrees: f64) -> AppResult<f64> {
        let command = Command::action(CommandDomain::Daq, "rotate").with("degrees", degrees);
        let reply: PositionReply = decode_reply(self.worker.send(&command).await?)?;
        Ok(normalize_degrees(reply.position))
    }

    /// Execute a discrete number of steps. Returns the new position.
    pub async fn step(&self, num_steps: u32, direction: StepDirection) -> AppResult<f64> {
        let command = Command::action(CommandDomain::Daq, "step")
            .with("num_steps", num_steps)
            .with("direction", direction.as_i8());
        let reply: PositionReply = decode_reply(self.worker.send(&command).await?)?;
        Ok(normalize_degrees(reply.position))
    }

    /// Return to the zero position. Yields 0 regardless of prior position.
    pub async fn home(&self) -> AppResult<f64> {
        let command = Command::action(CommandDomain::Daq, "home");
        let reply: PositionReply = decode_reply(self.worker.send(&command).await?)?;
        Ok(normalize_degrees(reply.position))
    }

    pub async fn status(&self) -> AppResult<TurntableStatus> {
        let command = Command::action(CommandDomain::Daq, "status");
        let mut status: TurntableStatus = decode_reply(self.worker.send(&command).await?)?;
        status.position = normalize_degrees(status.position);
        Ok(status)
    }

    /// Continuous position streaming is a known capability gap of the DAQ
    /// backend; poll [`TurntableController::status`] instead.
    pub async fn stream_positions(&self) -> AppResult<()> {
        Err(ScanError::NotSupported("turntable position streaming"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_degrees() {
        assert_eq!(normalize_degrees(0.0), 0.0);
        assert_eq!(normalize_degrees(360.0), 0.0);
        assert_eq!(normalize_degrees(365.0), 5.0);
        assert_eq!(normalize_degrees(-5.0), 355.0);
        assert_eq!(normalize_degrees(-365.0), 355.0);
        assert!((normalize_degrees(722.5) - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_rotations_accumulate_modulo_360() {
        // rotate(d1); rotate(d2) == (d1 + d2) mod 360
        let mut position = 0.0;
        for delta in [90.0, 275.0, -10.0, 123.4] {
            position = normalize_degrees(position + delta);
        }
        let direct = normalize_degrees(90.0 + 275.0 - 10.0 + 123.4);
        assert!((position - direct).abs() < 1e-9);
    }

    #[test]
    fn test_step_direction_wire_encoding() {
        assert_eq!(StepDirection::Clockwise.as_i8(), 1);
        assert_eq!(StepDirection::CounterClockwise.as_i8(), -1);
    }
}
