//! Decoded inbound protocol messages.
//!
//! Every line the worker emits is classified into exactly one variant of
//! [`ProtocolMessage`]. The set is closed and subscribers match it
//! exhaustively, so a newly added message kind is a compile-time obligation
//! for every consumer rather than a silently ignored string.

use std::path::PathBuf;

/// One decoded line from the worker's stdout.
///
/// Generic kinds (`Status`, `Error`, `Data`, `Raw`) participate in command
/// correlation and logging; the remaining kinds are unsolicited domain events
/// emitted by the imaging and rotation hardware.
#[derive(Clone, Debug, PartialEq)]
pub enum ProtocolMessage {
    /// `STATUS:<text>` progress chatter. The startup handshake is a status
    /// line containing the token "ready".
    Status(String),
    /// `ERROR:<text>` — rejects the pending command, if any.
    Error(String),
    /// `DATA:<json>` — resolves the pending command.
    Data(serde_json::Value),
    /// `FRAME:<data-uri>`, `IMAGE:<payload>` or `IMAGE <payload>` — a pushed
    /// image payload, outside command correlation.
    Frame(String),
    /// `IMAGE_PATH <path>` — the worker wrote a frame file itself.
    ImagePath(PathBuf),
    /// `TRIGGER_CAMERA` — the rotation side requested a capture.
    Trigger,
    /// `DAQ_POSITION <degrees>` — stage position report.
    PositionChanged(f64),
    /// `DAQ_HOME` — the stage reached its home position.
    Homed,
    /// `DAQ_INITIALIZED` — the stage finished hardware initialization.
    Initialized,
    /// A line matching no known prefix. Never dropped; surfaced for logging.
    Raw(String),
}

impl ProtocolMessage {
    /// True for the message kinds that terminate a pending command.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProtocolMessage::Data(_) | ProtocolMessage::Error(_))
    }
}
