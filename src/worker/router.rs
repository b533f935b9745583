//! Classification of decoded messages into correlation traffic and events.
//!
//! `Data` and `Error` lines are terminal messages for the pending command;
//! everything else is an unsolicited event pushed to subscribers. The match is
//! exhaustive over [`ProtocolMessage`], so adding a message kind forces a
//! routing decision here.

use std::path::PathBuf;

use serde_json::Value;

use crate::protocol::ProtocolMessage;

/// An unsolicited worker event, broadcast to all subscribers.
#[derive(Clone, Debug)]
pub enum WorkerEvent {
    /// Progress chatter from the worker.
    Status(String),
    /// A pushed frame payload (streaming mode).
    Frame(String),
    /// The worker wrote a frame file itself.
    ImagePath(PathBuf),
    /// The rotation side requested a capture.
    Trigger,
    /// Stage position report in degrees.
    PositionChanged(f64),
    /// Stage reached home.
    Homed,
    /// Stage hardware finished initialization.
    Initialized,
    /// Unrecognized line, surfaced for logging.
    Raw(String),
    /// The worker's stdout reached end of stream.
    Closed,
    /// The worker process terminated; emitted by the supervisor's monitor.
    Exited { code: Option<i32> },
}

/// A message that terminates the command currently in flight.
#[derive(Debug)]
pub enum TerminalMessage {
    Data(Value),
    Error(String),
    /// The stream ended; no further terminal messages can arrive.
    Closed,
}

/// Routing decision for one decoded message.
#[derive(Debug)]
pub enum Routed {
    Terminal(TerminalMessage),
    Event(WorkerEvent),
}

pub fn route(message: ProtocolMessage) -> Routed {
    match message {
        ProtocolMessage::Data(value) => Routed::Terminal(TerminalMessage::Data(value)),
        ProtocolMessage::Error(text) => Routed::Terminal(TerminalMessage::Error(text)),
        ProtocolMessage::Status(text) => Routed::Event(WorkerEvent::Status(text)),
        ProtocolMessage::Frame(payload) => Routed::Event(WorkerEvent::Frame(payload)),
        ProtocolMessage::ImagePath(path) => Routed::Event(WorkerEvent::ImagePath(path)),
        ProtocolMessage::Trigger => Routed::Event(WorkerEvent::Trigger),
        ProtocolMessage::PositionChanged(degrees) => {
            Routed::Event(WorkerEvent::PositionChanged(degrees))
        }
        ProtocolMessage::Homed => Routed::Event(WorkerEvent::Homed),
        ProtocolMessage::Initialized => Routed::Event(WorkerEvent::Initialized),
        ProtocolMessage::Raw(line) => Routed::Event(WorkerEvent::Raw(line)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_terminal_routing() {
        assert!(matches!(
            route(ProtocolMessage::Data(json!({"success": true}))),
            Routed::Terminal(TerminalMessage::Data(_))
        ));
        assert!(matches!(
            route(ProtocolMessage::Error("boom".into())),
            Routed::Terminal(TerminalMessage::Error(_))
        ));
    }

    #[test]
    fn test_domain_events_bypass_correlation() {
        for message in [
            ProtocolMessage::Frame("payload".into()),
            ProtocolMessage::Trigger,
            ProtocolMessage::PositionChanged(10.0),
            ProtocolMessage::Homed,
            ProtocolMessage::Initialized,
            ProtocolMessage::ImagePath("x.png".into()),
            ProtocolMessage::Status("busy".into()),
            ProtocolMessage::Raw("???".into()),
        ] {
            assert!(matches!(route(message), Routed::Event(_)));
        }
    }
}
