//! Wire protocol for the hardware worker process.
//!
//! The worker speaks a line-oriented text protocol over its standard streams:
//! one JSON command object per line inbound, one prefixed text line per
//! message outbound. This module owns both directions — [`command::Command`]
//! for serialization and [`message::ProtocolMessage`] plus [`codec`] for
//! decoding.

pub mod codec;
pub mod command;
pub mod message;

pub use codec::LineAssembler;
pub use command::{Command, CommandDomain};
pub use message::ProtocolMessage;
