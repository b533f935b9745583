//! Custom error types for the application.
//!
//! This module defines the primary error type, `ScanError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of failures the controller can
//! observe, from configuration and I/O problems to worker-protocol faults.
//!
//! ## Error Hierarchy
//!
//! `ScanError` consolidates the failure classes of the worker protocol:
//!
//! - **`StartupTimeout`**: the worker process never reported ready within the
//!   configured startup window.
//! - **`CommandTimeout`**: a correlated command received no terminal `DATA`/
//!   `ERROR` line in time. The command is abandoned locally; the worker cannot
//!   be told to cancel it.
//! - **`Decode`**: a structured payload arrived but did not match the expected
//!   shape.
//! - **`Worker`**: the worker answered a command with an explicit `ERROR` line.
//! - **`ProcessExit`**: the worker process terminated while commands were
//!   outstanding. All pending commands are rejected with this variant.
//! - **`Operation`**: the worker answered with a well-formed payload whose
//!   `success` flag was false. This is an ordinary, typed failure value.
//! - **`Persistence`**: the atomic scan-record write failed *after* capture
//!   already succeeded. Kept distinct from `Operation` so callers can tell
//!   "captured but not recorded" apart from "capture failed".
//! - **`NotSupported`**: the operation is a known capability gap of the
//!   hardware, not a transient failure.
//!
//! By using `#[from]`, `ScanError` can be seamlessly created from underlying
//! error types, simplifying error handling throughout the application with the
//! `?` operator.

use std::time::Duration;

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, ScanError>;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("worker did not report ready within {timeout:?}")]
    StartupTimeout { timeout: Duration },

    #[error("command timed out after {timeout:?}")]
    CommandTimeout { timeout: Duration },

    #[error("malformed payload: {0}")]
    Decode(String),

    #[error("worker error: {0}")]
    Worker(String),

    #[error("worker process exited (code {code:?})")]
    ProcessExit { code: Option<i32> },

    #[error("worker is not running")]
    WorkerNotRunning,

    #[error("operation failed: {0}")]
    Operation(String),

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("'{0}' is not supported by this hardware")]
    NotSupported(&'static str),

    #[error("'{operation}' is not valid in state {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),
}

impl ScanError {
    /// True for failures caused by the worker process dying or being absent,
    /// as opposed to a command that was answered negatively.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            ScanError::StartupTimeout { .. }
                | ScanError::ProcessExit { .. }
                | ScanError::WorkerNotRunning
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ScanError::Worker("capture failed".to_string());
        assert_eq!(err.to_string(), "worker error: capture failed");
    }

    #[test]
    fn test_lifecycle_classification() {
        assert!(ScanError::ProcessExit { code: Some(1) }.is_lifecycle());
        assert!(ScanError::WorkerNotRunning.is_lifecycle());
        assert!(!ScanError::Operation("nope".into()).is_lifecycle());
        assert!(!ScanError::Persistence("disk full".into()).is_lifecycle());
    }
}
