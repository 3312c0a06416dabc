//! Error taxonomy for the engine session.
//!
//! Only `start()`/`stop()` surface errors to the caller; everything that
//! happens inside the event-delivery contexts is handled locally and at
//! most reported through an `EngineEvent::Error` observer notification.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by [`EngineSession::start`](crate::session::EngineSession::start).
#[derive(Debug, Error)]
pub enum EngineError {
    /// Input-monitoring access is missing; no device was opened.
    #[error("input access denied: {0}")]
    PermissionDenied(String),

    /// A matched input device could not be opened or grabbed.
    #[error("failed to open input device {path:?}: {source}")]
    DeviceOpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The virtual output device could not be created.
    #[error("failed to create virtual output device: {0}")]
    VirtualDeviceFailed(std::io::Error),

    /// HID enumeration itself failed.
    #[error("device enumeration failed: {0}")]
    EnumerationFailed(String),

    /// `start()` was called with no match criteria registered.
    #[error("no device match criteria registered")]
    NoMatchCriteria,

    /// A criterion was registered while the session was running.
    #[error("match criteria cannot change while the session is running")]
    SessionRunning,

    /// A configuration value failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    /// Coarse grouping used when reporting through the observer channel.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::PermissionDenied(_)
            | EngineError::DeviceOpenFailed { .. }
            | EngineError::VirtualDeviceFailed(_)
            | EngineError::EnumerationFailed(_) => ErrorKind::DeviceAccess,
            EngineError::NoMatchCriteria
            | EngineError::SessionRunning
            | EngineError::InvalidConfig(_) => ErrorKind::Configuration,
        }
    }
}

/// Error category carried by `EngineEvent::Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Device or permission problem.
    DeviceAccess,
    /// Bad configuration or API misuse.
    Configuration,
    /// The exclusive grab on a source device was lost and could not be
    /// re-asserted.
    Interceptor,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            EngineError::PermissionDenied("uinput".into()).kind(),
            ErrorKind::DeviceAccess
        );
        assert_eq!(
            EngineError::NoMatchCriteria.kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            EngineError::InvalidConfig("bad".into()).kind(),
            ErrorKind::Configuration
        );
    }
}
