//! Error types for serialterm-core

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Failed to open {port}: {reason}")]
    Open { port: String, reason: String },

    #[error("Read error: {0}")]
    Read(String),

    #[error("Stream ended")]
    StreamEnded,

    #[error("Write error: {0}")]
    Write(String),

    #[error("Close error: {0}")]
    Close(String),

    #[error("Display error: {0}")]
    Sink(String),

    #[error("Reader already locked")]
    ReaderLocked,

    #[error("Writer already locked")]
    WriterLocked,

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Port discovery failed: {0}")]
    Discovery(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, CoreError>;

/// Category an error is reported under on the session event channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Open,
    Read,
    Write,
    Close,
    Sink,
    /// Enumeration or lookup of ports
    Discovery,
    /// Device-level failure not tied to one operation
    Device,
}

impl CoreError {
    /// True when the readable side is gone for good and the session must close.
    pub fn is_stream_end(&self) -> bool {
        matches!(self, CoreError::StreamEnded)
    }

    /// Classify an error by the operation that produced it.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Open { .. } | CoreError::InvalidOptions(_) | CoreError::AlreadyConnected => {
                ErrorKind::Open
            }
            CoreError::Read(_) | CoreError::StreamEnded | CoreError::ReaderLocked => ErrorKind::Read,
            CoreError::Write(_) | CoreError::WriterLocked => ErrorKind::Write,
            CoreError::Close(_) => ErrorKind::Close,
            CoreError::Sink(_) => ErrorKind::Sink,
            CoreError::PortNotFound(_) | CoreError::Discovery(_) => ErrorKind::Discovery,
            CoreError::Io(_) | CoreError::InvalidState(_) => ErrorKind::Device,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::AlreadyConnected;
        assert_eq!(err.to_string(), "Already connected");
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let core_err: CoreError = io_err.into();
        assert!(matches!(core_err, CoreError::Io(_)));
    }

    #[test]
    fn test_open_error_display() {
        let err = CoreError::Open {
            port: "/dev/ttyUSB0".into(),
            reason: "Permission denied".into(),
        };
        assert_eq!(err.to_string(), "Failed to open /dev/ttyUSB0: Permission denied");
        assert_eq!(err.kind(), ErrorKind::Open);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(CoreError::Read("framing".into()).kind(), ErrorKind::Read);
        assert_eq!(CoreError::Write("gone".into()).kind(), ErrorKind::Write);
        assert_eq!(CoreError::WriterLocked.kind(), ErrorKind::Write);
        assert_eq!(CoreError::Close("busy".into()).kind(), ErrorKind::Close);
        assert_eq!(CoreError::PortNotFound("COM9".into()).kind(), ErrorKind::Discovery);
        assert_eq!(CoreError::Discovery("udev".into()).kind(), ErrorKind::Discovery);
        assert_eq!(
            CoreError::InvalidState("port mutex poisoned".into()).kind(),
            ErrorKind::Device
        );
        assert_eq!(CoreError::Io(std::io::Error::other("gone")).kind(), ErrorKind::Device);
        assert!(CoreError::StreamEnded.is_stream_end());
        assert!(!CoreError::Read("x".into()).is_stream_end());
    }
}
