//! Session lifecycle events

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, ErrorKind};

/// Why a session reached the Closed state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// `disconnect()` was called
    Requested,
    /// The device's readable stream ended for good
    StreamEnded,
}

/// Lifecycle event emitted by a connection session
///
/// Inbound data does not travel through here; it goes to the display sink,
/// which is awaited chunk by chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// The device was opened and the inbound pump is running
    Connected { port: String },

    /// Something failed. `disconnect` is true only when the failure ended the
    /// attempt and no `Closed` event will follow.
    Error {
        kind: ErrorKind,
        message: String,
        disconnect: bool,
    },

    /// The session is torn down. Emitted exactly once per session.
    Closed { reason: CloseReason },
}

impl SessionEvent {
    /// Create connected event
    pub fn connected(port: impl Into<String>) -> Self {
        Self::Connected { port: port.into() }
    }

    /// Create error event from a core error
    pub fn error(err: &CoreError, disconnect: bool) -> Self {
        Self::Error {
            kind: err.kind(),
            message: err.to_string(),
            disconnect,
        }
    }

    /// Create closed event
    pub fn closed(reason: CloseReason) -> Self {
        Self::Closed { reason }
    }

    /// True for events after which the session no longer exists
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Closed { .. } | Self::Error { disconnect: true, .. }
        )
    }
}
