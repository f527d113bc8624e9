//! Error taxonomy surfaced to the presentation layer

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors a training session reports to whoever renders it.
///
/// Transport-level failures are recovered locally up to the retry budget;
/// anything that reaches this type has already escaped that budget or was
/// never retryable in the first place.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionError {
    /// Missing or rejected bearer token. Never retried automatically.
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    /// Command issued while the session could not accept it.
    #[error("Not connected: {message}")]
    NotConnected { message: String },

    /// Reconnection budget exhausted.
    #[error("Connection lost after {attempts} reconnection attempts")]
    ConnectionLost { attempts: u32 },

    /// Malformed event, unexpected first event, or unknown end type.
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// The server's `error` event. The session continues.
    #[error("{message}")]
    ServerAdvisory { message: String },
}

impl SessionError {
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    pub fn not_connected(message: impl Into<String>) -> Self {
        Self::NotConnected {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn advisory(message: impl Into<String>) -> Self {
        Self::ServerAdvisory {
            message: message.into(),
        }
    }

    /// Fatal errors disable input until the user reconnects or restarts.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Auth { .. } | Self::ConnectionLost { .. } | Self::Protocol { .. }
        )
    }
}

/// Wire-level decode or classification failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ProtocolError(pub String);

impl From<ProtocolError> for SessionError {
    fn from(err: ProtocolError) -> Self {
        SessionError::Protocol { message: err.0 }
    }
}
