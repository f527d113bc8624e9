//! Session state types

use crate::config::{SessionConfig, DEFAULT_REDIRECT_DELAY, DEFAULT_REPORT_BASE};
use crate::error::SessionError;
use crate::store::ConnectionStatus;
use crate::termination::TerminationRecord;
use serde::Serialize;
use std::time::Duration;

/// Controller state
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionState {
    /// Nothing opened yet
    #[default]
    Idle,

    /// Transport opening, waiting for the server's `connected` event
    Connecting,

    /// Handshake done; dialogue events flow
    Connected,

    /// Unexpected drop; transport is retrying
    Reconnecting { attempt: u32, max_attempts: u32 },

    /// Closed by the user (`error` is `None`) or by a fatal error
    Disconnected { error: Option<SessionError> },

    /// The server ended the conversation. Terminal.
    Ended { record: TerminationRecord },
}

impl SessionState {
    pub fn status(&self) -> ConnectionStatus {
        match self {
            SessionState::Idle => ConnectionStatus::Idle,
            SessionState::Connecting => ConnectionStatus::Connecting,
            SessionState::Connected => ConnectionStatus::Connected,
            SessionState::Reconnecting { .. } => ConnectionStatus::Reconnecting,
            SessionState::Disconnected { .. } => ConnectionStatus::Disconnected,
            SessionState::Ended { .. } => ConnectionStatus::Ended,
        }
    }

    /// A transport connection exists or is being (re)established
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Connected | SessionState::Reconnecting { .. }
        )
    }
}

/// Immutable per-session configuration
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub auth_token: String,
    /// Prefix of the canonical report location
    pub report_base: String,
    pub redirect_delay: Duration,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            auth_token: auth_token.into(),
            report_base: DEFAULT_REPORT_BASE.to_string(),
            redirect_delay: DEFAULT_REDIRECT_DELAY,
        }
    }

    pub fn from_config(
        session_id: impl Into<String>,
        auth_token: impl Into<String>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            report_base: config.report_base.clone(),
            redirect_delay: config.redirect_delay,
            ..Self::new(session_id, auth_token)
        }
    }
}
