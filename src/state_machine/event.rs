//! Events that drive a training session

use crate::protocol::ServerEvent;

/// Everything the controller reacts to, in one queue.
///
/// Presentation commands and transport events share the queue, so a command
/// issued while an event is being applied is handled after it.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    // Presentation commands
    Connect,
    Disconnect,
    SendMessage {
        text: String,
        audio_base64: Option<String>,
    },
    EndSession,
    /// Manual "go to report now" after the session ended
    RedirectNow,

    // Server events, in arrival order
    Server(ServerEvent),

    // Transport lifecycle
    Reconnecting {
        attempt: u32,
        max_attempts: u32,
    },
    ConnectionLost {
        attempts: u32,
    },
    AuthRejected {
        message: String,
    },
    ProtocolViolation {
        message: String,
    },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Connect => "connect",
            Event::Disconnect => "disconnect",
            Event::SendMessage { .. } => "send_message",
            Event::EndSession => "end_session",
            Event::RedirectNow => "redirect_now",
            Event::Server(event) => event.kind(),
            Event::Reconnecting { .. } => "reconnecting",
            Event::ConnectionLost { .. } => "connection_lost",
            Event::AuthRejected { .. } => "auth_rejected",
            Event::ProtocolViolation { .. } => "protocol_violation",
        }
    }
}
