//! Session transport
//!
//! One persistent duplex connection per session. The transport authenticates,
//! serializes commands, decodes server frames and retries unexpected drops
//! with bounded exponential backoff. Every decoded event, and every lifecycle
//! change the controller must know about, is pushed into the controller's
//! event queue in arrival order.

mod client;
pub mod traits;
mod ws;


pub use client::TransportClient;
pub use traits::{Channel, ChannelError, ConnectError, Connector};
pub use ws::{WsConnector, WsTransport};

use crate::error::SessionError;
use crate::protocol::ClientCommand;
use crate::state_machine::Event;
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Status of the underlying link, as tracked by the transport itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
    Ended,
}

impl LinkStatus {
    /// A connection exists or is being (re)established
    pub fn is_live(self) -> bool {
        matches!(
            self,
            LinkStatus::Connecting | LinkStatus::Connected | LinkStatus::Reconnecting
        )
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkStatus::Idle => "idle",
            LinkStatus::Connecting => "connecting",
            LinkStatus::Connected => "connected",
            LinkStatus::Reconnecting => "reconnecting",
            LinkStatus::Disconnected => "disconnected",
            LinkStatus::Ended => "ended",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Transport already has a live connection")]
    AlreadyConnected,
    #[error("Transport is not connected (status: {0})")]
    NotConnected(LinkStatus),
    #[error("Transport task has stopped")]
    Closed,
}

impl TransportError {
    /// The session error a failed send surfaces as, if any
    pub fn to_session_error(&self) -> Option<SessionError> {
        match self {
            TransportError::NotConnected(_) | TransportError::Closed => {
                Some(SessionError::not_connected(self.to_string()))
            }
            TransportError::Auth(message) => Some(SessionError::auth(message.clone())),
            TransportError::AlreadyConnected => None,
        }
    }
}

/// What the controller needs from a transport.
///
/// `connect` returns as soon as the attempt is underway; the handshake
/// outcome arrives on `listener` as an ordinary event.
pub trait Transport: Send + 'static {
    fn connect(
        &mut self,
        session_id: &str,
        auth_token: &str,
        listener: mpsc::Sender<Event>,
    ) -> Result<(), TransportError>;

    /// Queue a command; buffered while reconnecting
    fn send(&self, command: ClientCommand) -> Result<(), TransportError>;

    /// Close without classification. Idempotent.
    fn disconnect(&mut self);

    fn status(&self) -> LinkStatus;

    /// Tie connection tasks to the owner's shutdown so they stop the moment
    /// it is cancelled
    fn bind_shutdown(&mut self, _shutdown: &CancellationToken) {}
}
