//! Trait abstractions for connection I/O
//!
//! These traits let the transport client run against a real WebSocket or an
//! in-memory mock.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// Upgrade refused with 401/403. Never retried.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Unreachable: {0}")]
    Unreachable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Channel error: {0}")]
pub struct ChannelError(pub String);

/// Opens authenticated channels for a session
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self, session_id: &str, auth_token: &str)
        -> Result<Box<dyn Channel>, ConnectError>;
}

/// One open text-frame channel
#[async_trait]
pub trait Channel: Send {
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError>;

    /// Next text frame; `None` once the peer has closed. Cancel safe.
    async fn recv_text(&mut self) -> Option<Result<String, ChannelError>>;

    async fn close(&mut self);
}

#[async_trait]
impl<T: Connector + ?Sized> Connector for Arc<T> {
    async fn open(
        &self,
        session_id: &str,
        auth_token: &str,
    ) -> Result<Box<dyn Channel>, ConnectError> {
        (**self).open(session_id, auth_token).await
    }
}
