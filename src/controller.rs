//! Session controller
//!
//! Owns one training session: a single task drains one event queue carrying
//! presentation commands and transport events, runs them through the state
//! machine and executes the resulting effects. The presentation talks to it
//! through a [`SessionHandle`].

mod executor;

#[cfg(test)]
pub mod testing;

pub use executor::SessionController;

use crate::error::SessionError;
use crate::protocol::Mood;
use crate::state_machine::Event;
use crate::store::{ConnectionStatus, Session, SessionReader, Turn};
use crate::termination::EndType;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::{CancellationToken, DropGuard};

/// Typed notifications for the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    StateChange {
        status: ConnectionStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        attempt: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_attempts: Option<u32>,
    },
    ProspectThinking,
    TurnAppended {
        turn: Turn,
    },
    GaugeChanged {
        gauge: u8,
        mood: Mood,
    },
    Reversal {
        kind: String,
        message: String,
    },
    NarrativeEvent {
        event_type: String,
        message: String,
    },
    /// Server `error` event; the session continues
    Advisory {
        error: SessionError,
    },
    /// A command was dropped without touching the session
    CommandRejected {
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<SessionError>,
    },
    /// Input is disabled until the user reconnects
    Fatal {
        error: SessionError,
    },
    Ended {
        end_type: EndType,
        label: String,
        description: String,
        redirect_target: String,
        countdown_secs: u64,
        evaluation: Value,
    },
    Countdown {
        remaining_secs: u64,
    },
    Redirected {
        target: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Session controller has stopped")]
pub struct ControllerGone;

/// Handle to interact with a running session controller
#[derive(Clone)]
pub struct SessionHandle {
    session_id: String,
    event_tx: mpsc::Sender<Event>,
    broadcast_tx: broadcast::Sender<Notification>,
    reader: SessionReader,
    shutdown: CancellationToken,
    /// Stops the controller once the last handle is dropped
    _lifetime: Arc<DropGuard>,
}

impl SessionHandle {
    pub(crate) fn new(
        session_id: String,
        event_tx: mpsc::Sender<Event>,
        broadcast_tx: broadcast::Sender<Notification>,
        reader: SessionReader,
        shutdown: CancellationToken,
    ) -> Self {
        let lifetime = Arc::new(shutdown.clone().drop_guard());
        Self {
            session_id,
            event_tx,
            broadcast_tx,
            reader,
            shutdown,
            _lifetime: lifetime,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn connect(&self) -> Result<(), ControllerGone> {
        self.submit(Event::Connect).await
    }

    pub async fn disconnect(&self) -> Result<(), ControllerGone> {
        self.submit(Event::Disconnect).await
    }

    /// Send one user turn. Blank text is rejected with a `CommandRejected`
    /// notification; nothing reaches the transcript or the server.
    pub async fn send_message(
        &self,
        text: impl Into<String>,
        audio_base64: Option<String>,
    ) -> Result<(), ControllerGone> {
        self.submit(Event::SendMessage {
            text: text.into(),
            audio_base64,
        })
        .await
    }

    pub async fn end_session(&self) -> Result<(), ControllerGone> {
        self.submit(Event::EndSession).await
    }

    /// Skip the countdown after the session ended
    pub async fn redirect_now(&self) -> Result<(), ControllerGone> {
        self.submit(Event::RedirectNow).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.broadcast_tx.subscribe()
    }

    /// Notifications as a stream; lagging subscribers skip what they missed
    pub fn notifications(&self) -> impl Stream<Item = Notification> + Send + 'static {
        BroadcastStream::new(self.subscribe()).filter_map(|item| match item {
            Ok(notification) => Some(notification),
            Err(e) => {
                tracing::warn!(error = %e, "Notification subscriber lagged");
                None
            }
        })
    }

    /// Current session snapshot
    pub fn session(&self) -> Session {
        self.reader.snapshot()
    }

    pub fn reader(&self) -> SessionReader {
        self.reader.clone()
    }

    /// Stop the controller. Queued and later events are discarded and the
    /// transport and countdown are released.
    pub fn dispose(&self) {
        self.shutdown.cancel();
    }

    pub fn is_disposed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    async fn submit(&self, event: Event) -> Result<(), ControllerGone> {
        if self.shutdown.is_cancelled() {
            return Err(ControllerGone);
        }
        self.event_tx.send(event).await.map_err(|_| ControllerGone)
    }
}
