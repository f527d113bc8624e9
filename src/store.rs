//! Session store
//!
//! Durable conversation state, independent of connection status. The
//! controller is the only writer (`apply` is crate-private); everybody else
//! reads through a [`SessionReader`].

mod persistence;

pub use persistence::{FilePersistence, MemoryPersistence, SessionPersistence};

use crate::error::SessionError;
use crate::protocol::{Mood, ProspectResponse};
use crate::termination::TerminationRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

pub const GAUGE_MAX: u8 = 100;
pub const INITIAL_GAUGE: u8 = 50;

/// Clamp a wire gauge into range; negative values mean "leave it alone"
pub fn clamp_gauge(raw: i64) -> Option<u8> {
    if raw < 0 {
        None
    } else {
        Some(u8::try_from(raw.min(i64::from(GAUGE_MAX))).unwrap_or(GAUGE_MAX))
    }
}

// ============================================================================
// Session data
// ============================================================================

/// Connection status as seen by the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
    Ended,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionStatus::Idle => "idle",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Ended => "ended",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Prospect,
}

/// Annotations only prospect turns carry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProspectAnnotations {
    pub mood: Mood,
    pub gauge_delta: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavioral_cue: Option<String>,
}

/// One utterance in the transcript. Never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<ProspectAnnotations>,
    #[serde(default)]
    pub is_event: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A turn before the store has assigned its id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnDraft {
    pub role: Role,
    pub text: String,
    pub audio_base64: Option<String>,
    pub annotations: Option<ProspectAnnotations>,
    pub is_event: bool,
    pub event_type: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl TurnDraft {
    pub fn user(text: impl Into<String>, audio_base64: Option<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            audio_base64,
            annotations: None,
            is_event: false,
            event_type: None,
            timestamp: None,
        }
    }

    pub fn prospect(response: &ProspectResponse) -> Self {
        Self {
            role: Role::Prospect,
            text: response.text.clone(),
            audio_base64: response.audio_base64.clone(),
            annotations: Some(ProspectAnnotations {
                mood: response.mood.clone(),
                gauge_delta: response.jauge_delta,
                behavioral_cue: response.behavioral_cue.clone(),
            }),
            is_event: response.is_event,
            event_type: response.event_type.clone(),
            timestamp: response.timestamp(),
        }
    }

    fn into_turn(self) -> Turn {
        Turn {
            id: uuid::Uuid::new_v4().to_string(),
            role: self.role,
            text: self.text,
            audio_base64: self.audio_base64,
            annotations: self.annotations,
            is_event: self.is_event,
            event_type: self.event_type,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        }
    }
}

/// Everything the presentation layer renders for one training session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub status: ConnectionStatus,
    pub gauge: u8,
    pub mood: Mood,
    pub conversion_possible: bool,
    #[serde(default)]
    pub feedback: Option<Value>,
    pub transcript: Vec<Turn>,
    #[serde(default)]
    pub prospect_thinking: bool,
    #[serde(default)]
    pub last_error: Option<SessionError>,
    #[serde(default)]
    pub termination: Option<TerminationRecord>,
}

impl Session {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            status: ConnectionStatus::Idle,
            gauge: INITIAL_GAUGE,
            mood: Mood::Neutral,
            conversion_possible: false,
            feedback: None,
            transcript: Vec::new(),
            prospect_thinking: false,
            last_error: None,
            termination: None,
        }
    }

    /// Whether the presentation should accept input right now
    pub fn accepts_input(&self) -> bool {
        matches!(
            self.status,
            ConnectionStatus::Connected | ConnectionStatus::Reconnecting
        )
    }

    /// Apply one mutation; returns the turn when one was appended
    pub(crate) fn apply(&mut self, mutation: Mutation) -> Option<Turn> {
        match mutation {
            Mutation::AppendTurn(draft) => {
                let turn = draft.into_turn();
                self.transcript.push(turn.clone());
                return Some(turn);
            }
            Mutation::UpdateGauge { gauge, mood } => {
                if let Some(gauge) = gauge {
                    self.gauge = gauge.min(GAUGE_MAX);
                }
                if let Some(mood) = mood {
                    self.mood = mood;
                }
            }
            Mutation::SetThinking(thinking) => self.prospect_thinking = thinking,
            Mutation::UpdateCoaching {
                conversion_possible,
                feedback,
            } => {
                if let Some(possible) = conversion_possible {
                    self.conversion_possible = possible;
                }
                if feedback.is_some() {
                    self.feedback = feedback;
                }
            }
            Mutation::SetError(error) => self.last_error = error,
            Mutation::SetStatus(status) => self.status = status,
            Mutation::RecordTermination(record) => {
                // Acquiring a termination record is irreversible
                if self.termination.is_none() {
                    self.termination = Some(record);
                }
            }
        }
        None
    }
}

/// Store writes, produced by the state machine and applied by the controller
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    AppendTurn(TurnDraft),
    UpdateGauge {
        gauge: Option<u8>,
        mood: Option<Mood>,
    },
    SetThinking(bool),
    UpdateCoaching {
        conversion_possible: Option<bool>,
        feedback: Option<Value>,
    },
    SetError(Option<SessionError>),
    SetStatus(ConnectionStatus),
    RecordTermination(TerminationRecord),
}

// ============================================================================
// Store
// ============================================================================

/// Process-scoped session state, owned by one controller
#[derive(Clone)]
pub struct SessionStore {
    tx: Arc<watch::Sender<Session>>,
}

impl SessionStore {
    pub(crate) fn new(session: Session) -> Self {
        let (tx, _rx) = watch::channel(session);
        Self { tx: Arc::new(tx) }
    }

    pub(crate) fn apply(&self, mutation: Mutation) -> Option<Turn> {
        let mut appended = None;
        self.tx.send_modify(|session| appended = session.apply(mutation));
        appended
    }

    pub fn snapshot(&self) -> Session {
        self.tx.borrow().clone()
    }

    pub fn reader(&self) -> SessionReader {
        SessionReader {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read-only view handed to the presentation layer
#[derive(Clone)]
pub struct SessionReader {
    rx: watch::Receiver<Session>,
}

impl SessionReader {
    pub fn snapshot(&self) -> Session {
        self.rx.borrow().clone()
    }

    /// Wait for the next write; `false` once the controller is gone
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}
