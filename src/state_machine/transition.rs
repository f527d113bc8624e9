//! Pure state transition function
//!
//! Given the same state, context and event this always produces the same
//! result. Store writes, transport I/O and notifications are returned as
//! effects for the controller to execute.

use super::{Effect, Event, SessionContext, SessionState};
use crate::controller::Notification;
use crate::error::SessionError;
use crate::protocol::{ClientCommand, ServerEvent};
use crate::store::{clamp_gauge, ConnectionStatus, Mutation, TurnDraft};
use crate::termination::TerminationRecord;
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: SessionState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: SessionState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    /// Stay in the current state
    pub fn unchanged(state: &SessionState) -> Self {
        Self::new(state.clone())
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Message is empty")]
    EmptyMessage,
    #[error("Session is not connected (status: {0})")]
    NotConnected(ConnectionStatus),
    #[error("Session has ended")]
    SessionEnded,
    #[error("Session is already connected")]
    AlreadyConnected,
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

impl TransitionError {
    /// Rejections the presentation should show; the rest are logged only
    pub fn is_user_facing(&self) -> bool {
        !matches!(
            self,
            TransitionError::AlreadyConnected | TransitionError::InvalidTransition(_)
        )
    }

    /// The session error a rejected command surfaces as, if any
    pub fn to_session_error(&self) -> Option<SessionError> {
        match self {
            TransitionError::NotConnected(_) | TransitionError::SessionEnded => {
                Some(SessionError::not_connected(self.to_string()))
            }
            _ => None,
        }
    }
}

/// Pure transition function
pub fn transition(
    state: &SessionState,
    context: &SessionContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // Connection lifecycle (presentation)
        // ============================================================
        (SessionState::Idle | SessionState::Disconnected { .. }, Event::Connect) => {
            // No connection attempt without a token
            if context.auth_token.trim().is_empty() {
                return Ok(fatal(SessionError::auth("Missing authentication token")));
            }
            Ok(TransitionResult::new(SessionState::Connecting)
                .with_effect(Effect::mutate(Mutation::SetError(None)))
                .with_effect(Effect::PersistState)
                .with_effect(Effect::OpenTransport))
        }

        (s, Event::Connect) if s.is_live() => Err(TransitionError::AlreadyConnected),

        (SessionState::Ended { .. }, Event::Connect) => Err(TransitionError::SessionEnded),

        (s, Event::Disconnect) if s.is_live() => {
            Ok(TransitionResult::new(SessionState::Disconnected { error: None })
                .with_effect(Effect::mutate(Mutation::SetThinking(false)))
                .with_effect(Effect::CloseTransport)
                .with_effect(Effect::PersistState))
        }

        // Disconnect is idempotent
        (s, Event::Disconnect) => Ok(TransitionResult::unchanged(s)),

        // ============================================================
        // User turns
        // ============================================================
        (s, Event::SendMessage { text, audio_base64 }) => {
            if text.trim().is_empty() {
                return Err(TransitionError::EmptyMessage);
            }
            match s {
                SessionState::Connected | SessionState::Reconnecting { .. } => {
                    // Optimistic append; the turn stays even if delivery fails
                    Ok(TransitionResult::unchanged(s)
                        .with_effect(Effect::mutate(Mutation::AppendTurn(TurnDraft::user(
                            text.clone(),
                            audio_base64.clone(),
                        ))))
                        .with_effect(Effect::SendCommand(ClientCommand::SendMessage {
                            text,
                            audio_base64,
                        }))
                        .with_effect(Effect::PersistState))
                }
                SessionState::Ended { .. } => Err(TransitionError::SessionEnded),
                other => Err(TransitionError::NotConnected(other.status())),
            }
        }

        (SessionState::Ended { .. }, Event::EndSession) => Ok(TransitionResult::unchanged(state)),

        (SessionState::Connected | SessionState::Reconnecting { .. }, Event::EndSession) => {
            Ok(TransitionResult::unchanged(state)
                .with_effect(Effect::SendCommand(ClientCommand::EndSession {})))
        }

        (s, Event::EndSession) => Err(TransitionError::NotConnected(s.status())),

        (SessionState::Ended { record }, Event::RedirectNow) => {
            let target = record.redirect_target(&context.report_base, &context.session_id);
            Ok(TransitionResult::unchanged(state).with_effect(Effect::RedirectNow { target }))
        }

        // ============================================================
        // Server events
        // ============================================================
        (
            SessionState::Connecting | SessionState::Reconnecting { .. },
            Event::Server(ServerEvent::Connected(handshake)),
        ) => Ok(TransitionResult::new(SessionState::Connected)
            .with_effect(Effect::mutate(Mutation::UpdateGauge {
                gauge: clamp_gauge(handshake.jauge),
                mood: Some(handshake.mood),
            }))
            .with_effect(Effect::mutate(Mutation::SetError(None)))
            .with_effect(Effect::mutate(Mutation::SetThinking(false)))
            .with_effect(Effect::PersistState)),

        (SessionState::Connected, Event::Server(ServerEvent::ProspectThinking)) => {
            Ok(TransitionResult::unchanged(state)
                .with_effect(Effect::mutate(Mutation::SetThinking(true)))
                .with_effect(Effect::notify(Notification::ProspectThinking)))
        }

        (SessionState::Connected, Event::Server(ServerEvent::ProspectResponse(response))) => {
            Ok(TransitionResult::unchanged(state)
                .with_effect(Effect::mutate(Mutation::SetThinking(false)))
                .with_effect(Effect::mutate(Mutation::AppendTurn(TurnDraft::prospect(
                    &response,
                ))))
                .with_effect(Effect::mutate(Mutation::UpdateGauge {
                    gauge: clamp_gauge(response.jauge),
                    mood: Some(response.mood.clone()),
                }))
                .with_effect(Effect::mutate(Mutation::UpdateCoaching {
                    conversion_possible: response.conversion_possible,
                    feedback: response.feedback.clone(),
                }))
                .with_effect(Effect::PersistState))
        }

        (SessionState::Connected, Event::Server(ServerEvent::GaugeUpdate(update))) => {
            Ok(TransitionResult::unchanged(state)
                .with_effect(Effect::mutate(Mutation::UpdateGauge {
                    gauge: clamp_gauge(update.jauge),
                    mood: Some(update.mood),
                }))
                .with_effect(Effect::PersistState))
        }

        // Transient beats; the transcript is untouched
        (s, Event::Server(ServerEvent::Reversal(reversal))) if s.is_live() => {
            Ok(TransitionResult::unchanged(s).with_effect(Effect::notify(
                Notification::Reversal {
                    kind: reversal.kind,
                    message: reversal.message,
                },
            )))
        }

        (s, Event::Server(ServerEvent::Event(beat))) if s.is_live() => {
            Ok(TransitionResult::unchanged(s).with_effect(Effect::notify(
                Notification::NarrativeEvent {
                    event_type: beat.event_type,
                    message: beat.message,
                },
            )))
        }

        // Only `connected` may open a session
        (SessionState::Connecting, Event::Server(ServerEvent::SessionEnded(_))) => Ok(fatal(
            SessionError::protocol("Expected `connected` as first event, got `session_ended`"),
        )),

        (
            SessionState::Connected | SessionState::Reconnecting { .. },
            Event::Server(ServerEvent::SessionEnded(ended)),
        ) => {
            match TerminationRecord::classify(&ended.end_type, ended.redirect_url, ended.evaluation)
            {
                Ok(record) => Ok(handle_session_ended(context, record)),
                Err(e) => Ok(fatal(SessionError::from(e))),
            }
        }

        // Advisory; valid in any state
        (s, Event::Server(ServerEvent::Error { message })) => {
            let error = SessionError::advisory(message);
            let mut result = TransitionResult::unchanged(s)
                .with_effect(Effect::mutate(Mutation::SetThinking(false)));
            // A stored fatal error outranks a late advisory
            if !matches!(s, SessionState::Disconnected { error: Some(_) }) {
                result = result.with_effect(Effect::mutate(Mutation::SetError(Some(error.clone()))));
            }
            Ok(result.with_effect(Effect::notify(Notification::Advisory { error })))
        }

        // ============================================================
        // Transport lifecycle
        // ============================================================
        (
            s,
            Event::Reconnecting {
                attempt,
                max_attempts,
            },
        ) if s.is_live() => Ok(TransitionResult::new(SessionState::Reconnecting {
            attempt,
            max_attempts,
        })
        .with_effect(Effect::mutate(Mutation::SetThinking(false)))
        .with_effect(Effect::PersistState)),

        (s, Event::ConnectionLost { attempts }) if s.is_live() => {
            Ok(fatal(SessionError::ConnectionLost { attempts }))
        }

        (s, Event::AuthRejected { message }) if s.is_live() => Ok(fatal(SessionError::auth(message))),

        (s, Event::ProtocolViolation { message }) if s.is_live() => {
            Ok(fatal(SessionError::protocol(message)))
        }

        // ============================================================
        // Everything else, including late events after disconnect/end
        // ============================================================
        (state, event) => Err(TransitionError::InvalidTransition(format!(
            "No transition from {} on {}",
            state.status(),
            event.kind()
        ))),
    }
}

fn handle_session_ended(context: &SessionContext, record: TerminationRecord) -> TransitionResult {
    let target = record.redirect_target(&context.report_base, &context.session_id);
    let end_type = record.end_type;
    let countdown_secs = u64::try_from(context.redirect_delay.as_millis().div_ceil(1000))
        .unwrap_or(u64::MAX);

    TransitionResult::new(SessionState::Ended {
        record: record.clone(),
    })
    .with_effect(Effect::mutate(Mutation::SetThinking(false)))
    .with_effect(Effect::mutate(Mutation::RecordTermination(record.clone())))
    .with_effect(Effect::PersistState)
    .with_effect(Effect::CloseTransport)
    .with_effect(Effect::notify(Notification::Ended {
        end_type,
        label: end_type.label().to_string(),
        description: end_type.description().to_string(),
        redirect_target: target.clone(),
        countdown_secs,
        evaluation: record.evaluation,
    }))
    .with_effect(Effect::BeginRedirect { target })
}

/// Terminal error: input is disabled until a manual reconnect
fn fatal(error: SessionError) -> TransitionResult {
    TransitionResult::new(SessionState::Disconnected {
        error: Some(error.clone()),
    })
    .with_effect(Effect::mutate(Mutation::SetThinking(false)))
    .with_effect(Effect::mutate(Mutation::SetError(Some(error.clone()))))
    .with_effect(Effect::PersistState)
    .with_effect(Effect::CloseTransport)
    .with_effect(Effect::notify(Notification::Fatal { error }))
}
