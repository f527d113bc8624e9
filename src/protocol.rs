//! Wire protocol spoken with the training backend
//!
//! Every frame is a JSON object carrying a `type` tag. Payload fields either
//! sit next to the tag or inside a `data` object; both layouts decode to the
//! same [`ServerEvent`].

use crate::error::ProtocolError;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

// ============================================================================
// Mood
// ============================================================================

/// Affective state of the simulated prospect
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Mood {
    #[default]
    Neutral,
    Pleased,
    Interested,
    Curious,
    Skeptical,
    Annoyed,
    Angry,
    /// Any tag the backend introduces that this client does not know yet
    Other(String),
}

impl Mood {
    pub fn as_str(&self) -> &str {
        match self {
            Mood::Neutral => "neutral",
            Mood::Pleased => "pleased",
            Mood::Interested => "interested",
            Mood::Curious => "curious",
            Mood::Skeptical => "skeptical",
            Mood::Annoyed => "annoyed",
            Mood::Angry => "angry",
            Mood::Other(tag) => tag,
        }
    }
}

impl From<String> for Mood {
    fn from(tag: String) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "" | "neutral" => Mood::Neutral,
            "pleased" => Mood::Pleased,
            "interested" => Mood::Interested,
            "curious" => Mood::Curious,
            "skeptical" => Mood::Skeptical,
            "annoyed" => Mood::Annoyed,
            "angry" => Mood::Angry,
            _ => Mood::Other(tag),
        }
    }
}

impl From<&str> for Mood {
    fn from(tag: &str) -> Self {
        Mood::from(tag.to_string())
    }
}

impl From<Mood> for String {
    fn from(mood: Mood) -> Self {
        mood.as_str().to_string()
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Server -> client
// ============================================================================

/// Payload of the handshake `connected` event
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Handshake {
    #[serde(default, deserialize_with = "opaque_id")]
    pub session_id: Option<String>,
    pub jauge: i64,
    #[serde(default)]
    pub mood: Mood,
}

/// One prospect utterance (or narrative beat) with its gauge/mood annotations
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProspectResponse {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub audio_base64: Option<String>,
    #[serde(default)]
    pub mood: Mood,
    /// Negative means "gauge unchanged"
    #[serde(default = "unchanged_gauge")]
    pub jauge: i64,
    #[serde(default)]
    pub jauge_delta: i64,
    #[serde(default)]
    pub behavioral_cue: Option<String>,
    #[serde(default)]
    pub is_event: bool,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub conversion_possible: Option<bool>,
    #[serde(default)]
    pub feedback: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<Value>,
}

impl ProspectResponse {
    /// Server timestamp as RFC 3339 text or a unix epoch (seconds or millis)
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self.timestamp.as_ref()? {
            Value::String(text) => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            Value::Number(n) => {
                let raw = n.as_i64()?;
                if raw > 100_000_000_000 {
                    Utc.timestamp_millis_opt(raw).single()
                } else {
                    Utc.timestamp_opt(raw, 0).single()
                }
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GaugeUpdate {
    pub jauge: i64,
    #[serde(default)]
    pub mood: Mood,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Reversal {
    #[serde(rename = "type", alias = "reversal_type", default)]
    pub kind: String,
    #[serde(default)]
    pub message: String,
}

/// Non-dialogue beat such as a phone interruption
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NarrativeEvent {
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionEnded {
    /// Classified later; unknown values are a protocol error, not a default
    pub end_type: String,
    #[serde(default)]
    pub redirect_url: Option<String>,
    #[serde(default)]
    pub evaluation: Value,
}

/// Events the backend pushes over the session channel
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Connected(Handshake),
    ProspectThinking,
    ProspectResponse(Box<ProspectResponse>),
    GaugeUpdate(GaugeUpdate),
    Reversal(Reversal),
    Event(NarrativeEvent),
    SessionEnded(SessionEnded),
    Error { message: String },
}

impl ServerEvent {
    /// Wire tag, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Connected(_) => "connected",
            ServerEvent::ProspectThinking => "prospect_thinking",
            ServerEvent::ProspectResponse(_) => "prospect_response",
            ServerEvent::GaugeUpdate(_) => "gauge_update",
            ServerEvent::Reversal(_) => "reversal",
            ServerEvent::Event(_) => "event",
            ServerEvent::SessionEnded(_) => "session_ended",
            ServerEvent::Error { .. } => "error",
        }
    }

    /// Decode one text frame
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let mut frame: Value = serde_json::from_str(text)
            .map_err(|e| ProtocolError(format!("Malformed frame: {e}")))?;
        let kind = frame
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError("Frame has no `type` tag".to_string()))?
            .to_string();

        let payload = match frame.get_mut("data") {
            Some(data) if data.is_object() => data.take(),
            _ => {
                if let Some(object) = frame.as_object_mut() {
                    object.remove("type");
                }
                frame
            }
        };

        fn parse<T: serde::de::DeserializeOwned>(
            kind: &str,
            payload: Value,
        ) -> Result<T, ProtocolError> {
            serde_json::from_value(payload)
                .map_err(|e| ProtocolError(format!("Malformed `{kind}` event: {e}")))
        }

        let event = match kind.as_str() {
            "connected" => ServerEvent::Connected(parse(&kind, payload)?),
            "prospect_thinking" => ServerEvent::ProspectThinking,
            "prospect_response" => ServerEvent::ProspectResponse(Box::new(parse(&kind, payload)?)),
            "gauge_update" => ServerEvent::GaugeUpdate(parse(&kind, payload)?),
            "reversal" => ServerEvent::Reversal(parse(&kind, payload)?),
            "event" => ServerEvent::Event(parse(&kind, payload)?),
            "session_ended" => ServerEvent::SessionEnded(parse(&kind, payload)?),
            "error" => {
                let advisory: Advisory = parse(&kind, payload)?;
                ServerEvent::Error {
                    message: advisory.message,
                }
            }
            other => return Err(ProtocolError(format!("Unknown event type `{other}`"))),
        };
        Ok(event)
    }
}

#[derive(Deserialize)]
struct Advisory {
    #[serde(default)]
    message: String,
}

fn unchanged_gauge() -> i64 {
    -1
}

/// Session ids are opaque: accept either a JSON string or a number
fn opaque_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

// ============================================================================
// Client -> server
// ============================================================================

/// Commands the trainee's side sends to the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    SendMessage {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audio_base64: Option<String>,
    },
    EndSession {},
}

impl ClientCommand {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError(format!("Cannot encode command: {e}")))
    }
}
