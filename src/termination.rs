//! Termination classification
//!
//! Turns the backend's `session_ended` payload into a [`TerminationRecord`]
//! and a user-facing explanation. Who ended the conversation feeds coaching
//! attribution, so an unknown end type is a protocol error, never a default.

mod redirect;

pub use redirect::{Navigator, RedirectGuard};

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Which party's action closed the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndType {
    MutualGoodbye,
    ProspectEnding,
    UserEnding,
}

impl EndType {
    pub fn as_str(self) -> &'static str {
        match self {
            EndType::MutualGoodbye => "mutual_goodbye",
            EndType::ProspectEnding => "prospect_ending",
            EndType::UserEnding => "user_ending",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EndType::MutualGoodbye => "Conversation wrapped up",
            EndType::ProspectEnding => "The prospect hung up",
            EndType::UserEnding => "You ended the call",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            EndType::MutualGoodbye => {
                "You and the prospect said goodbye to each other. Let's look at how it went."
            }
            EndType::ProspectEnding => {
                "The prospect decided to end the conversation. Review the turning points in your report."
            }
            EndType::UserEnding => {
                "You chose to end the conversation. Your evaluation is being prepared."
            }
        }
    }
}

impl FromStr for EndType {
    type Err = ProtocolError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "mutual_goodbye" => Ok(EndType::MutualGoodbye),
            "prospect_ending" => Ok(EndType::ProspectEnding),
            "user_ending" => Ok(EndType::UserEnding),
            other => Err(ProtocolError(format!("Unknown end_type `{other}`"))),
        }
    }
}

impl fmt::Display for EndType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Created once per session close; irreversible
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminationRecord {
    pub end_type: EndType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_target: Option<String>,
    #[serde(default)]
    pub evaluation: Value,
}

impl TerminationRecord {
    pub fn new(end_type: EndType, redirect_target: Option<String>, evaluation: Value) -> Self {
        Self {
            end_type,
            redirect_target: redirect_target.filter(|t| !t.trim().is_empty()),
            evaluation,
        }
    }

    /// Classify a raw `session_ended` payload
    pub fn classify(
        end_type: &str,
        redirect_url: Option<String>,
        evaluation: Value,
    ) -> Result<Self, ProtocolError> {
        Ok(Self::new(end_type.parse()?, redirect_url, evaluation))
    }

    /// Where to send the user once the countdown is over
    pub fn redirect_target(&self, report_base: &str, session_id: &str) -> String {
        self.redirect_target
            .clone()
            .unwrap_or_else(|| report_location(report_base, session_id))
    }
}

/// Canonical session report location
pub fn report_location(report_base: &str, session_id: &str) -> String {
    format!("{}/{session_id}/report", report_base.trim_end_matches('/'))
}
