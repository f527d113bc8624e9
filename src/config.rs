//! Runtime configuration
//!
//! Everything is read from the environment once at startup. Malformed values
//! fall back to the default and log a warning rather than aborting.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8000";
pub const DEFAULT_REPORT_BASE: &str = "/training/sessions";
pub const DEFAULT_REDIRECT_DELAY: Duration = Duration::from_millis(3000);
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bounded exponential backoff for reconnection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given attempt (1-based): base, 2*base, 4*base, ... capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Settings shared by every session in the process
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base WebSocket URL of the training backend
    pub server_url: String,
    /// Path prefix for the canonical session report location
    pub report_base: String,
    /// Countdown before redirecting away from an ended session
    pub redirect_delay: Duration,
    pub reconnect: ReconnectPolicy,
    /// How long to wait for the server's `connected` event after opening
    pub handshake_timeout: Duration,
    /// Directory for persisted session snapshots; in-memory only when unset
    pub state_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            report_base: DEFAULT_REPORT_BASE.to_string(),
            redirect_delay: DEFAULT_REDIRECT_DELAY,
            reconnect: ReconnectPolicy::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            state_dir: None,
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |key: &str, fallback: Duration| -> Duration {
            lookup(key)
                .and_then(|raw| parse_or_warn::<u64>(key, &raw))
                .map_or(fallback, Duration::from_millis)
        };

        Self {
            server_url: lookup("PROSPECT_SERVER_URL").unwrap_or(defaults.server_url),
            report_base: lookup("PROSPECT_REPORT_BASE").unwrap_or(defaults.report_base),
            redirect_delay: millis("PROSPECT_REDIRECT_DELAY_MS", defaults.redirect_delay),
            reconnect: ReconnectPolicy {
                max_attempts: lookup("PROSPECT_RECONNECT_MAX_ATTEMPTS")
                    .and_then(|raw| parse_or_warn::<u32>("PROSPECT_RECONNECT_MAX_ATTEMPTS", &raw))
                    .unwrap_or(defaults.reconnect.max_attempts),
                base_delay: millis("PROSPECT_RECONNECT_BASE_MS", defaults.reconnect.base_delay),
                max_delay: millis("PROSPECT_RECONNECT_MAX_MS", defaults.reconnect.max_delay),
            },
            handshake_timeout: millis("PROSPECT_HANDSHAKE_TIMEOUT_MS", defaults.handshake_timeout),
            state_dir: lookup("PROSPECT_STATE_DIR").map(PathBuf::from),
        }
    }
}

fn parse_or_warn<T: std::str::FromStr>(key: &str, raw: &str) -> Option<T> {
    let parsed = raw.trim().parse().ok();
    if parsed.is_none() {
        tracing::warn!(key, value = raw, "Ignoring malformed configuration value");
    }
    parsed
}
