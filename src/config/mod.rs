//! Configuration for the interview session layer.
//!
//! Settings are loaded from environment variables (a `.env` file is honored
//! when the binary loads it via `dotenvy`). Priority: environment variables >
//! built-in defaults. Behavioral constants that the session layer depends on
//! (greeting delay, coaching debounce, suggestion cap, connect timeout) live
//! here so tests and deployments can tune them without code changes.
//!
//! # Example
//! ```rust,no_run
//! use intervox::config::SessionSettings;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = SessionSettings::from_env()?;
//! println!("collaborator API at {}", settings.collaborator_base_url);
//! # Ok(())
//! # }
//! ```

use std::env;
use std::time::Duration;

use thiserror::Error;

/// Default delay between entering `Connected` and sending the opening turn
/// signal. Guards against the event channel reporting open before the remote
/// side has attached its model session.
pub const DEFAULT_GREETING_DELAY_MS: u64 = 1000;

/// Default debounce applied before a completed exchange is sent for coaching
/// evaluation, coalescing rapid-fire transcript updates.
pub const DEFAULT_COACHING_DEBOUNCE_MS: u64 = 800;

/// Default cap on the suggestion board (newest first, oldest evicted).
pub const DEFAULT_SUGGESTION_CAP: usize = 5;

/// Default limit on the connect-phase handshake. A stalled negotiation forces
/// a `Failed` transition instead of hanging indefinitely.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 20;

/// Default HTTPS endpoint for the direct variant's offer/answer exchange.
pub const DEFAULT_REALTIME_ENDPOINT: &str = "https://api.openai.com/v1/realtime";

/// Default WebSocket endpoint for the direct variant's event channel.
pub const DEFAULT_REALTIME_WS_URL: &str = "wss://api.openai.com/v1/realtime";

/// Errors raised while loading or validating settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),

    /// A variable is present but unparseable or out of range
    #[error("invalid value for {name}: {reason}")]
    Invalid {
        /// Variable name
        name: &'static str,
        /// Why the value was rejected
        reason: String,
    },
}

/// Retry policy with exponential backoff, used for the transcript submission
/// at session end (the one failure mode with real data-loss consequence).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay.
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Calculate the backoff delay for a given retry attempt (1-based).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base = self.initial_delay_ms as f64;
        let delay = base * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::from_millis(delay.min(self.max_delay_ms as f64) as u64)
    }

    /// Whether another attempt is allowed after `attempt` tries.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Settings for one interview session process.
///
/// Contains the collaborator endpoints the session layer talks to, the direct
/// variant's realtime endpoint, and the timing constants of the state machine.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Base URL of the collaborator API (context, credentials, evaluation,
    /// analytics all hang off this host).
    pub collaborator_base_url: String,
    /// Bearer token for collaborator calls, if the deployment requires one.
    pub collaborator_api_key: Option<String>,

    /// HTTPS endpoint the direct variant posts its SDP offer to.
    pub realtime_endpoint: String,
    /// WebSocket endpoint for the direct variant's event channel.
    pub realtime_ws_url: String,

    /// Delay between `Connected` and the single opening turn signal.
    pub greeting_delay: Duration,
    /// Debounce before a completed exchange triggers a coaching request.
    pub coaching_debounce: Duration,
    /// Bound on the suggestion board.
    pub suggestion_cap: usize,
    /// Limit on the connect-phase handshake.
    pub connect_timeout: Duration,
    /// Retry policy for the end-of-session transcript submission.
    pub finalize_retry: RetryPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            collaborator_base_url: String::new(),
            collaborator_api_key: None,
            realtime_endpoint: DEFAULT_REALTIME_ENDPOINT.to_string(),
            realtime_ws_url: DEFAULT_REALTIME_WS_URL.to_string(),
            greeting_delay: Duration::from_millis(DEFAULT_GREETING_DELAY_MS),
            coaching_debounce: Duration::from_millis(DEFAULT_COACHING_DEBOUNCE_MS),
            suggestion_cap: DEFAULT_SUGGESTION_CAP,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            finalize_retry: RetryPolicy::default(),
        }
    }
}

impl SessionSettings {
    /// Load settings from environment variables.
    ///
    /// `INTERVOX_COLLABORATOR_URL` is required; everything else has defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let collaborator_base_url = env::var("INTERVOX_COLLABORATOR_URL")
            .map_err(|_| ConfigError::MissingVar("INTERVOX_COLLABORATOR_URL"))?;

        let settings = Self {
            collaborator_base_url,
            collaborator_api_key: env::var("INTERVOX_COLLABORATOR_API_KEY").ok(),
            realtime_endpoint: env_or("INTERVOX_REALTIME_ENDPOINT", DEFAULT_REALTIME_ENDPOINT),
            realtime_ws_url: env_or("INTERVOX_REALTIME_WS_URL", DEFAULT_REALTIME_WS_URL),
            greeting_delay: Duration::from_millis(parse_var(
                "INTERVOX_GREETING_DELAY_MS",
                DEFAULT_GREETING_DELAY_MS,
            )?),
            coaching_debounce: Duration::from_millis(parse_var(
                "INTERVOX_COACHING_DEBOUNCE_MS",
                DEFAULT_COACHING_DEBOUNCE_MS,
            )?),
            suggestion_cap: parse_var("INTERVOX_SUGGESTION_CAP", DEFAULT_SUGGESTION_CAP)?,
            connect_timeout: Duration::from_secs(parse_var(
                "INTERVOX_CONNECT_TIMEOUT_SECS",
                DEFAULT_CONNECT_TIMEOUT_SECS,
            )?),
            finalize_retry: RetryPolicy::default(),
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collaborator_base_url.is_empty() {
            return Err(ConfigError::MissingVar("INTERVOX_COLLABORATOR_URL"));
        }
        if !self.collaborator_base_url.starts_with("http://")
            && !self.collaborator_base_url.starts_with("https://")
        {
            return Err(ConfigError::Invalid {
                name: "INTERVOX_COLLABORATOR_URL",
                reason: format!("expected an http(s) URL, got {}", self.collaborator_base_url),
            });
        }
        if self.suggestion_cap == 0 {
            return Err(ConfigError::Invalid {
                name: "INTERVOX_SUGGESTION_CAP",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                name: "INTERVOX_CONNECT_TIMEOUT_SECS",
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            name,
            reason: format!("could not parse {raw:?}"),
        }),
        Err(_) => Ok(default),
    }
}
