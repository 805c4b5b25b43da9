//! Console configuration parsing and validation.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Which transport the stream session controller uses for the chat endpoint.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StreamTransport {
    /// Persistent bidirectional socket, one frame per logical event.
    #[default]
    Websocket,
    /// Chunked HTTP POST carrying `data: <json>` lines.
    Http,
}

/// Chat stream endpoint settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StreamConfig {
    /// Endpoint path relative to `base_url`.
    #[serde(default = "default_stream_path")]
    pub path: String,
    /// Transport strategy for the chat endpoint.
    #[serde(default)]
    pub transport: StreamTransport,
    /// Model identifier sent with every request.
    pub model: String,
    /// Working directory forwarded to the backend agent, if any.
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Whether the agent may use tools.
    #[serde(default = "default_true")]
    pub tools_enabled: bool,
}

/// Roundtable endpoint settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RoundtableConfig {
    /// Path prefix; the session id is appended as the final segment.
    #[serde(default = "default_roundtable_path")]
    pub path: String,
}

impl Default for RoundtableConfig {
    fn default() -> Self {
        Self {
            path: default_roundtable_path(),
        }
    }
}

/// Event subscription endpoint and reconnect policy.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EventsConfig {
    /// Shared events endpoint path.
    #[serde(default = "default_events_path")]
    pub path: String,
    /// Reconnect automatically after an unexpected close.
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    /// First reconnect delay.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound for the doubling reconnect delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Number of most recent events retained in memory.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            path: default_events_path(),
            auto_reconnect: true,
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            history_capacity: default_history_capacity(),
        }
    }
}

impl EventsConfig {
    /// First reconnect delay as a [`Duration`].
    #[must_use]
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Reconnect delay cap as a [`Duration`].
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Tool approval defaults.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ApprovalConfig {
    /// Countdown used when a request arrives without `timeout_seconds`.
    #[serde(default = "default_approval_timeout")]
    pub default_timeout_seconds: u64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: default_approval_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_stream_path() -> String {
    "/ws/chat".into()
}

fn default_roundtable_path() -> String {
    "/ws/roundtable".into()
}

fn default_events_path() -> String {
    "/ws/events".into()
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_history_capacity() -> usize {
    100
}

fn default_approval_timeout() -> u64 {
    60
}

/// Top-level configuration parsed from `console.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ConsoleConfig {
    /// Backend base URL (`http`, `https`, `ws` or `wss`).
    pub base_url: String,
    /// Chat stream settings.
    pub stream: StreamConfig,
    /// Roundtable settings.
    #[serde(default)]
    pub roundtable: RoundtableConfig,
    /// Event subscription settings.
    #[serde(default)]
    pub events: EventsConfig,
    /// Tool approval defaults.
    #[serde(default)]
    pub approvals: ApprovalConfig,
}

impl ConsoleConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<()> {
        let scheme_ok = ["http://", "https://", "ws://", "wss://"]
            .iter()
            .any(|scheme| self.base_url.starts_with(scheme));
        if !scheme_ok {
            return Err(AppError::Config(format!(
                "base_url must use http, https, ws or wss: {}",
                self.base_url
            )));
        }
        self.base_url = self.base_url.trim_end_matches('/').to_owned();

        if self.stream.model.trim().is_empty() {
            return Err(AppError::Config("stream.model must not be empty".into()));
        }

        if self.events.initial_delay_ms == 0 {
            return Err(AppError::Config(
                "events.initial_delay_ms must be greater than zero".into(),
            ));
        }

        if self.events.max_delay_ms < self.events.initial_delay_ms {
            return Err(AppError::Config(
                "events.max_delay_ms must not be less than events.initial_delay_ms".into(),
            ));
        }

        if self.events.history_capacity == 0 {
            return Err(AppError::Config(
                "events.history_capacity must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
