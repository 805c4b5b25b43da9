//! Session telemetry events observed by dashboards.

use serde::{Deserialize, Serialize};

/// Closed set of session lifecycle event kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A session started.
    SessionStart,
    /// A message was added to a session.
    Message,
    /// An agent invoked a tool.
    ToolUse,
    /// A session or turn completed.
    Complete,
    /// A session reported an error.
    Error,
}

impl EventType {
    /// Wire name of the event type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionStart => "session_start",
            Self::Message => "message",
            Self::ToolUse => "tool_use",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    /// Parse a wire name; `None` for unknown types.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "session_start" => Some(Self::SessionStart),
            "message" => Some(Self::Message),
            "tool_use" => Some(Self::ToolUse),
            "complete" => Some(Self::Complete),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Payload of a `session_start` event.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionStartData {
    /// Agent that owns the session.
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Provider backing the agent.
    #[serde(default)]
    pub provider: Option<String>,
    /// Model in use.
    #[serde(default)]
    pub model: Option<String>,
}

/// Payload of a `message` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageData {
    /// Speaker role, as reported by the backend.
    pub role: String,
    /// Message text.
    pub content: String,
}

/// Payload of a `tool_use` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolUseData {
    /// Tool name.
    pub tool_name: String,
    /// Tool input.
    #[serde(default)]
    pub input: serde_json::Value,
    /// Tool call id, when the backend provides one.
    #[serde(default)]
    pub tool_id: Option<String>,
}

/// Payload of a `complete` event.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CompleteData {
    /// Prompt tokens for the completed turn.
    #[serde(default)]
    pub input_tokens: Option<u64>,
    /// Completion tokens for the completed turn.
    #[serde(default)]
    pub output_tokens: Option<u64>,
    /// Wall-clock duration of the turn.
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

/// Payload of an `error` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorData {
    /// Error description.
    pub message: String,
}

/// Event payload, tagged by [`EventType`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventData {
    /// `session_start` payload.
    SessionStart(SessionStartData),
    /// `message` payload.
    Message(MessageData),
    /// `tool_use` payload.
    ToolUse(ToolUseData),
    /// `complete` payload.
    Complete(CompleteData),
    /// `error` payload.
    Error(ErrorData),
}

impl EventData {
    /// Event type this payload belongs to.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self {
            Self::SessionStart(_) => EventType::SessionStart,
            Self::Message(_) => EventType::Message,
            Self::ToolUse(_) => EventType::ToolUse,
            Self::Complete(_) => EventType::Complete,
            Self::Error(_) => EventType::Error,
        }
    }
}

/// One session lifecycle event.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    /// Session the event belongs to.
    pub session_id: String,
    /// Backend timestamp, passed through verbatim.
    pub timestamp: String,
    /// Typed payload.
    pub data: EventData,
}

impl SessionEvent {
    /// Event type derived from the payload.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        self.data.event_type()
    }
}
