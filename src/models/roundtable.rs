//! Roundtable transcript model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::message::Role;

/// Recipient of an operator message in a roundtable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A single named agent.
    Agent(String),
    /// Both agents of a two-agent roundtable.
    Both,
    /// Every participating agent.
    All,
}

impl Target {
    /// Wire representation used in the `target` field.
    #[must_use]
    pub fn as_wire(&self) -> &str {
        match self {
            Self::Agent(name) => name,
            Self::Both => "both",
            Self::All => "all",
        }
    }

    /// Parse the wire representation.
    #[must_use]
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "both" => Self::Both,
            "all" => Self::All,
            other => Self::Agent(other.to_owned()),
        }
    }
}

/// One message in a roundtable transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundtableMessage {
    /// Locally generated identifier.
    pub id: String,
    /// Speaker role.
    pub role: Role,
    /// Agent that spoke, `None` for operator turns.
    pub agent_type: Option<String>,
    /// Visible content, append-only while streaming.
    pub content: String,
    /// Hidden reasoning, append-only while streaming.
    pub thinking: Option<String>,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Still receiving chunks.
    pub is_streaming: bool,
    /// Tokens reported by `message_complete`.
    pub tokens: Option<u64>,
    /// Operator message recipient, wire form.
    pub target: Option<String>,
}

impl RoundtableMessage {
    /// Operator message addressed to `target`.
    #[must_use]
    pub fn user(content: impl Into<String>, target: &Target) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            agent_type: None,
            content: content.into(),
            thinking: None,
            timestamp: Utc::now(),
            is_streaming: false,
            tokens: None,
            target: Some(target.as_wire().to_owned()),
        }
    }

    /// Empty streaming message for `agent`.
    #[must_use]
    pub fn streaming(agent: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Assistant,
            agent_type: Some(agent.to_owned()),
            content: String::new(),
            thinking: None,
            timestamp: Utc::now(),
            is_streaming: true,
            tokens: None,
            target: None,
        }
    }
}
