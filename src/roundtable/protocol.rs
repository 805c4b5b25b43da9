//! Wire protocol of the roundtable socket.
//!
//! Inbound frames are tagged by `type`; agent-scoped frames carry the
//! speaking agent in `agent`. Unknown types are skipped.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::approval;
use crate::models::approval::ApprovalRequest;
use crate::models::roundtable::Target;
use crate::{AppError, Result};

/// A decoded inbound roundtable frame.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundtableFrame {
    /// Backend accepted the connection.
    Connected {
        /// Session the roundtable belongs to.
        session_id: Option<String>,
    },
    /// `agent` starts a new message.
    TurnStart {
        /// Speaking agent.
        agent: String,
    },
    /// Visible content from `agent`.
    Chunk {
        /// Speaking agent.
        agent: String,
        /// Appended text.
        content: String,
    },
    /// Reasoning from `agent`.
    Thinking {
        /// Speaking agent.
        agent: String,
        /// Appended text.
        content: String,
    },
    /// `agent` finished its message.
    MessageComplete {
        /// Speaking agent.
        agent: String,
        /// Tokens reported for the message.
        tokens: Option<u64>,
    },
    /// Every agent has taken its turn.
    VolleyComplete {
        /// Agents in the order they spoke.
        speaker_order: Vec<String>,
    },
    /// Backend-reported failure.
    Error(String),
    /// Backend closed the roundtable.
    Closed {
        /// Close reason, when given.
        reason: Option<String>,
    },
    /// Tool call requires an operator decision.
    ApprovalRequest(ApprovalRequest),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    agent: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tokens: Option<u64>,
    #[serde(default)]
    speaker_order: Option<Vec<String>>,
    #[serde(default, alias = "error")]
    message: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

/// Parse one raw roundtable frame.
///
/// Returns `Ok(None)` for blank payloads and unknown types.
///
/// # Errors
///
/// Returns [`AppError::Decode`] for malformed JSON or a known type missing a
/// required field.
pub fn parse_frame(raw: &str, default_approval_timeout: u64) -> Result<Option<RoundtableFrame>> {
    if raw.trim().is_empty() {
        return Ok(None);
    }

    let envelope: Envelope =
        serde_json::from_str(raw).map_err(|e| AppError::Decode(format!("malformed json: {e}")))?;
    let kind = envelope.kind.as_str();

    let frame = match kind {
        "connected" => RoundtableFrame::Connected {
            session_id: envelope.session_id,
        },
        "turn_start" => RoundtableFrame::TurnStart {
            agent: required(kind, "agent", envelope.agent)?,
        },
        "chunk" => RoundtableFrame::Chunk {
            agent: required(kind, "agent", envelope.agent)?,
            content: required(kind, "content", envelope.content)?,
        },
        "thinking" => RoundtableFrame::Thinking {
            agent: required(kind, "agent", envelope.agent)?,
            content: required(kind, "content", envelope.content)?,
        },
        "message_complete" => RoundtableFrame::MessageComplete {
            agent: required(kind, "agent", envelope.agent)?,
            tokens: envelope.tokens,
        },
        "volley_complete" => RoundtableFrame::VolleyComplete {
            speaker_order: envelope.speaker_order.unwrap_or_default(),
        },
        "error" => RoundtableFrame::Error(
            envelope
                .message
                .or(envelope.content)
                .unwrap_or_else(|| "roundtable error".to_owned()),
        ),
        "closed" => RoundtableFrame::Closed {
            reason: envelope.reason.or(envelope.message),
        },
        "approval_request" => {
            let mut params = envelope.rest;
            if let Some(agent) = envelope.agent {
                params.insert("agent_id".into(), serde_json::Value::String(agent));
            }
            RoundtableFrame::ApprovalRequest(approval::parse_request(
                serde_json::Value::Object(params),
                default_approval_timeout,
            )?)
        }
        other => {
            debug!(frame_type = other, "roundtable protocol: skipping unknown frame type");
            return Ok(None);
        }
    };

    Ok(Some(frame))
}

fn required(kind: &str, field: &str, value: Option<String>) -> Result<String> {
    value.ok_or_else(|| AppError::Decode(format!("missing required field: {kind}.{field}")))
}

/// Outbound frames on the roundtable socket.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoundtableRequest {
    /// Operator message.
    Message {
        /// Message text.
        content: String,
        /// Recipient, wire form.
        target: String,
    },
    /// Start the next volley without new operator content.
    Continue,
    /// End the roundtable.
    Close,
}

impl RoundtableRequest {
    /// Operator message addressed to `target`.
    #[must_use]
    pub fn message(content: impl Into<String>, target: &Target) -> Self {
        Self::Message {
            content: content.into(),
            target: target.as_wire().to_owned(),
        }
    }

    /// Serialise to a single-line JSON frame.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Decode`] if serialisation fails.
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
