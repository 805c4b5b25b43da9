//! Wire protocol of the chat stream endpoint.
//!
//! # Inbound frame types
//!
//! | `type`             | Maps to                          |
//! |--------------------|----------------------------------|
//! | `connected`        | [`StreamFrame::Connected`]       |
//! | `thinking`         | [`StreamFrame::Thinking`]        |
//! | `content`          | [`StreamFrame::Content`]         |
//! | `tool_use`         | [`StreamFrame::ToolUse`]         |
//! | `tool_result`      | [`StreamFrame::ToolResult`]      |
//! | `done`             | [`StreamFrame::Done`]            |
//! | `cancelled`        | [`StreamFrame::Cancelled`]       |
//! | `error`            | [`StreamFrame::Error`]           |
//! | `approval_request` | [`StreamFrame::ApprovalRequest`] |
//! | *(any other)*      | Skipped; logged at `DEBUG`       |

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::approval;
use crate::models::approval::ApprovalRequest;
use crate::models::message::{ConversationMessage, Role};
use crate::{AppError, Result};

/// Completion metadata carried by `done` and `cancelled`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Completion {
    /// Prompt tokens.
    #[serde(default)]
    pub input_tokens: Option<u64>,
    /// Completion tokens.
    #[serde(default)]
    pub output_tokens: Option<u64>,
    /// Output was cut short by the backend.
    #[serde(default)]
    pub truncated: Option<bool>,
    /// Model that produced the output.
    #[serde(default)]
    pub model: Option<String>,
    /// Provider that served the model.
    #[serde(default)]
    pub provider: Option<String>,
    /// Agent that produced the output.
    #[serde(default)]
    pub agent_id: Option<String>,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    /// Backend acknowledged the request.
    Connected {
        /// Session id, when the backend assigned one.
        session_id: Option<String>,
    },
    /// Hidden reasoning delta.
    Thinking(String),
    /// Visible content delta.
    Content(String),
    /// Tool invocation started.
    ToolUse {
        /// Tool call id.
        id: String,
        /// Tool name.
        name: String,
        /// Tool input.
        input: serde_json::Value,
    },
    /// Tool invocation finished.
    ToolResult {
        /// Tool call id matching an earlier `tool_use`.
        id: String,
        /// Tool output.
        result: serde_json::Value,
        /// Tool reported a failure.
        is_error: bool,
    },
    /// Response complete.
    Done(Completion),
    /// Response stopped after a cancel request.
    Cancelled(Completion),
    /// Backend-reported failure.
    Error(String),
    /// Tool call requires an operator decision.
    ApprovalRequest(ApprovalRequest),
}

/// Top-level frame envelope.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(flatten)]
    params: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ConnectedParams {
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TextParams {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ToolUseParams {
    id: String,
    name: String,
    #[serde(default)]
    input: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ToolResultParams {
    #[serde(alias = "tool_use_id")]
    id: String,
    #[serde(default, alias = "output")]
    result: serde_json::Value,
    #[serde(default)]
    is_error: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorParams {
    #[serde(alias = "error")]
    message: String,
}

/// Parse one raw frame.
///
/// # Return value
///
/// - `Ok(Some(frame))` for a recognised, complete frame.
/// - `Ok(None)` for a blank payload or an unknown `type` (logged at `DEBUG`).
/// - `Err(AppError::Decode(..))` for malformed JSON or a known type with a
///   missing field.
///
/// # Errors
///
/// See above.
pub fn parse_frame(raw: &str, default_approval_timeout: u64) -> Result<Option<StreamFrame>> {
    if raw.trim().is_empty() {
        return Ok(None);
    }

    let envelope: Envelope =
        serde_json::from_str(raw).map_err(|e| AppError::Decode(format!("malformed json: {e}")))?;
    let kind = envelope.kind;
    let params = serde_json::Value::Object(envelope.params);

    let frame = match kind.as_str() {
        "connected" => {
            let p: ConnectedParams = params_of(&kind, params)?;
            StreamFrame::Connected {
                session_id: p.session_id,
            }
        }
        "thinking" => StreamFrame::Thinking(params_of::<TextParams>(&kind, params)?.content),
        "content" => StreamFrame::Content(params_of::<TextParams>(&kind, params)?.content),
        "tool_use" => {
            let p: ToolUseParams = params_of(&kind, params)?;
            StreamFrame::ToolUse {
                id: p.id,
                name: p.name,
                input: p.input,
            }
        }
        "tool_result" => {
            let p: ToolResultParams = params_of(&kind, params)?;
            StreamFrame::ToolResult {
                id: p.id,
                result: p.result,
                is_error: p.is_error,
            }
        }
        "done" => StreamFrame::Done(params_of(&kind, params)?),
        "cancelled" => StreamFrame::Cancelled(params_of(&kind, params)?),
        "error" => StreamFrame::Error(params_of::<ErrorParams>(&kind, params)?.message),
        "approval_request" => StreamFrame::ApprovalRequest(approval::parse_request(
            params,
            default_approval_timeout,
        )?),
        other => {
            debug!(frame_type = other, "stream protocol: skipping unknown frame type");
            return Ok(None);
        }
    };

    Ok(Some(frame))
}

fn params_of<T: serde::de::DeserializeOwned>(kind: &str, params: serde_json::Value) -> Result<T> {
    serde_json::from_value(params)
        .map_err(|e| AppError::Decode(format!("missing required field: {kind} params: {e}")))
}

/// One history entry of an outbound request.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WireMessage {
    /// Speaker role.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl From<&ConversationMessage> for WireMessage {
    fn from(message: &ConversationMessage) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// Outbound frames on the chat stream endpoint.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamRequest {
    /// Start a response for the full conversation history.
    Request {
        /// Model identifier.
        model: String,
        /// Full history, oldest first, ending with the new user turn.
        messages: Vec<WireMessage>,
        /// Session to continue, once the backend has assigned one.
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        /// Working directory for the agent.
        #[serde(skip_serializing_if = "Option::is_none")]
        working_dir: Option<String>,
        /// Whether tools are enabled.
        #[serde(skip_serializing_if = "Option::is_none")]
        tools_enabled: Option<bool>,
    },
    /// Stop the in-flight response.
    Cancel {
        /// Session being cancelled, if known.
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
}

impl StreamRequest {
    /// Serialise to a single-line JSON frame.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Decode`] if serialisation fails.
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
