//! Conversation transcript model shared by the stream and roundtable controllers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Speaker role of a conversation message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Operator turn.
    User,
    /// Agent turn.
    Assistant,
    /// System or instruction text.
    System,
}

/// Lifecycle status of a tool execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    /// Invocation seen, result pending.
    Running,
    /// Tool returned successfully.
    Complete,
    /// Tool reported a failure.
    Error,
}

/// A tool invocation owned by the assistant message that triggered it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolExecution {
    /// Backend-assigned tool call id used to match the result.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Tool input as sent by the agent.
    pub input: serde_json::Value,
    /// Current status.
    pub status: ToolStatus,
    /// Tool output, once the matching result arrives.
    pub result: Option<serde_json::Value>,
    /// When the invocation frame arrived.
    pub started_at: DateTime<Utc>,
    /// When the result frame arrived.
    pub completed_at: Option<DateTime<Utc>>,
}

impl ToolExecution {
    /// Create a running execution record.
    #[must_use]
    pub fn running(id: String, name: String, input: serde_json::Value) -> Self {
        Self {
            id,
            name,
            input,
            status: ToolStatus::Running,
            result: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Transition to `complete` or `error` and attach the result.
    pub fn finish(&mut self, result: serde_json::Value, is_error: bool) {
        self.status = if is_error {
            ToolStatus::Error
        } else {
            ToolStatus::Complete
        };
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
    }
}

/// One message in a single-agent conversation transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationMessage {
    /// Locally generated identifier.
    pub id: String,
    /// Speaker role.
    pub role: Role,
    /// Visible content; append-only while streaming.
    pub content: String,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Agent that produced the message, when known.
    pub agent_id: Option<String>,
    /// Provider reported by the backend on completion.
    pub agent_provider: Option<String>,
    /// Model reported by the backend on completion.
    pub model: Option<String>,
    /// Hidden reasoning; append-only while streaming.
    pub thinking: Option<String>,
    /// Tool invocations triggered by this message.
    #[serde(default)]
    pub tool_executions: Vec<ToolExecution>,
    /// Backend truncated the output (e.g. hit a token limit).
    pub truncated: Option<bool>,
    /// Prompt tokens reported on completion.
    pub input_tokens: Option<u64>,
    /// Completion tokens reported on completion.
    pub output_tokens: Option<u64>,
    /// Content was edited after completion.
    #[serde(default)]
    pub edited: bool,
    /// Prior contents, oldest first.
    #[serde(default)]
    pub previous_versions: Vec<String>,
    /// Still receiving frames.
    #[serde(default)]
    pub is_streaming: bool,
    /// Stream ended because of a user cancellation.
    #[serde(default)]
    pub cancelled: bool,
}

impl ConversationMessage {
    /// Create a completed message with the given role and content.
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            agent_id: None,
            agent_provider: None,
            model: None,
            thinking: None,
            tool_executions: Vec::new(),
            truncated: None,
            input_tokens: None,
            output_tokens: None,
            edited: false,
            previous_versions: Vec::new(),
            is_streaming: false,
            cancelled: false,
        }
    }

    /// Create an empty assistant placeholder that is still streaming.
    #[must_use]
    pub fn placeholder() -> Self {
        Self {
            is_streaming: true,
            ..Self::new(Role::Assistant, String::new())
        }
    }

    /// Append to the hidden reasoning buffer.
    pub fn push_thinking(&mut self, delta: &str) {
        self.thinking.get_or_insert_with(String::new).push_str(delta);
    }

    /// Replace the content, keeping the prior content in `previous_versions`.
    pub fn edit(&mut self, new_content: impl Into<String>) {
        let previous = std::mem::replace(&mut self.content, new_content.into());
        self.previous_versions.push(previous);
        self.edited = true;
    }

    /// Whether any content, reasoning or tool activity was recorded.
    #[must_use]
    pub fn has_output(&self) -> bool {
        !self.content.is_empty() || self.thinking.is_some() || !self.tool_executions.is_empty()
    }

    /// Find a tool execution by its backend id.
    pub fn tool_mut(&mut self, tool_id: &str) -> Option<&mut ToolExecution> {
        self.tool_executions.iter_mut().find(|t| t.id == tool_id)
    }
}
