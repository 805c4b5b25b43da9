//! Tool approval request model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Risk classification for a gated tool call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Read-only or otherwise harmless.
    #[default]
    Low,
    /// Modifies local state.
    Medium,
    /// Destructive or externally visible.
    High,
}

/// The tool invocation awaiting a decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Backend tool call id.
    pub id: String,
    /// Tool name; preferences are keyed by this.
    #[serde(alias = "toolName")]
    pub tool_name: String,
    /// Tool arguments.
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// Risk classification.
    #[serde(default, alias = "riskLevel")]
    pub risk_level: RiskLevel,
    /// When the backend raised the call.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// A gated tool call waiting for an operator decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalRequest {
    /// Request identifier.
    pub id: String,
    /// Tool call under review.
    pub tool_call: ToolCall,
    /// Countdown start value.
    pub timeout_seconds: u64,
    /// Agent that raised the call, in multi-agent conversations.
    #[serde(default)]
    pub agent_id: Option<String>,
}

/// Decision applied to an approval request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Allow this request.
    Approve,
    /// Reject this request.
    Deny,
    /// Allow this request and every queued one.
    ApproveAll,
    /// Reject this request and every queued one.
    DenyAll,
    /// Countdown expired; treated as a deny upstream.
    Timeout,
}

impl Decision {
    /// Whether the tool call may proceed.
    #[must_use]
    pub fn is_approval(self) -> bool {
        matches!(self, Self::Approve | Self::ApproveAll)
    }

    /// Wire name of the decision.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Deny => "deny",
            Self::ApproveAll => "approve_all",
            Self::DenyAll => "deny_all",
            Self::Timeout => "timeout",
        }
    }
}

/// A remembered decision that bypasses future prompts for one tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SavedPreference {
    /// Tool name the preference applies to.
    pub tool_name: String,
    /// `Approve` or `Deny`.
    pub decision: Decision,
    /// When the preference was recorded.
    pub saved_at: DateTime<Utc>,
}
