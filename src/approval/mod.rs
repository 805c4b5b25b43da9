//! Human-in-the-loop approval for gated tool calls.
//!
//! [`ApprovalGate`](gate::ApprovalGate) is a pure state machine: queue,
//! countdown bookkeeping and remembered decisions. [`Approvals`] pairs it
//! with the [`Countdown`](countdown::Countdown) ticker so a controller can
//! race the next tick against inbound frames in one `select!`.

pub mod countdown;
pub mod gate;

use serde::Deserialize;

use crate::models::approval::{ApprovalRequest, Decision, ToolCall};
use crate::{AppError, Result};

use self::countdown::Countdown;
use self::gate::{ApprovalGate, PendingApproval, Resolution, Submission};

/// Wire shape of an `approval_request` frame.
#[derive(Debug, Deserialize)]
struct ApprovalRequestParams {
    id: String,
    #[serde(alias = "toolCall")]
    tool_call: ToolCall,
    #[serde(default, alias = "timeoutSeconds")]
    timeout_seconds: Option<u64>,
    #[serde(default, alias = "agentId", alias = "agent")]
    agent_id: Option<String>,
}

/// Parse the payload of an `approval_request` frame.
///
/// `default_timeout` applies when the frame carries no `timeout_seconds`.
///
/// # Errors
///
/// Returns [`AppError::Decode`] if a required field is missing.
pub fn parse_request(params: serde_json::Value, default_timeout: u64) -> Result<ApprovalRequest> {
    let params: ApprovalRequestParams = serde_json::from_value(params)
        .map_err(|e| AppError::Decode(format!("approval_request params: {e}")))?;
    Ok(ApprovalRequest {
        id: params.id,
        tool_call: params.tool_call,
        timeout_seconds: params.timeout_seconds.unwrap_or(default_timeout),
        agent_id: params.agent_id,
    })
}

/// Gate plus the countdown ticker armed for its active request.
#[derive(Debug, Default)]
pub struct Approvals {
    gate: ApprovalGate,
    countdown: Countdown,
}

impl Approvals {
    /// Empty gate, disarmed ticker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read access to the gate.
    #[must_use]
    pub fn gate(&self) -> &ApprovalGate {
        &self.gate
    }

    /// The request currently presented for a decision.
    #[must_use]
    pub fn active(&self) -> Option<&PendingApproval> {
        self.gate.active()
    }

    /// Submit a request and re-arm the ticker.
    pub fn submit(&mut self, request: ApprovalRequest) -> Submission {
        let submission = self.gate.submit(request);
        self.sync();
        submission
    }

    /// Apply an operator decision and re-arm the ticker.
    ///
    /// # Errors
    ///
    /// See [`ApprovalGate::decide`].
    pub fn decide(
        &mut self,
        request_id: &str,
        decision: Decision,
        remember: bool,
    ) -> Result<Vec<Resolution>> {
        let resolutions = self.gate.decide(request_id, decision, remember)?;
        self.sync();
        Ok(resolutions)
    }

    /// Apply one countdown tick and re-arm the ticker.
    pub fn tick(&mut self, request_id: &str) -> Option<Resolution> {
        let resolution = self.gate.tick(request_id);
        self.sync();
        resolution
    }

    /// Forget the saved preference for `tool_name`.
    pub fn clear_preference(&mut self, tool_name: &str) -> bool {
        self.gate.clear_preference(tool_name)
    }

    /// Wait for the next countdown tick; never completes with no active request.
    pub async fn next_tick(&mut self) -> String {
        self.countdown.tick().await
    }

    /// Request id the ticker is currently armed for.
    #[must_use]
    pub fn armed_for(&self) -> Option<&str> {
        self.countdown.armed_for()
    }

    fn sync(&mut self) {
        let active = self.gate.active().map(|p| p.request.id.as_str());
        self.countdown.sync(active);
    }
}
