//! Tool approval gate.
//!
//! Pending requests form a strict arrival-order queue. The head of the queue
//! is the single *active* request presented for a decision; it carries a
//! countdown that [`ApprovalGate::tick`] decrements once per second. Queued
//! requests wait with their full timeout until they become active.
//!
//! Every request resolves exactly once. Resolved ids are remembered so a late
//! decision or a stale timer tick is rejected instead of re-resolving.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::models::approval::{ApprovalRequest, Decision, SavedPreference};
use crate::{AppError, Result};

/// Number of resolved request ids kept for duplicate detection.
pub const RESOLVED_HISTORY_CAPACITY: usize = 1024;

/// A request waiting in the gate.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingApproval {
    /// The request as received.
    pub request: ApprovalRequest,
    /// Seconds left before the request times out.
    pub remaining_seconds: u64,
}

/// Outcome of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Request identifier.
    pub request_id: String,
    /// Backend tool call id.
    pub tool_call_id: String,
    /// Tool name.
    pub tool_name: String,
    /// Agent that raised the call, if any.
    pub agent_id: Option<String>,
    /// Applied decision.
    pub decision: Decision,
    /// Resolved from a saved preference without prompting.
    pub automatic: bool,
}

impl Resolution {
    fn new(request: &ApprovalRequest, decision: Decision, automatic: bool) -> Self {
        Self {
            request_id: request.id.clone(),
            tool_call_id: request.tool_call.id.clone(),
            tool_name: request.tool_call.tool_name.clone(),
            agent_id: request.agent_id.clone(),
            decision,
            automatic,
        }
    }

    /// Outbound frame telling the backend about this decision.
    #[must_use]
    pub fn to_frame(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "tool_approval",
            "request_id": self.request_id,
            "tool_call_id": self.tool_call_id,
            "decision": self.decision.as_str(),
            "approved": self.decision.is_approval(),
        })
    }
}

/// Result of submitting a request to the gate.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Request was queued at the given zero-based position (0 = active).
    Queued {
        /// Position in the queue.
        position: usize,
    },
    /// A saved preference resolved the request immediately.
    AutoResolved(Resolution),
    /// The id is already pending or resolved; nothing changed.
    Duplicate,
}

/// Queue of pending approval requests with remembered decisions.
#[derive(Debug, Default)]
pub struct ApprovalGate {
    queue: VecDeque<PendingApproval>,
    preferences: HashMap<String, SavedPreference>,
    resolved: HashSet<String>,
    resolved_order: VecDeque<String>,
}

impl ApprovalGate {
    /// Empty gate with no saved preferences.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a new request.
    ///
    /// A saved preference for the tool resolves it on the spot; otherwise it
    /// joins the back of the queue.
    pub fn submit(&mut self, request: ApprovalRequest) -> Submission {
        let duplicate = self.resolved.contains(&request.id)
            || self.queue.iter().any(|p| p.request.id == request.id);
        if duplicate {
            debug!(request_id = %request.id, "approval gate: duplicate request ignored");
            return Submission::Duplicate;
        }

        if let Some(pref) = self.preferences.get(&request.tool_call.tool_name) {
            info!(
                request_id = %request.id,
                tool = %request.tool_call.tool_name,
                decision = pref.decision.as_str(),
                "approval gate: resolved from saved preference"
            );
            let resolution = Resolution::new(&request, pref.decision, true);
            self.remember_resolved(request.id);
            return Submission::AutoResolved(resolution);
        }

        let position = self.queue.len();
        info!(
            request_id = %request.id,
            tool = %request.tool_call.tool_name,
            position,
            "approval gate: request queued"
        );
        self.queue.push_back(PendingApproval {
            remaining_seconds: request.timeout_seconds,
            request,
        });
        Submission::Queued { position }
    }

    /// The request currently presented for a decision.
    #[must_use]
    pub fn active(&self) -> Option<&PendingApproval> {
        self.queue.front()
    }

    /// Requests waiting behind the active one, in arrival order.
    pub fn queued(&self) -> impl Iterator<Item = &PendingApproval> {
        self.queue.iter().skip(1)
    }

    /// Number of unresolved requests, active included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether no request is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Whether `request_id` has already been resolved.
    ///
    /// Only the last [`RESOLVED_HISTORY_CAPACITY`] resolutions are remembered.
    #[must_use]
    pub fn is_resolved(&self, request_id: &str) -> bool {
        self.resolved.contains(request_id)
    }

    /// Apply an operator decision to the active request.
    ///
    /// `Approve`/`Deny` resolve only the active request and, with
    /// `remember`, save a preference for its tool. `ApproveAll`/`DenyAll`
    /// resolve the active request and drain the rest of the queue, each
    /// request resolving as a plain `Approve`/`Deny`. Returned resolutions
    /// are in queue order.
    ///
    /// # Errors
    ///
    /// - [`AppError::AlreadyResolved`] if the request was resolved before.
    /// - [`AppError::InvalidState`] if the request is queued but not active,
    ///   or `decision` is `Timeout` (reserved for the countdown).
    /// - [`AppError::NotFound`] if the id is unknown.
    pub fn decide(
        &mut self,
        request_id: &str,
        decision: Decision,
        remember: bool,
    ) -> Result<Vec<Resolution>> {
        if self.resolved.contains(request_id) {
            return Err(AppError::AlreadyResolved(format!(
                "approval request {request_id}"
            )));
        }
        if decision == Decision::Timeout {
            return Err(AppError::InvalidState(
                "timeout is applied by the countdown only".into(),
            ));
        }
        match self.queue.front() {
            Some(active) if active.request.id == request_id => {}
            _ if self.queue.iter().any(|p| p.request.id == request_id) => {
                return Err(AppError::InvalidState(format!(
                    "approval request {request_id} is queued, not active"
                )));
            }
            _ => {
                return Err(AppError::NotFound(format!(
                    "approval request {request_id}"
                )))
            }
        }

        let mut resolutions = Vec::new();
        match decision {
            Decision::Approve | Decision::Deny => {
                if let Some(active) = self.queue.pop_front() {
                    if remember {
                        self.save_preference(&active.request.tool_call.tool_name, decision);
                    }
                    resolutions.push(self.finish(&active.request, decision));
                }
            }
            Decision::ApproveAll | Decision::DenyAll => {
                if remember {
                    warn!(
                        decision = decision.as_str(),
                        "approval gate: remember ignored for bulk decisions"
                    );
                }
                let applied = if decision == Decision::ApproveAll {
                    Decision::Approve
                } else {
                    Decision::Deny
                };
                let drained: Vec<PendingApproval> = self.queue.drain(..).collect();
                for pending in &drained {
                    resolutions.push(self.finish(&pending.request, applied));
                }
            }
            Decision::Timeout => {}
        }

        Ok(resolutions)
    }

    /// Advance the active request's countdown by one second.
    ///
    /// `request_id` names the request the ticking timer was armed for; a tick
    /// for any other request is stale and ignored. Returns the `Timeout`
    /// resolution when the countdown reaches zero.
    pub fn tick(&mut self, request_id: &str) -> Option<Resolution> {
        let active = self.queue.front_mut()?;
        if active.request.id != request_id {
            debug!(request_id, "approval gate: stale countdown tick ignored");
            return None;
        }

        active.remaining_seconds = active.remaining_seconds.saturating_sub(1);
        if active.remaining_seconds > 0 {
            return None;
        }

        let expired = self.queue.pop_front()?;
        warn!(
            request_id = %expired.request.id,
            tool = %expired.request.tool_call.tool_name,
            "approval gate: request timed out"
        );
        Some(self.finish(&expired.request, Decision::Timeout))
    }

    /// Saved preference for `tool_name`, if any.
    #[must_use]
    pub fn preference(&self, tool_name: &str) -> Option<&SavedPreference> {
        self.preferences.get(tool_name)
    }

    /// All saved preferences.
    pub fn preferences(&self) -> impl Iterator<Item = &SavedPreference> {
        self.preferences.values()
    }

    /// Forget the saved preference for `tool_name`. Returns whether one existed.
    pub fn clear_preference(&mut self, tool_name: &str) -> bool {
        self.preferences.remove(tool_name).is_some()
    }

    /// Forget every saved preference.
    pub fn clear_preferences(&mut self) {
        self.preferences.clear();
    }

    fn save_preference(&mut self, tool_name: &str, decision: Decision) {
        info!(
            tool = tool_name,
            decision = decision.as_str(),
            "approval gate: preference saved"
        );
        self.preferences.insert(
            tool_name.to_owned(),
            SavedPreference {
                tool_name: tool_name.to_owned(),
                decision,
                saved_at: Utc::now(),
            },
        );
    }

    fn finish(&mut self, request: &ApprovalRequest, decision: Decision) -> Resolution {
        self.remember_resolved(request.id.clone());
        Resolution::new(request, decision, false)
    }

    /// Record `id` as resolved, forgetting the oldest id once the history is full.
    fn remember_resolved(&mut self, id: String) {
        if !self.resolved.insert(id.clone()) {
            return;
        }
        self.resolved_order.push_back(id);
        if self.resolved_order.len() > RESOLVED_HISTORY_CAPACITY {
            if let Some(oldest) = self.resolved_order.pop_front() {
                self.resolved.remove(&oldest);
            }
        }
    }
}
