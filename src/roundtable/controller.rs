//! Multi-agent roundtable controller.
//!
//! Agents speak over one shared connection and their frames may interleave
//! arbitrarily. Partial messages are therefore tracked per agent: `in_flight`
//! maps each speaking agent to the index of its single unfinished message.
//!
//! A message for an agent starts on an explicit `turn_start` frame, or
//! implicitly on the first `chunk`/`thinking` for an agent with nothing in
//! flight. `turn_start` while a message is still open freezes the old one
//! first, so an agent speaking twice in one volley yields two messages.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::approval::gate::{Resolution, Submission};
use crate::approval::Approvals;
use crate::config::ConsoleConfig;
use crate::models::approval::{ApprovalRequest, Decision};
use crate::models::roundtable::{RoundtableMessage, Target};
use crate::roundtable::protocol::{parse_frame, RoundtableFrame, RoundtableRequest};
use crate::transport::{Connection, Connector, Inbound, OpenRequest};
use crate::{AppError, Result};

/// Connection status of a roundtable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundtableStatus {
    /// No connection.
    Disconnected,
    /// Socket opening, not yet acknowledged.
    Connecting,
    /// Connected, no agent speaking.
    Connected,
    /// At least one agent is emitting.
    Streaming,
}

/// What a processed frame or timer tick changed.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundtableUpdate {
    /// Backend acknowledged the connection.
    Connected,
    /// `agent` started a new message.
    TurnStarted {
        /// Speaking agent.
        agent: String,
        /// New message id.
        message_id: String,
    },
    /// Visible content appended for `agent`.
    Chunk {
        /// Speaking agent.
        agent: String,
        /// Message id.
        message_id: String,
        /// Appended text.
        delta: String,
    },
    /// Reasoning appended for `agent`.
    Thinking {
        /// Speaking agent.
        agent: String,
        /// Message id.
        message_id: String,
    },
    /// `agent`'s message was frozen.
    MessageComplete {
        /// Speaking agent.
        agent: String,
        /// Frozen message id.
        message_id: String,
    },
    /// The round finished.
    VolleyComplete {
        /// Agents in speaking order.
        speaker_order: Vec<String>,
    },
    /// Backend reported an error; the roundtable disconnected.
    Failed {
        /// User-visible error message.
        message: String,
    },
    /// The roundtable closed.
    Closed {
        /// Close reason.
        reason: String,
    },
    /// A tool call is waiting for a decision.
    ApprovalRequested {
        /// Approval request id.
        request_id: String,
    },
    /// Approval requests were resolved.
    ApprovalResolved(Vec<Resolution>),
    /// The active approval countdown advanced.
    CountdownTick {
        /// Active request id.
        request_id: String,
        /// Seconds left.
        remaining_seconds: u64,
    },
    /// Frame was ignored.
    Skipped,
}

enum Wakeup {
    Inbound(Inbound),
    Tick(String),
}

/// Controller for one roundtable session.
pub struct Roundtable {
    connector: Arc<dyn Connector>,
    path: String,
    approval_timeout_seconds: u64,
    status: RoundtableStatus,
    session_id: Option<String>,
    messages: Vec<RoundtableMessage>,
    in_flight: HashMap<String, usize>,
    volley_complete: bool,
    speaker_order: Vec<String>,
    error: Option<AppError>,
    connection: Option<Connection>,
    approvals: Approvals,
    outbox: Vec<serde_json::Value>,
}

impl Roundtable {
    /// Disconnected roundtable using the endpoint at `path`.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, path: impl Into<String>) -> Self {
        Self {
            connector,
            path: path.into(),
            approval_timeout_seconds: 60,
            status: RoundtableStatus::Disconnected,
            session_id: None,
            messages: Vec::new(),
            in_flight: HashMap::new(),
            volley_complete: false,
            speaker_order: Vec::new(),
            error: None,
            connection: None,
            approvals: Approvals::new(),
            outbox: Vec::new(),
        }
    }

    /// Roundtable configured from the `[roundtable]` and `[approvals]` sections.
    #[must_use]
    pub fn from_config(connector: Arc<dyn Connector>, config: &ConsoleConfig) -> Self {
        let mut roundtable = Self::new(connector, config.roundtable.path.clone());
        roundtable.approval_timeout_seconds = config.approvals.default_timeout_seconds;
        roundtable
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> RoundtableStatus {
        self.status
    }

    /// Transcript, in creation order.
    #[must_use]
    pub fn messages(&self) -> &[RoundtableMessage] {
        &self.messages
    }

    /// Messages spoken by `agent`.
    pub fn messages_from<'a>(
        &'a self,
        agent: &'a str,
    ) -> impl Iterator<Item = &'a RoundtableMessage> {
        self.messages
            .iter()
            .filter(move |m| m.agent_type.as_deref() == Some(agent))
    }

    /// The unfinished message of `agent`, if any.
    #[must_use]
    pub fn in_flight(&self, agent: &str) -> Option<&RoundtableMessage> {
        self.in_flight.get(agent).and_then(|&i| self.messages.get(i))
    }

    /// Whether the last round finished and a continuation may be requested.
    #[must_use]
    pub fn volley_complete(&self) -> bool {
        self.volley_complete
    }

    /// Speaking order reported by the last `volley_complete`.
    #[must_use]
    pub fn speaker_order(&self) -> &[String] {
        &self.speaker_order
    }

    /// Session the roundtable is connected to.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Last connection failure or backend-reported error.
    #[must_use]
    pub fn error(&self) -> Option<&AppError> {
        self.error.as_ref()
    }

    /// Pending approvals and saved preferences.
    #[must_use]
    pub fn approvals(&self) -> &Approvals {
        &self.approvals
    }

    /// Open the roundtable socket for `session_id`, replacing any live one.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if the socket cannot be opened; the
    /// status returns to `Disconnected`.
    pub async fn connect(&mut self, session_id: &str) -> Result<()> {
        self.teardown().await;
        self.freeze_in_flight();
        self.session_id = Some(session_id.to_owned());
        self.error = None;
        self.volley_complete = false;
        self.status = RoundtableStatus::Connecting;

        let path = format!("{}/{session_id}", self.path.trim_end_matches('/'));
        info!(session_id, %path, "roundtable: connecting");
        match self.connector.open(OpenRequest::path(path)).await {
            Ok(connection) => {
                self.connection = Some(connection);
                Ok(())
            }
            Err(err) => {
                warn!(%err, session_id, "roundtable: connection failed");
                self.error = Some(err.clone());
                self.status = RoundtableStatus::Disconnected;
                Err(err)
            }
        }
    }

    /// Send an operator message to `target` and start a new round.
    ///
    /// # Errors
    ///
    /// - [`AppError::InvalidState`] unless connected, or when `content` is blank.
    /// - [`AppError::Transport`] if the frame cannot be sent.
    pub async fn send_message(&mut self, content: &str, target: Target) -> Result<()> {
        if !matches!(
            self.status,
            RoundtableStatus::Connected | RoundtableStatus::Streaming
        ) {
            return Err(AppError::InvalidState(format!(
                "send_message requires a connected roundtable, current status is {:?}",
                self.status
            )));
        }
        if content.trim().is_empty() {
            return Err(AppError::InvalidState("message content is empty".into()));
        }

        self.messages.push(RoundtableMessage::user(content, &target));
        self.volley_complete = false;
        debug!(target = target.as_wire(), "roundtable: sending message");
        self.send(RoundtableRequest::message(content, &target)).await
    }

    /// Ask the agents for another round without new operator content.
    ///
    /// # Errors
    ///
    /// - [`AppError::InvalidState`] unless the last volley completed.
    /// - [`AppError::Transport`] if the frame cannot be sent.
    pub async fn continue_discussion(&mut self) -> Result<()> {
        if !self.volley_complete {
            return Err(AppError::InvalidState(
                "continue_discussion requires a completed volley".into(),
            ));
        }
        self.volley_complete = false;
        debug!("roundtable: continuing discussion");
        self.send(RoundtableRequest::Continue).await
    }

    /// Send `close`, shut the socket and freeze anything still streaming.
    pub async fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            match RoundtableRequest::Close.to_frame() {
                Ok(frame) => {
                    if let Err(err) = connection.send(frame).await {
                        debug!(%err, "roundtable: close frame not delivered");
                    }
                }
                Err(err) => warn!(%err, "roundtable: failed to encode close frame"),
            }
            connection.close().await;
        }
        self.freeze_in_flight();
        self.status = RoundtableStatus::Disconnected;
        info!(session_id = ?self.session_id, "roundtable: disconnected");
    }

    /// Apply an operator decision to the active approval request.
    ///
    /// # Errors
    ///
    /// See [`ApprovalGate::decide`](crate::approval::gate::ApprovalGate::decide).
    pub async fn resolve_approval(
        &mut self,
        request_id: &str,
        decision: Decision,
        remember: bool,
    ) -> Result<Vec<Resolution>> {
        let resolutions = self.approvals.decide(request_id, decision, remember)?;
        self.outbox.extend(resolutions.iter().map(Resolution::to_frame));
        self.flush_outbox().await;
        Ok(resolutions)
    }

    /// Wait for the next frame, transport close or approval tick and apply it.
    ///
    /// Returns `None` once there is nothing left to wait for. Cancel-safe.
    pub async fn next_update(&mut self) -> Option<RoundtableUpdate> {
        let wakeup = match self.connection.as_mut() {
            Some(connection) => tokio::select! {
                inbound = connection.recv() => Wakeup::Inbound(inbound),
                request_id = self.approvals.next_tick() => Wakeup::Tick(request_id),
            },
            None if self.approvals.armed_for().is_some() => {
                Wakeup::Tick(self.approvals.next_tick().await)
            }
            None => return None,
        };

        let update = match wakeup {
            Wakeup::Inbound(Inbound::Frame(raw)) => self.handle_raw(&raw),
            Wakeup::Inbound(Inbound::Closed { reason }) => self.on_closed(reason),
            Wakeup::Tick(request_id) => self.on_tick(&request_id),
        };
        self.flush_outbox().await;
        Some(update)
    }

    /// Decode and apply one raw frame. Malformed frames are logged and skipped.
    pub fn handle_raw(&mut self, raw: &str) -> RoundtableUpdate {
        match parse_frame(raw, self.approval_timeout_seconds) {
            Ok(Some(frame)) => self.handle_frame(frame),
            Ok(None) => RoundtableUpdate::Skipped,
            Err(err) => {
                warn!(%err, raw_frame = %raw, "roundtable: undecodable frame, skipping");
                RoundtableUpdate::Skipped
            }
        }
    }

    /// Apply one decoded frame.
    pub fn handle_frame(&mut self, frame: RoundtableFrame) -> RoundtableUpdate {
        if self.status == RoundtableStatus::Connecting {
            self.status = RoundtableStatus::Connected;
        }

        match frame {
            RoundtableFrame::Connected { session_id } => {
                if session_id.is_some() {
                    self.session_id = session_id;
                }
                info!(session_id = ?self.session_id, "roundtable: connected");
                RoundtableUpdate::Connected
            }
            RoundtableFrame::TurnStart { agent } => {
                if let Some(previous) = self.in_flight.remove(&agent) {
                    debug!(agent = %agent, "roundtable: new turn closes unfinished message");
                    self.freeze(previous);
                }
                let message_id = self.start_message(&agent);
                RoundtableUpdate::TurnStarted { agent, message_id }
            }
            RoundtableFrame::Chunk { agent, content } => {
                let index = self.message_for(&agent);
                let message = &mut self.messages[index];
                message.content.push_str(&content);
                RoundtableUpdate::Chunk {
                    message_id: message.id.clone(),
                    agent,
                    delta: content,
                }
            }
            RoundtableFrame::Thinking { agent, content } => {
                let index = self.message_for(&agent);
                let message = &mut self.messages[index];
                message.thinking.get_or_insert_with(String::new).push_str(&content);
                RoundtableUpdate::Thinking {
                    message_id: message.id.clone(),
                    agent,
                }
            }
            RoundtableFrame::MessageComplete { agent, tokens } => {
                let Some(index) = self.in_flight.remove(&agent) else {
                    debug!(agent = %agent, "roundtable: completion with no message in flight");
                    return RoundtableUpdate::Skipped;
                };
                self.freeze(index);
                let message = &mut self.messages[index];
                message.tokens = tokens;
                debug!(agent = %agent, ?tokens, "roundtable: message complete");
                RoundtableUpdate::MessageComplete {
                    message_id: message.id.clone(),
                    agent,
                }
            }
            RoundtableFrame::VolleyComplete { speaker_order } => {
                if !self.in_flight.is_empty() {
                    warn!(
                        agents = ?self.in_flight.keys().collect::<Vec<_>>(),
                        "roundtable: volley complete with messages still streaming"
                    );
                    self.freeze_in_flight();
                }
                info!(?speaker_order, "roundtable: volley complete");
                self.volley_complete = true;
                self.speaker_order.clone_from(&speaker_order);
                self.status = RoundtableStatus::Connected;
                RoundtableUpdate::VolleyComplete { speaker_order }
            }
            RoundtableFrame::Error(message) => {
                warn!(error = %message, "roundtable: backend error");
                self.error = Some(AppError::Backend(message.clone()));
                self.shut_down();
                RoundtableUpdate::Failed { message }
            }
            RoundtableFrame::Closed { reason } => {
                let reason = reason.unwrap_or_else(|| "closed by backend".to_owned());
                info!(%reason, "roundtable: closed");
                self.shut_down();
                RoundtableUpdate::Closed { reason }
            }
            RoundtableFrame::ApprovalRequest(request) => self.on_approval_request(request),
        }
    }

    fn on_closed(&mut self, reason: String) -> RoundtableUpdate {
        self.connection = None;
        if self.status != RoundtableStatus::Disconnected {
            info!(%reason, "roundtable: transport closed");
            self.freeze_in_flight();
            self.status = RoundtableStatus::Disconnected;
        }
        RoundtableUpdate::Closed { reason }
    }

    fn on_tick(&mut self, request_id: &str) -> RoundtableUpdate {
        match self.approvals.tick(request_id) {
            Some(resolution) => {
                self.outbox.push(resolution.to_frame());
                RoundtableUpdate::ApprovalResolved(vec![resolution])
            }
            None => match self.approvals.active() {
                Some(active) if active.request.id == request_id => {
                    RoundtableUpdate::CountdownTick {
                        request_id: request_id.to_owned(),
                        remaining_seconds: active.remaining_seconds,
                    }
                }
                _ => RoundtableUpdate::Skipped,
            },
        }
    }

    fn on_approval_request(&mut self, request: ApprovalRequest) -> RoundtableUpdate {
        let request_id = request.id.clone();
        match self.approvals.submit(request) {
            Submission::Queued { .. } => RoundtableUpdate::ApprovalRequested { request_id },
            Submission::AutoResolved(resolution) => {
                self.outbox.push(resolution.to_frame());
                RoundtableUpdate::ApprovalResolved(vec![resolution])
            }
            Submission::Duplicate => RoundtableUpdate::Skipped,
        }
    }

    /// Index of `agent`'s unfinished message, starting one if needed.
    fn message_for(&mut self, agent: &str) -> usize {
        if let Some(&index) = self.in_flight.get(agent) {
            return index;
        }
        self.start_message(agent);
        self.messages.len() - 1
    }

    fn start_message(&mut self, agent: &str) -> String {
        let message = RoundtableMessage::streaming(agent);
        let id = message.id.clone();
        self.in_flight.insert(agent.to_owned(), self.messages.len());
        self.messages.push(message);
        self.status = RoundtableStatus::Streaming;
        debug!(agent, message_id = %id, "roundtable: message started");
        id
    }

    fn freeze(&mut self, index: usize) {
        if let Some(message) = self.messages.get_mut(index) {
            message.is_streaming = false;
        }
    }

    fn freeze_in_flight(&mut self) {
        let indices: Vec<usize> = self.in_flight.drain().map(|(_, i)| i).collect();
        for index in indices {
            self.freeze(index);
        }
    }

    fn shut_down(&mut self) {
        self.freeze_in_flight();
        self.status = RoundtableStatus::Disconnected;
        if let Some(connection) = self.connection.take() {
            connection.abort();
        }
    }

    async fn send(&mut self, request: RoundtableRequest) -> Result<()> {
        let frame = request.to_frame()?;
        let connection = self
            .connection
            .as_ref()
            .ok_or_else(|| AppError::Transport("roundtable is not connected".into()))?;
        connection.send(frame).await
    }

    async fn teardown(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }
    }

    async fn flush_outbox(&mut self) {
        if self.outbox.is_empty() {
            return;
        }
        let frames = std::mem::take(&mut self.outbox);
        let Some(connection) = self.connection.as_ref() else {
            warn!(count = frames.len(), "roundtable: no connection for approval decisions");
            return;
        };
        for frame in frames {
            if let Err(err) = connection.send(frame.to_string()).await {
                warn!(%err, "roundtable: failed to send approval decision");
            }
        }
    }
}
