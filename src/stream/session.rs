//! Single-agent stream session controller.
//!
//! Drives one request/response exchange at a time:
//!
//! | From         | Trigger                           | To           |
//! |--------------|-----------------------------------|--------------|
//! | `idle`       | `send_message`                    | `connecting` |
//! | `connecting` | first frame                       | `streaming`  |
//! | `connecting` | open failure, close, `error`      | `error`      |
//! | `streaming`  | `done`, `cancelled`, close        | `idle`       |
//! | `streaming`  | `error` frame                     | `error`      |
//! | `streaming`  | `cancel_stream`                   | `cancelling` |
//! | `cancelling` | `done`, `cancelled`, close        | `idle`       |
//! | `error`      | `clear_error`                     | `idle`       |
//!
//! The streaming assistant message is identified by id and passed explicitly
//! to every frame handler; there is no ambient "current message" pointer.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::approval::gate::{Resolution, Submission};
use crate::approval::Approvals;
use crate::config::ConsoleConfig;
use crate::models::approval::{ApprovalRequest, Decision};
use crate::models::message::{ConversationMessage, Role, ToolExecution, ToolStatus};
use crate::stream::protocol::{parse_frame, Completion, StreamFrame, StreamRequest, WireMessage};
use crate::transport::{Connection, Connector, Inbound, OpenRequest};
use crate::{AppError, Result};

/// Static settings of a stream session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOptions {
    /// Chat stream endpoint path.
    pub path: String,
    /// Model identifier sent with every request.
    pub model: String,
    /// Working directory forwarded to the agent.
    pub working_dir: Option<String>,
    /// Whether tools are enabled.
    pub tools_enabled: bool,
    /// Countdown for approval requests that carry no timeout.
    pub approval_timeout_seconds: u64,
}

impl StreamOptions {
    /// Options for `model` on `path` with tools enabled and a 60 s approval default.
    #[must_use]
    pub fn new(path: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            model: model.into(),
            working_dir: None,
            tools_enabled: true,
            approval_timeout_seconds: 60,
        }
    }

    /// Options taken from the `[stream]` and `[approvals]` config sections.
    #[must_use]
    pub fn from_config(config: &ConsoleConfig) -> Self {
        Self {
            path: config.stream.path.clone(),
            model: config.stream.model.clone(),
            working_dir: config.stream.working_dir.clone(),
            tools_enabled: config.stream.tools_enabled,
            approval_timeout_seconds: config.approvals.default_timeout_seconds,
        }
    }
}

/// Controller status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// No exchange in flight.
    Idle,
    /// Request sent, waiting for the first frame.
    Connecting,
    /// Frames are arriving.
    Streaming,
    /// Cancel requested, waiting for a terminal frame or close.
    Cancelling,
    /// The last exchange failed.
    Error,
}

/// What a processed frame or timer tick changed.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamUpdate {
    /// Backend acknowledged the request.
    Connected {
        /// Session id now in effect.
        session_id: Option<String>,
    },
    /// Reasoning appended.
    Thinking {
        /// Streaming message id.
        message_id: String,
        /// Appended text.
        delta: String,
    },
    /// Visible content appended.
    Content {
        /// Streaming message id.
        message_id: String,
        /// Appended text.
        delta: String,
    },
    /// A tool execution started.
    ToolStarted {
        /// Owning message id.
        message_id: String,
        /// Tool call id.
        tool_id: String,
    },
    /// A tool execution finished.
    ToolFinished {
        /// Owning message id.
        message_id: String,
        /// Tool call id.
        tool_id: String,
        /// Final status.
        status: ToolStatus,
    },
    /// The assistant message was frozen.
    Completed {
        /// Frozen message id.
        message_id: String,
        /// Whether the response was cancelled.
        cancelled: bool,
    },
    /// The exchange failed.
    Failed {
        /// User-visible error message.
        message: String,
    },
    /// The transport closed.
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
    /// Frame was ignored (unknown, malformed, or stale).
    Skipped,
}

enum Wakeup {
    Inbound(Inbound),
    Tick(String),
}

/// Controller for one agent conversation.
pub struct StreamSession {
    connector: Arc<dyn Connector>,
    options: StreamOptions,
    status: StreamStatus,
    messages: Vec<ConversationMessage>,
    streaming_id: Option<String>,
    session_id: Option<String>,
    error: Option<AppError>,
    connection: Option<Connection>,
    approvals: Approvals,
    outbox: Vec<serde_json::Value>,
}

impl StreamSession {
    /// Idle session with an empty transcript.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, options: StreamOptions) -> Self {
        Self {
            connector,
            options,
            status: StreamStatus::Idle,
            messages: Vec::new(),
            streaming_id: None,
            session_id: None,
            error: None,
            connection: None,
            approvals: Approvals::new(),
            outbox: Vec::new(),
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> StreamStatus {
        self.status
    }

    /// Transcript, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    /// Message by id.
    #[must_use]
    pub fn message(&self, id: &str) -> Option<&ConversationMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Id of the assistant message currently streaming.
    #[must_use]
    pub fn streaming_message_id(&self) -> Option<&str> {
        self.streaming_id.as_deref()
    }

    /// Backend session id, once assigned.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Error that moved the session to `Error`.
    #[must_use]
    pub fn error(&self) -> Option<&AppError> {
        self.error.as_ref()
    }

    /// Pending approvals and saved preferences.
    #[must_use]
    pub fn approvals(&self) -> &Approvals {
        &self.approvals
    }

    /// Whether a transport connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Send a user turn and start streaming the reply.
    ///
    /// Returns the id of the new assistant placeholder.
    ///
    /// # Errors
    ///
    /// - [`AppError::InvalidState`] unless the status is `Idle`, or when
    ///   `content` is blank.
    /// - [`AppError::Transport`] if the connection cannot be opened; the
    ///   session moves to `Error`.
    pub async fn send_message(&mut self, content: &str) -> Result<String> {
        if self.status != StreamStatus::Idle {
            return Err(AppError::InvalidState(format!(
                "send_message requires idle status, current status is {:?}",
                self.status
            )));
        }
        if content.trim().is_empty() {
            return Err(AppError::InvalidState("message content is empty".into()));
        }

        self.teardown().await;

        let user = ConversationMessage::new(Role::User, content);
        let mut history: Vec<WireMessage> = self
            .messages
            .iter()
            .filter(|m| !m.is_streaming)
            .map(WireMessage::from)
            .collect();
        history.push(WireMessage::from(&user));
        self.messages.push(user);

        let placeholder = ConversationMessage::placeholder();
        let message_id = placeholder.id.clone();
        self.messages.push(placeholder);
        self.streaming_id = Some(message_id.clone());
        self.error = None;
        self.status = StreamStatus::Connecting;

        let body = StreamRequest::Request {
            model: self.options.model.clone(),
            messages: history,
            session_id: self.session_id.clone(),
            working_dir: self.options.working_dir.clone(),
            tools_enabled: Some(self.options.tools_enabled),
        }
        .to_frame()?;

        info!(
            model = %self.options.model,
            message_id = %message_id,
            "stream: sending request"
        );

        match self
            .connector
            .open(OpenRequest::with_body(self.options.path.clone(), body))
            .await
        {
            Ok(connection) => {
                self.connection = Some(connection);
                Ok(message_id)
            }
            Err(err) => {
                warn!(%err, "stream: connection failed");
                self.fail(&message_id, err.clone());
                Err(err)
            }
        }
    }

    /// Ask the backend to stop the in-flight response.
    ///
    /// The status becomes `Cancelling` immediately; `Idle` follows only when
    /// a terminal frame or a transport close is observed. Bidirectional
    /// transports receive a `cancel` frame, receive-only ones are aborted.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidState`] unless the status is `Streaming`.
    pub async fn cancel_stream(&mut self) -> Result<()> {
        if self.status != StreamStatus::Streaming {
            return Err(AppError::InvalidState(format!(
                "cancel_stream requires streaming status, current status is {:?}",
                self.status
            )));
        }
        self.status = StreamStatus::Cancelling;
        info!(session_id = ?self.session_id, "stream: cancelling");

        let Some(connection) = self.connection.as_ref() else {
            self.handle_closed("no connection".into());
            return Ok(());
        };

        if connection.is_receive_only() {
            connection.abort();
            return Ok(());
        }

        let frame = StreamRequest::Cancel {
            session_id: self.session_id.clone(),
        }
        .to_frame()?;
        if let Err(err) = connection.send(frame).await {
            warn!(%err, "stream: cancel frame failed, aborting transport");
            connection.abort();
        }
        Ok(())
    }

    /// Replace the content of a completed message, keeping the old content.
    ///
    /// # Errors
    ///
    /// - [`AppError::NotFound`] if `id` is unknown.
    /// - [`AppError::InvalidState`] if the message is still streaming.
    pub fn edit_message(&mut self, id: &str, new_content: &str) -> Result<()> {
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| AppError::NotFound(format!("message {id}")))?;
        if message.is_streaming {
            return Err(AppError::InvalidState(format!(
                "message {id} is still streaming"
            )));
        }
        message.edit(new_content);
        debug!(
            message_id = id,
            versions = message.previous_versions.len(),
            "stream: message edited"
        );
        Ok(())
    }

    /// Discard `id` and everything after it, then re-send the user turn that
    /// prompted it.
    ///
    /// The nearest user message at or before `id` is removed together with
    /// the tail and sent again, so the transcript ends with that user turn
    /// followed by a fresh assistant message.
    ///
    /// # Errors
    ///
    /// - [`AppError::InvalidState`] unless the status is `Idle`, or when the
    ///   user turn is blank; the transcript is left untouched.
    /// - [`AppError::NotFound`] if `id` is unknown or no user turn precedes it.
    /// - Any error of [`send_message`](Self::send_message).
    pub async fn regenerate_message(&mut self, id: &str) -> Result<String> {
        if self.status != StreamStatus::Idle {
            return Err(AppError::InvalidState(format!(
                "regenerate_message requires idle status, current status is {:?}",
                self.status
            )));
        }
        let target = self
            .messages
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| AppError::NotFound(format!("message {id}")))?;
        let user_index = self.messages[..=target]
            .iter()
            .rposition(|m| m.role == Role::User)
            .ok_or_else(|| AppError::NotFound(format!("no user message precedes {id}")))?;

        let content = self.messages[user_index].content.clone();
        if content.trim().is_empty() {
            return Err(AppError::InvalidState(format!(
                "user message before {id} is empty"
            )));
        }
        info!(message_id = id, dropped = self.messages.len() - user_index, "stream: regenerating");
        self.messages.truncate(user_index);
        self.send_message(&content).await
    }

    /// Leave the `Error` status so a new message can be sent.
    pub fn clear_error(&mut self) {
        if self.status == StreamStatus::Error {
            self.status = StreamStatus::Idle;
            self.error = None;
        }
    }

    /// Apply an operator decision to the active approval request and report
    /// every resolution upstream.
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

    /// Forget the remembered decision for `tool_name`.
    pub fn clear_tool_preference(&mut self, tool_name: &str) -> bool {
        self.approvals.clear_preference(tool_name)
    }

    /// Wait for the next frame, transport close, or approval tick and apply it.
    ///
    /// Returns `None` when there is no open connection and no approval
    /// countdown running. Cancel-safe.
    pub async fn next_update(&mut self) -> Option<StreamUpdate> {
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
            Wakeup::Inbound(Inbound::Closed { reason }) => self.handle_closed(reason),
            Wakeup::Tick(request_id) => self.handle_tick(&request_id),
        };
        self.flush_outbox().await;
        Some(update)
    }

    /// Decode and apply one raw frame. Malformed frames are logged and skipped.
    pub fn handle_raw(&mut self, raw: &str) -> StreamUpdate {
        match parse_frame(raw, self.options.approval_timeout_seconds) {
            Ok(Some(frame)) => self.handle_frame(frame),
            Ok(None) => StreamUpdate::Skipped,
            Err(err) => {
                warn!(%err, raw_frame = %raw, "stream: undecodable frame, skipping");
                StreamUpdate::Skipped
            }
        }
    }

    /// Apply one decoded frame.
    pub fn handle_frame(&mut self, frame: StreamFrame) -> StreamUpdate {
        match frame {
            StreamFrame::ApprovalRequest(request) => {
                self.mark_streaming();
                self.on_approval_request(request)
            }
            StreamFrame::Connected { session_id } => {
                self.mark_streaming();
                if let Some(id) = session_id {
                    if self.session_id.as_deref() != Some(id.as_str()) {
                        info!(session_id = %id, "stream: session assigned");
                        self.session_id = Some(id);
                    }
                }
                StreamUpdate::Connected {
                    session_id: self.session_id.clone(),
                }
            }
            other => {
                let Some(message_id) = self.streaming_id.clone() else {
                    debug!(status = ?self.status, "stream: no streaming message, frame ignored");
                    return StreamUpdate::Skipped;
                };
                self.mark_streaming();
                self.apply(&message_id, other)
            }
        }
    }

    /// Close the transport and settle any in-flight exchange to `Idle`.
    pub async fn close(&mut self) {
        self.teardown().await;
        if let Some(message_id) = self.streaming_id.take() {
            let cancelled = self.status == StreamStatus::Cancelling;
            if let Some(message) = self.message_mut(&message_id) {
                message.is_streaming = false;
                message.cancelled = cancelled;
            }
        }
        if self.status != StreamStatus::Error {
            self.status = StreamStatus::Idle;
        }
    }

    fn apply(&mut self, message_id: &str, frame: StreamFrame) -> StreamUpdate {
        let Some(message) = self.message_mut(message_id) else {
            warn!(message_id, "stream: streaming message missing from transcript");
            return StreamUpdate::Skipped;
        };

        match frame {
            StreamFrame::Thinking(delta) => {
                message.push_thinking(&delta);
                StreamUpdate::Thinking {
                    message_id: message_id.to_owned(),
                    delta,
                }
            }
            StreamFrame::Content(delta) => {
                message.content.push_str(&delta);
                StreamUpdate::Content {
                    message_id: message_id.to_owned(),
                    delta,
                }
            }
            StreamFrame::ToolUse { id, name, input } => {
                debug!(tool_id = %id, tool = %name, "stream: tool started");
                message
                    .tool_executions
                    .push(ToolExecution::running(id.clone(), name, input));
                StreamUpdate::ToolStarted {
                    message_id: message_id.to_owned(),
                    tool_id: id,
                }
            }
            StreamFrame::ToolResult {
                id,
                result,
                is_error,
            } => match message.tool_mut(&id) {
                Some(tool) => {
                    tool.finish(result, is_error);
                    StreamUpdate::ToolFinished {
                        message_id: message_id.to_owned(),
                        tool_id: id,
                        status: tool.status,
                    }
                }
                None => {
                    warn!(tool_id = %id, "stream: result for unknown tool call");
                    StreamUpdate::Skipped
                }
            },
            StreamFrame::Done(completion) => self.complete(message_id, completion, false),
            StreamFrame::Cancelled(completion) => self.complete(message_id, completion, true),
            StreamFrame::Error(text) => {
                warn!(error = %text, "stream: backend error");
                self.fail(message_id, AppError::Backend(text.clone()));
                StreamUpdate::Failed { message: text }
            }
            StreamFrame::Connected { .. } | StreamFrame::ApprovalRequest(_) => {
                StreamUpdate::Skipped
            }
        }
    }

    fn complete(
        &mut self,
        message_id: &str,
        completion: Completion,
        cancelled: bool,
    ) -> StreamUpdate {
        if let Some(message) = self.message_mut(message_id) {
            message.is_streaming = false;
            message.cancelled = cancelled;
            message.input_tokens = completion.input_tokens;
            message.output_tokens = completion.output_tokens;
            message.truncated = completion.truncated;
            message.model = completion.model;
            message.agent_provider = completion.provider;
            if completion.agent_id.is_some() {
                message.agent_id = completion.agent_id;
            }
        }
        info!(message_id, cancelled, "stream: response complete");
        self.streaming_id = None;
        self.status = StreamStatus::Idle;
        self.drop_connection();
        StreamUpdate::Completed {
            message_id: message_id.to_owned(),
            cancelled,
        }
    }

    /// Move to `Error`, dropping the assistant message if nothing arrived for it.
    fn fail(&mut self, message_id: &str, error: AppError) {
        if let Some(index) = self.messages.iter().position(|m| m.id == message_id) {
            if self.messages[index].has_output() {
                self.messages[index].is_streaming = false;
            } else {
                debug!(message_id, "stream: removing empty assistant message");
                self.messages.remove(index);
            }
        }
        self.streaming_id = None;
        self.error = Some(error);
        self.status = StreamStatus::Error;
        self.drop_connection();
    }

    fn handle_closed(&mut self, reason: String) -> StreamUpdate {
        self.connection = None;
        match self.status {
            StreamStatus::Streaming | StreamStatus::Cancelling => {
                let cancelled = self.status == StreamStatus::Cancelling;
                if let Some(message_id) = self.streaming_id.take() {
                    if let Some(message) = self.message_mut(&message_id) {
                        message.is_streaming = false;
                        message.cancelled = cancelled;
                    }
                }
                info!(%reason, cancelled, "stream: transport closed without terminal frame");
                self.status = StreamStatus::Idle;
            }
            StreamStatus::Connecting => {
                if let Some(message_id) = self.streaming_id.clone() {
                    self.fail(
                        &message_id,
                        AppError::Transport(format!("connection closed: {reason}")),
                    );
                }
            }
            StreamStatus::Idle | StreamStatus::Error => {
                debug!(%reason, "stream: transport closed");
            }
        }
        StreamUpdate::Closed { reason }
    }

    fn handle_tick(&mut self, request_id: &str) -> StreamUpdate {
        match self.approvals.tick(request_id) {
            Some(resolution) => {
                self.outbox.push(resolution.to_frame());
                StreamUpdate::ApprovalResolved(vec![resolution])
            }
            None => match self.approvals.active() {
                Some(active) if active.request.id == request_id => StreamUpdate::CountdownTick {
                    request_id: request_id.to_owned(),
                    remaining_seconds: active.remaining_seconds,
                },
                _ => StreamUpdate::Skipped,
            },
        }
    }

    fn on_approval_request(&mut self, request: ApprovalRequest) -> StreamUpdate {
        let request_id = request.id.clone();
        match self.approvals.submit(request) {
            Submission::Queued { .. } => StreamUpdate::ApprovalRequested { request_id },
            Submission::AutoResolved(resolution) => {
                self.outbox.push(resolution.to_frame());
                StreamUpdate::ApprovalResolved(vec![resolution])
            }
            Submission::Duplicate => StreamUpdate::Skipped,
        }
    }

    fn mark_streaming(&mut self) {
        if self.status == StreamStatus::Connecting {
            debug!("stream: first frame received");
            self.status = StreamStatus::Streaming;
        }
    }

    fn message_mut(&mut self, id: &str) -> Option<&mut ConversationMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    fn drop_connection(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.abort();
        }
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
            warn!(count = frames.len(), "stream: no connection for approval decisions");
            return;
        };
        for frame in frames {
            if let Err(err) = connection.send(frame.to_string()).await {
                warn!(%err, "stream: failed to send approval decision");
            }
        }
    }
}
