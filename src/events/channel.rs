//! Auto-reconnecting session events subscriber.
//!
//! Every successful open sends `subscribe` with the current filters. An
//! unexpected close schedules a reconnect after the current backoff delay;
//! [`EventChannel::next_update`] sleeps until then and retries, doubling the
//! delay on each consecutive failure.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ConsoleConfig;
use crate::events::backoff::Backoff;
use crate::events::protocol::{
    parse_frame, AckKind, ChannelFrame, ChannelRequest, EventFilters, SubscriptionAck,
};
use crate::models::event::{EventType, SessionEvent};
use crate::transport::{Connection, Connector, Inbound, OpenRequest};
use crate::{AppError, Result};

/// Default number of events kept in history.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Callback invoked for every accepted event, after it joins the history.
pub type EventObserver = Box<dyn FnMut(&SessionEvent) + Send>;

/// Connection status of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Not connected and not retrying.
    Disconnected,
    /// Opening the socket.
    Connecting,
    /// Subscribed.
    Connected,
    /// Waiting to retry after a close or failed attempt.
    Reconnecting,
}

/// What one wakeup of the channel produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelUpdate {
    /// An event passed the filters and was recorded.
    Event(SessionEvent),
    /// An event was dropped by the local filters.
    Filtered,
    /// A subscription acknowledgement arrived.
    Ack(SubscriptionAck),
    /// The socket closed.
    Closed {
        /// Close reason.
        reason: String,
        /// Delay before the next attempt, when reconnecting.
        retry_in: Option<Duration>,
    },
    /// A reconnect attempt succeeded.
    Reconnected,
    /// A reconnect attempt failed.
    ReconnectFailed {
        /// Failure description.
        error: String,
        /// Delay before the next attempt.
        retry_in: Duration,
    },
    /// Frame was ignored.
    Skipped,
}

/// Session events subscriber.
pub struct EventChannel {
    connector: Arc<dyn Connector>,
    path: String,
    auto_reconnect: bool,
    backoff: Backoff,
    filters: EventFilters,
    status: ChannelStatus,
    connection: Option<Connection>,
    history: VecDeque<SessionEvent>,
    capacity: usize,
    observer: Option<EventObserver>,
    subscription_id: Option<String>,
    last_error: Option<AppError>,
    reconnect_at: Option<Instant>,
}

impl EventChannel {
    /// Channel on `path` with auto-reconnect on, a 1 s to 30 s backoff and a
    /// history of [`DEFAULT_HISTORY_CAPACITY`] events.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, path: impl Into<String>) -> Self {
        Self {
            connector,
            path: path.into(),
            auto_reconnect: true,
            backoff: Backoff::new(Duration::from_secs(1), Duration::from_secs(30)),
            filters: EventFilters::default(),
            status: ChannelStatus::Disconnected,
            connection: None,
            history: VecDeque::with_capacity(DEFAULT_HISTORY_CAPACITY),
            capacity: DEFAULT_HISTORY_CAPACITY,
            observer: None,
            subscription_id: None,
            last_error: None,
            reconnect_at: None,
        }
    }

    /// Channel configured from the `[events]` section.
    #[must_use]
    pub fn from_config(connector: Arc<dyn Connector>, config: &ConsoleConfig) -> Self {
        let events = &config.events;
        let mut channel = Self::new(connector, events.path.clone());
        channel.auto_reconnect = events.auto_reconnect;
        channel.backoff = Backoff::new(events.initial_delay(), events.max_delay());
        channel.capacity = events.history_capacity.max(1);
        channel.history = VecDeque::with_capacity(channel.capacity);
        channel
    }

    /// Replace the filters sent with the next `subscribe`.
    #[must_use]
    pub fn with_filters(mut self, filters: EventFilters) -> Self {
        self.filters = filters;
        self
    }

    /// Install the observer called for every accepted event.
    pub fn set_observer(&mut self, observer: impl FnMut(&SessionEvent) + Send + 'static) {
        self.observer = Some(Box::new(observer));
    }

    /// Enable or disable reconnecting after an unexpected close.
    pub fn set_auto_reconnect(&mut self, enabled: bool) {
        self.auto_reconnect = enabled;
        if !enabled {
            self.reconnect_at = None;
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ChannelStatus {
        self.status
    }

    /// Active filters.
    #[must_use]
    pub fn filters(&self) -> &EventFilters {
        &self.filters
    }

    /// Recorded events, oldest first.
    #[must_use]
    pub fn history(&self) -> &VecDeque<SessionEvent> {
        &self.history
    }

    /// Subscription id from the last acknowledgement.
    #[must_use]
    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription_id.as_deref()
    }

    /// Last connection failure or backend-reported error.
    #[must_use]
    pub fn last_error(&self) -> Option<&AppError> {
        self.last_error.as_ref()
    }

    /// When the next reconnect attempt is due.
    #[must_use]
    pub fn reconnect_at(&self) -> Option<Instant> {
        self.reconnect_at
    }

    /// Open the socket and subscribe with the current filters.
    ///
    /// A failure is returned to the caller; with auto-reconnect on, a retry
    /// is also scheduled and [`next_update`](Self::next_update) drives it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if the
    /// socket cannot be opened or the subscribe frame cannot be sent.
    pub async fn connect(&mut self) -> Result<()> {
        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }
        self.reconnect_at = None;
        self.status = ChannelStatus::Connecting;

        match self.open_and_subscribe().await {
            Ok(connection) => {
                self.connection = Some(connection);
                self.status = ChannelStatus::Connected;
                self.backoff.reset();
                info!(path = %self.path, "events: subscribed");
                Ok(())
            }
            Err(err) => {
                self.last_error = Some(err.clone());
                if self.auto_reconnect {
                    let delay = self.schedule_reconnect();
                    warn!(
                        %err,
                        path = %self.path,
                        retry_in = ?delay,
                        "events: connection failed, retrying"
                    );
                } else {
                    warn!(%err, path = %self.path, "events: connection failed");
                    self.status = ChannelStatus::Disconnected;
                }
                Err(err)
            }
        }
    }

    /// Replace the filters; sends `update` when connected.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if the
    /// `update` frame cannot be sent.
    pub async fn update_filters(
        &mut self,
        session_ids: Option<Vec<String>>,
        event_types: Option<Vec<EventType>>,
    ) -> Result<()> {
        self.filters = EventFilters {
            session_ids,
            event_types,
        };
        let Some(connection) = self.connection.as_ref() else {
            debug!("events: filters stored for next subscribe");
            return Ok(());
        };
        connection
            .send(ChannelRequest::update(&self.filters).to_frame()?)
            .await
    }

    /// Stop reconnecting, unsubscribe if open, and close the socket.
    pub async fn disconnect(&mut self) {
        self.auto_reconnect = false;
        self.reconnect_at = None;
        if let Some(connection) = self.connection.take() {
            match ChannelRequest::Unsubscribe.to_frame() {
                Ok(frame) => {
                    if let Err(err) = connection.send(frame).await {
                        debug!(%err, "events: unsubscribe not delivered");
                    }
                }
                Err(err) => warn!(%err, "events: failed to encode unsubscribe"),
            }
            connection.close().await;
        }
        self.subscription_id = None;
        self.status = ChannelStatus::Disconnected;
        info!("events: disconnected");
    }

    /// Wait for the next frame, close, or due reconnect attempt.
    ///
    /// Returns `None` when disconnected with no retry scheduled. Cancel-safe:
    /// an interrupted reconnect attempt stays scheduled.
    pub async fn next_update(&mut self) -> Option<ChannelUpdate> {
        if let Some(connection) = self.connection.as_mut() {
            let update = match connection.recv().await {
                Inbound::Frame(raw) => self.handle_raw(&raw),
                Inbound::Closed { reason } => self.on_closed(reason),
            };
            return Some(update);
        }

        let due = self.reconnect_at?;
        tokio::time::sleep_until(due).await;
        Some(self.reconnect().await)
    }

    /// Decode and apply one raw frame. Malformed frames are logged and skipped.
    pub fn handle_raw(&mut self, raw: &str) -> ChannelUpdate {
        match parse_frame(raw) {
            Ok(Some(ChannelFrame::Event(event))) => self.accept(event),
            Ok(Some(ChannelFrame::Response(ack))) => self.on_ack(ack),
            Ok(None) => ChannelUpdate::Skipped,
            Err(err) => {
                warn!(%err, raw_frame = %raw, "events: undecodable frame, skipping");
                ChannelUpdate::Skipped
            }
        }
    }

    fn accept(&mut self, event: SessionEvent) -> ChannelUpdate {
        if !self.filters.matches(&event) {
            debug!(
                session_id = %event.session_id,
                event_type = event.event_type().as_str(),
                "events: dropped by filters"
            );
            return ChannelUpdate::Filtered;
        }

        while self.history.len() >= self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(event.clone());
        if let Some(observer) = self.observer.as_mut() {
            observer(&event);
        }
        ChannelUpdate::Event(event)
    }

    fn on_ack(&mut self, ack: SubscriptionAck) -> ChannelUpdate {
        match ack.kind {
            AckKind::Subscribed | AckKind::Updated => {
                if ack.subscription_id.is_some() {
                    self.subscription_id.clone_from(&ack.subscription_id);
                }
                debug!(
                    subscription_id = ?self.subscription_id,
                    kind = ?ack.kind,
                    "events: acknowledged"
                );
            }
            AckKind::Unsubscribed => self.subscription_id = None,
            AckKind::Error => {
                warn!(message = ?ack.message, "events: subscription error");
                self.last_error = Some(AppError::Backend(
                    ack.message
                        .clone()
                        .unwrap_or_else(|| "subscription rejected".to_owned()),
                ));
            }
        }
        ChannelUpdate::Ack(ack)
    }

    fn on_closed(&mut self, reason: String) -> ChannelUpdate {
        self.connection = None;
        self.subscription_id = None;
        if !self.auto_reconnect {
            info!(%reason, "events: closed");
            self.status = ChannelStatus::Disconnected;
            return ChannelUpdate::Closed {
                reason,
                retry_in: None,
            };
        }

        let delay = self.schedule_reconnect();
        warn!(%reason, retry_in = ?delay, "events: connection lost, reconnecting");
        ChannelUpdate::Closed {
            reason,
            retry_in: Some(delay),
        }
    }

    async fn reconnect(&mut self) -> ChannelUpdate {
        match self.open_and_subscribe().await {
            Ok(connection) => {
                self.connection = Some(connection);
                self.reconnect_at = None;
                self.status = ChannelStatus::Connected;
                self.backoff.reset();
                info!(path = %self.path, "events: reconnected");
                ChannelUpdate::Reconnected
            }
            Err(err) => {
                let delay = self.schedule_reconnect();
                warn!(%err, retry_in = ?delay, "events: reconnect failed");
                let update = ChannelUpdate::ReconnectFailed {
                    error: err.to_string(),
                    retry_in: delay,
                };
                self.last_error = Some(err);
                update
            }
        }
    }

    fn schedule_reconnect(&mut self) -> Duration {
        let delay = self.backoff.next_delay();
        self.reconnect_at = Some(Instant::now() + delay);
        self.status = ChannelStatus::Reconnecting;
        delay
    }

    async fn open_and_subscribe(&self) -> Result<Connection> {
        let connection = self
            .connector
            .open(OpenRequest::path(self.path.clone()))
            .await?;
        let frame = ChannelRequest::subscribe(&self.filters).to_frame()?;
        connection.send(frame).await?;
        Ok(connection)
    }
}
