//! Wire protocol of the session events socket.
//!
//! The socket carries two kinds of inbound frames on one stream: session
//! events (`{event_type, session_id, timestamp, data}`) and subscription
//! acknowledgements (`{type, subscription_id?, message?}`). A frame is an
//! event exactly when it has an `event_type` field.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::event::{
    CompleteData, ErrorData, EventData, EventType, MessageData, SessionEvent, SessionStartData,
    ToolUseData,
};
use crate::{AppError, Result};

/// Kind of subscription acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    /// `subscribe` accepted.
    Subscribed,
    /// `update` accepted.
    Updated,
    /// `unsubscribe` accepted.
    Unsubscribed,
    /// A request was rejected.
    Error,
}

/// Subscription acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionAck {
    /// Acknowledgement kind.
    pub kind: AckKind,
    /// Subscription id assigned by the backend.
    pub subscription_id: Option<String>,
    /// Error or informational message.
    pub message: Option<String>,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelFrame {
    /// A session event.
    Event(SessionEvent),
    /// A subscription acknowledgement.
    Response(SubscriptionAck),
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    event_type: String,
    session_id: String,
    #[serde(default)]
    timestamp: serde_json::Value,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RawAck {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    subscription_id: Option<String>,
    #[serde(default, alias = "error")]
    message: Option<String>,
}

/// Parse one raw frame from the events socket.
///
/// Returns `Ok(None)` for blank payloads, unknown event types and unknown
/// acknowledgement types.
///
/// # Errors
///
/// Returns [`AppError::Decode`] for malformed JSON, a frame with neither
/// `event_type` nor `type`, or an event whose `data` does not match its type.
pub fn parse_frame(raw: &str) -> Result<Option<ChannelFrame>> {
    if raw.trim().is_empty() {
        return Ok(None);
    }

    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| AppError::Decode(format!("malformed json: {e}")))?;

    if value.get("event_type").is_some() {
        return parse_event(value).map(|e| e.map(ChannelFrame::Event));
    }

    let ack: RawAck = serde_json::from_value(value)
        .map_err(|e| AppError::Decode(format!("frame has neither event_type nor type: {e}")))?;
    let kind = match ack.kind.as_str() {
        "subscribed" => AckKind::Subscribed,
        "updated" => AckKind::Updated,
        "unsubscribed" => AckKind::Unsubscribed,
        "error" => AckKind::Error,
        other => {
            debug!(frame_type = other, "events protocol: skipping unknown response type");
            return Ok(None);
        }
    };

    Ok(Some(ChannelFrame::Response(SubscriptionAck {
        kind,
        subscription_id: ack.subscription_id,
        message: ack.message,
    })))
}

fn parse_event(value: serde_json::Value) -> Result<Option<SessionEvent>> {
    let raw: RawEvent = serde_json::from_value(value)
        .map_err(|e| AppError::Decode(format!("session event: {e}")))?;

    let Some(event_type) = EventType::parse(&raw.event_type) else {
        debug!(event_type = %raw.event_type, "events protocol: skipping unknown event type");
        return Ok(None);
    };

    let payload = raw.data;
    let data = match event_type {
        EventType::SessionStart => {
            EventData::SessionStart(data_of::<SessionStartData>(event_type, payload)?)
        }
        EventType::Message => EventData::Message(data_of::<MessageData>(event_type, payload)?),
        EventType::ToolUse => EventData::ToolUse(data_of::<ToolUseData>(event_type, payload)?),
        EventType::Complete => EventData::Complete(data_of::<CompleteData>(event_type, payload)?),
        EventType::Error => EventData::Error(data_of::<ErrorData>(event_type, payload)?),
    };

    let timestamp = match raw.timestamp {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    };

    Ok(Some(SessionEvent {
        session_id: raw.session_id,
        timestamp,
        data,
    }))
}

fn data_of<T>(event_type: EventType, data: serde_json::Value) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let data = if data.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        data
    };
    serde_json::from_value(data)
        .map_err(|e| AppError::Decode(format!("{} event data: {e}", event_type.as_str())))
}

/// Active subscription filters. `None` (or an empty list) matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilters {
    /// Sessions to observe.
    pub session_ids: Option<Vec<String>>,
    /// Event types to observe.
    pub event_types: Option<Vec<EventType>>,
}

impl EventFilters {
    /// Filters matching every event.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to `session_ids`.
    #[must_use]
    pub fn with_sessions<I, S>(mut self, session_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.session_ids = Some(session_ids.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict to `event_types`.
    #[must_use]
    pub fn with_types(mut self, event_types: impl IntoIterator<Item = EventType>) -> Self {
        self.event_types = Some(event_types.into_iter().collect());
        self
    }

    /// Whether `event` passes both filters.
    #[must_use]
    pub fn matches(&self, event: &SessionEvent) -> bool {
        let session_ok = match self.session_ids.as_deref() {
            None | Some([]) => true,
            Some(ids) => ids.iter().any(|id| *id == event.session_id),
        };
        let type_ok = match self.event_types.as_deref() {
            None | Some([]) => true,
            Some(types) => types.contains(&event.event_type()),
        };
        session_ok && type_ok
    }
}

/// Outbound frames on the events socket.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelRequest {
    /// Start a subscription.
    Subscribe {
        /// Sessions to observe.
        #[serde(skip_serializing_if = "Option::is_none")]
        session_ids: Option<Vec<String>>,
        /// Event types to observe.
        #[serde(skip_serializing_if = "Option::is_none")]
        event_types: Option<Vec<EventType>>,
    },
    /// Replace the filters of the current subscription.
    Update {
        /// Sessions to observe.
        #[serde(skip_serializing_if = "Option::is_none")]
        session_ids: Option<Vec<String>>,
        /// Event types to observe.
        #[serde(skip_serializing_if = "Option::is_none")]
        event_types: Option<Vec<EventType>>,
    },
    /// End the subscription.
    Unsubscribe,
}

impl ChannelRequest {
    /// `subscribe` carrying `filters`.
    #[must_use]
    pub fn subscribe(filters: &EventFilters) -> Self {
        Self::Subscribe {
            session_ids: filters.session_ids.clone(),
            event_types: filters.event_types.clone(),
        }
    }

    /// `update` carrying `filters`.
    #[must_use]
    pub fn update(filters: &EventFilters) -> Self {
        Self::Update {
            session_ids: filters.session_ids.clone(),
            event_types: filters.event_types.clone(),
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
