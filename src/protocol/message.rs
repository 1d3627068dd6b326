//! Message types exchanged with the transport

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::Serialize;
use serde_json::{json, Value};

use super::QoS;

/// A message received from the transport
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    /// Response topic property (MQTT v5)
    pub response_topic: Option<String>,
    /// Correlation data property (MQTT v5)
    pub correlation_data: Option<Bytes>,
    pub retain: bool,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            response_topic: None,
            correlation_data: None,
            retain: false,
        }
    }
}

/// A message to be published on the transport
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub response_topic: Option<String>,
    pub correlation_data: Option<Bytes>,
}

impl OutboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain: false,
            response_topic: None,
            correlation_data: None,
        }
    }

    pub fn retained(mut self) -> Self {
        self.retain = true;
        self
    }

    pub fn with_response_topic(mut self, topic: impl Into<String>) -> Self {
        self.response_topic = Some(topic.into());
        self
    }

    pub fn with_correlation_data(mut self, data: impl Into<Bytes>) -> Self {
        self.correlation_data = Some(data.into());
        self
    }

    /// The inbound view a subscriber receives for this publish
    pub fn to_inbound(&self, retain: bool) -> InboundMessage {
        InboundMessage {
            topic: self.topic.clone(),
            payload: self.payload.clone(),
            response_topic: self.response_topic.clone(),
            correlation_data: self.correlation_data.clone(),
            retain,
        }
    }
}

/// An inbound message with its JSON body decoded
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub body: Value,
    pub response_topic: Option<String>,
    pub correlation_data: Option<Bytes>,
    pub retain: bool,
}

impl From<InboundMessage> for Message {
    fn from(msg: InboundMessage) -> Self {
        Self {
            body: parse_body(&msg.payload),
            topic: msg.topic,
            response_topic: msg.response_topic,
            correlation_data: msg.correlation_data,
            retain: msg.retain,
        }
    }
}

/// Decode a JSON payload.
///
/// An empty payload is an empty object. A malformed payload becomes a
/// synthesized error body rather than a parse failure.
pub fn parse_body(payload: &[u8]) -> Value {
    if payload.is_empty() {
        return json!({});
    }
    match serde_json::from_slice(payload) {
        Ok(value) => value,
        Err(_) => json!({
            "status": 500,
            "error": "failed to parse msg",
            "msg": String::from_utf8_lossy(payload),
        }),
    }
}

/// Severity of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warn,
    Error,
}

/// Human-readable entry on a `messages` topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    pub level: NotificationLevel,
    pub message: String,
}

impl Notification {
    pub fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            timestamp,
            level,
            message: message.into(),
        }
    }
}
