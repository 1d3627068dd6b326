//! Transport Adapter
//!
//! Wraps a publish/subscribe client behind a minimal capability interface.
//! A transport owns no protocol semantics: it publishes, manages broker-level
//! subscriptions, and hands every received message to an inbound channel.
//!
//! Two implementations are provided:
//! - [`MqttTransport`]: MQTT v5 over TCP via `rumqttc`
//! - [`MemoryTransport`]: an in-process broker, used by tests and local runs

mod memory;
mod mqtt;

pub use memory::{MemoryBroker, MemoryTransport};
pub use mqtt::MqttTransport;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::BrokerConfig;
use crate::protocol::{InboundMessage, OutboundMessage};

/// Error type for transport operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection to the broker failed or was lost
    ConnectionLost(String),
    /// Broker or transport rejected the operation
    Rejected(String),
    /// Operation timed out
    Timeout,
    /// Broker URI could not be parsed
    InvalidUri(String),
    /// Transport was already disconnected
    Closed,
    /// Other error
    Other(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            TransportError::Rejected(msg) => write!(f, "Rejected: {}", msg),
            TransportError::Timeout => write!(f, "Operation timed out"),
            TransportError::InvalidUri(uri) => write!(f, "Invalid broker URI: {}", uri),
            TransportError::Closed => write!(f, "Transport closed"),
            TransportError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

/// Status of a transport connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    /// Not connected
    Disconnected,
    /// Currently connecting
    Connecting,
    /// Connected and operational
    Connected,
    /// Connection failed, backing off before retry
    Backoff,
}

/// Minimal publish/subscribe capability.
///
/// `publish`, `subscribe` and `unsubscribe` enqueue work and return without
/// waiting on the broker; requests issued from one task reach the broker in
/// call order.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Name of this connection (the client id)
    fn name(&self) -> &str;

    /// Current connection status
    fn status(&self) -> TransportStatus;

    /// Publish a message
    fn publish(&self, message: OutboundMessage) -> Result<(), TransportError>;

    /// Add a broker-level subscription
    fn subscribe(&self, filter: &str) -> Result<(), TransportError>;

    /// Remove a broker-level subscription
    fn unsubscribe(&self, filter: &str) -> Result<(), TransportError>;

    /// Disconnect from the broker. The inbound channel closes afterwards.
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// A live transport plus the stream of messages it receives
pub struct Connection {
    pub transport: Arc<dyn Transport>,
    pub inbound: mpsc::UnboundedReceiver<InboundMessage>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("transport", &self.transport.name())
            .field("status", &self.transport.status())
            .finish()
    }
}

/// Connect to the broker described by the configuration
pub async fn connect(config: &BrokerConfig, client_id: &str) -> Result<Connection, TransportError> {
    MqttTransport::connect(config, client_id).await
}
