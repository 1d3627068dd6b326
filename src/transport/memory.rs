//! In-process broker
//!
//! A tiny pub/sub hub with MQTT-like semantics: wildcard filters, retained
//! messages (an empty retained payload clears the slot), one delivery per
//! matching session, and optional no-local suppression. Used by the test
//! suite and for running a bridge without a network broker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use super::{Connection, Transport, TransportError, TransportStatus};
use crate::protocol::{InboundMessage, OutboundMessage};
use crate::topic::{topic_matches_filter, validate_topic_filter, validate_topic_name};

struct Session {
    filters: Vec<String>,
    no_local: bool,
    tx: mpsc::UnboundedSender<InboundMessage>,
}

impl Session {
    fn matches(&self, topic: &str) -> bool {
        self.filters.iter().any(|f| topic_matches_filter(topic, f))
    }
}

#[derive(Default)]
struct BrokerState {
    next_session: u64,
    sessions: AHashMap<u64, Session>,
    retained: AHashMap<String, OutboundMessage>,
}

/// Shared in-process broker. Cloning yields another handle to the same hub.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session that also receives its own publishes
    pub fn connect(&self, name: &str) -> Connection {
        self.connect_with(name, false)
    }

    /// Open a session, optionally suppressing delivery of its own publishes
    pub fn connect_with(&self, name: &str, no_local: bool) -> Connection {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut state = self.state.lock();
            let id = state.next_session;
            state.next_session += 1;
            state.sessions.insert(
                id,
                Session {
                    filters: Vec::new(),
                    no_local,
                    tx,
                },
            );
            id
        };

        let transport = Arc::new(MemoryTransport {
            id,
            name: name.to_string(),
            broker: self.clone(),
            connected: AtomicBool::new(true),
        });
        Connection {
            transport,
            inbound: rx,
        }
    }

    /// Total number of broker-level subscriptions across all sessions
    pub fn subscription_count(&self) -> usize {
        self.state
            .lock()
            .sessions
            .values()
            .map(|s| s.filters.len())
            .sum()
    }

    /// Payload currently retained on a topic
    pub fn retained(&self, topic: &str) -> Option<Bytes> {
        self.state
            .lock()
            .retained
            .get(topic)
            .map(|m| m.payload.clone())
    }

    fn route(&self, from: u64, message: OutboundMessage) {
        let mut state = self.state.lock();

        let mut delivered = 0usize;
        for (id, session) in state.sessions.iter() {
            if *id == from && session.no_local {
                continue;
            }
            if session.matches(&message.topic)
                && session.tx.send(message.to_inbound(false)).is_ok()
            {
                delivered += 1;
            }
        }
        trace!("Memory broker: {} delivered to {} sessions", message.topic, delivered);

        if message.retain {
            if message.payload.is_empty() {
                state.retained.remove(&message.topic);
            } else {
                state.retained.insert(message.topic.clone(), message);
            }
        }
    }

    fn subscribe(&self, session_id: u64, filter: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let BrokerState {
            sessions, retained, ..
        } = &mut *state;
        let session = sessions.get_mut(&session_id).ok_or(TransportError::Closed)?;

        if !session.filters.iter().any(|f| f == filter) {
            session.filters.push(filter.to_string());
        }

        for message in retained.values() {
            if topic_matches_filter(&message.topic, filter) {
                let _ = session.tx.send(message.to_inbound(true));
            }
        }
        Ok(())
    }

    fn unsubscribe(&self, session_id: u64, filter: &str) {
        if let Some(session) = self.state.lock().sessions.get_mut(&session_id) {
            session.filters.retain(|f| f != filter);
        }
    }

    fn close(&self, session_id: u64) {
        self.state.lock().sessions.remove(&session_id);
    }
}

/// One session on a [`MemoryBroker`]
pub struct MemoryTransport {
    id: u64,
    name: String,
    broker: MemoryBroker,
    connected: AtomicBool,
}

impl MemoryTransport {
    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.broker.close(self.id);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn status(&self) -> TransportStatus {
        if self.connected.load(Ordering::Acquire) {
            TransportStatus::Connected
        } else {
            TransportStatus::Disconnected
        }
    }

    fn publish(&self, message: OutboundMessage) -> Result<(), TransportError> {
        self.ensure_connected()?;
        validate_topic_name(&message.topic).map_err(|e| TransportError::Rejected(e.to_string()))?;
        self.broker.route(self.id, message);
        Ok(())
    }

    fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        self.ensure_connected()?;
        validate_topic_filter(filter).map_err(|e| TransportError::Rejected(e.to_string()))?;
        self.broker.subscribe(self.id, filter)
    }

    fn unsubscribe(&self, filter: &str) -> Result<(), TransportError> {
        self.ensure_connected()?;
        self.broker.unsubscribe(self.id, filter);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if self.connected.swap(false, Ordering::AcqRel) {
            self.broker.close(self.id);
        }
        Ok(())
    }
}
