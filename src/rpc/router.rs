//! Event routing table
//!
//! Maps topic filters to listener callbacks. Broker-level subscriptions are
//! reference counted by listener: the first listener on a filter subscribes
//! the transport, removing the last one unsubscribes it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::protocol::Message;
use crate::topic::topic_matches_filter;
use crate::transport::{Transport, TransportError};

/// Listener callback invoked for every matching message
pub type Callback = Arc<dyn Fn(&Message) + Send + Sync>;

struct Listener {
    id: u64,
    callback: Callback,
}

pub(crate) struct Router {
    transport: Arc<dyn Transport>,
    next_id: AtomicU64,
    routes: Mutex<AHashMap<String, Vec<Listener>>>,
}

impl Router {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
            routes: Mutex::new(AHashMap::new()),
        }
    }

    /// Register a listener, subscribing the transport if it is the first one
    /// for `filter`. Returns the listener id.
    pub fn add(&self, filter: &str, callback: Callback) -> Result<u64, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut routes = self.routes.lock();

        match routes.get_mut(filter) {
            Some(listeners) => listeners.push(Listener { id, callback }),
            None => {
                // Subscribe under the lock so a concurrent remove cannot
                // interleave between the count check and the broker call
                self.transport.subscribe(filter)?;
                debug!(filter, "Subscribed");
                routes.insert(filter.to_string(), vec![Listener { id, callback }]);
            }
        }
        Ok(id)
    }

    /// Remove a listener. Unsubscribes the transport when it was the last one.
    /// Unknown ids are ignored.
    pub fn remove(&self, filter: &str, id: u64) {
        let mut routes = self.routes.lock();
        let Some(listeners) = routes.get_mut(filter) else {
            return;
        };

        listeners.retain(|l| l.id != id);
        if listeners.is_empty() {
            routes.remove(filter);
            match self.transport.unsubscribe(filter) {
                Ok(()) => debug!(filter, "Unsubscribed"),
                Err(TransportError::Closed) => {}
                Err(e) => warn!(filter, "Unsubscribe failed: {}", e),
            }
        }
    }

    /// Callbacks of every listener whose filter matches `topic`
    pub fn matching(&self, topic: &str) -> SmallVec<[Callback; 4]> {
        let routes = self.routes.lock();
        routes
            .iter()
            .filter(|(filter, _)| topic_matches_filter(topic, filter))
            .flat_map(|(_, listeners)| listeners.iter().map(|l| l.callback.clone()))
            .collect()
    }

    /// Number of filters with at least one listener
    pub fn filter_count(&self) -> usize {
        self.routes.lock().len()
    }

    /// Number of live listeners across all filters
    pub fn listener_count(&self) -> usize {
        self.routes.lock().values().map(Vec::len).sum()
    }

    /// Drop every listener without touching the transport
    pub fn clear(&self) {
        self.routes.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryBroker;

    fn noop() -> Callback {
        Arc::new(|_: &Message| {})
    }

    #[test]
    fn test_transport_subscription_is_reference_counted() {
        let broker = MemoryBroker::new();
        let conn = broker.connect("router");
        let router = Router::new(conn.transport.clone());

        let a = router.add("dab/+/messages", noop()).unwrap();
        let b = router.add("dab/+/messages", noop()).unwrap();
        assert_eq!(broker.subscription_count(), 1);
        assert_eq!(router.listener_count(), 2);

        router.remove("dab/+/messages", a);
        assert_eq!(broker.subscription_count(), 1);

        router.remove("dab/+/messages", b);
        assert_eq!(broker.subscription_count(), 0);
        assert_eq!(router.filter_count(), 0);

        // Removing again is a no-op
        router.remove("dab/+/messages", b);
        assert_eq!(broker.subscription_count(), 0);
    }

    #[test]
    fn test_matching_collects_all_listeners() {
        let broker = MemoryBroker::new();
        let conn = broker.connect("router");
        let router = Router::new(conn.transport.clone());

        router.add("dab/device0/#", noop()).unwrap();
        router.add("dab/+/applications/list", noop()).unwrap();
        router.add("dab/device1/#", noop()).unwrap();

        assert_eq!(router.matching("dab/device0/applications/list").len(), 2);
        assert_eq!(router.matching("dab/device1/input/key-press").len(), 1);
        assert!(router.matching("other/topic").is_empty());
    }

    #[test]
    fn test_add_fails_on_invalid_filter() {
        let broker = MemoryBroker::new();
        let conn = broker.connect("router");
        let router = Router::new(conn.transport.clone());

        assert!(router.add("dab/#/x", noop()).is_err());
        assert_eq!(router.filter_count(), 0);
    }
}
