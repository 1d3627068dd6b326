//! Request/Response Engine
//!
//! Turns a fire-and-forget publish/subscribe transport into correlated
//! request/response calls:
//!
//! - `publish` / `publish_retained` / `clear_retained`: send without waiting
//! - `subscribe`: listener on a topic filter, released through [`Subscription`]
//! - `request`: correlated call with a deadline
//! - `collect`: correlated call gathering every reply within a window
//! - `handle`: responder that replies on the caller's response topic
//!
//! Replies are matched to pending requests by correlation id only. Inbound
//! messages are dispatched by a single task in transport delivery order;
//! handler bodies run as their own tasks and may complete in any order.

mod error;
mod router;
mod subscription;


pub use error::RpcError;
pub use router::Callback;
pub use subscription::Subscription;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use crate::error::DabError;
use crate::protocol::{status, InboundMessage, Message, OutboundMessage, QoS, Reply, Response};
use crate::topic;
use crate::transport::{Connection, Transport, TransportStatus};
use router::Router;

/// Engine options
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// QoS for every publish
    pub qos: QoS,
    /// Deadline used by `request` when none is given
    pub request_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            qos: QoS::ExactlyOnce,
            request_timeout: Duration::from_secs(20),
        }
    }
}

/// An inbound request as seen by a handler
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Full topic the request arrived on
    pub topic: String,
    /// Topic with its last level removed
    pub base_topic: String,
    /// Decoded body (a synthesized error body when the payload was malformed)
    pub body: Value,
}

impl Request {
    fn from_message(message: &Message) -> Self {
        Self {
            topic: message.topic.clone(),
            base_topic: topic::base_topic(&message.topic).to_string(),
            body: message.body.clone(),
        }
    }
}

type Pending = DashMap<String, oneshot::Sender<Value>>;

struct ClientInner {
    transport: Arc<dyn Transport>,
    router: Arc<Router>,
    pending: Arc<Pending>,
    options: ClientOptions,
    closed: AtomicBool,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

/// Request/response client over one transport connection. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Take ownership of a connection and start dispatching its inbound messages.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(connection: Connection, options: ClientOptions) -> Self {
        let Connection { transport, inbound } = connection;
        let router = Arc::new(Router::new(transport.clone()));
        let dispatcher = tokio::spawn(dispatch_loop(Arc::downgrade(&router), inbound));

        Self {
            inner: Arc::new(ClientInner {
                transport,
                router,
                pending: Arc::new(DashMap::new()),
                options,
                closed: AtomicBool::new(false),
                dispatcher: Mutex::new(Some(dispatcher)),
            }),
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    pub fn transport_status(&self) -> TransportStatus {
        self.inner.transport.status()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Number of live listeners (request, handler and plain subscriptions)
    pub fn subscription_count(&self) -> usize {
        self.inner.router.listener_count()
    }

    /// Number of requests awaiting a reply
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    fn ensure_open(&self) -> Result<(), RpcError> {
        if self.is_closed() {
            Err(RpcError::Closed)
        } else {
            Ok(())
        }
    }

    fn send(&self, message: OutboundMessage) -> Result<(), RpcError> {
        self.ensure_open()?;
        trace!(topic = %message.topic, retain = message.retain, "Publishing");
        self.inner.transport.publish(message)?;
        Ok(())
    }

    fn encode<T: Serialize + ?Sized>(body: &T) -> Result<Bytes, RpcError> {
        Ok(Bytes::from(serde_json::to_vec(body)?))
    }

    /// Fire-and-forget publish
    pub fn publish<T: Serialize + ?Sized>(&self, topic: &str, body: &T) -> Result<(), RpcError> {
        let payload = Self::encode(body)?;
        self.send(OutboundMessage::new(topic, payload, self.inner.options.qos))
    }

    /// Publish and ask the broker to retain the value
    pub fn publish_retained<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        body: &T,
    ) -> Result<(), RpcError> {
        let payload = Self::encode(body)?;
        self.send(OutboundMessage::new(topic, payload, self.inner.options.qos).retained())
    }

    /// Clear a retained value (empty retained publish)
    pub fn clear_retained(&self, topic: &str) -> Result<(), RpcError> {
        self.send(OutboundMessage::new(topic, Bytes::new(), self.inner.options.qos).retained())
    }

    /// Invoke `callback` for every future message matching `filter`
    pub fn subscribe<F>(&self, filter: &str, callback: F) -> Result<Subscription, RpcError>
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.ensure_open()?;
        let id = self.inner.router.add(filter, Arc::new(callback))?;
        Ok(Subscription::new(
            filter.to_string(),
            id,
            Arc::downgrade(&self.inner.router),
        ))
    }

    /// Wait for the next message on `filter` (a retained value arrives immediately)
    pub async fn subscribe_once(
        &self,
        filter: &str,
        timeout: Duration,
    ) -> Result<Message, RpcError> {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let subscription = self.subscribe(filter, move |message| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(message.clone());
            }
        })?;

        let outcome = tokio::time::timeout(timeout, rx).await;
        subscription.end();

        match outcome {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) => Err(RpcError::Cancelled),
            Err(_) => Err(RpcError::Timeout {
                topic: filter.to_string(),
                timeout,
            }),
        }
    }

    /// Correlated request.
    ///
    /// Resolves with the reply body, or rejects with [`RpcError::Rejected`]
    /// when the reply status exceeds 299. Without a reply before the deadline
    /// the request rejects with [`RpcError::Timeout`]. The response
    /// subscription and pending entry are released on every path.
    pub async fn request<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        body: &T,
        timeout: Option<Duration>,
    ) -> Result<Value, RpcError> {
        let timeout = timeout.unwrap_or(self.inner.options.request_timeout);
        let payload = Self::encode(body)?;
        let correlation_id = Uuid::new_v4().to_string();
        let response_topic = topic::response_topic(topic, &correlation_id);

        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(correlation_id.clone(), tx);
        let guard = PendingGuard {
            pending: &self.inner.pending,
            correlation_id: &correlation_id,
        };

        let pending = self.inner.pending.clone();
        let expected = correlation_id.clone();
        let subscription = self.subscribe(&response_topic, move |message| {
            if correlation_of(message) != Some(expected.as_str()) {
                trace!(topic = %message.topic, "Discarding uncorrelated reply");
                return;
            }
            if let Some((_, tx)) = pending.remove(&expected) {
                let _ = tx.send(message.body.clone());
            }
        })?;

        debug!(topic, correlation_id = %correlation_id, "Sending request");
        self.send(
            OutboundMessage::new(topic, payload, self.inner.options.qos)
                .with_response_topic(response_topic)
                .with_correlation_data(correlation_id.clone()),
        )?;

        let outcome = tokio::time::timeout(timeout, rx).await;
        subscription.end();
        drop(guard);

        match outcome {
            Ok(Ok(reply)) if is_rejection(&reply) => Err(RpcError::Rejected(reply)),
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(RpcError::Cancelled),
            Err(_) => {
                debug!(topic, correlation_id = %correlation_id, "Request timed out");
                Err(RpcError::Timeout {
                    topic: topic.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Correlated request that gathers every reply arriving within `window`.
    ///
    /// Used for broadcast queries such as discovery, where any number of
    /// responders may answer. Rejections are returned as-is in the list.
    pub async fn collect<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        body: &T,
        window: Duration,
    ) -> Result<Vec<Value>, RpcError> {
        let payload = Self::encode(body)?;
        let correlation_id = Uuid::new_v4().to_string();
        let response_topic = topic::response_topic(topic, &correlation_id);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let expected = correlation_id.clone();
        let subscription = self.subscribe(&response_topic, move |message| {
            if correlation_of(message) == Some(expected.as_str()) {
                let _ = tx.send(message.body.clone());
            }
        })?;

        self.send(
            OutboundMessage::new(topic, payload, self.inner.options.qos)
                .with_response_topic(response_topic)
                .with_correlation_data(correlation_id),
        )?;

        let mut replies = Vec::new();
        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                reply = rx.recv() => match reply {
                    Some(reply) => replies.push(reply),
                    None => break,
                },
            }
        }
        subscription.end();
        Ok(replies)
    }

    /// Register a responder for every request arriving on `filter`.
    ///
    /// The handler's reply (or, on failure, an error envelope carrying the
    /// failure and the original request) is published on the request's
    /// response topic with its correlation data. Requests without a response
    /// topic are logged and dropped.
    pub fn handle<F, Fut>(&self, filter: &str, handler: F) -> Result<Subscription, RpcError>
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, DabError>> + Send + 'static,
    {
        self.handle_where(filter, |_| true, handler)
    }

    /// Like [`handle`](Self::handle), but only topics accepted by `accept`
    /// reach the handler; everything else on `filter` is skipped silently.
    pub fn handle_where<A, F, Fut>(
        &self,
        filter: &str,
        accept: A,
        handler: F,
    ) -> Result<Subscription, RpcError>
    where
        A: Fn(&str) -> bool + Send + Sync + 'static,
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, DabError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let weak = Arc::downgrade(&self.inner);

        self.subscribe(filter, move |message| {
            if !accept(&message.topic) {
                trace!(topic = %message.topic, "Skipping topic outside handled set");
                return;
            }
            let Some(response_topic) = message.response_topic.clone() else {
                if message.retain {
                    debug!(topic = %message.topic, "Ignoring retained message on handled topic");
                } else {
                    warn!(topic = %message.topic, "Request without response topic, dropping");
                }
                return;
            };

            let request = Request::from_message(message);
            let correlation_data = message.correlation_data.clone();
            let handler = handler.clone();
            let weak = weak.clone();

            tokio::spawn(async move {
                let topic = request.topic.clone();
                let body = request.body.clone();
                let outcome = AssertUnwindSafe(async move { handler(request).await })
                    .catch_unwind()
                    .await;

                let reply = match outcome {
                    Ok(Ok(reply)) => reply,
                    Ok(Err(err)) => {
                        debug!(topic = %topic, status = err.status(), "Handler failed: {}", err);
                        Reply::One(err.to_response().with("request", body))
                    }
                    Err(panic) => {
                        let detail = panic_message(&*panic);
                        error!(topic = %topic, "Handler panicked: {}", detail);
                        Reply::One(
                            Response::error(status::INTERNAL_SERVER_ERROR, detail)
                                .with("request", body),
                        )
                    }
                };

                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let client = Client { inner };
                for response in reply.into_responses() {
                    if let Err(e) =
                        client.reply(&response_topic, correlation_data.clone(), &response)
                    {
                        warn!(topic = %topic, "Failed to publish reply: {}", e);
                    }
                }
            });
        })
    }

    fn reply(
        &self,
        response_topic: &str,
        correlation_data: Option<Bytes>,
        response: &Response,
    ) -> Result<(), RpcError> {
        let payload = Self::encode(response)?;
        let mut message = OutboundMessage::new(response_topic, payload, self.inner.options.qos);
        message.correlation_data = correlation_data;
        self.send(message)
    }

    /// Stop dispatching, cancel pending requests, and disconnect the transport
    pub async fn disconnect(&self) -> Result<(), RpcError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.inner.router.clear();
        self.inner.pending.clear();
        let result = self.inner.transport.disconnect().await;

        if let Some(dispatcher) = self.inner.dispatcher.lock().take() {
            dispatcher.abort();
        }
        result.map_err(RpcError::from)
    }
}

/// Removes a pending entry when the request future finishes or is dropped
struct PendingGuard<'a> {
    pending: &'a Pending,
    correlation_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.correlation_id);
    }
}

/// Correlation id of a reply: the correlation data property, or the last
/// level of the response topic when the responder did not echo it
fn correlation_of(message: &Message) -> Option<&str> {
    match &message.correlation_data {
        Some(data) => std::str::from_utf8(data).ok(),
        None => message.topic.rsplit('/').next(),
    }
}

fn is_rejection(body: &Value) -> bool {
    body.get("status")
        .and_then(Value::as_f64)
        .map_or(false, |s| s > 299.0)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

async fn dispatch_loop(router: Weak<Router>, mut inbound: mpsc::UnboundedReceiver<InboundMessage>) {
    while let Some(message) = inbound.recv().await {
        let Some(router) = router.upgrade() else {
            break;
        };

        let callbacks = router.matching(&message.topic);
        drop(router);
        if callbacks.is_empty() {
            debug!(topic = %message.topic, "No listener for topic");
            continue;
        }

        let message = Message::from(message);
        for callback in callbacks {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| callback(&message)));
            if let Err(panic) = outcome {
                error!(
                    topic = %message.topic,
                    "Listener panicked: {}",
                    panic_message(&*panic)
                );
            }
        }
    }
    trace!("Dispatch loop finished");
}
