//! MQTT v5 transport
//!
//! Runs two tasks per connection: a command task that feeds publishes and
//! subscription changes into the `rumqttc` client in call order, and an event
//! task that polls the event loop, forwards incoming publishes and
//! re-subscribes after every reconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashSet;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rumqttc::v5::mqttbytes::v5::{Filter, Packet, Publish, PublishProperties};
use rumqttc::v5::{AsyncClient, Event, EventLoop, MqttOptions};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::{Connection, Transport, TransportError, TransportStatus};
use crate::config::BrokerConfig;
use crate::protocol::{InboundMessage, OutboundMessage, QoS};
use crate::topic::{validate_topic_filter, validate_topic_name};

/// Work for the command task
#[derive(Debug)]
enum Command {
    Publish(OutboundMessage),
    Subscribe(String),
    Unsubscribe(String),
    Disconnect,
}

/// State shared between the transport handle and its tasks
struct Shared {
    name: String,
    status: RwLock<TransportStatus>,
    /// Active broker-level filters, replayed after reconnect
    filters: Mutex<AHashSet<String>>,
    shutdown: AtomicBool,
}

/// MQTT v5 transport backed by `rumqttc`
pub struct MqttTransport {
    shared: Arc<Shared>,
    command_tx: mpsc::UnboundedSender<Command>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MqttTransport {
    /// Connect and wait for the broker's CONNACK (bounded by `connect_timeout`)
    pub async fn connect(
        config: &BrokerConfig,
        client_id: &str,
    ) -> Result<Connection, TransportError> {
        let (host, port) = config
            .parse_address()
            .ok_or_else(|| TransportError::InvalidUri(config.uri.clone()))?;

        let mut options = MqttOptions::new(client_id, host.clone(), port);
        options.set_keep_alive(config.keep_alive);
        options.set_clean_start(true);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username.clone(), password.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, config.channel_capacity);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (connected_tx, connected_rx) = oneshot::channel();

        let shared = Arc::new(Shared {
            name: client_id.to_string(),
            status: RwLock::new(TransportStatus::Connecting),
            filters: Mutex::new(AHashSet::new()),
            shutdown: AtomicBool::new(false),
        });

        debug!("Transport '{}': Connecting to {}:{}", client_id, host, port);

        let command_task = tokio::spawn(command_loop(
            client,
            command_rx,
            config.qos,
            config.no_local,
            shared.clone(),
        ));
        let event_task = tokio::spawn(event_loop(
            eventloop,
            inbound_tx,
            command_tx.clone(),
            shared.clone(),
            (config.reconnect_interval, config.max_reconnect_interval),
            connected_tx,
        ));

        let transport = Arc::new(Self {
            shared,
            command_tx,
            tasks: Mutex::new(vec![command_task, event_task]),
        });

        let outcome = match timeout(config.connect_timeout, connected_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::ConnectionLost(
                "event loop ended before connecting".to_string(),
            )),
            Err(_) => Err(TransportError::Timeout),
        };

        if let Err(e) = outcome {
            transport.abort();
            return Err(e);
        }

        info!("Transport '{}': Connected to {}:{}", client_id, host, port);
        Ok(Connection {
            transport,
            inbound: inbound_rx,
        })
    }

    fn send(&self, command: Command) -> Result<(), TransportError> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.command_tx
            .send(command)
            .map_err(|_| TransportError::ConnectionLost("Command channel closed".to_string()))
    }

    fn abort(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        *self.shared.status.write() = TransportStatus::Disconnected;
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.abort();
    }
}

#[async_trait]
impl Transport for MqttTransport {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn status(&self) -> TransportStatus {
        *self.shared.status.read()
    }

    fn publish(&self, message: OutboundMessage) -> Result<(), TransportError> {
        validate_topic_name(&message.topic).map_err(|e| TransportError::Rejected(e.to_string()))?;
        self.send(Command::Publish(message))
    }

    fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        validate_topic_filter(filter).map_err(|e| TransportError::Rejected(e.to_string()))?;
        self.shared.filters.lock().insert(filter.to_string());
        self.send(Command::Subscribe(filter.to_string()))
    }

    fn unsubscribe(&self, filter: &str) -> Result<(), TransportError> {
        self.shared.filters.lock().remove(filter);
        self.send(Command::Unsubscribe(filter.to_string()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.send(Command::Disconnect)?;
        self.shared.shutdown.store(true, Ordering::Release);

        // Give the command task a moment to flush the DISCONNECT
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let abort = task.abort_handle();
            if timeout(Duration::from_secs(1), task).await.is_err() {
                abort.abort();
            }
        }

        *self.shared.status.write() = TransportStatus::Disconnected;
        info!("Transport '{}': Disconnected", self.shared.name);
        Ok(())
    }
}

async fn command_loop(
    client: AsyncClient,
    mut command_rx: mpsc::UnboundedReceiver<Command>,
    qos: QoS,
    no_local: bool,
    shared: Arc<Shared>,
) {
    while let Some(command) = command_rx.recv().await {
        let result = match command {
            Command::Publish(message) => {
                let properties = PublishProperties {
                    response_topic: message.response_topic,
                    correlation_data: message.correlation_data,
                    ..Default::default()
                };
                client
                    .publish_with_properties(
                        message.topic,
                        message.qos.into(),
                        message.retain,
                        message.payload,
                        properties,
                    )
                    .await
            }
            Command::Subscribe(filter) => {
                let mut subscription = Filter::new(filter, qos.into());
                subscription.nolocal = no_local;
                client.subscribe_many(vec![subscription]).await
            }
            Command::Unsubscribe(filter) => client.unsubscribe(filter).await,
            Command::Disconnect => {
                if let Err(e) = client.disconnect().await {
                    debug!("Transport '{}': DISCONNECT failed: {}", shared.name, e);
                }
                return;
            }
        };

        if let Err(e) = result {
            warn!("Transport '{}': Request failed: {}", shared.name, e);
        }
    }
}

async fn event_loop(
    mut eventloop: EventLoop,
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    command_tx: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
    (base_retry, max_retry): (Duration, Duration),
    connected_tx: oneshot::Sender<Result<(), TransportError>>,
) {
    let mut connected_tx = Some(connected_tx);
    let mut retry_interval = base_retry;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                *shared.status.write() = TransportStatus::Connected;
                retry_interval = base_retry;

                if let Some(tx) = connected_tx.take() {
                    let _ = tx.send(Ok(()));
                } else {
                    let filters: Vec<String> = shared.filters.lock().iter().cloned().collect();
                    info!(
                        "Transport '{}': Reconnected, restoring {} subscriptions",
                        shared.name,
                        filters.len()
                    );
                    for filter in filters {
                        let _ = command_tx.send(Command::Subscribe(filter));
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if inbound_tx.send(to_inbound(publish)).is_err() {
                    debug!("Transport '{}': Inbound receiver dropped", shared.name);
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Disconnect(disconnect))) => {
                warn!(
                    "Transport '{}': Received DISCONNECT: {:?}",
                    shared.name, disconnect.reason_code
                );
            }
            Ok(_) => {}
            Err(e) => {
                if shared.shutdown.load(Ordering::Acquire) {
                    break;
                }
                if let Some(tx) = connected_tx.take() {
                    let _ = tx.send(Err(TransportError::ConnectionLost(e.to_string())));
                    break;
                }

                error!("Transport '{}': Connection failed: {}", shared.name, e);
                *shared.status.write() = TransportStatus::Backoff;
                debug!(
                    "Transport '{}': Reconnecting in {:?}",
                    shared.name, retry_interval
                );

                tokio::time::sleep(retry_interval).await;
                retry_interval = std::cmp::min(retry_interval * 2, max_retry);
                *shared.status.write() = TransportStatus::Connecting;
            }
        }
    }

    *shared.status.write() = TransportStatus::Disconnected;
}

fn to_inbound(publish: Publish) -> InboundMessage {
    let (response_topic, correlation_data) = match publish.properties {
        Some(properties) => (properties.response_topic, properties.correlation_data),
        None => (None, None),
    };
    InboundMessage {
        topic: String::from_utf8_lossy(&publish.topic).into_owned(),
        payload: publish.payload,
        response_topic,
        correlation_data,
        retain: publish.retain,
    }
}
