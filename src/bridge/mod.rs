//! DAB Bridge
//!
//! The bridge owns one request/response client and the device registry. It
//! answers management operations on `<root>/bridge/<bridgeId>/<operation>`
//! and the global `<root>/discovery` broadcast; each registered device
//! answers its own namespace through a handler on the same client.
//!
//! # Lifecycle
//!
//! `Uninitialized -> Initializing -> Online -> Stopping -> Stopped`
//!
//! Operations are only accepted while `Online`; anything else answers 503.
//! A stopped bridge cannot be initialized again.
//!
//! # Example Configuration
//!
//! ```toml
//! [bridge]
//! id = "livingRoom"
//! root = "dab"
//! validate_devices = true
//! ```

mod registry;

#[cfg(test)]
mod tests;

pub use registry::{DeviceRegistry, Registration, Reservation};

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::device::requests::{parse, RequestBody};
use crate::device::{Device, DeviceContext, DeviceFactory};
use crate::error::DabError;
use crate::protocol::{Notification, NotificationLevel, QoS, Reply, Response};
use crate::rpc::{Client, ClientOptions, Subscription};
use crate::topic::{Route, Topics};
use crate::transport::Connection;

/// Bridge lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Uninitialized,
    Initializing,
    Online,
    Stopping,
    Stopped,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BridgeState::Uninitialized => "uninitialized",
            BridgeState::Initializing => "initializing",
            BridgeState::Online => "online",
            BridgeState::Stopping => "stopping",
            BridgeState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Management operations under `<root>/bridge/<bridgeId>/`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeOperation {
    AddDevice,
    RemoveDevice,
    ListDevices,
    Version,
}

impl BridgeOperation {
    pub const ALL: [BridgeOperation; 4] = [
        BridgeOperation::AddDevice,
        BridgeOperation::RemoveDevice,
        BridgeOperation::ListDevices,
        BridgeOperation::Version,
    ];

    pub fn path(self) -> &'static str {
        match self {
            BridgeOperation::AddDevice => "add-device",
            BridgeOperation::RemoveDevice => "remove-device",
            BridgeOperation::ListDevices => "list-devices",
            BridgeOperation::Version => "version",
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.path() == path)
    }
}

impl fmt::Display for BridgeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddDeviceRequest {
    #[serde(default, alias = "ip")]
    address: Option<String>,
    #[serde(default)]
    skip_validation: bool,
}

impl RequestBody for AddDeviceRequest {
    fn validate(&self) -> Result<(), DabError> {
        require_address(self.address.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct RemoveDeviceRequest {
    #[serde(default, alias = "ip")]
    address: Option<String>,
}

impl RequestBody for RemoveDeviceRequest {
    fn validate(&self) -> Result<(), DabError> {
        require_address(self.address.as_deref())
    }
}

fn require_address(address: Option<&str>) -> Result<(), DabError> {
    match address {
        Some(a) if !a.trim().is_empty() => Ok(()),
        _ => Err(DabError::BadRequest(
            "'address' must be provided".to_string(),
        )),
    }
}

struct BridgeInner {
    topics: Topics,
    config: BridgeConfig,
    qos: QoS,
    factory: Arc<dyn DeviceFactory>,
    registry: DeviceRegistry,
    state: RwLock<BridgeState>,
    client: RwLock<Option<Client>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

/// A DAB bridge. Cheap to clone.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Bridge {
    pub fn new(
        bridge_id: impl Into<String>,
        config: BridgeConfig,
        factory: Arc<dyn DeviceFactory>,
    ) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                topics: Topics::new(config.root.clone(), bridge_id),
                config,
                qos: QoS::ExactlyOnce,
                factory,
                registry: DeviceRegistry::new(),
                state: RwLock::new(BridgeState::Uninitialized),
                client: RwLock::new(None),
                subscriptions: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Set the QoS used for every publish. Only effective before `init`.
    pub fn with_qos(self, qos: QoS) -> Self {
        match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                inner.qos = qos;
                Self {
                    inner: Arc::new(inner),
                }
            }
            Err(inner) => Self { inner },
        }
    }

    pub fn bridge_id(&self) -> &str {
        self.inner.topics.bridge_id()
    }

    pub fn topics(&self) -> &Topics {
        &self.inner.topics
    }

    pub fn state(&self) -> BridgeState {
        *self.inner.state.read()
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.inner.registry
    }

    /// The bridge's client, while initialized
    pub fn client(&self) -> Option<Client> {
        self.inner.client.read().clone()
    }

    /// Take ownership of a transport connection, register the management
    /// handlers, and go online.
    pub async fn init(&self, connection: Connection) -> Result<(), DabError> {
        {
            let mut state = self.inner.state.write();
            if *state != BridgeState::Uninitialized {
                return Err(DabError::InvalidState(format!(
                    "bridge {} is {}, cannot initialize",
                    self.bridge_id(),
                    *state
                )));
            }
            *state = BridgeState::Initializing;
        }
        info!(bridge_id = %self.bridge_id(), "Initializing bridge");

        let client = Client::new(
            connection,
            ClientOptions {
                qos: self.inner.qos,
                request_timeout: self.inner.config.request_timeout,
            },
        );
        *self.inner.client.write() = Some(client.clone());

        if let Err(e) = self.register_handlers(&client) {
            error!(bridge_id = %self.bridge_id(), "Failed to register handlers: {}", e);
            self.inner.subscriptions.lock().clear();
            self.inner.client.write().take();
            let _ = client.disconnect().await;
            *self.inner.state.write() = BridgeState::Stopped;
            return Err(e);
        }

        *self.inner.state.write() = BridgeState::Online;

        let version_topic = self.inner.topics.bridge(BridgeOperation::Version.path());
        if let Err(e) = client.publish_retained(&version_topic, &self.version()) {
            warn!(bridge_id = %self.bridge_id(), "Failed to publish version: {}", e);
        }
        self.notify(
            NotificationLevel::Info,
            format!("DAB Bridge {} is online", self.bridge_id()),
        );
        info!(bridge_id = %self.bridge_id(), root = %self.inner.topics.root(), "Bridge online");
        Ok(())
    }

    fn register_handlers(&self, client: &Client) -> Result<(), DabError> {
        let filters = [self.inner.topics.bridge_filter(), self.inner.topics.discovery()];
        for filter in filters {
            let weak = Arc::downgrade(&self.inner);
            let subscription = client.handle(&filter, move |request| {
                let weak = weak.clone();
                async move {
                    let Some(inner) = weak.upgrade() else {
                        return Ok(Reply::None);
                    };
                    Bridge { inner }
                        .process_message(&request.topic, request.body)
                        .await
                }
            })?;
            self.inner.subscriptions.lock().push(subscription);
        }
        Ok(())
    }

    /// Route one inbound message and produce its reply.
    ///
    /// Unrecognized topics, and device topics for unknown devices, produce
    /// no reply.
    pub async fn process_message(&self, topic: &str, body: Value) -> Result<Reply, DabError> {
        let state = self.state();
        if state != BridgeState::Online {
            return Err(DabError::InvalidState(format!(
                "bridge {} is {}",
                self.bridge_id(),
                state
            )));
        }

        match self.inner.topics.classify(topic) {
            Route::Bridge(operation) => self.bridge_operation(operation, body).await.map(Reply::One),
            Route::Discovery => Ok(Reply::Many(self.discovery())),
            Route::Device {
                device_id,
                operation,
            } => match self.inner.registry.get_by_id(device_id) {
                Some(device) => device.handle_request(operation, body).await,
                None => {
                    debug!(topic, device_id, "No device registered, dropping");
                    Ok(Reply::None)
                }
            },
            Route::Unrecognized => {
                debug!(topic, "Unrecognized topic, dropping");
                Ok(Reply::None)
            }
        }
    }

    async fn bridge_operation(&self, operation: &str, body: Value) -> Result<Response, DabError> {
        let Some(operation) = BridgeOperation::from_path(operation) else {
            return Ok(Response::not_implemented(operation));
        };
        debug!(bridge_id = %self.bridge_id(), %operation, "Bridge operation");

        match operation {
            BridgeOperation::AddDevice => self.add_device(body).await,
            BridgeOperation::RemoveDevice => self.remove_device(body).await,
            BridgeOperation::ListDevices => Ok(self.list_devices()),
            BridgeOperation::Version => Ok(self.version()),
        }
    }

    /// Onboard the device at the requested address.
    ///
    /// The address stays reserved while the compatibility check runs and the
    /// device starts, so a concurrent add for the same address is rejected.
    /// Any failure releases the reservation.
    pub async fn add_device(&self, body: Value) -> Result<Response, DabError> {
        let request: AddDeviceRequest = parse(body)?;
        let address = request.address.unwrap_or_default().trim().to_string();

        let reservation = self.inner.registry.reserve(&address)?;
        let device_id = reservation.device_id().to_string();

        if self.inner.config.validate_devices && !request.skip_validation {
            if let Err(e) = self.inner.factory.check_compatibility(&address).await {
                info!(address = %address, "Compatibility check failed: {}", e);
                return Err(e);
            }
        }

        let client = self.require_client()?;
        let control = self
            .inner
            .factory
            .create(&device_id, &address)
            .await
            .map_err(|e| {
                DabError::Internal(format!("failed to create device at {}: {}", address, e))
            })?;

        let context = DeviceContext::new(
            device_id.clone(),
            address.clone(),
            self.inner.topics.clone(),
            client,
        );
        let device = Device::new(context, control);
        if let Err(e) = device.start().await {
            device.stop().await;
            return Err(DabError::Internal(format!(
                "failed to start device at {}: {}",
                address, e
            )));
        }

        // Commit under the state lock so a concurrent stop either drains this
        // device or makes the add fail.
        let committed = {
            let state = self.inner.state.read();
            if *state == BridgeState::Online {
                reservation.commit(device.clone());
                true
            } else {
                false
            }
        };
        if !committed {
            device.stop().await;
            return Err(DabError::InvalidState(format!(
                "bridge {} went offline while adding {}",
                self.bridge_id(),
                address
            )));
        }

        info!(bridge_id = %self.bridge_id(), device_id = %device_id, address = %address, "Device added");
        Ok(Response::ok().with("deviceId", device_id))
    }

    /// Stop and forget the device at the requested address
    pub async fn remove_device(&self, body: Value) -> Result<Response, DabError> {
        let request: RemoveDeviceRequest = parse(body)?;
        let address = request.address.unwrap_or_default().trim().to_string();

        let device = self.inner.registry.remove(&address)?;
        device.stop().await;
        info!(bridge_id = %self.bridge_id(), device_id = %device.device_id(), address = %address, "Device removed");
        Ok(Response::ok())
    }

    /// `{status: 200, deviceList: [{address, deviceId}, ...]}`
    pub fn list_devices(&self) -> Response {
        let devices: Vec<Value> = self
            .inner
            .registry
            .list()
            .into_iter()
            .map(|r| serde_json::json!({"address": r.address, "deviceId": r.device_id}))
            .collect();
        Response::ok().with("deviceList", devices)
    }

    /// `{status: 200, version: "<major>.<minor>"}`
    pub fn version(&self) -> Response {
        Response::ok().with("version", crate::dab_version())
    }

    /// One `{status: 200, deviceId, address}` entry per registered device
    pub fn discovery(&self) -> Vec<Response> {
        self.inner
            .registry
            .list()
            .into_iter()
            .map(|r| {
                Response::ok()
                    .with("deviceId", r.device_id)
                    .with("address", r.address)
            })
            .collect()
    }

    /// Publish a notification on `<root>/messages`
    pub fn notify(&self, level: NotificationLevel, message: impl Into<String>) {
        let Some(client) = self.client() else {
            return;
        };
        let topic = self.inner.topics.messages();
        if let Err(e) = client.publish(&topic, &Notification::new(level, message)) {
            debug!(bridge_id = %self.bridge_id(), "Failed to publish notification: {}", e);
        }
    }

    fn require_client(&self) -> Result<Client, DabError> {
        self.client().ok_or_else(|| {
            DabError::InvalidState(format!("bridge {} has no connection", self.bridge_id()))
        })
    }

    /// Stop every device, announce the bridge offline, clear retained
    /// metadata, and disconnect. Stopping twice is a no-op.
    pub async fn stop(&self) {
        {
            let mut state = self.inner.state.write();
            match *state {
                BridgeState::Stopping | BridgeState::Stopped => return,
                BridgeState::Uninitialized => {
                    *state = BridgeState::Stopped;
                    return;
                }
                BridgeState::Initializing | BridgeState::Online => {
                    *state = BridgeState::Stopping;
                }
            }
        }
        info!(bridge_id = %self.bridge_id(), "Stopping bridge");

        for device in self.inner.registry.drain() {
            device.stop().await;
        }

        self.notify(
            NotificationLevel::Warn,
            format!("DAB Bridge {} is going offline", self.bridge_id()),
        );

        let subscriptions: Vec<_> = self.inner.subscriptions.lock().drain(..).collect();
        for subscription in subscriptions {
            subscription.end();
        }

        let client = self.inner.client.write().take();
        if let Some(client) = client {
            let version_topic = self.inner.topics.bridge(BridgeOperation::Version.path());
            if let Err(e) = client.clear_retained(&version_topic) {
                warn!(bridge_id = %self.bridge_id(), "Failed to clear retained version: {}", e);
            }
            if let Err(e) = client.disconnect().await {
                warn!(bridge_id = %self.bridge_id(), "Disconnect failed: {}", e);
            }
        }

        *self.inner.state.write() = BridgeState::Stopped;
        info!(bridge_id = %self.bridge_id(), "Bridge stopped");
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("bridge_id", &self.bridge_id())
            .field("state", &self.state())
            .field("devices", &self.inner.registry.len())
            .finish()
    }
}
