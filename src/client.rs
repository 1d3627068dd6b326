//! DAB caller helper
//!
//! Typed wrapper over [`Client`] for tools and tests that drive a bridge:
//! device management, device operations, discovery, and the notification
//! and telemetry streams.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::bridge::BridgeOperation;
use crate::config::BridgeConfig;
use crate::device::Operation;
use crate::error::DabError;
use crate::protocol::Message;
use crate::rpc::{Client, Subscription};
use crate::topic::Topics;

/// One entry of a list-devices reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEntry {
    pub address: String,
    pub device_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddDeviceReply {
    device_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDevicesReply {
    #[serde(default)]
    device_list: Vec<DeviceEntry>,
}

#[derive(Deserialize)]
struct VersionReply {
    version: String,
}

fn decode<T: serde::de::DeserializeOwned>(reply: Value) -> Result<T, DabError> {
    serde_json::from_value(reply).map_err(|e| DabError::Internal(format!("unexpected reply: {}", e)))
}

/// Calls a DAB bridge over a request/response client
#[derive(Clone)]
pub struct DabClient {
    client: Client,
    topics: Topics,
    discovery_window: Duration,
}

impl DabClient {
    pub fn new(client: Client, topics: Topics) -> Self {
        Self {
            client,
            topics,
            discovery_window: BridgeConfig::default().discovery_window,
        }
    }

    /// Client for `bridge_id` using the topic root and discovery window of
    /// `config`
    pub fn for_bridge(client: Client, config: &BridgeConfig, bridge_id: &str) -> Self {
        Self {
            client,
            topics: Topics::new(&config.root, bridge_id),
            discovery_window: config.discovery_window,
        }
    }

    pub fn discovery_window(&self) -> Duration {
        self.discovery_window
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    async fn bridge_request(&self, operation: BridgeOperation, body: Value) -> Result<Value, DabError> {
        let topic = self.topics.bridge(operation.path());
        Ok(self.client.request(&topic, &body, None).await?)
    }

    /// Onboard a device and return its device id
    pub async fn add_device(&self, address: &str, skip_validation: bool) -> Result<String, DabError> {
        let reply = self
            .bridge_request(
                BridgeOperation::AddDevice,
                json!({"address": address, "skipValidation": skip_validation}),
            )
            .await?;
        Ok(decode::<AddDeviceReply>(reply)?.device_id)
    }

    pub async fn remove_device(&self, address: &str) -> Result<(), DabError> {
        self.bridge_request(BridgeOperation::RemoveDevice, json!({"address": address}))
            .await?;
        Ok(())
    }

    pub async fn list_devices(&self) -> Result<Vec<DeviceEntry>, DabError> {
        let reply = self
            .bridge_request(BridgeOperation::ListDevices, json!({}))
            .await?;
        Ok(decode::<ListDevicesReply>(reply)?.device_list)
    }

    pub async fn bridge_version(&self) -> Result<String, DabError> {
        let reply = self
            .bridge_request(BridgeOperation::Version, json!({}))
            .await?;
        Ok(decode::<VersionReply>(reply)?.version)
    }

    /// Read the version the bridge retains while online
    pub async fn retained_bridge_version(&self, timeout: Duration) -> Result<String, DabError> {
        let topic = self.topics.bridge(BridgeOperation::Version.path());
        let message = self.client.subscribe_once(&topic, timeout).await?;
        Ok(decode::<VersionReply>(message.body)?.version)
    }

    /// Run one device operation and return the reply body
    pub async fn device_request(
        &self,
        device_id: &str,
        operation: Operation,
        body: Value,
    ) -> Result<Value, DabError> {
        let topic = self.topics.device(device_id, operation.path());
        Ok(self.client.request(&topic, &body, None).await?)
    }

    /// Read the device info a running device retains
    pub async fn retained_device_info(
        &self,
        device_id: &str,
        timeout: Duration,
    ) -> Result<Value, DabError> {
        let topic = self.topics.device(device_id, Operation::DeviceInfo.path());
        Ok(self.client.subscribe_once(&topic, timeout).await?.body)
    }

    /// Broadcast discovery and gather every answer within `window`, or the
    /// configured discovery window when `None`
    pub async fn discover(&self, window: Option<Duration>) -> Result<Vec<DeviceEntry>, DabError> {
        let window = window.unwrap_or(self.discovery_window);
        let replies = self
            .client
            .collect(&self.topics.discovery(), &json!({}), window)
            .await?;
        Ok(replies
            .into_iter()
            .filter_map(|reply| serde_json::from_value(reply).ok())
            .collect())
    }

    /// Follow notifications: the bridge stream, or one device's stream
    pub fn on_messages<F>(&self, device_id: Option<&str>, callback: F) -> Result<Subscription, DabError>
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let topic = match device_id {
            Some(id) => self.topics.device_messages(id),
            None => self.topics.messages(),
        };
        Ok(self.client.subscribe(&topic, callback)?)
    }

    /// Follow device telemetry, or one application's telemetry
    pub fn on_telemetry<F>(
        &self,
        device_id: &str,
        app_id: Option<&str>,
        callback: F,
    ) -> Result<Subscription, DabError>
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let topic = self.topics.telemetry(device_id, app_id);
        Ok(self.client.subscribe(&topic, callback)?)
    }
}
