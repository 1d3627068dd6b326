//! Bridge Integration Tests
//!
//! Drive a bridge end to end over the in-process broker: a caller on its own
//! connection issues correlated requests, the bridge answers on its own.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::timeout;

use dab_bridge::config::BridgeConfig;
use dab_bridge::device::{EmulatorDeviceFactory, PartnerDeviceFactory};
use dab_bridge::{
    Bridge, BridgeState, Client, ClientOptions, DabClient, DeviceFactory, MemoryBroker, Operation,
    RpcError, Topics,
};

const WAIT: Duration = Duration::from_secs(1);

struct TestBus {
    broker: MemoryBroker,
    bridge: Bridge,
    caller: Client,
}

impl TestBus {
    async fn start(factory: Arc<dyn DeviceFactory>) -> Self {
        let broker = MemoryBroker::new();
        let bridge = Bridge::new("myBridge0", BridgeConfig::default(), factory);
        bridge
            .init(broker.connect_with("bridge", true))
            .await
            .expect("bridge init");

        let caller = Client::new(
            broker.connect("caller"),
            ClientOptions {
                request_timeout: WAIT,
                ..Default::default()
            },
        );
        Self {
            broker,
            bridge,
            caller,
        }
    }

    async fn request(&self, topic: &str, body: Value) -> Result<Value, RpcError> {
        self.caller.request(topic, &body, None).await
    }

    fn dab(&self) -> DabClient {
        DabClient::new(self.caller.clone(), Topics::new("dab", "myBridge0"))
    }
}

// =============================================================================
// Device Lifecycle
// =============================================================================

#[tokio::test]
async fn test_add_list_remove_end_to_end() {
    let bus = TestBus::start(Arc::new(PartnerDeviceFactory)).await;

    let added = bus
        .request(
            "dab/bridge/myBridge0/add-device",
            json!({"address": "10.0.0.5", "skipValidation": true}),
        )
        .await
        .unwrap();
    assert_eq!(added, json!({"status": 200, "deviceId": "device0"}));

    let err = bus
        .request(
            "dab/bridge/myBridge0/add-device",
            json!({"address": "10.0.0.5", "skipValidation": true}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.status(), 400);
    assert_eq!(
        err.body().unwrap()["error"],
        "a device with address 10.0.0.5 is already registered"
    );

    let listed = bus
        .request("dab/bridge/myBridge0/list-devices", json!({}))
        .await
        .unwrap();
    assert_eq!(
        listed,
        json!({"status": 200, "deviceList": [{"address": "10.0.0.5", "deviceId": "device0"}]})
    );

    let removed = bus
        .request(
            "dab/bridge/myBridge0/remove-device",
            json!({"address": "10.0.0.5"}),
        )
        .await
        .unwrap();
    assert_eq!(removed, json!({"status": 200}));

    let listed = bus
        .request("dab/bridge/myBridge0/list-devices", json!({}))
        .await
        .unwrap();
    assert_eq!(listed, json!({"status": 200, "deviceList": []}));

    let err = bus
        .request(
            "dab/bridge/myBridge0/remove-device",
            json!({"address": "10.0.0.5"}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.status(), 412);
}

#[tokio::test]
async fn test_error_reply_carries_request() {
    let bus = TestBus::start(Arc::new(PartnerDeviceFactory)).await;

    let err = bus
        .request("dab/bridge/myBridge0/add-device", json!({"name": "tv"}))
        .await
        .unwrap_err();
    let body = err.body().unwrap();
    assert_eq!(body["status"], 400);
    assert_eq!(body["request"], json!({"name": "tv"}));
}

#[tokio::test]
async fn test_unknown_bridge_operation() {
    let bus = TestBus::start(Arc::new(PartnerDeviceFactory)).await;
    let err = bus
        .request("dab/bridge/myBridge0/invalid-operation", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.status(), 501);
}

#[tokio::test]
async fn test_other_bridges_are_ignored() {
    let bus = TestBus::start(Arc::new(PartnerDeviceFactory)).await;
    let err = bus
        .caller
        .request(
            "dab/bridge/otherBridge/list-devices",
            &json!({}),
            Some(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Timeout { .. }));
}

#[tokio::test]
async fn test_version() {
    let bus = TestBus::start(Arc::new(PartnerDeviceFactory)).await;
    let version = bus
        .request("dab/bridge/myBridge0/version", json!({}))
        .await
        .unwrap();
    assert_eq!(version["status"], 200);
    assert_eq!(version["version"], dab_bridge::dab_version());

    let retained = bus.dab().retained_bridge_version(WAIT).await.unwrap();
    assert_eq!(retained, dab_bridge::dab_version());
}

// =============================================================================
// Discovery
// =============================================================================

#[tokio::test]
async fn test_discovery_with_two_devices() {
    let bus = TestBus::start(Arc::new(EmulatorDeviceFactory)).await;
    let dab = bus.dab();
    dab.add_device("10.0.0.5", false).await.unwrap();
    dab.add_device("10.0.0.6", false).await.unwrap();

    let replies = bus
        .caller
        .collect("dab/discovery", &json!({}), Duration::from_millis(300))
        .await
        .unwrap();
    assert_eq!(replies.len(), 2);

    let seen: HashSet<(String, String)> = replies
        .iter()
        .map(|reply| {
            assert_eq!(reply["status"], 200);
            (
                reply["deviceId"].as_str().unwrap().to_string(),
                reply["address"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    assert!(seen.contains(&("device0".to_string(), "10.0.0.5".to_string())));
    assert!(seen.contains(&("device1".to_string(), "10.0.0.6".to_string())));
}

// =============================================================================
// Device Operations
// =============================================================================

#[tokio::test]
async fn test_unimplemented_device_operations_answer_501() {
    let bus = TestBus::start(Arc::new(PartnerDeviceFactory)).await;
    let dab = bus.dab();
    let device_id = dab.add_device("10.0.0.5", true).await.unwrap();

    for (operation, body) in [
        (Operation::ListApps, json!({})),
        (Operation::LaunchApp, json!({"appId": "YouTube"})),
        (Operation::LaunchApp, json!({})),
        (Operation::LaunchApp, json!("{ \"appId\": \"Cobalt\" }")),
        (Operation::KeyPress, json!({"keyCode": "KEY_HOME"})),
        (Operation::KeyPress, json!({})),
        (Operation::GetSettings, json!({})),
        (Operation::SetSettings, json!({})),
        (Operation::HealthCheck, json!({})),
    ] {
        let err = dab
            .device_request(&device_id, operation, body)
            .await
            .unwrap_err();
        assert_eq!(err.status(), 501, "{}", operation);
    }
}

#[tokio::test]
async fn test_unknown_device_operation_gets_no_reply() {
    let bus = TestBus::start(Arc::new(PartnerDeviceFactory)).await;
    bus.dab().add_device("10.0.0.5", true).await.unwrap();

    let err = bus
        .caller
        .request(
            "dab/device0/not/an/operation",
            &json!({}),
            Some(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Timeout { .. }));
}

#[tokio::test]
async fn test_telemetry_scenario() {
    let bus = TestBus::start(Arc::new(EmulatorDeviceFactory)).await;
    let dab = bus.dab();
    let device_id = dab.add_device("10.0.0.5", false).await.unwrap();

    let started = dab
        .device_request(
            &device_id,
            Operation::StartDeviceTelemetry,
            json!({"frequency": 1000}),
        )
        .await
        .unwrap();
    assert_eq!(started, json!({"status": 200, "frequency": 1000}));

    let err = dab
        .device_request(
            &device_id,
            Operation::StartDeviceTelemetry,
            json!({"frequency": 1000}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.status(), 400);

    let stopped = dab
        .device_request(&device_id, Operation::StopDeviceTelemetry, json!({}))
        .await
        .unwrap();
    assert_eq!(stopped["status"], 200);

    let err = dab
        .device_request(&device_id, Operation::StopDeviceTelemetry, json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.status(), 400);
}

#[tokio::test]
async fn test_removed_device_stops_telemetry() {
    let bus = TestBus::start(Arc::new(EmulatorDeviceFactory)).await;
    let dab = bus.dab();
    let device_id = dab.add_device("10.0.0.5", false).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _metrics = dab
        .on_telemetry(&device_id, None, move |message| {
            let _ = tx.send(message.body.clone());
        })
        .unwrap();

    dab.device_request(
        &device_id,
        Operation::StartDeviceTelemetry,
        json!({"frequency": 20}),
    )
    .await
    .unwrap();
    timeout(WAIT, rx.recv()).await.unwrap().unwrap();

    dab.remove_device("10.0.0.5").await.unwrap();
    assert!(bus.broker.retained("dab/device0/device/info").is_none());

    // Drain anything already in flight, then expect silence
    tokio::time::sleep(Duration::from_millis(50)).await;
    while rx.try_recv().is_ok() {}
    assert!(timeout(Duration::from_millis(150), rx.recv()).await.is_err());
}

// =============================================================================
// Notifications and Shutdown
// =============================================================================

#[tokio::test]
async fn test_shutdown_notifies_and_clears_retained() {
    let bus = TestBus::start(Arc::new(EmulatorDeviceFactory)).await;
    let dab = bus.dab();
    dab.add_device("10.0.0.5", false).await.unwrap();
    assert!(bus.broker.retained("dab/device0/device/info").is_some());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _messages = dab
        .on_messages(None, move |message| {
            let _ = tx.send(message.body.clone());
        })
        .unwrap();

    bus.bridge.stop().await;
    assert_eq!(bus.bridge.state(), BridgeState::Stopped);

    let notification = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(notification["level"], "warn");
    assert_eq!(
        notification["message"],
        "DAB Bridge myBridge0 is going offline"
    );

    assert!(bus.broker.retained("dab/bridge/myBridge0/version").is_none());
    assert!(bus.broker.retained("dab/device0/device/info").is_none());
}
