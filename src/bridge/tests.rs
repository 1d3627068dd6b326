//! Bridge Module Tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::{json, Value};

use super::*;
use crate::device::{DeviceControl, EmulatorDeviceFactory, PartnerDeviceFactory};
use crate::transport::MemoryBroker;

const WAIT: Duration = Duration::from_secs(1);

fn topic(op: &str) -> String {
    format!("dab/bridge/b1/{}", op)
}

async fn online_bridge(factory: Arc<dyn DeviceFactory>) -> (MemoryBroker, Bridge) {
    let broker = MemoryBroker::new();
    let bridge = Bridge::new("b1", BridgeConfig::default(), factory);
    bridge
        .init(broker.connect_with("bridge", true))
        .await
        .unwrap();
    (broker, bridge)
}

async fn call(bridge: &Bridge, op: &str, body: Value) -> Result<Value, DabError> {
    bridge
        .process_message(&topic(op), body)
        .await
        .map(|reply| reply.into_one().unwrap().to_value())
}

/// Factory whose compatibility check always passes and whose devices never
/// construct
struct BrokenFactory {
    attempts: AtomicUsize,
}

#[async_trait]
impl DeviceFactory for BrokenFactory {
    async fn check_compatibility(&self, _address: &str) -> Result<(), DabError> {
        Ok(())
    }

    async fn create(
        &self,
        _device_id: &str,
        address: &str,
    ) -> Result<Arc<dyn DeviceControl>, DabError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(DabError::BadRequest(format!("{} refused the connection", address)))
    }
}

// =============================================================================
// Operation Paths
// =============================================================================

#[test]
fn test_bridge_operation_paths() {
    for op in BridgeOperation::ALL {
        assert_eq!(BridgeOperation::from_path(op.path()), Some(op));
    }
    assert_eq!(BridgeOperation::from_path("reboot"), None);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_not_online_answers_503() {
    let bridge = Bridge::new("b1", BridgeConfig::default(), Arc::new(PartnerDeviceFactory));
    assert_eq!(bridge.state(), BridgeState::Uninitialized);

    let err = call(&bridge, "version", json!({})).await.unwrap_err();
    assert_eq!(err.status(), 503);
}

#[tokio::test]
async fn test_init_publishes_retained_version() {
    let (broker, bridge) = online_bridge(Arc::new(PartnerDeviceFactory)).await;
    assert_eq!(bridge.state(), BridgeState::Online);

    let retained = broker.retained("dab/bridge/b1/version").unwrap();
    let version: Value = serde_json::from_slice(&retained).unwrap();
    assert_eq!(version, json!({"status": 200, "version": crate::dab_version()}));

    bridge.stop().await;
    assert!(broker.retained("dab/bridge/b1/version").is_none());
}

#[tokio::test]
async fn test_init_twice_fails() {
    let (broker, bridge) = online_bridge(Arc::new(PartnerDeviceFactory)).await;
    let err = bridge.init(broker.connect("again")).await.unwrap_err();
    assert_eq!(err.status(), 503);
    assert_eq!(bridge.state(), BridgeState::Online);
}

#[tokio::test]
async fn test_stop_is_terminal() {
    let (_broker, bridge) = online_bridge(Arc::new(PartnerDeviceFactory)).await;
    call(&bridge, "add-device", json!({"address": "10.0.0.5", "skipValidation": true}))
        .await
        .unwrap();

    bridge.stop().await;
    bridge.stop().await;
    assert_eq!(bridge.state(), BridgeState::Stopped);
    assert!(bridge.registry().is_empty());
    assert!(bridge.client().is_none());

    let err = call(&bridge, "list-devices", json!({})).await.unwrap_err();
    assert_eq!(err.status(), 503);
}

#[tokio::test]
async fn test_stop_before_init() {
    let bridge = Bridge::new("b1", BridgeConfig::default(), Arc::new(PartnerDeviceFactory));
    bridge.stop().await;
    assert_eq!(bridge.state(), BridgeState::Stopped);
}

// =============================================================================
// Device Management
// =============================================================================

#[tokio::test]
async fn test_add_list_remove_scenario() {
    let (_broker, bridge) = online_bridge(Arc::new(PartnerDeviceFactory)).await;

    let added = call(
        &bridge,
        "add-device",
        json!({"address": "10.0.0.5", "skipValidation": true}),
    )
    .await
    .unwrap();
    assert_eq!(added, json!({"status": 200, "deviceId": "device0"}));

    let err = call(
        &bridge,
        "add-device",
        json!({"address": "10.0.0.5", "skipValidation": true}),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status(), 400);

    let listed = call(&bridge, "list-devices", json!({})).await.unwrap();
    assert_eq!(
        listed,
        json!({"status": 200, "deviceList": [{"address": "10.0.0.5", "deviceId": "device0"}]})
    );

    let removed = call(&bridge, "remove-device", json!({"address": "10.0.0.5"}))
        .await
        .unwrap();
    assert_eq!(removed, json!({"status": 200}));

    let listed = call(&bridge, "list-devices", json!({})).await.unwrap();
    assert_eq!(listed, json!({"status": 200, "deviceList": []}));

    let err = call(&bridge, "remove-device", json!({"address": "10.0.0.5"}))
        .await
        .unwrap_err();
    assert_eq!(err.status(), 412);
}

#[tokio::test]
async fn test_missing_address_is_bad_request() {
    let (_broker, bridge) = online_bridge(Arc::new(PartnerDeviceFactory)).await;

    for op in ["add-device", "remove-device"] {
        let err = call(&bridge, op, json!({})).await.unwrap_err();
        assert_eq!(err.status(), 400);
        let err = call(&bridge, op, json!({"address": "  "})).await.unwrap_err();
        assert_eq!(err.status(), 400);
    }
    assert!(bridge.registry().is_empty());
}

#[tokio::test]
async fn test_ip_alias_accepted() {
    let (_broker, bridge) = online_bridge(Arc::new(EmulatorDeviceFactory)).await;
    let added = call(&bridge, "add-device", json!({"ip": "10.0.0.9"}))
        .await
        .unwrap();
    assert_eq!(added["deviceId"], "device0");
    assert!(bridge.registry().get_by_address("10.0.0.9").is_some());
}

#[tokio::test]
async fn test_compatibility_failure_registers_nothing() {
    let (_broker, bridge) = online_bridge(Arc::new(PartnerDeviceFactory)).await;

    let err = call(&bridge, "add-device", json!({"address": "10.0.0.5"}))
        .await
        .unwrap_err();
    assert_eq!(err.status(), 400);
    assert!(bridge.registry().is_empty());
    assert!(!bridge.registry().contains("10.0.0.5"));
}

#[tokio::test]
async fn test_validation_can_be_disabled() {
    let broker = MemoryBroker::new();
    let config = BridgeConfig {
        validate_devices: false,
        ..Default::default()
    };
    let bridge = Bridge::new("b1", config, Arc::new(PartnerDeviceFactory));
    bridge.init(broker.connect_with("bridge", true)).await.unwrap();

    let added = call(&bridge, "add-device", json!({"address": "10.0.0.5"}))
        .await
        .unwrap();
    assert_eq!(added["status"], 200);
}

#[tokio::test]
async fn test_construction_failure_is_internal_error() {
    let factory = Arc::new(BrokenFactory {
        attempts: AtomicUsize::new(0),
    });
    let (_broker, bridge) = online_bridge(factory.clone()).await;

    let err = call(&bridge, "add-device", json!({"address": "10.0.0.5"}))
        .await
        .unwrap_err();
    assert_eq!(err.status(), 500);
    assert_eq!(factory.attempts.load(Ordering::SeqCst), 1);
    assert!(bridge.registry().is_empty());

    // The address was released and may be retried
    let err = call(&bridge, "add-device", json!({"address": "10.0.0.5"}))
        .await
        .unwrap_err();
    assert_eq!(err.status(), 500);
    assert_eq!(factory.attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_device_ids_are_not_reused() {
    let (_broker, bridge) = online_bridge(Arc::new(EmulatorDeviceFactory)).await;

    let first = call(&bridge, "add-device", json!({"address": "a"})).await.unwrap();
    call(&bridge, "remove-device", json!({"address": "a"})).await.unwrap();
    let second = call(&bridge, "add-device", json!({"address": "a"})).await.unwrap();

    assert_eq!(first["deviceId"], "device0");
    assert_eq!(second["deviceId"], "device1");
}

#[tokio::test]
async fn test_concurrent_adds_for_one_address() {
    let (_broker, bridge) = online_bridge(Arc::new(EmulatorDeviceFactory)).await;

    let adds = (0..8).map(|_| {
        let bridge = bridge.clone();
        tokio::spawn(async move {
            bridge
                .add_device(json!({"address": "10.0.0.5"}))
                .await
                .map(|r| r.status)
        })
    });
    let outcomes = futures_util::future::join_all(adds).await;

    let successes = outcomes
        .into_iter()
        .filter(|o| matches!(o, Ok(Ok(200))))
        .count();
    assert_eq!(successes, 1);
    assert_eq!(bridge.registry().len(), 1);
}

// =============================================================================
// Routing
// =============================================================================

#[tokio::test]
async fn test_unknown_bridge_operation_is_501() {
    let (_broker, bridge) = online_bridge(Arc::new(PartnerDeviceFactory)).await;
    let response = call(&bridge, "reboot", json!({})).await.unwrap();
    assert_eq!(response["status"], 501);
}

#[tokio::test]
async fn test_discovery_entry_per_device() {
    let (_broker, bridge) = online_bridge(Arc::new(EmulatorDeviceFactory)).await;
    for address in ["10.0.0.5", "10.0.0.6"] {
        call(&bridge, "add-device", json!({"address": address}))
            .await
            .unwrap();
    }

    let reply = bridge.process_message("dab/discovery", json!({})).await.unwrap();
    let entries: HashSet<(String, String)> = reply
        .into_responses()
        .into_iter()
        .map(|r| {
            assert_eq!(r.status, 200);
            (
                r.get("deviceId").unwrap().as_str().unwrap().to_string(),
                r.get("address").unwrap().as_str().unwrap().to_string(),
            )
        })
        .collect();

    let expected: HashSet<_> = [
        ("device0".to_string(), "10.0.0.5".to_string()),
        ("device1".to_string(), "10.0.0.6".to_string()),
    ]
    .into_iter()
    .collect();
    assert_eq!(entries, expected);
}

#[tokio::test]
async fn test_discovery_without_devices_is_empty() {
    let (_broker, bridge) = online_bridge(Arc::new(PartnerDeviceFactory)).await;
    let reply = bridge.process_message("dab/discovery", json!({})).await.unwrap();
    assert_eq!(reply, Reply::Many(Vec::new()));
}

#[tokio::test]
async fn test_device_topics_route_to_registered_devices() {
    let (_broker, bridge) = online_bridge(Arc::new(EmulatorDeviceFactory)).await;
    call(&bridge, "add-device", json!({"address": "10.0.0.5"}))
        .await
        .unwrap();

    let reply = bridge
        .process_message("dab/device0/health-check/get", json!({}))
        .await
        .unwrap();
    assert_eq!(
        reply.into_one().unwrap().to_value(),
        json!({"status": 200, "healthy": true})
    );

    let reply = bridge
        .process_message("dab/device7/health-check/get", json!({}))
        .await
        .unwrap();
    assert_eq!(reply, Reply::None);
}

#[tokio::test]
async fn test_unrecognized_topics_get_no_reply() {
    let (_broker, bridge) = online_bridge(Arc::new(PartnerDeviceFactory)).await;
    for topic in ["other/thing", "dab", "dab/bridge/someone-else/version"] {
        let reply = bridge.process_message(topic, json!({})).await.unwrap();
        assert_eq!(reply, Reply::None, "{}", topic);
    }
}

#[tokio::test]
async fn test_requests_over_transport() {
    let (broker, bridge) = online_bridge(Arc::new(EmulatorDeviceFactory)).await;
    let tester = Client::new(broker.connect("tester"), ClientOptions::default());

    let added = tester
        .request(&topic("add-device"), &json!({"address": "10.0.0.5"}), Some(WAIT))
        .await
        .unwrap();
    assert_eq!(added["deviceId"], "device0");

    let info = tester
        .request("dab/device0/device/info", &json!({}), Some(WAIT))
        .await
        .unwrap();
    assert_eq!(info["model"], "Emulator");

    let replies = tester
        .collect("dab/discovery", &json!({}), Duration::from_millis(200))
        .await
        .unwrap();
    assert_eq!(replies.len(), 1);

    bridge.stop().await;
    let err = tester
        .request(
            &topic("list-devices"),
            &json!({}),
            Some(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, crate::rpc::RpcError::Timeout { .. }));
}

// =============================================================================
// Registry Invariants
// =============================================================================

#[derive(Debug, Clone)]
enum RegistryOp {
    Add(usize),
    Remove(usize),
}

fn registry_op() -> impl Strategy<Value = RegistryOp> {
    prop_oneof![
        (0usize..4).prop_map(RegistryOp::Add),
        (0usize..4).prop_map(RegistryOp::Remove),
    ]
}

fn idle_device(client: &Client, device_id: &str, address: &str) -> Device {
    let context = DeviceContext::new(
        device_id.to_string(),
        address.to_string(),
        Topics::new("dab", "b1"),
        client.clone(),
    );
    Device::new(context, Arc::new(crate::device::PartnerDevice::new(address)))
}

proptest! {
    #[test]
    fn prop_registry_matches_model(ops in proptest::collection::vec(registry_op(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _guard = runtime.enter();
        let broker = MemoryBroker::new();
        let client = Client::new(broker.connect("registry"), ClientOptions::default());

        let registry = DeviceRegistry::new();
        let mut model: HashMap<String, String> = HashMap::new();
        let mut issued = HashSet::new();

        for op in ops {
            match op {
                RegistryOp::Add(n) => {
                    let address = format!("10.0.0.{}", n);
                    match registry.reserve(&address) {
                        Ok(reservation) => {
                            prop_assert!(!model.contains_key(&address));
                            let device_id = reservation.device_id().to_string();
                            prop_assert!(issued.insert(device_id.clone()), "reused {}", device_id);
                            reservation.commit(idle_device(&client, &device_id, &address));
                            model.insert(address, device_id);
                        }
                        Err(e) => {
                            prop_assert!(model.contains_key(&address));
                            prop_assert_eq!(e.status(), 400);
                        }
                    }
                }
                RegistryOp::Remove(n) => {
                    let address = format!("10.0.0.{}", n);
                    match registry.remove(&address) {
                        Ok(device) => {
                            let expected = model.remove(&address);
                            prop_assert_eq!(Some(device.device_id().to_string()), expected);
                        }
                        Err(e) => {
                            prop_assert!(!model.contains_key(&address));
                            prop_assert_eq!(e.status(), 412);
                        }
                    }
                }
            }

            let listed: HashMap<String, String> = registry
                .list()
                .into_iter()
                .map(|r| (r.address, r.device_id))
                .collect();
            prop_assert_eq!(&listed, &model);
            prop_assert_eq!(registry.len(), model.len());
            for (address, device_id) in &model {
                let by_id = registry.get_by_id(device_id);
                prop_assert_eq!(by_id.map(|d| d.address().to_string()), Some(address.clone()));
            }
        }
    }
}

#[tokio::test]
async fn test_dropped_reservation_releases_address() {
    let registry = DeviceRegistry::new();
    {
        let reservation = registry.reserve("10.0.0.5").unwrap();
        assert_eq!(reservation.device_id(), "device0");
        assert!(registry.contains("10.0.0.5"));
        assert!(registry.reserve("10.0.0.5").is_err());
        assert_eq!(registry.remove("10.0.0.5").unwrap_err().status(), 412);
    }
    assert!(!registry.contains("10.0.0.5"));
    assert!(registry.list().is_empty());

    let reservation = registry.reserve("10.0.0.5").unwrap();
    assert_eq!(reservation.device_id(), "device1");
}

#[tokio::test]
async fn test_drain_returns_devices_in_order() {
    let broker = MemoryBroker::new();
    let client = Client::new(broker.connect("registry"), ClientOptions::default());
    let registry = DeviceRegistry::new();

    for address in ["c", "a", "b"] {
        let reservation = registry.reserve(address).unwrap();
        let device = idle_device(&client, reservation.device_id(), address);
        reservation.commit(device);
    }
    let pending = registry.reserve("z").unwrap();

    let drained: Vec<_> = registry
        .drain()
        .iter()
        .map(|d| d.device_id().to_string())
        .collect();
    assert_eq!(drained, vec!["device0", "device1", "device2"]);
    assert!(registry.is_empty());
    assert!(registry.contains("z"));
    drop(pending);
    assert!(!registry.contains("z"));
}
