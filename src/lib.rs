//! DAB Bridge - Device Automation Bus over MQTT v5
//!
//! Turns a publish/subscribe broker into a request/response bus for
//! onboarded devices: correlated requests with timeouts, handler dispatch
//! with automatic replies, a bridge-owned device registry, and per-device
//! operation namespaces with telemetry.

pub mod bridge;
pub mod client;
pub mod config;
pub mod device;
pub mod error;
pub mod protocol;
pub mod rpc;
pub mod topic;
pub mod transport;

pub use bridge::{Bridge, BridgeState};
pub use client::{DabClient, DeviceEntry};
pub use config::Config;
pub use device::{Device, DeviceControl, DeviceFactory, Operation};
pub use error::DabError;
pub use protocol::{QoS, Reply, Response};
pub use rpc::{Client, ClientOptions, RpcError, Subscription};
pub use topic::Topics;
pub use transport::{Connection, MemoryBroker, Transport, TransportError};

/// DAB protocol version spoken by this build: `<major>.<minor>` of the
/// package version
pub fn dab_version() -> String {
    let version = env!("CARGO_PKG_VERSION");
    let mut parts = version.splitn(3, '.');
    match (parts.next(), parts.next()) {
        (Some(major), Some(minor)) => format!("{}.{}", major, minor),
        _ => version.to_string(),
    }
}
