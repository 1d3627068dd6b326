//! Telemetry timers
//!
//! Each device keeps at most one running timer per telemetry key: one for
//! device telemetry and one per application id. A running timer calls its
//! collector on every tick and publishes the result to the metrics topic.
//! The first tick fires immediately.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::error::DabError;
use crate::rpc::{Client, RpcError};

/// Produces one telemetry payload per tick
pub type TelemetryCollector = Arc<dyn Fn() -> BoxFuture<'static, Value> + Send + Sync>;

/// Build a collector from an async closure
pub fn collector<F, Fut>(f: F) -> TelemetryCollector
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Value> + Send + 'static,
{
    Arc::new(move || Box::pin(f()) as BoxFuture<'static, Value>)
}

/// Telemetry class, and for application telemetry the app id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TelemetryKey {
    Device,
    App(String),
}

impl fmt::Display for TelemetryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryKey::Device => write!(f, "device"),
            TelemetryKey::App(app) => write!(f, "app {}", app),
        }
    }
}

/// Running timer; aborted when dropped
struct TelemetryTimer {
    handle: JoinHandle<()>,
}

impl TelemetryTimer {
    fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for TelemetryTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Per-device telemetry timers
#[derive(Default)]
pub struct Telemetry {
    timers: Mutex<AHashMap<TelemetryKey, TelemetryTimer>>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start publishing `collector` output to `topic` every `interval`.
    ///
    /// Returns `false` without starting anything if a timer is already
    /// running for `key`. A timer whose task has ended (client closed or
    /// collector panicked) no longer counts as running and is replaced.
    pub fn start(
        &self,
        key: TelemetryKey,
        interval: Duration,
        topic: String,
        client: Client,
        collector: TelemetryCollector,
    ) -> bool {
        let mut timers = self.timers.lock();
        if let Some(timer) = timers.get(&key) {
            if !timer.is_finished() {
                return false;
            }
            warn!(%key, "Telemetry timer ended unexpectedly, restarting");
        }

        debug!(%key, topic = %topic, ?interval, "Starting telemetry");
        let handle = tokio::spawn(run_timer(interval, topic, client, collector));
        timers.insert(key, TelemetryTimer { handle });
        true
    }

    /// Cancel the timer for `key`. Returns `false` if none was running.
    pub fn stop(&self, key: &TelemetryKey) -> bool {
        let removed = self.timers.lock().remove(key);
        match removed {
            Some(_) => {
                debug!(%key, "Stopped telemetry");
                true
            }
            None => false,
        }
    }

    /// Cancel every running timer
    pub fn stop_all(&self) {
        let timers: Vec<_> = self.timers.lock().drain().collect();
        if !timers.is_empty() {
            debug!("Stopping {} telemetry timers", timers.len());
        }
    }

    pub fn is_running(&self, key: &TelemetryKey) -> bool {
        self.timers
            .lock()
            .get(key)
            .map_or(false, |timer| !timer.is_finished())
    }

    pub fn len(&self) -> usize {
        self.timers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.lock().is_empty()
    }
}

async fn run_timer(
    interval: Duration,
    topic: String,
    client: Client,
    collector: TelemetryCollector,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let payload = collector().await;
        match client.publish(&topic, &payload) {
            Ok(()) => {}
            Err(RpcError::Closed) => break,
            Err(e) => warn!(topic = %topic, "Failed to publish telemetry: {}", e),
        }
    }
}

/// Validate a requested frequency: a positive whole number of milliseconds
pub fn parse_frequency(value: Option<&Value>) -> Result<u64, DabError> {
    match value.and_then(Value::as_u64) {
        Some(ms) if ms > 0 => Ok(ms),
        _ => Err(DabError::BadRequest(
            "'frequency' must be set as number of milliseconds between updates".to_string(),
        )),
    }
}
