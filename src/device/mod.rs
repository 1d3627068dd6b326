//! Device Instances
//!
//! A [`Device`] binds one device-control implementation to a device id and
//! address, and answers requests on `<root>/<deviceId>/<operation-path>`
//! through its own handler on the shared request/response client.
//!
//! Lifecycle:
//! - `start()`: register the namespace handler, publish retained device
//!   info (when the implementation provides it), announce the device online
//! - `stop()`: cancel telemetry, release the handler, clear retained info
//!
//! Unknown operation paths get no reply. Operations an implementation does
//! not support are answered 501 whatever their body.

mod base;
mod control;
mod emulator;
mod operation;
mod partner;
pub mod requests;
mod telemetry;


pub use base::BaseDevice;
pub use control::{DeviceControl, DeviceFactory, OperationResult};
pub use emulator::{EmulatorDevice, EmulatorDeviceFactory};
pub use operation::Operation;
pub use partner::{PartnerDevice, PartnerDeviceFactory};
pub use telemetry::{collector, parse_frequency, Telemetry, TelemetryCollector, TelemetryKey};

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::DabError;
use crate::protocol::{Notification, NotificationLevel, Reply, Response};
use crate::rpc::{Client, Subscription};
use crate::topic::{Route, Topics};
use requests::parse;

/// Everything an operation needs to know about the device it runs on
pub struct DeviceContext {
    device_id: String,
    address: String,
    topics: Topics,
    client: Client,
    telemetry: Telemetry,
}

impl DeviceContext {
    pub fn new(device_id: String, address: String, topics: Topics, client: Client) -> Self {
        Self {
            device_id,
            address,
            topics,
            client,
            telemetry: Telemetry::new(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Publish a notification on `<root>/<deviceId>/messages`
    pub fn notify(&self, level: NotificationLevel, message: impl Into<String>) {
        let topic = self.topics.device_messages(&self.device_id);
        if let Err(e) = self.client.publish(&topic, &Notification::new(level, message)) {
            debug!(device_id = %self.device_id, "Failed to publish notification: {}", e);
        }
    }
}

impl fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceContext")
            .field("device_id", &self.device_id)
            .field("address", &self.address)
            .field("telemetry", &self.telemetry.len())
            .finish()
    }
}

struct DeviceInner {
    context: DeviceContext,
    control: Arc<dyn DeviceControl>,
    subscription: Mutex<Option<Subscription>>,
}

/// A registered device. Cheap to clone.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    pub fn new(context: DeviceContext, control: Arc<dyn DeviceControl>) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                context,
                control,
                subscription: Mutex::new(None),
            }),
        }
    }

    pub fn device_id(&self) -> &str {
        self.inner.context.device_id()
    }

    pub fn address(&self) -> &str {
        self.inner.context.address()
    }

    pub fn context(&self) -> &DeviceContext {
        &self.inner.context
    }

    /// Whether the namespace handler is registered
    pub fn is_running(&self) -> bool {
        self.inner.subscription.lock().is_some()
    }

    /// Register the namespace handler and announce the device
    pub async fn start(&self) -> Result<(), DabError> {
        let ctx = &self.inner.context;
        let filter = ctx.topics().device_filter(ctx.device_id());

        // Own notifications and telemetry share the namespace; only
        // operation paths are requests
        let topics = ctx.topics().clone();
        let is_operation = move |topic: &str| match topics.classify(topic) {
            Route::Device { operation, .. } => Operation::from_path(operation).is_some(),
            _ => false,
        };

        let weak: Weak<DeviceInner> = Arc::downgrade(&self.inner);
        let subscription = ctx.client().handle_where(&filter, is_operation, move |request| {
            let weak = weak.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return Ok(Reply::None);
                };
                let device = Device { inner };
                let Route::Device { operation, .. } =
                    device.context().topics().classify(&request.topic)
                else {
                    return Ok(Reply::None);
                };
                let operation = operation.to_string();
                device.handle_request(&operation, request.body).await
            }
        })?;
        *self.inner.subscription.lock() = Some(subscription);

        match self.inner.control.device_info(ctx).await {
            Ok(info) if info.is_success() => {
                let topic = ctx.topics().device(ctx.device_id(), Operation::DeviceInfo.path());
                ctx.client().publish_retained(&topic, &info)?;
            }
            Ok(info) => debug!(
                device_id = %ctx.device_id(),
                status = info.status,
                "Device info unavailable, nothing retained"
            ),
            Err(e) => debug!(device_id = %ctx.device_id(), "Device info failed: {}", e),
        }

        ctx.notify(
            NotificationLevel::Info,
            format!("DAB device {} at {} is online", ctx.device_id(), ctx.address()),
        );
        info!(device_id = %ctx.device_id(), address = %ctx.address(), "Device started");
        Ok(())
    }

    /// Answer a request addressed to `<root>/<deviceId>/<operation_path>`.
    ///
    /// Unknown operation paths produce no reply.
    pub async fn handle_request(&self, operation_path: &str, body: Value) -> Result<Reply, DabError> {
        match Operation::from_path(operation_path) {
            Some(operation) => self.dispatch(operation, body).await.map(Reply::One),
            None => {
                debug!(device_id = %self.device_id(), operation_path, "Unknown device operation");
                Ok(Reply::None)
            }
        }
    }

    /// Run one operation against the device-control implementation
    pub async fn dispatch(&self, operation: Operation, body: Value) -> OperationResult {
        let ctx = &self.inner.context;
        let control = &self.inner.control;
        debug!(device_id = %ctx.device_id(), %operation, "Dispatching");

        if !control.supports(operation) {
            return Ok(Response::not_implemented(operation));
        }

        match operation {
            Operation::ListOperations => control.list_operations(ctx).await,
            Operation::ListApps => control.list_apps(ctx).await,
            Operation::LaunchApp => control.launch_app(ctx, parse(body)?).await,
            Operation::LaunchAppWithContent => {
                control.launch_app_with_content(ctx, parse(body)?).await
            }
            Operation::GetAppState => control.get_app_state(ctx, parse(body)?).await,
            Operation::ExitApp => control.exit_app(ctx, parse(body)?).await,
            Operation::DeviceInfo => control.device_info(ctx).await,
            Operation::Restart => control.restart(ctx).await,
            Operation::ListSettings => control.list_settings(ctx).await,
            Operation::GetSettings => control.get_settings(ctx).await,
            Operation::SetSettings => control.set_settings(ctx, parse(body)?).await,
            Operation::ListLanguages => control.list_languages(ctx).await,
            Operation::GetLanguage => control.get_language(ctx).await,
            Operation::SetLanguage => control.set_language(ctx, parse(body)?).await,
            Operation::ListKeys => control.list_keys(ctx).await,
            Operation::KeyPress => control.key_press(ctx, parse(body)?).await,
            Operation::LongKeyPress => control.long_key_press(ctx, parse(body)?).await,
            Operation::CaptureImage => control.capture_image(ctx).await,
            Operation::StartDeviceTelemetry => {
                control.start_device_telemetry(ctx, parse(body)?).await
            }
            Operation::StopDeviceTelemetry => control.stop_device_telemetry(ctx).await,
            Operation::StartAppTelemetry => control.start_app_telemetry(ctx, parse(body)?).await,
            Operation::StopAppTelemetry => control.stop_app_telemetry(ctx, parse(body)?).await,
            Operation::HealthCheck => control.health_check(ctx).await,
            Operation::ListVoices => control.list_voices(ctx).await,
            Operation::SetVoice => control.set_voice(ctx, parse(body)?).await,
            Operation::SendVoiceAudio => control.send_voice_audio(ctx, parse(body)?).await,
            Operation::SendVoiceText => control.send_voice_text(ctx, parse(body)?).await,
            Operation::Discovery => control.discovery(ctx).await,
            Operation::Version => control.version(ctx).await,
        }
    }

    /// Cancel telemetry, release the namespace handler, clear retained info.
    /// Stopping twice is a no-op.
    pub async fn stop(&self) {
        let ctx = &self.inner.context;
        let Some(subscription) = self.inner.subscription.lock().take() else {
            return;
        };

        ctx.telemetry().stop_all();
        subscription.end();

        let info_topic = ctx.topics().device(ctx.device_id(), Operation::DeviceInfo.path());
        if let Err(e) = ctx.client().clear_retained(&info_topic) {
            warn!(device_id = %ctx.device_id(), "Failed to clear retained device info: {}", e);
        }
        ctx.notify(
            NotificationLevel::Warn,
            format!("DAB device {} is shutting down", ctx.device_id()),
        );
        info!(device_id = %ctx.device_id(), "Device stopped");
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("device_id", &self.device_id())
            .field("address", &self.address())
            .finish()
    }
}
