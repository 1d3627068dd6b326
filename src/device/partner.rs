//! Partner device template
//!
//! The starting point for a real device integration: every operation is
//! wired, telemetry uses the shared timer implementation, and everything
//! else answers 501 until filled in.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::control::{DeviceControl, DeviceFactory, OperationResult};
use super::requests::*;
use super::telemetry::{collector, TelemetryCollector};
use super::{BaseDevice, DeviceContext, Operation};
use crate::error::DabError;
use crate::protocol::Response;

/// Device template with no device-specific behavior
#[derive(Debug, Clone)]
pub struct PartnerDevice {
    base: BaseDevice,
    address: String,
}

impl PartnerDevice {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            base: BaseDevice::new(),
            address: address.into(),
        }
    }

    /// Address of the target this instance drives
    pub fn address(&self) -> &str {
        &self.address
    }

    fn device_metrics(&self) -> TelemetryCollector {
        collector(|| async { unimplemented_metrics("device telemetry") })
    }

    fn app_metrics(&self, app_id: String) -> TelemetryCollector {
        collector(move || {
            let app_id = app_id.clone();
            async move { unimplemented_metrics(&format!("app telemetry for {}", app_id)) }
        })
    }
}

fn unimplemented_metrics(what: &str) -> Value {
    Response::not_implemented(what).to_value()
}

#[async_trait]
impl DeviceControl for PartnerDevice {
    fn supports(&self, operation: Operation) -> bool {
        matches!(
            operation,
            Operation::StartDeviceTelemetry
                | Operation::StopDeviceTelemetry
                | Operation::StartAppTelemetry
                | Operation::StopAppTelemetry
                | Operation::Discovery
                | Operation::Version
        )
    }

    async fn list_operations(&self, _ctx: &DeviceContext) -> OperationResult {
        self.base.unsupported(Operation::ListOperations)
    }

    async fn list_apps(&self, _ctx: &DeviceContext) -> OperationResult {
        self.base.unsupported(Operation::ListApps)
    }

    async fn launch_app(&self, _ctx: &DeviceContext, _request: LaunchAppRequest) -> OperationResult {
        self.base.unsupported(Operation::LaunchApp)
    }

    async fn launch_app_with_content(
        &self,
        _ctx: &DeviceContext,
        _request: LaunchWithContentRequest,
    ) -> OperationResult {
        self.base.unsupported(Operation::LaunchAppWithContent)
    }

    async fn get_app_state(
        &self,
        _ctx: &DeviceContext,
        _request: AppStateRequest,
    ) -> OperationResult {
        self.base.unsupported(Operation::GetAppState)
    }

    async fn exit_app(&self, _ctx: &DeviceContext, _request: ExitAppRequest) -> OperationResult {
        self.base.unsupported(Operation::ExitApp)
    }

    async fn device_info(&self, _ctx: &DeviceContext) -> OperationResult {
        self.base.unsupported(Operation::DeviceInfo)
    }

    async fn restart(&self, _ctx: &DeviceContext) -> OperationResult {
        self.base.unsupported(Operation::Restart)
    }

    async fn list_settings(&self, _ctx: &DeviceContext) -> OperationResult {
        self.base.unsupported(Operation::ListSettings)
    }

    async fn get_settings(&self, _ctx: &DeviceContext) -> OperationResult {
        self.base.unsupported(Operation::GetSettings)
    }

    async fn set_settings(
        &self,
        _ctx: &DeviceContext,
        _request: SetSettingsRequest,
    ) -> OperationResult {
        self.base.unsupported(Operation::SetSettings)
    }

    async fn list_languages(&self, _ctx: &DeviceContext) -> OperationResult {
        self.base.unsupported(Operation::ListLanguages)
    }

    async fn get_language(&self, _ctx: &DeviceContext) -> OperationResult {
        self.base.unsupported(Operation::GetLanguage)
    }

    async fn set_language(
        &self,
        _ctx: &DeviceContext,
        _request: SetLanguageRequest,
    ) -> OperationResult {
        self.base.unsupported(Operation::SetLanguage)
    }

    async fn list_keys(&self, _ctx: &DeviceContext) -> OperationResult {
        self.base.unsupported(Operation::ListKeys)
    }

    async fn key_press(&self, _ctx: &DeviceContext, _request: KeyPressRequest) -> OperationResult {
        self.base.unsupported(Operation::KeyPress)
    }

    async fn long_key_press(
        &self,
        _ctx: &DeviceContext,
        _request: LongKeyPressRequest,
    ) -> OperationResult {
        self.base.unsupported(Operation::LongKeyPress)
    }

    async fn capture_image(&self, _ctx: &DeviceContext) -> OperationResult {
        self.base.unsupported(Operation::CaptureImage)
    }

    async fn start_device_telemetry(
        &self,
        ctx: &DeviceContext,
        request: TelemetryStartRequest,
    ) -> OperationResult {
        self.base
            .start_device_telemetry(ctx, &request, self.device_metrics())
    }

    async fn stop_device_telemetry(&self, ctx: &DeviceContext) -> OperationResult {
        self.base.stop_device_telemetry(ctx)
    }

    async fn start_app_telemetry(
        &self,
        ctx: &DeviceContext,
        request: AppTelemetryStartRequest,
    ) -> OperationResult {
        let metrics = self.app_metrics(request.app_id.clone().unwrap_or_default());
        self.base.start_app_telemetry(ctx, &request, metrics)
    }

    async fn stop_app_telemetry(
        &self,
        ctx: &DeviceContext,
        request: AppTelemetryStopRequest,
    ) -> OperationResult {
        self.base.stop_app_telemetry(ctx, &request)
    }

    async fn health_check(&self, _ctx: &DeviceContext) -> OperationResult {
        self.base.unsupported(Operation::HealthCheck)
    }

    async fn list_voices(&self, _ctx: &DeviceContext) -> OperationResult {
        self.base.unsupported(Operation::ListVoices)
    }

    async fn set_voice(&self, _ctx: &DeviceContext, _request: SetVoiceRequest) -> OperationResult {
        self.base.unsupported(Operation::SetVoice)
    }

    async fn send_voice_audio(
        &self,
        _ctx: &DeviceContext,
        _request: SendAudioRequest,
    ) -> OperationResult {
        self.base.unsupported(Operation::SendVoiceAudio)
    }

    async fn send_voice_text(
        &self,
        _ctx: &DeviceContext,
        _request: SendTextRequest,
    ) -> OperationResult {
        self.base.unsupported(Operation::SendVoiceText)
    }

    async fn discovery(&self, ctx: &DeviceContext) -> OperationResult {
        self.base.discovery(ctx)
    }

    async fn version(&self, _ctx: &DeviceContext) -> OperationResult {
        self.base.version()
    }
}

/// Factory for [`PartnerDevice`].
///
/// No target passes the compatibility check until one is implemented, so
/// adding a device requires `skipValidation` or `validate_devices = false`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartnerDeviceFactory;

#[async_trait]
impl DeviceFactory for PartnerDeviceFactory {
    async fn check_compatibility(&self, address: &str) -> Result<(), DabError> {
        Err(DabError::BadRequest(format!(
            "device at {} is not compatible with this bridge",
            address
        )))
    }

    async fn create(
        &self,
        _device_id: &str,
        address: &str,
    ) -> Result<Arc<dyn DeviceControl>, DabError> {
        Ok(Arc::new(PartnerDevice::new(address)))
    }
}
