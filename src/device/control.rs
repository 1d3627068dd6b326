//! Device-control capability set
//!
//! A device implementation answers every operation. Operations it does not
//! support are answered 501 before their request body is decoded, and
//! delegate to [`BaseDevice`](super::BaseDevice) when called directly.

use std::sync::Arc;

use async_trait::async_trait;

use super::requests::*;
use super::{DeviceContext, Operation};
use crate::error::DabError;
use crate::protocol::Response;

/// Result of a device operation
pub type OperationResult = Result<Response, DabError>;

/// The full device-control surface
#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// Whether `operation` has a real implementation on this device
    fn supports(&self, operation: Operation) -> bool;

    async fn list_operations(&self, ctx: &DeviceContext) -> OperationResult;

    async fn list_apps(&self, ctx: &DeviceContext) -> OperationResult;

    async fn launch_app(&self, ctx: &DeviceContext, request: LaunchAppRequest) -> OperationResult;

    async fn launch_app_with_content(
        &self,
        ctx: &DeviceContext,
        request: LaunchWithContentRequest,
    ) -> OperationResult;

    async fn get_app_state(&self, ctx: &DeviceContext, request: AppStateRequest)
        -> OperationResult;

    async fn exit_app(&self, ctx: &DeviceContext, request: ExitAppRequest) -> OperationResult;

    /// Device information; a 2xx result is also published retained on start
    async fn device_info(&self, ctx: &DeviceContext) -> OperationResult;

    async fn restart(&self, ctx: &DeviceContext) -> OperationResult;

    async fn list_settings(&self, ctx: &DeviceContext) -> OperationResult;

    async fn get_settings(&self, ctx: &DeviceContext) -> OperationResult;

    async fn set_settings(&self, ctx: &DeviceContext, request: SetSettingsRequest)
        -> OperationResult;

    async fn list_languages(&self, ctx: &DeviceContext) -> OperationResult;

    async fn get_language(&self, ctx: &DeviceContext) -> OperationResult;

    async fn set_language(&self, ctx: &DeviceContext, request: SetLanguageRequest)
        -> OperationResult;

    async fn list_keys(&self, ctx: &DeviceContext) -> OperationResult;

    async fn key_press(&self, ctx: &DeviceContext, request: KeyPressRequest) -> OperationResult;

    async fn long_key_press(
        &self,
        ctx: &DeviceContext,
        request: LongKeyPressRequest,
    ) -> OperationResult;

    async fn capture_image(&self, ctx: &DeviceContext) -> OperationResult;

    async fn start_device_telemetry(
        &self,
        ctx: &DeviceContext,
        request: TelemetryStartRequest,
    ) -> OperationResult;

    async fn stop_device_telemetry(&self, ctx: &DeviceContext) -> OperationResult;

    async fn start_app_telemetry(
        &self,
        ctx: &DeviceContext,
        request: AppTelemetryStartRequest,
    ) -> OperationResult;

    async fn stop_app_telemetry(
        &self,
        ctx: &DeviceContext,
        request: AppTelemetryStopRequest,
    ) -> OperationResult;

    async fn health_check(&self, ctx: &DeviceContext) -> OperationResult;

    async fn list_voices(&self, ctx: &DeviceContext) -> OperationResult;

    async fn set_voice(&self, ctx: &DeviceContext, request: SetVoiceRequest) -> OperationResult;

    async fn send_voice_audio(&self, ctx: &DeviceContext, request: SendAudioRequest)
        -> OperationResult;

    async fn send_voice_text(&self, ctx: &DeviceContext, request: SendTextRequest)
        -> OperationResult;

    /// Self-report for discovery broadcasts
    async fn discovery(&self, ctx: &DeviceContext) -> OperationResult;

    async fn version(&self, ctx: &DeviceContext) -> OperationResult;
}

/// Creates device-control instances for addresses added to a bridge
#[async_trait]
pub trait DeviceFactory: Send + Sync {
    /// Check that the target at `address` can be driven by this factory.
    /// An error rejects the add and is reported with its own status.
    async fn check_compatibility(&self, address: &str) -> Result<(), DabError>;

    /// Construct a device-control instance bound to `(device_id, address)`
    async fn create(
        &self,
        device_id: &str,
        address: &str,
    ) -> Result<Arc<dyn DeviceControl>, DabError>;
}
