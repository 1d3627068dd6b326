//! Default operation behavior
//!
//! [`BaseDevice`] is composed into device implementations: unsupported
//! operations delegate to [`BaseDevice::unsupported`], and telemetry,
//! discovery and version have working implementations here.

use std::time::Duration;

use super::control::OperationResult;
use super::requests::{AppTelemetryStartRequest, AppTelemetryStopRequest, TelemetryStartRequest};
use super::telemetry::{parse_frequency, TelemetryCollector, TelemetryKey};
use super::{DeviceContext, Operation};
use crate::error::DabError;
use crate::protocol::Response;

#[derive(Debug, Clone, Copy, Default)]
pub struct BaseDevice;

impl BaseDevice {
    pub fn new() -> Self {
        Self
    }

    /// The 501 envelope for an operation without an implementation
    pub fn unsupported(&self, operation: Operation) -> OperationResult {
        Ok(Response::not_implemented(operation))
    }

    /// Start device telemetry, publishing `collector` output at the requested
    /// frequency to `<root>/<deviceId>/device-telemetry/metrics`
    pub fn start_device_telemetry(
        &self,
        ctx: &DeviceContext,
        request: &TelemetryStartRequest,
        collector: TelemetryCollector,
    ) -> OperationResult {
        let frequency = parse_frequency(request.frequency.as_ref())?;
        let started = ctx.telemetry().start(
            TelemetryKey::Device,
            Duration::from_millis(frequency),
            ctx.topics().telemetry(ctx.device_id(), None),
            ctx.client().clone(),
            collector,
        );
        if !started {
            return Err(DabError::BadRequest(
                "Device telemetry is already started, stop it first".to_string(),
            ));
        }
        Ok(Response::ok().with("frequency", frequency))
    }

    pub fn stop_device_telemetry(&self, ctx: &DeviceContext) -> OperationResult {
        if !ctx.telemetry().stop(&TelemetryKey::Device) {
            return Err(DabError::BadRequest(
                "Device telemetry not started".to_string(),
            ));
        }
        Ok(Response::ok())
    }

    /// Start telemetry for one application, published to
    /// `<root>/<deviceId>/device-telemetry/metrics/<appId>`
    pub fn start_app_telemetry(
        &self,
        ctx: &DeviceContext,
        request: &AppTelemetryStartRequest,
        collector: TelemetryCollector,
    ) -> OperationResult {
        let app_id = app_id(request.app_id.as_deref(), "start")?;
        let frequency = parse_frequency(request.frequency.as_ref())?;
        let started = ctx.telemetry().start(
            TelemetryKey::App(app_id.to_string()),
            Duration::from_millis(frequency),
            ctx.topics().telemetry(ctx.device_id(), Some(app_id)),
            ctx.client().clone(),
            collector,
        );
        if !started {
            return Err(DabError::BadRequest(format!(
                "App telemetry is already started for {}, stop it first",
                app_id
            )));
        }
        Ok(Response::ok().with("frequency", frequency))
    }

    pub fn stop_app_telemetry(
        &self,
        ctx: &DeviceContext,
        request: &AppTelemetryStopRequest,
    ) -> OperationResult {
        let app_id = app_id(request.app_id.as_deref(), "stop")?;
        if !ctx.telemetry().stop(&TelemetryKey::App(app_id.to_string())) {
            return Err(DabError::BadRequest(format!(
                "App telemetry for {} not started",
                app_id
            )));
        }
        Ok(Response::ok())
    }

    /// `{status: 200, deviceId, address}`
    pub fn discovery(&self, ctx: &DeviceContext) -> OperationResult {
        Ok(Response::ok()
            .with("deviceId", ctx.device_id())
            .with("address", ctx.address()))
    }

    /// `{status: 200, versions: ["<major>.<minor>"]}`
    pub fn version(&self) -> OperationResult {
        Ok(Response::ok().with("versions", vec![crate::dab_version()]))
    }
}

fn app_id<'a>(app_id: Option<&'a str>, action: &str) -> Result<&'a str, DabError> {
    match app_id {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(DabError::BadRequest(format!(
            "'appId' must be set as the application id to {} sending telemetry",
            action
        ))),
    }
}
