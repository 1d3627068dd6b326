//! Emulated device
//!
//! An in-memory target used for local runs and testing clients without
//! hardware. It keeps settings and language in memory, reports static
//! device information, and produces synthetic telemetry.

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use super::control::{DeviceControl, DeviceFactory, OperationResult};
use super::requests::*;
use super::telemetry::collector;
use super::{BaseDevice, DeviceContext, Operation};
use crate::error::DabError;
use crate::protocol::Response;

const LANGUAGES: &[&str] = &["en-US", "en-GB", "es-ES", "fr-FR", "de-DE", "ja-JP"];

const KEYS: &[&str] = &[
    "KEY_POWER",
    "KEY_HOME",
    "KEY_BACK",
    "KEY_UP",
    "KEY_DOWN",
    "KEY_LEFT",
    "KEY_RIGHT",
    "KEY_ENTER",
    "KEY_VOLUME_UP",
    "KEY_VOLUME_DOWN",
    "KEY_MUTE",
    "KEY_PLAY_PAUSE",
];

fn default_settings() -> Map<String, Value> {
    let mut settings = Map::new();
    settings.insert("language".into(), json!("en-US"));
    settings.insert(
        "outputResolution".into(),
        json!({"width": 1920, "height": 1080, "frequency": 60}),
    );
    settings.insert("memc".into(), json!(false));
    settings.insert("cec".into(), json!(false));
    settings.insert("lowLatencyMode".into(), json!(false));
    settings.insert("pictureMode".into(), json!("Standard"));
    settings.insert("audioOutputMode".into(), json!("Auto"));
    settings.insert("audioVolume".into(), json!(20));
    settings.insert("mute".into(), json!(false));
    settings.insert("textToSpeech".into(), json!(false));
    settings
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Device emulated in memory
#[derive(Debug)]
pub struct EmulatorDevice {
    base: BaseDevice,
    started: Instant,
    started_at: u64,
    settings: Mutex<Map<String, Value>>,
}

impl EmulatorDevice {
    pub fn new() -> Self {
        Self {
            base: BaseDevice::new(),
            started: Instant::now(),
            started_at: now_millis(),
            settings: Mutex::new(default_settings()),
        }
    }
}

impl Default for EmulatorDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceControl for EmulatorDevice {
    fn supports(&self, operation: Operation) -> bool {
        !matches!(
            operation,
            Operation::LaunchApp
                | Operation::LaunchAppWithContent
                | Operation::GetAppState
                | Operation::ExitApp
                | Operation::Restart
                | Operation::CaptureImage
                | Operation::SetVoice
                | Operation::SendVoiceAudio
                | Operation::SendVoiceText
        )
    }

    async fn list_operations(&self, _ctx: &DeviceContext) -> OperationResult {
        let operations: Vec<&str> = Operation::ALL
            .iter()
            .filter(|op| self.supports(**op))
            .map(|op| op.path())
            .collect();
        Ok(Response::ok().with("operations", operations))
    }

    async fn list_apps(&self, _ctx: &DeviceContext) -> OperationResult {
        Ok(Response::ok().with("applications", Vec::<Value>::new()))
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

    async fn device_info(&self, ctx: &DeviceContext) -> OperationResult {
        Ok(Response::ok()
            .with("manufacturer", "DAB")
            .with("model", "Emulator")
            .with("serialNumber", ctx.device_id())
            .with("chipset", "virtual")
            .with("firmwareVersion", env!("CARGO_PKG_VERSION"))
            .with("firmwareBuild", "emulator")
            .with(
                "networkInterfaces",
                json!([{"connected": true, "type": "Other", "ipAddress": ctx.address()}]),
            )
            .with("displayType", "Native")
            .with("screenWidthPixels", 1920)
            .with("screenHeightPixels", 1080)
            .with("uptimeSince", self.started_at)
            .with("deviceId", ctx.device_id()))
    }

    async fn restart(&self, _ctx: &DeviceContext) -> OperationResult {
        self.base.unsupported(Operation::Restart)
    }

    async fn list_settings(&self, _ctx: &DeviceContext) -> OperationResult {
        Ok(Response::ok()
            .with("language", LANGUAGES.to_vec())
            .with("outputResolution", json!([{"width": 1920, "height": 1080, "frequency": 60}]))
            .with("pictureMode", json!(["Standard", "Dynamic", "Movie"]))
            .with("audioOutputMode", json!(["Stereo", "Auto"]))
            .with("audioVolume", json!({"min": 0, "max": 100}))
            .with("memc", true)
            .with("cec", true)
            .with("lowLatencyMode", true)
            .with("mute", true)
            .with("textToSpeech", true))
    }

    async fn get_settings(&self, _ctx: &DeviceContext) -> OperationResult {
        let settings = self.settings.lock().clone();
        let mut response = Response::ok();
        response.fields.extend(settings);
        Ok(response)
    }

    async fn set_settings(
        &self,
        _ctx: &DeviceContext,
        request: SetSettingsRequest,
    ) -> OperationResult {
        let mut settings = self.settings.lock();
        if let Some(unknown) = request.settings.keys().find(|k| !settings.contains_key(*k)) {
            return Err(DabError::BadRequest(format!("unknown setting '{}'", unknown)));
        }

        let mut response = Response::ok();
        for (key, value) in request.settings {
            settings.insert(key.clone(), value.clone());
            response = response.with(key, value);
        }
        Ok(response)
    }

    async fn list_languages(&self, _ctx: &DeviceContext) -> OperationResult {
        Ok(Response::ok().with("languages", LANGUAGES.to_vec()))
    }

    async fn get_language(&self, _ctx: &DeviceContext) -> OperationResult {
        let language = self
            .settings
            .lock()
            .get("language")
            .cloned()
            .unwrap_or(Value::Null);
        Ok(Response::ok().with("language", language))
    }

    async fn set_language(
        &self,
        _ctx: &DeviceContext,
        request: SetLanguageRequest,
    ) -> OperationResult {
        if !LANGUAGES.contains(&request.language.as_str()) {
            return Err(DabError::BadRequest(format!(
                "unsupported language '{}'",
                request.language
            )));
        }
        self.settings
            .lock()
            .insert("language".into(), Value::from(request.language));
        Ok(Response::ok())
    }

    async fn list_keys(&self, _ctx: &DeviceContext) -> OperationResult {
        Ok(Response::ok().with("keyCodes", KEYS.to_vec()))
    }

    async fn key_press(&self, _ctx: &DeviceContext, request: KeyPressRequest) -> OperationResult {
        if !KEYS.contains(&request.key_code.as_str()) {
            return Err(DabError::BadRequest(format!(
                "unsupported key '{}'",
                request.key_code
            )));
        }
        Ok(Response::ok())
    }

    async fn long_key_press(
        &self,
        ctx: &DeviceContext,
        request: LongKeyPressRequest,
    ) -> OperationResult {
        self.key_press(
            ctx,
            KeyPressRequest {
                key_code: request.key_code,
            },
        )
        .await
    }

    async fn capture_image(&self, _ctx: &DeviceContext) -> OperationResult {
        self.base.unsupported(Operation::CaptureImage)
    }

    async fn start_device_telemetry(
        &self,
        ctx: &DeviceContext,
        request: TelemetryStartRequest,
    ) -> OperationResult {
        let started = self.started;
        let metrics = collector(move || async move {
            json!({
                "timestamp": now_millis(),
                "metric": "uptime",
                "value": started.elapsed().as_secs(),
            })
        });
        self.base.start_device_telemetry(ctx, &request, metrics)
    }

    async fn stop_device_telemetry(&self, ctx: &DeviceContext) -> OperationResult {
        self.base.stop_device_telemetry(ctx)
    }

    async fn start_app_telemetry(
        &self,
        ctx: &DeviceContext,
        request: AppTelemetryStartRequest,
    ) -> OperationResult {
        let app_id = request.app_id.clone().unwrap_or_default();
        let metrics = collector(move || {
            let app_id = app_id.clone();
            async move {
                json!({
                    "timestamp": now_millis(),
                    "appId": app_id,
                    "metric": "memory",
                    "value": 0,
                })
            }
        });
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
        Ok(Response::ok().with("healthy", true))
    }

    async fn list_voices(&self, _ctx: &DeviceContext) -> OperationResult {
        Ok(Response::ok().with(
            "voiceSystems",
            json!([{"name": "EmulatorVoice", "enabled": false}]),
        ))
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

/// Factory for [`EmulatorDevice`]; every address is compatible
#[derive(Debug, Clone, Copy, Default)]
pub struct EmulatorDeviceFactory;

#[async_trait]
impl DeviceFactory for EmulatorDeviceFactory {
    async fn check_compatibility(&self, address: &str) -> Result<(), DabError> {
        if address.trim().is_empty() {
            return Err(DabError::BadRequest("address must not be blank".to_string()));
        }
        Ok(())
    }

    async fn create(
        &self,
        _device_id: &str,
        _address: &str,
    ) -> Result<Arc<dyn DeviceControl>, DabError> {
        Ok(Arc::new(EmulatorDevice::new()))
    }
}
