//! Typed request bodies for device operations
//!
//! Each body is deserialized from the request JSON. A body that does not
//! match its shape is answered with 400.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::DabError;

/// A request body with optional structural checks beyond its shape
pub trait RequestBody: DeserializeOwned {
    fn validate(&self) -> Result<(), DabError> {
        Ok(())
    }
}

/// Deserialize and validate a request body
pub fn parse<T: RequestBody>(body: Value) -> Result<T, DabError> {
    let body = if body.is_null() {
        Value::Object(Map::new())
    } else {
        body
    };
    let request: T = serde_json::from_value(body)
        .map_err(|e| DabError::BadRequest(format!("invalid request: {}", e)))?;
    request.validate()?;
    Ok(request)
}

fn require(field: &str, value: &str) -> Result<(), DabError> {
    if value.is_empty() {
        return Err(DabError::BadRequest(format!("'{}' must not be empty", field)));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchAppRequest {
    #[serde(alias = "app")]
    pub app_id: String,
    #[serde(default)]
    pub parameters: Vec<String>,
}

impl RequestBody for LaunchAppRequest {
    fn validate(&self) -> Result<(), DabError> {
        require("appId", &self.app_id)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchWithContentRequest {
    #[serde(alias = "app")]
    pub app_id: String,
    pub content_id: String,
    #[serde(default)]
    pub parameters: Vec<String>,
}

impl RequestBody for LaunchWithContentRequest {
    fn validate(&self) -> Result<(), DabError> {
        require("appId", &self.app_id)?;
        require("contentId", &self.content_id)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStateRequest {
    #[serde(alias = "app")]
    pub app_id: String,
}

impl RequestBody for AppStateRequest {
    fn validate(&self) -> Result<(), DabError> {
        require("appId", &self.app_id)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitAppRequest {
    #[serde(alias = "app")]
    pub app_id: String,
    /// Move the application to the background instead of stopping it
    #[serde(default)]
    pub background: bool,
    /// Force stop the application
    #[serde(default)]
    pub force: bool,
}

impl RequestBody for ExitAppRequest {
    fn validate(&self) -> Result<(), DabError> {
        require("appId", &self.app_id)
    }
}

/// Settings to change, keyed by setting name
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SetSettingsRequest {
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

impl RequestBody for SetSettingsRequest {
    fn validate(&self) -> Result<(), DabError> {
        if self.settings.is_empty() {
            return Err(DabError::BadRequest(
                "at least one setting must be provided".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SetLanguageRequest {
    /// RFC 5646 language tag
    pub language: String,
}

impl RequestBody for SetLanguageRequest {
    fn validate(&self) -> Result<(), DabError> {
        require("language", &self.language)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPressRequest {
    pub key_code: String,
}

impl RequestBody for KeyPressRequest {
    fn validate(&self) -> Result<(), DabError> {
        require("keyCode", &self.key_code)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LongKeyPressRequest {
    pub key_code: String,
    pub duration_ms: u64,
}

impl RequestBody for LongKeyPressRequest {
    fn validate(&self) -> Result<(), DabError> {
        require("keyCode", &self.key_code)
    }
}

/// Telemetry frequency is checked when the timer starts, so it stays untyped
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TelemetryStartRequest {
    #[serde(default)]
    pub frequency: Option<Value>,
}

impl RequestBody for TelemetryStartRequest {}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppTelemetryStartRequest {
    #[serde(default, alias = "app")]
    pub app_id: Option<String>,
    #[serde(default)]
    pub frequency: Option<Value>,
}

impl RequestBody for AppTelemetryStartRequest {}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppTelemetryStopRequest {
    #[serde(default, alias = "app")]
    pub app_id: Option<String>,
}

impl RequestBody for AppTelemetryStopRequest {}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceSystem {
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetVoiceRequest {
    pub voice_system: VoiceSystem,
}

impl RequestBody for SetVoiceRequest {
    fn validate(&self) -> Result<(), DabError> {
        require("voiceSystem.name", &self.voice_system.name)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendAudioRequest {
    /// URL of the audio file
    pub file_location: String,
    #[serde(default)]
    pub voice_system: Option<String>,
}

impl RequestBody for SendAudioRequest {
    fn validate(&self) -> Result<(), DabError> {
        require("fileLocation", &self.file_location)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTextRequest {
    pub request_text: String,
    #[serde(default)]
    pub voice_system: Option<String>,
}

impl RequestBody for SendTextRequest {
    fn validate(&self) -> Result<(), DabError> {
        require("requestText", &self.request_text)
    }
}
