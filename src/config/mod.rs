//! Configuration Module
//!
//! Provides TOML-based configuration for the DAB bridge with support for:
//! - Log level
//! - Broker connection (URI, client id, keep alive, reconnect backoff, QoS)
//! - Bridge identity and timeouts
//! - Environment variable overrides (DAB_BRIDGE__* prefix)

use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

use crate::protocol::QoS;
use crate::topic::validate_topic_level;

#[cfg(test)]
mod tests;

/// Port used when the broker URI does not name one
pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let Ok(re) = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}") else {
        return content.to_string();
    };
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Broker connection
    pub broker: BrokerConfig,
    /// Bridge identity and behavior
    pub bridge: BridgeConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Broker connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker URI: `mqtt://host[:port]`, `host:port` or `host`
    pub uri: String,
    /// Client identifier (defaults to `dab-bridge-<bridge id>`)
    pub client_id: Option<String>,
    /// Username for broker authentication
    pub username: Option<String>,
    /// Password for broker authentication
    pub password: Option<String>,
    /// Keep alive interval
    #[serde(with = "humantime_serde")]
    pub keep_alive: Duration,
    /// Time allowed for the initial connection
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Initial reconnect delay
    #[serde(with = "humantime_serde")]
    pub reconnect_interval: Duration,
    /// Maximum reconnect delay (exponential backoff cap)
    #[serde(with = "humantime_serde")]
    pub max_reconnect_interval: Duration,
    /// QoS for every publish and subscription
    pub qos: QoS,
    /// Do not receive our own publishes
    pub no_local: bool,
    /// Request channel capacity of the MQTT client
    pub channel_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            uri: format!("mqtt://localhost:{}", DEFAULT_BROKER_PORT),
            client_id: None,
            username: None,
            password: None,
            keep_alive: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(2),
            reconnect_interval: Duration::from_secs(1),
            max_reconnect_interval: Duration::from_secs(30),
            qos: QoS::ExactlyOnce,
            no_local: true,
            channel_capacity: 64,
        }
    }
}

impl BrokerConfig {
    /// Host and port from the URI, or `None` if it cannot be used
    pub fn parse_address(&self) -> Option<(String, u16)> {
        let rest = match self.uri.split_once("://") {
            Some(("mqtt" | "tcp", rest)) => rest,
            Some(_) => return None,
            None => self.uri.as_str(),
        };
        let rest = rest.trim_end_matches('/');
        if rest.is_empty() || rest.contains('/') {
            return None;
        }

        match rest.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                port.parse().ok().map(|port| (host.to_string(), port))
            }
            Some(_) => None,
            None => Some((rest.to_string(), DEFAULT_BROKER_PORT)),
        }
    }

    /// Client identifier for a bridge
    pub fn client_id_for(&self, bridge_id: &str) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("dab-bridge-{}", bridge_id))
    }
}

/// Bridge configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Bridge identifier (random when absent)
    pub id: Option<String>,
    /// Root of the topic hierarchy
    pub root: String,
    /// Default deadline for correlated requests
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// How long discovery-style queries collect replies
    #[serde(with = "humantime_serde")]
    pub discovery_window: Duration,
    /// Run the compatibility check on add-device unless the request skips it
    pub validate_devices: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            id: None,
            root: "dab".to_string(),
            request_timeout: Duration::from_secs(20),
            discovery_window: Duration::from_secs(10),
            validate_devices: true,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `DAB_BRIDGE__` prefix with double underscores for nesting:
    ///    - `DAB_BRIDGE__BROKER__URI=mqtt://10.0.0.2` overrides `broker.uri`
    ///    - `DAB_BRIDGE__BRIDGE__ID=livingRoom` overrides `bridge.id`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("broker.uri", "mqtt://localhost:1883")?
            .set_default("broker.keep_alive", "10s")?
            .set_default("broker.connect_timeout", "2s")?
            .set_default("broker.reconnect_interval", "1s")?
            .set_default("broker.max_reconnect_interval", "30s")?
            .set_default("broker.qos", 2)?
            .set_default("broker.no_local", true)?
            .set_default("broker.channel_capacity", 64)?
            .set_default("bridge.root", "dab")?
            .set_default("bridge.request_timeout", "20s")?
            .set_default("bridge.discovery_window", "10s")?
            .set_default("bridge.validate_devices", true)?;

        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        let cfg = builder
            .add_source(
                Environment::with_prefix("DAB_BRIDGE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.parse_address().is_none() {
            return Err(ConfigError::Validation(format!(
                "broker.uri '{}' is not a valid broker address",
                self.broker.uri
            )));
        }

        if self.broker.keep_alive < Duration::from_secs(1) {
            return Err(ConfigError::Validation(
                "broker.keep_alive must be at least 1s".to_string(),
            ));
        }

        if self.broker.channel_capacity == 0 {
            return Err(ConfigError::Validation(
                "broker.channel_capacity must be greater than 0".to_string(),
            ));
        }

        for (name, value) in [
            ("broker.connect_timeout", self.broker.connect_timeout),
            ("broker.reconnect_interval", self.broker.reconnect_interval),
            ("bridge.request_timeout", self.bridge.request_timeout),
            ("bridge.discovery_window", self.bridge.discovery_window),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Validation(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        if self.broker.max_reconnect_interval < self.broker.reconnect_interval {
            return Err(ConfigError::Validation(
                "broker.max_reconnect_interval must not be less than broker.reconnect_interval"
                    .to_string(),
            ));
        }

        validate_topic_level(&self.bridge.root).map_err(|e| {
            ConfigError::Validation(format!("bridge.root '{}': {}", self.bridge.root, e))
        })?;

        if let Some(id) = &self.bridge.id {
            validate_topic_level(id)
                .map_err(|e| ConfigError::Validation(format!("bridge.id '{}': {}", id, e)))?;
        }

        Ok(())
    }
}
