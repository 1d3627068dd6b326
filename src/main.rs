//! DAB Bridge - Device Automation Bus bridge over MQTT v5
//!
//! Usage:
//!   dab-bridge [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>         Configuration file path
//!   -i, --bridge-id <ID>        Bridge identifier (default: random)
//!   -b, --broker <URI>          Broker address (default: mqtt://localhost:1883)
//!   -t, --target <TARGET>       Device implementation (emulator, partner)
//!   --skip-device-validation    Do not run the compatibility check on add-device
//!   -l, --log-level             Log level (error, warn, info, debug, trace)
//!   -h, --help                  Print help

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

use dab_bridge::config::Config;
use dab_bridge::device::{DeviceFactory, EmulatorDeviceFactory, PartnerDeviceFactory};
use dab_bridge::transport;
use dab_bridge::Bridge;

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    #[default]
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }

    fn from_config(level: &str) -> Self {
        match level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Warn,
        }
    }
}

/// Device implementation driven by this bridge
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum Target {
    /// In-memory emulated device
    #[default]
    Emulator,
    /// Partner device template
    Partner,
}

impl Target {
    fn factory(self) -> Arc<dyn DeviceFactory> {
        match self {
            Target::Emulator => Arc::new(EmulatorDeviceFactory),
            Target::Partner => Arc::new(PartnerDeviceFactory),
        }
    }
}

/// DAB Bridge - onboard devices onto a DAB MQTT bus
#[derive(Parser, Debug)]
#[command(name = "dab-bridge")]
#[command(author = "DAB Bridge Contributors")]
#[command(version)]
#[command(about = "Device Automation Bus bridge over MQTT v5")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bridge identifier on the bus; random when not given
    #[arg(short = 'i', long)]
    bridge_id: Option<String>,

    /// Broker address: mqtt://host[:port], host[:port]
    #[arg(short, long)]
    broker: Option<String>,

    /// Device implementation to onboard
    #[arg(short, long, value_enum, default_value_t)]
    target: Target,

    /// Add devices without running the compatibility check
    #[arg(long)]
    skip_device_validation: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

fn random_bridge_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(10);
    id
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Configuration file if given, environment overrides either way
    let loaded = match &args.config {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    };
    let mut config = match loaded {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Setup logging - CLI overrides config, config overrides default (warn)
    let log_level = args
        .log_level
        .unwrap_or_else(|| LogLevel::from_config(&config.log.level));

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    // CLI args override file config
    if let Some(broker) = args.broker {
        config.broker.uri = broker;
    }
    if let Some(id) = args.bridge_id {
        config.bridge.id = Some(id);
    }
    if args.skip_device_validation {
        config.bridge.validate_devices = false;
    }
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let bridge_id = match config.bridge.id.clone() {
        Some(id) => id,
        None => {
            let id = random_bridge_id();
            info!("Bridge ID not specified, generated {}", id);
            id
        }
    };
    let client_id = config.broker.client_id_for(&bridge_id);

    info!("Starting DAB Bridge");
    info!("  Bridge ID: {}", bridge_id);
    info!("  Broker: {}", config.broker.uri);
    info!("  Target: {:?}", args.target);
    info!("  Topic root: {}", config.bridge.root);
    info!(
        "  Device validation: {}",
        if config.bridge.validate_devices {
            "enabled"
        } else {
            "disabled"
        }
    );

    let connection = match transport::connect(&config.broker, &client_id).await {
        Ok(connection) => connection,
        Err(e) => {
            error!("Failed to connect to {}: {}", config.broker.uri, e);
            std::process::exit(1);
        }
    };

    let bridge = Bridge::new(bridge_id, config.bridge.clone(), args.target.factory())
        .with_qos(config.broker.qos);

    if let Err(e) = bridge.init(connection).await {
        error!("Bridge failed to start: {}", e);
        bridge.stop().await;
        std::process::exit(1);
    }

    shutdown_signal().await;
    info!("Shutting down");
    bridge.stop().await;

    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
