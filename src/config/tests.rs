//! Config module tests

use super::*;
use test_case::test_case;

#[test]
fn test_substitute_env_vars_simple() {
    std::env::set_var("DAB_TEST_VAR_SIMPLE", "hello");
    let result = substitute_env_vars("value = \"${DAB_TEST_VAR_SIMPLE}\"");
    assert_eq!(result, "value = \"hello\"");
    std::env::remove_var("DAB_TEST_VAR_SIMPLE");
}

#[test]
fn test_substitute_env_vars_with_default() {
    std::env::remove_var("DAB_TEST_VAR_UNSET");
    let result = substitute_env_vars("value = \"${DAB_TEST_VAR_UNSET:-fallback}\"");
    assert_eq!(result, "value = \"fallback\"");

    std::env::set_var("DAB_TEST_VAR_SET", "env_value");
    let result = substitute_env_vars("value = \"${DAB_TEST_VAR_SET:-fallback}\"");
    assert_eq!(result, "value = \"env_value\"");
    std::env::remove_var("DAB_TEST_VAR_SET");
}

#[test]
fn test_substitute_env_vars_missing_no_default() {
    std::env::remove_var("DAB_TEST_VAR_MISSING");
    let result = substitute_env_vars("value = \"${DAB_TEST_VAR_MISSING}\"");
    assert_eq!(result, "value = \"\"");
}

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.log.level, "info");
    assert_eq!(config.broker.uri, "mqtt://localhost:1883");
    assert_eq!(config.broker.qos, QoS::ExactlyOnce);
    assert!(config.broker.no_local);
    assert_eq!(config.bridge.root, "dab");
    assert_eq!(config.bridge.request_timeout, Duration::from_secs(20));
    assert!(config.bridge.validate_devices);
    assert!(config.bridge.id.is_none());
    assert!(config.validate().is_ok());
}

#[test]
fn test_parse_full_config() {
    let config = Config::parse(
        r#"
[log]
level = "debug"

[broker]
uri = "mqtt://10.0.0.2:1884"
client_id = "bridge-client"
keep_alive = "30s"
connect_timeout = "500ms"
reconnect_interval = "2s"
max_reconnect_interval = "1m"
qos = 1
no_local = false

[bridge]
id = "livingRoom"
root = "dab"
request_timeout = "5s"
discovery_window = "3s"
validate_devices = false
"#,
    )
    .unwrap();

    assert_eq!(config.log.level, "debug");
    assert_eq!(
        config.broker.parse_address(),
        Some(("10.0.0.2".to_string(), 1884))
    );
    assert_eq!(config.broker.client_id_for("livingRoom"), "bridge-client");
    assert_eq!(config.broker.keep_alive, Duration::from_secs(30));
    assert_eq!(config.broker.connect_timeout, Duration::from_millis(500));
    assert_eq!(config.broker.max_reconnect_interval, Duration::from_secs(60));
    assert_eq!(config.broker.qos, QoS::AtLeastOnce);
    assert!(!config.broker.no_local);
    assert_eq!(config.bridge.id.as_deref(), Some("livingRoom"));
    assert_eq!(config.bridge.request_timeout, Duration::from_secs(5));
    assert!(!config.bridge.validate_devices);
}

#[test]
fn test_parse_partial_config_uses_defaults() {
    let config = Config::parse("[bridge]\nid = \"b1\"\n").unwrap();
    assert_eq!(config.broker.uri, "mqtt://localhost:1883");
    assert_eq!(config.broker.client_id_for("b1"), "dab-bridge-b1");
    assert_eq!(config.bridge.discovery_window, Duration::from_secs(10));
}

#[test_case("mqtt://localhost:1883", Some(("localhost", 1883)); "full uri")]
#[test_case("mqtt://broker", Some(("broker", 1883)); "uri without port")]
#[test_case("tcp://10.0.0.1:1999", Some(("10.0.0.1", 1999)); "tcp scheme")]
#[test_case("192.168.0.123", Some(("192.168.0.123", 1883)); "bare host")]
#[test_case("broker:2000", Some(("broker", 2000)); "host and port")]
#[test_case("mqtt://broker/", Some(("broker", 1883)); "trailing slash")]
#[test_case("mqtts://broker", None; "unsupported scheme")]
#[test_case("mqtt://", None; "empty host")]
#[test_case("broker:notaport", None; "bad port")]
#[test_case(":1883", None; "missing host")]
fn test_parse_address(uri: &str, expected: Option<(&str, u16)>) {
    let broker = BrokerConfig {
        uri: uri.to_string(),
        ..Default::default()
    };
    assert_eq!(
        broker.parse_address(),
        expected.map(|(host, port)| (host.to_string(), port))
    );
}

#[test]
fn test_validate_rejects_invalid_qos() {
    let result = Config::parse("[broker]\nqos = 3\n");
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}

#[test_case("[broker]\nuri = \"ws://broker\"\n"; "bad broker uri")]
#[test_case("[broker]\nkeep_alive = \"100ms\"\n"; "keep alive too short")]
#[test_case("[broker]\nconnect_timeout = \"0s\"\n"; "zero connect timeout")]
#[test_case("[broker]\nreconnect_interval = \"10s\"\nmax_reconnect_interval = \"1s\"\n"; "backoff cap below base")]
#[test_case("[bridge]\nroot = \"\"\n"; "empty root")]
#[test_case("[bridge]\nroot = \"dab/x\"\n"; "multi level root")]
#[test_case("[bridge]\nid = \"b+\"\n"; "wildcard bridge id")]
#[test_case("[bridge]\nrequest_timeout = \"0s\"\n"; "zero request timeout")]
fn test_validation_errors(content: &str) {
    assert!(matches!(
        Config::parse(content),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn test_load_config_with_env_substitution() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("bridge.toml");

    std::env::set_var("DAB_TEST_BROKER_HOST", "10.1.1.1");

    let config_content = r#"
[broker]
uri = "mqtt://${DAB_TEST_BROKER_HOST}:${DAB_TEST_BROKER_PORT:-1883}"

[bridge]
id = "fromFile"
"#;
    std::fs::write(&config_path, config_content).unwrap();

    let config = Config::load(&config_path).unwrap();
    assert_eq!(
        config.broker.parse_address(),
        Some(("10.1.1.1".to_string(), 1883))
    );
    assert_eq!(config.bridge.id.as_deref(), Some("fromFile"));
    assert_eq!(config.bridge.request_timeout, Duration::from_secs(20));

    std::env::remove_var("DAB_TEST_BROKER_HOST");
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.bridge.root, "dab");
    assert_eq!(config.broker.keep_alive, Duration::from_secs(10));
}
