use std::time::Duration;
use zircon::config::{ClientConfig, PoolingOptions, SocketOptions};
use zircon::core::protocol::consistency::Consistency;

#[test]
fn test_defaults_are_sane() {
    let config = ClientConfig::new(["127.0.0.1"]);
    assert!(config.validate().is_ok());
    assert_eq!(config.port, 9042);
    assert_eq!(config.pooling.core_connections_per_host_local, 2);
    assert_eq!(config.pooling.core_connections_per_host_remote, 1);
    assert_eq!(config.query.consistency, Consistency::LocalOne);
    assert!(config.query.prepare);
    assert!(config.metadata_sync_enabled);
    assert_eq!(config.status_up_delay, Duration::from_secs(10));
}

#[test]
fn test_validation_requires_contact_points() {
    let config = ClientConfig::default();
    assert!(config.validate().is_err());
}

#[test]
fn test_validation_rejects_bad_fetch_size() {
    let mut config = ClientConfig::new(["127.0.0.1"]);
    config.query.fetch_size = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_validation_rejects_zero_local_connections() {
    let mut config = ClientConfig::new(["127.0.0.1"]);
    config.pooling.core_connections_per_host_local = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_validation_rejects_non_serial_serial_consistency() {
    let mut config = ClientConfig::new(["127.0.0.1"]);
    config.query.serial_consistency = Some(Consistency::Quorum);
    assert!(config.validate().is_err());
    config.query.serial_consistency = Some(Consistency::Serial);
    assert!(config.validate().is_ok());
}

#[test]
fn test_heartbeat_zero_disables() {
    let mut config = ClientConfig::new(["127.0.0.1"]);
    config.pooling.heartbeat_interval_secs = 0;
    assert_eq!(config.heartbeat_interval(), None);
    config.pooling.heartbeat_interval_secs = 15;
    assert_eq!(config.heartbeat_interval(), Some(Duration::from_secs(15)));
}

#[test]
fn test_default_profile_inherits_query_options() {
    let mut config = ClientConfig::new(["127.0.0.1"]);
    config.query.consistency = Consistency::Quorum;
    config.socket.read_timeout_ms = 700;
    let profile = config.default_profile();
    assert_eq!(profile.consistency, Consistency::Quorum);
    assert_eq!(profile.request_timeout, Duration::from_millis(700));
    assert!(!profile.is_idempotent);
}

#[test]
fn test_pooling_options_deserialize_with_defaults() {
    let options: PoolingOptions = serde_json::from_str("{}").unwrap();
    assert_eq!(options.core_connections_per_host_local, 2);
    assert_eq!(options.heartbeat_interval_secs, 30);

    let options: PoolingOptions =
        serde_json::from_str(r#"{"core_connections_per_host_local": 8}"#).unwrap();
    assert_eq!(options.core_connections_per_host_local, 8);
}

#[test]
fn test_socket_options_deserialize_with_defaults() {
    let options: SocketOptions = serde_json::from_str("{}").unwrap();
    assert_eq!(options.connect_timeout_ms, 5_000);
    assert_eq!(options.read_timeout_ms, 12_000);
}
