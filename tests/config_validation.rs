//! Integration tests for configuration validation

#![allow(clippy::expect_used)]

use session_protocol::config::{
    ClientConfig, LoggingConfig, NetworkConfig, SerializerSettings, ServerConfig,
};
use session_protocol::core::types::Color32;
use session_protocol::error::ProtocolError;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = NetworkConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_excessive_decimal_places() {
    let mut config = NetworkConfig::default();
    config.serializer.decimal_places = 12;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Decimal places too large")));
}

#[test]
fn test_zero_bits_per_component() {
    let mut config = NetworkConfig::default();
    config.serializer.bits_per_component = 0;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid bits per component")));
}

#[test]
fn test_excessive_bits_per_component() {
    let mut config = NetworkConfig::default();
    config.serializer.bits_per_component = 21;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid bits per component")));
}

#[test]
fn test_empty_server_name() {
    let mut config = NetworkConfig::default();
    config.server.server_name = String::new();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Server name cannot be empty")));
}

#[test]
fn test_oversized_username() {
    let mut config = NetworkConfig::default();
    config.client.username = "u".repeat(70_000);

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Username too long")));
}

#[test]
fn test_empty_app_name() {
    let mut config = NetworkConfig::default();
    config.logging.app_name = String::new();

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Application name cannot be empty")));
}

#[test]
fn test_multiple_errors_reported() {
    let mut config = NetworkConfig::default();
    config.serializer.decimal_places = 20;
    config.server.server_name = String::new();
    config.client.username = String::new();

    let errors = config.validate();
    assert!(errors.len() >= 3, "Expected every section to report");
}

#[test]
fn test_validate_strict_fails_on_invalid() {
    let mut config = NetworkConfig::default();
    config.serializer.bits_per_component = 0;

    assert!(config.validate_strict().is_err());
    assert!(NetworkConfig::default().validate_strict().is_ok());
}

#[test]
fn test_default_with_overrides() {
    let config = NetworkConfig::default_with_overrides(|c| {
        c.server.server_name = "Arena".to_string();
        c.serializer.use_compression = false;
    });

    assert_eq!(config.server.server_name, "Arena");
    assert!(!config.serializer.use_compression);
    assert_eq!(config.client, ClientConfig::default());
}

#[test]
fn test_example_config_parses_back() {
    let example = NetworkConfig::example_config();
    let parsed = NetworkConfig::from_toml(&example).expect("example config should parse");
    assert_eq!(parsed, NetworkConfig::default());
}

#[test]
fn test_full_toml() {
    let toml = r#"
        [serializer]
        use_compression = true
        decimal_places = 2
        bits_per_component = 12

        [server]
        server_name = "Lobby"

        [client]
        username = "player"
        colour = { r = 10, g = 20, b = 30, a = 255 }

        [logging]
        app_name = "lobby"
        log_level = "debug"
        json_format = true
    "#;

    let config = NetworkConfig::from_toml(toml).expect("valid TOML");
    assert_eq!(
        config.serializer,
        SerializerSettings {
            use_compression: true,
            decimal_places: 2,
            bits_per_component: 12,
        }
    );
    assert_eq!(
        config.server,
        ServerConfig {
            server_name: "Lobby".into()
        }
    );
    assert_eq!(config.client.colour, Color32::new(10, 20, 30, 255));
    assert_eq!(
        config.logging,
        LoggingConfig {
            app_name: "lobby".into(),
            log_level: Level::DEBUG,
            json_format: true,
        }
    );
}

#[test]
fn test_invalid_log_level_rejected() {
    let toml = "[logging]\nlog_level = \"loud\"\n";
    assert!(NetworkConfig::from_toml(toml).is_err());
}

#[test]
fn test_save_and_load_roundtrip() {
    let path = std::env::temp_dir().join(format!(
        "session-protocol-config-{}.toml",
        std::process::id()
    ));
    let config = NetworkConfig::default_with_overrides(|c| {
        c.client.username = "saved".to_string();
    });

    config.save_to_file(&path).expect("config should save");
    let loaded = NetworkConfig::from_file(&path).expect("config should load");
    let _ = std::fs::remove_file(&path);

    assert_eq!(loaded, config);
}

#[test]
fn test_missing_file_is_io_error() {
    let result = NetworkConfig::from_file("/definitely/not/here/session.toml");
    assert!(matches!(result, Err(ProtocolError::Io(_))));
}
