//! Settings for the codec, both session managers and logging.
//!
//! A [`NetworkConfig`] comes from defaults, a TOML document
//! ([`NetworkConfig::from_file`], [`NetworkConfig::from_toml`]) or
//! `SESSION_PROTOCOL_*` environment variables ([`NetworkConfig::from_env`]).
//!
//! Both peers must agree on [`SerializerSettings`] out of band. The protocol
//! never negotiates them, and a mismatch makes every multi-byte field decode
//! to garbage.

use crate::core::quaternion::MAX_BITS_PER_COMPONENT;
use crate::core::types::Color32;
use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::Level;

/// Whether the codec compresses multi-byte values by default
pub const USE_COMPRESSION: bool = true;

/// Default decimal places kept by compressed `f32` values
pub const DECIMAL_PLACES: u32 = 3;

/// Default bits per component of a packed rotation
pub const BITS_PER_COMPONENT: u32 = 10;

/// Largest supported float precision; `10^9` still fits an `f64` mantissa exactly
pub const MAX_DECIMAL_PLACES: u32 = 9;

const ENV_PREFIX: &str = "SESSION_PROTOCOL_";

/// Every tunable of a session, grouped by the component that reads it
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct NetworkConfig {
    /// Codec parameters; must match on both ends
    #[serde(default)]
    pub serializer: SerializerSettings,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn config_error(what: &str, err: impl std::fmt::Display) -> ProtocolError {
    ProtocolError::ConfigError(format!("{what}: {err}"))
}

/// Parse `SESSION_PROTOCOL_<key>` if set. Unparseable values are ignored.
fn env_value<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(format!("{ENV_PREFIX}{key}"))
        .ok()
        .and_then(|raw| raw.parse().ok())
}

impl NetworkConfig {
    /// Read and parse a TOML file. I/O failures surface as `ProtocolError::Io`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Parse a TOML document. Missing sections and keys take their defaults.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| config_error("invalid TOML", e))
    }

    /// Defaults with any `SESSION_PROTOCOL_*` variables applied on top.
    ///
    /// Numeric and boolean variables that fail to parse are skipped; an
    /// unknown log level is an error.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        let serializer = &mut config.serializer;

        if let Some(enabled) = env_value("USE_COMPRESSION") {
            serializer.use_compression = enabled;
        }
        if let Some(places) = env_value("DECIMAL_PLACES") {
            serializer.decimal_places = places;
        }
        if let Some(bits) = env_value("BITS_PER_COMPONENT") {
            serializer.bits_per_component = bits;
        }
        if let Some(name) = env_value("SERVER_NAME") {
            config.server.server_name = name;
        }
        if let Some(username) = env_value("USERNAME") {
            config.client.username = username;
        }
        if let Ok(level) = std::env::var(format!("{ENV_PREFIX}LOG_LEVEL")) {
            config.logging.log_level = level
                .parse()
                .map_err(|_| ProtocolError::ConfigError(format!("unknown log level `{level}`")))?;
        }

        Ok(config)
    }

    /// Start from the defaults and let `mutator` adjust them
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// The default configuration rendered as TOML, for seeding a config file
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    /// Write this configuration as TOML, replacing `path`
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| config_error("cannot encode", e))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Every rule violation across all sections; empty when the config is usable
    pub fn validate(&self) -> Vec<String> {
        [
            self.serializer.validate(),
            self.server.validate(),
            self.client.validate(),
            self.logging.validate(),
        ]
        .concat()
    }

    /// [`validate`](Self::validate), folded into a single `ConfigError`
    pub fn validate_strict(&self) -> Result<()> {
        match self.validate() {
            errors if errors.is_empty() => Ok(()),
            errors => Err(ProtocolError::ConfigError(format!(
                "{} invalid setting(s): {}",
                errors.len(),
                errors.join("; ")
            ))),
        }
    }
}

/// Codec compression settings
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct SerializerSettings {
    /// Varint / zig-zag / quantized floats when true, fixed width when false
    pub use_compression: bool,

    /// Decimal places kept by compressed `f32` values
    pub decimal_places: u32,

    /// Bits per component of a compressed rotation
    pub bits_per_component: u32,
}

impl Default for SerializerSettings {
    fn default() -> Self {
        Self {
            use_compression: USE_COMPRESSION,
            decimal_places: DECIMAL_PLACES,
            bits_per_component: BITS_PER_COMPONENT,
        }
    }
}

impl SerializerSettings {
    /// Fixed-width settings
    pub fn uncompressed() -> Self {
        Self {
            use_compression: false,
            ..Self::default()
        }
    }

    /// `10^decimal_places`, the multiplier applied to compressed floats
    pub fn float_scale(&self) -> f64 {
        10f64.powi(self.decimal_places.min(MAX_DECIMAL_PLACES) as i32)
    }

    /// Validate codec settings
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.decimal_places > MAX_DECIMAL_PLACES {
            errors.push(format!(
                "Decimal places too large: {} (maximum: {MAX_DECIMAL_PLACES})",
                self.decimal_places
            ));
        }

        if self.bits_per_component == 0 || self.bits_per_component > MAX_BITS_PER_COMPONENT {
            errors.push(format!(
                "Invalid bits per component: {} (valid range: 1-{MAX_BITS_PER_COMPONENT})",
                self.bits_per_component
            ));
        }

        errors
    }
}

/// Push `"<label> cannot be empty"` or `"<label> too long"` onto `errors`
fn check_text(errors: &mut Vec<String>, label: &str, value: &str, max: usize) {
    if value.is_empty() {
        errors.push(format!("{label} cannot be empty"));
    } else if value.len() > max {
        errors.push(format!("{label} too long: {} bytes (limit {max})", value.len()));
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Name advertised to clients during authentication
    pub server_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_name: String::from("New Server"),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        check_text(&mut errors, "Server name", &self.server_name, u16::MAX as usize);
        errors
    }
}

/// Identity a client declares in its challenge answer
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub username: String,
    pub colour: Color32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            username: String::from("Username"),
            colour: Color32::new(153, 191, 97, 255),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        check_text(&mut errors, "Username", &self.username, u16::MAX as usize);
        errors
    }
}

/// Subscriber settings consumed by [`crate::utils::logging::init_logging`]
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Reported in the startup log line
    pub app_name: String,

    /// Default filter when `RUST_LOG` is unset
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("session-protocol"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        check_text(&mut errors, "Application name", &self.app_name, 64);
        errors
    }
}

/// `tracing::Level` as a lowercase string
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use tracing::Level;

    pub fn serialize<S: Serializer>(level: &Level, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&level.as_str().to_ascii_lowercase())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Level, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse()
            .map_err(|_| serde::de::Error::custom(format!("unknown log level `{raw}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_scale() {
        assert_eq!(SerializerSettings::default().float_scale(), 1000.0);
        let s = SerializerSettings {
            decimal_places: 0,
            ..SerializerSettings::default()
        };
        assert_eq!(s.float_scale(), 1.0);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = NetworkConfig::from_toml("[serializer]\nuse_compression = false\n").unwrap();
        assert!(!config.serializer.use_compression);
        assert_eq!(config.serializer.decimal_places, DECIMAL_PLACES);
        assert_eq!(config.server.server_name, "New Server");
    }

    #[test]
    fn test_strict_validation_folds_errors() {
        let config = NetworkConfig::default_with_overrides(|c| {
            c.server.server_name.clear();
            c.client.username.clear();
        });
        match config.validate_strict() {
            Err(ProtocolError::ConfigError(msg)) => {
                assert!(msg.starts_with("2 invalid setting(s)"));
                assert!(msg.contains("Username cannot be empty"));
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_level_serde_is_lowercase() {
        let text = NetworkConfig::example_config();
        assert!(text.contains("log_level = \"info\""));
        assert_eq!(NetworkConfig::from_toml(&text).unwrap(), NetworkConfig::default());
    }
}
