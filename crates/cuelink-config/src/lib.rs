//! Configuration for the cuelink binary.
//!
//! Layered loading (built-in defaults → TOML file → `CUELINK_*`
//! environment), per-field validation, and translation to
//! `cuelink_core::BridgeConfig`. The core crate never reads files.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use cuelink_core::{BridgeConfig, DEFAULT_SERVICE_TYPE, DeviceAddress, Timings};

/// Environment variable prefix; nested keys use `__`, e.g.
/// `CUELINK_DEVICE__HOST`.
pub const ENV_PREFIX: &str = "CUELINK_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceSection,

    #[serde(default)]
    pub discovery: DiscoverySection,

    #[serde(default)]
    pub timing: TimingSection,

    #[serde(default)]
    pub server: ServerSection,
}

/// Which device to drive.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceSection {
    /// Hostname or IP. Unset means discover.
    pub host: Option<String>,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Workspace passcode (plaintext, prefer `passcode_env`).
    pub passcode: Option<String>,

    /// Environment variable holding the workspace passcode.
    pub passcode_env: Option<String>,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            host: None,
            port: default_port(),
            passcode: None,
            passcode_env: None,
        }
    }
}

fn default_port() -> u16 {
    DeviceAddress::DEFAULT_PORT
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DiscoverySection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_service_type")]
    pub service_type: String,

    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            enabled: true,
            service_type: default_service_type(),
            window_ms: default_window_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_service_type() -> String {
    DEFAULT_SERVICE_TYPE.into()
}
fn default_window_ms() -> u64 {
    2500
}

/// Timing knobs, all in milliseconds except the grace period.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimingSection {
    pub reply_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub select_debounce_ms: u64,
    pub cue_info_ttl_ms: u64,
    pub cue_list_ttl_ms: u64,
    pub stale_ceiling_ms: u64,
    pub refresh_quiet_ms: u64,
    pub session_grace_secs: u64,
    pub shutdown_timeout_ms: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            reply_timeout_ms: 10_000,
            connect_timeout_ms: 3_000,
            select_debounce_ms: 500,
            cue_info_ttl_ms: 1_000,
            cue_list_ttl_ms: 10_000,
            stale_ceiling_ms: 10_000,
            refresh_quiet_ms: 500,
            session_grace_secs: 30,
            shutdown_timeout_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerSection {
    /// Session server listen address.
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8765".into()
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "cuelink", "cuelink").map_or_else(
        || {
            let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
            p.push(".config");
            p.push("cuelink");
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load configuration from `path` (or the platform default) and the
/// environment, then validate it.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);

    let config: Config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()?;

    config.validate()?;
    Ok(config)
}

/// Write the default configuration to `path` unless a file exists there.
/// Returns `false` when an existing file was left alone.
pub fn write_default_config(path: &Path) -> Result<bool, ConfigError> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, Config::default().to_toml()?)?;
    Ok(true)
}

impl Config {
    /// Pretty TOML with any plaintext passcode redacted.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let mut shown = self.clone();
        if shown.device.passcode.is_some() {
            shown.device.passcode = Some("********".into());
        }
        Ok(toml::to_string_pretty(&shown)?)
    }

    /// Check every field; the first problem is reported.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(host) = &self.device.host {
            if host.trim().is_empty() {
                return Err(invalid("device.host", "must not be empty"));
            }
        }
        if self.device.port == 0 {
            return Err(invalid("device.port", "must be non-zero"));
        }

        if self.discovery.enabled {
            if !self.discovery.service_type.ends_with(".local.") {
                return Err(invalid(
                    "discovery.service_type",
                    "must be a fully-qualified mDNS type ending in `.local.`",
                ));
            }
            if self.discovery.window_ms == 0 {
                return Err(invalid("discovery.window_ms", "must be non-zero"));
            }
        }

        let t = &self.timing;
        for (field, value) in [
            ("timing.reply_timeout_ms", t.reply_timeout_ms),
            ("timing.connect_timeout_ms", t.connect_timeout_ms),
            ("timing.refresh_quiet_ms", t.refresh_quiet_ms),
            ("timing.shutdown_timeout_ms", t.shutdown_timeout_ms),
        ] {
            if value == 0 {
                return Err(invalid(field, "must be non-zero"));
            }
        }
        if t.stale_ceiling_ms < t.cue_info_ttl_ms {
            return Err(invalid(
                "timing.stale_ceiling_ms",
                "must not be shorter than timing.cue_info_ttl_ms",
            ));
        }

        self.bind_address()?;
        Ok(())
    }

    pub fn bind_address(&self) -> Result<SocketAddr, ConfigError> {
        self.server
            .bind
            .parse()
            .map_err(|e| invalid("server.bind", format!("{e}")))
    }

    /// Fixed device address, if a host is configured.
    pub fn device_address(&self) -> Option<DeviceAddress> {
        self.device
            .host
            .as_ref()
            .map(|host| DeviceAddress::new(host.trim(), self.device.port))
    }

    /// Resolve the passcode: named env var first, then plaintext.
    pub fn passcode(&self) -> Option<SecretString> {
        if let Some(name) = &self.device.passcode_env {
            if let Ok(value) = std::env::var(name) {
                return Some(SecretString::from(value));
            }
        }
        self.device.passcode.clone().map(SecretString::from)
    }

    /// Translate into the core's runtime configuration.
    pub fn to_bridge_config(&self) -> BridgeConfig {
        let t = &self.timing;
        let mut bridge = BridgeConfig {
            device: self.device_address(),
            passcode: self.passcode(),
            discovery_enabled: self.discovery.enabled,
            timings: Timings {
                reply_timeout: Duration::from_millis(t.reply_timeout_ms),
                connect_timeout: Duration::from_millis(t.connect_timeout_ms),
                select_debounce: Duration::from_millis(t.select_debounce_ms),
                cue_info_ttl: Duration::from_millis(t.cue_info_ttl_ms),
                cue_list_ttl: Duration::from_millis(t.cue_list_ttl_ms),
                stale_ceiling: Duration::from_millis(t.stale_ceiling_ms),
                refresh_quiet: Duration::from_millis(t.refresh_quiet_ms),
                session_grace: Duration::from_secs(t.session_grace_secs),
                shutdown_timeout: Duration::from_millis(t.shutdown_timeout_ms),
            },
            ..BridgeConfig::default()
        };
        bridge
            .discovery
            .service_type
            .clone_from(&self.discovery.service_type);
        bridge.discovery.window = Duration::from_millis(self.discovery.window_ms);
        bridge.discovery.fallback = DeviceAddress::new("127.0.0.1", self.device.port);
        bridge
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use figment::Jail;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.device.port, 53000);
        assert_eq!(config.server.bind, "127.0.0.1:8765");
        assert_eq!(config.timing.session_grace_secs, 30);
        config.validate().unwrap();

        let bridge = config.to_bridge_config();
        assert!(bridge.device.is_none());
        assert_eq!(bridge.timings, Timings::default());
        assert_eq!(bridge.discovery.window, Duration::from_millis(2500));
    }

    #[test]
    fn file_then_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "cuelink.toml",
                r#"
                [device]
                host = "10.0.0.20"
                port = 53100

                [timing]
                refresh_quiet_ms = 250
                "#,
            )?;
            jail.set_env("CUELINK_DEVICE__PORT", "53200");
            jail.set_env("CUELINK_SERVER__BIND", "0.0.0.0:9000");

            let config = load_config(Some(Path::new("cuelink.toml"))).map_err(|e| e.to_string())?;
            assert_eq!(config.device.host.as_deref(), Some("10.0.0.20"));
            assert_eq!(config.device.port, 53200);
            assert_eq!(config.timing.refresh_quiet_ms, 250);
            assert_eq!(config.timing.reply_timeout_ms, 10_000);
            assert_eq!(config.bind_address().unwrap().port(), 9000);

            let bridge = config.to_bridge_config();
            assert_eq!(
                bridge.device,
                Some(DeviceAddress::new("10.0.0.20", 53200))
            );
            assert_eq!(bridge.timings.refresh_quiet, Duration::from_millis(250));
            Ok(())
        });
    }

    #[test]
    fn missing_file_uses_defaults() {
        Jail::expect_with(|_jail| {
            let config = load_config(Some(Path::new("absent.toml"))).map_err(|e| e.to_string())?;
            assert_eq!(config, Config::default());
            Ok(())
        });
    }

    #[test]
    fn validation_names_the_field() {
        let mut config = Config::default();
        config.server.bind = "not an address".into();
        match config.validate().unwrap_err() {
            ConfigError::Validation { field, .. } => assert_eq!(field, "server.bind"),
            e => panic!("unexpected {e}"),
        }

        let mut config = Config::default();
        config.timing.refresh_quiet_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.discovery.service_type = "_qlab._tcp".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn passcode_env_takes_precedence() {
        Jail::expect_with(|jail| {
            jail.set_env("SHOW_PASSCODE", "from-env");
            let mut config = Config::default();
            config.device.passcode = Some("plain".into());
            assert_eq!(config.passcode().unwrap().expose_secret(), "plain");

            config.device.passcode_env = Some("SHOW_PASSCODE".into());
            assert_eq!(config.passcode().unwrap().expose_secret(), "from-env");
            Ok(())
        });
    }

    #[test]
    fn rendered_toml_redacts_passcode() {
        let mut config = Config::default();
        config.device.passcode = Some("secret".into());
        let rendered = config.to_toml().unwrap();
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("********"));
    }

    #[test]
    fn default_file_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        assert!(write_default_config(&path).unwrap());
        assert!(!write_default_config(&path).unwrap());

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed, Config::default());
    }
}
