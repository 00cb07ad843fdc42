//! CLI error types with miette diagnostics.
//!
//! Maps config and server failures into user-facing errors with
//! actionable help text and process exit codes.

use miette::Diagnostic;
use thiserror::Error;

use cuelink_config::ConfigError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Server ───────────────────────────────────────────────────────
    #[error("Could not listen on {address}")]
    #[diagnostic(
        code(cuelink::bind_failed),
        help(
            "Another process may already be using this address.\n\
             Pick another with: cuelink serve --bind 127.0.0.1:<port>"
        )
    )]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Shutdown did not finish within {millis}ms")]
    #[diagnostic(
        code(cuelink::shutdown_timeout),
        help("The device may be unresponsive. Pending releases were abandoned.")
    )]
    ShutdownTimeout { millis: u128 },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(cuelink::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(
        code(cuelink::config),
        help(
            "Check the config file and CUELINK_* environment variables.\n\
             Show the effective config with: cuelink config"
        )
    )]
    Config(Box<ConfigError>),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON encoding failed: {0}")]
    #[diagnostic(code(cuelink::json))]
    Json(#[from] serde_json::Error),
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(Box::new(other)),
        }
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Bind { .. } => exit_code::CONNECTION,
            Self::ShutdownTimeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } => exit_code::USAGE,
            Self::Config(_) => exit_code::CONFIG,
            Self::Io(_) | Self::Json(_) => exit_code::GENERAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_validation_surfaces_the_field() {
        let err = CliError::from(ConfigError::Validation {
            field: "device.port".into(),
            reason: "must not be 0".into(),
        });
        assert_eq!(err.exit_code(), exit_code::USAGE);
        assert_eq!(err.to_string(), "Invalid value for device.port: must not be 0");
    }

    #[test]
    fn exit_codes() {
        let io = || std::io::Error::other("boom");
        assert_eq!(
            CliError::Bind {
                address: "127.0.0.1:8765".into(),
                source: io(),
            }
            .exit_code(),
            exit_code::CONNECTION
        );
        assert_eq!(
            CliError::ShutdownTimeout { millis: 3000 }.exit_code(),
            exit_code::TIMEOUT
        );
        assert_eq!(CliError::Io(io()).exit_code(), exit_code::GENERAL);
    }
}
