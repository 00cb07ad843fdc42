use thiserror::Error;

/// Top-level error type for the `cuelink-api` crate.
///
/// Covers every failure mode of the device link: connecting, framing,
/// reply correlation, device-reported failures, and discovery.
/// `cuelink-core` maps these into session-facing results.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// TCP connect failed (refused, unreachable, DNS failure, etc.)
    #[error("Cannot connect to device at {address}: {reason}")]
    Connect { address: String, reason: String },

    /// Socket read/write failure on an established connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection dropped while a reply was still outstanding.
    #[error("Connection to device lost")]
    ConnectionLost,

    /// The transport was closed explicitly.
    #[error("Transport closed")]
    Closed,

    /// No reply arrived before the call deadline.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    // ── Protocol ────────────────────────────────────────────────────
    /// Device answered with a non-`ok` status envelope.
    #[error("Device rejected {address}: {status}{}", detail(.message.as_deref()))]
    Protocol {
        address: String,
        status: String,
        /// Explanation the device sent alongside the status, if any.
        message: Option<String>,
    },

    /// Reply or frame could not be decoded.
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// Outgoing message could not be encoded.
    #[error("Encode error: {0}")]
    Encode(String),

    // ── Discovery ───────────────────────────────────────────────────
    /// mDNS browsing failed.
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// `host:port` string could not be parsed.
    #[error("Invalid device address: {0}")]
    InvalidAddress(String),
}

fn detail(message: Option<&str>) -> String {
    message.map(|m| format!(" ({m})")).unwrap_or_default()
}

impl Error {
    /// Returns `true` for failures that a later reconnect may resolve.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Io(_) | Self::ConnectionLost | Self::Timeout { .. }
        )
    }

    /// Returns `true` if the call gave up waiting for a reply.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<rosc::OscError> for Error {
    fn from(err: rosc::OscError) -> Self {
        Self::Decode {
            message: format!("{err:?}"),
        }
    }
}
