// ── Core error types ──
//
// Session-facing errors from cuelink-core. Consumers never see OSC
// envelopes or socket errors directly: the `From<cuelink_api::Error>`
// impl folds transport-layer failures into domain variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach device at {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Device did not answer within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Device rejected the request: {message}")]
    Rejected { message: String },

    #[error("Not connected to a workspace")]
    NotConnected,

    #[error("Unknown session: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Workspace {workspace_id} unavailable: {reason}")]
    WorkspaceUnavailable {
        workspace_id: String,
        reason: String,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether retrying later (after a reconnect) may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionFailed { .. } | Self::Timeout { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<cuelink_api::Error> for CoreError {
    fn from(err: cuelink_api::Error) -> Self {
        use cuelink_api::Error as Api;

        match err {
            Api::Connect { address, reason } => CoreError::ConnectionFailed { address, reason },
            Api::Io(e) => CoreError::ConnectionFailed {
                address: "device".into(),
                reason: e.to_string(),
            },
            Api::ConnectionLost => CoreError::ConnectionFailed {
                address: "device".into(),
                reason: "connection lost".into(),
            },
            Api::Closed => CoreError::ConnectionFailed {
                address: "device".into(),
                reason: "transport closed".into(),
            },
            Api::Timeout { timeout_ms } => CoreError::Timeout { timeout_ms },
            Api::Protocol {
                address,
                status,
                message: Some(message),
            } => CoreError::Rejected {
                message: format!("{address}: {status} ({message})"),
            },
            Api::Protocol { address, status, .. } => CoreError::Rejected {
                message: format!("{address}: {status}"),
            },
            Api::InvalidAddress(address) => CoreError::Config {
                message: format!("invalid device address: {address}"),
            },
            Api::Discovery(reason) => CoreError::ConnectionFailed {
                address: "mdns".into(),
                reason,
            },
            Api::Decode { message } => CoreError::Internal(format!("decode: {message}")),
            Api::Encode(message) => CoreError::Internal(format!("encode: {message}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_map_to_domain_variants() {
        let lost: CoreError = cuelink_api::Error::ConnectionLost.into();
        assert!(matches!(lost, CoreError::ConnectionFailed { .. }));
        assert!(lost.is_transient());

        let rejected: CoreError = cuelink_api::Error::Protocol {
            address: "/workspace/W1/connect".into(),
            status: "badpass".into(),
            message: None,
        }
        .into();
        assert_eq!(
            rejected.to_string(),
            "Device rejected the request: /workspace/W1/connect: badpass"
        );
        assert!(!rejected.is_transient());

        let explained: CoreError = cuelink_api::Error::Protocol {
            address: "/workspace/W1/go".into(),
            status: "error".into(),
            message: Some("cue is broken".into()),
        }
        .into();
        assert_eq!(
            explained.to_string(),
            "Device rejected the request: /workspace/W1/go: error (cue is broken)"
        );

        let closed: CoreError = cuelink_api::Error::Closed.into();
        assert!(
            matches!(closed, CoreError::ConnectionFailed { ref reason, .. } if reason == "transport closed")
        );

        let timeout: CoreError = cuelink_api::Error::Timeout { timeout_ms: 10_000 }.into();
        assert!(matches!(timeout, CoreError::Timeout { timeout_ms: 10_000 }));
    }
}
