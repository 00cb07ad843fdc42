// ── Runtime bridge configuration ──
//
// These types describe *how* the bridge talks to a device and paces its
// sessions. They carry the workspace passcode and timing knobs, but never
// touch disk. The binary builds a `BridgeConfig` from cuelink-config and
// hands it in.

use std::time::Duration;

use cuelink_api::{ClientConfig, DeviceAddress, DiscoveryConfig, TransportConfig};
use secrecy::SecretString;

/// Every timing knob of the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    pub reply_timeout: Duration,
    pub connect_timeout: Duration,
    /// Identical selections inside this window are sent once.
    pub select_debounce: Duration,
    /// Freshness of selected/active/next cue answers.
    pub cue_info_ttl: Duration,
    /// Freshness of flattened cue lists.
    pub cue_list_ttl: Duration,
    /// Oldest value served when a live query fails.
    pub stale_ceiling: Duration,
    /// Quiet period before a coalesced refresh fires.
    pub refresh_quiet: Duration,
    /// How long a disconnected session keeps its attachment.
    pub session_grace: Duration,
    /// Upper bound on graceful teardown.
    pub shutdown_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(3),
            select_debounce: Duration::from_millis(500),
            cue_info_ttl: Duration::from_secs(1),
            cue_list_ttl: Duration::from_secs(10),
            stale_ceiling: Duration::from_secs(10),
            refresh_quiet: Duration::from_millis(500),
            session_grace: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(3),
        }
    }
}

/// Configuration for one bridge instance.
///
/// Built by the binary, passed to [`Bridge`](crate::Bridge).
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Fixed device address. `None` means use the first discovered device.
    pub device: Option<DeviceAddress>,
    /// Passcode for protected workspaces.
    pub passcode: Option<SecretString>,
    /// Whether to browse mDNS when no device address is configured.
    pub discovery_enabled: bool,
    pub discovery: DiscoveryConfig,
    pub timings: Timings,
    /// Events buffered per session before new ones are dropped.
    pub session_buffer: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            device: None,
            passcode: None,
            discovery_enabled: true,
            discovery: DiscoveryConfig::default(),
            timings: Timings::default(),
            session_buffer: 64,
        }
    }
}

impl BridgeConfig {
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            reply_timeout: self.timings.reply_timeout,
            connect_timeout: self.timings.connect_timeout,
            ..TransportConfig::default()
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            select_debounce: self.timings.select_debounce,
            passcode: self.passcode.clone(),
            ..ClientConfig::default()
        }
    }
}
