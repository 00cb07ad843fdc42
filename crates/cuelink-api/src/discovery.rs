//! mDNS discovery of devices on the local network.
//!
//! Browses a fixed service type for a bounded window and collects every
//! responder. When nothing answers (or browsing itself fails) a single
//! fallback entry at the well-known local address is returned, so callers
//! always have a target to try.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use mdns_sd::{ServiceDaemon, ServiceEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::error::Error;
use crate::transport::DeviceAddress;

/// Service type advertised by the device.
pub const DEFAULT_SERVICE_TYPE: &str = "_qlab._tcp.local.";

// ── Instance ─────────────────────────────────────────────────────────

/// One responder seen during a browse window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    pub address: String,
    pub port: u16,
}

impl Instance {
    pub fn device_address(&self) -> DeviceAddress {
        DeviceAddress::new(self.address.clone(), self.port)
    }

    fn fallback(address: &DeviceAddress) -> Self {
        Self {
            name: "Local device".into(),
            address: address.host.clone(),
            port: address.port,
        }
    }
}

// ── Browser ──────────────────────────────────────────────────────────

/// Source of raw browse results.
pub trait Browser: Send + Sync {
    fn browse<'a>(
        &'a self,
        service_type: &'a str,
        window: Duration,
    ) -> BoxFuture<'a, Result<Vec<Instance>, Error>>;
}

/// Browser backed by a short-lived `mdns-sd` daemon.
#[derive(Debug, Default)]
pub struct MdnsBrowser;

impl Browser for MdnsBrowser {
    fn browse<'a>(
        &'a self,
        service_type: &'a str,
        window: Duration,
    ) -> BoxFuture<'a, Result<Vec<Instance>, Error>> {
        Box::pin(async move {
            let daemon = ServiceDaemon::new().map_err(|e| Error::Discovery(e.to_string()))?;
            let receiver = daemon
                .browse(service_type)
                .map_err(|e| Error::Discovery(e.to_string()))?;

            let deadline = Instant::now() + window;
            let mut found = Vec::new();
            loop {
                match tokio::time::timeout_at(deadline, receiver.recv_async()).await {
                    Ok(Ok(ServiceEvent::ServiceResolved(info))) => {
                        let addresses = info.get_addresses();
                        let ip = addresses
                            .iter()
                            .find(|ip| ip.is_ipv4())
                            .or_else(|| addresses.iter().next());
                        let Some(ip) = ip else {
                            continue;
                        };
                        found.push(Instance {
                            name: instance_name(info.get_fullname(), service_type),
                            address: ip.to_string(),
                            port: info.get_port(),
                        });
                    }
                    Ok(Ok(other)) => trace!(event = ?other, "mdns event"),
                    // Channel closed or window elapsed.
                    Ok(Err(_)) | Err(_) => break,
                }
            }

            let _ = daemon.stop_browse(service_type);
            let _ = daemon.shutdown();
            Ok(found)
        })
    }
}

fn instance_name(fullname: &str, service_type: &str) -> String {
    fullname
        .strip_suffix(service_type)
        .unwrap_or(fullname)
        .trim_end_matches('.')
        .to_owned()
}

// ── Discovery ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub service_type: String,
    /// Browse window. Default: 2.5s.
    pub window: Duration,
    /// Entry synthesised when nothing responds.
    pub fallback: DeviceAddress,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service_type: DEFAULT_SERVICE_TYPE.into(),
            window: Duration::from_millis(2500),
            fallback: DeviceAddress::localhost(),
        }
    }
}

/// Discovery front-end with a remembered last result.
pub struct Discovery {
    browser: Arc<dyn Browser>,
    config: DiscoveryConfig,
    last: Mutex<Option<Vec<Instance>>>,
}

impl Discovery {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self::with_browser(Arc::new(MdnsBrowser), config)
    }

    pub fn with_browser(browser: Arc<dyn Browser>, config: DiscoveryConfig) -> Self {
        Self {
            browser,
            config,
            last: Mutex::new(None),
        }
    }

    /// One-shot discovery: the first call browses, later calls reuse it.
    pub async fn discover(&self) -> Vec<Instance> {
        let mut last = self.last.lock().await;
        if let Some(instances) = last.as_ref() {
            return instances.clone();
        }
        let instances = self.scan().await;
        *last = Some(instances.clone());
        instances
    }

    /// Browse again, replacing the remembered result.
    pub async fn rescan(&self) -> Vec<Instance> {
        let mut last = self.last.lock().await;
        let instances = self.scan().await;
        *last = Some(instances.clone());
        instances
    }

    async fn scan(&self) -> Vec<Instance> {
        debug!(
            service = %self.config.service_type,
            window_ms = u64::try_from(self.config.window.as_millis()).unwrap_or(u64::MAX),
            "browsing for devices"
        );

        let found = match self
            .browser
            .browse(&self.config.service_type, self.config.window)
            .await
        {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "discovery failed");
                Vec::new()
            }
        };

        let mut seen: HashSet<(String, u16)> = HashSet::new();
        let instances: Vec<Instance> = found
            .into_iter()
            .filter(|i| seen.insert((i.address.clone(), i.port)))
            .collect();

        if instances.is_empty() {
            info!(fallback = %self.config.fallback, "no devices found, using fallback");
            return vec![Instance::fallback(&self.config.fallback)];
        }

        info!(count = instances.len(), "devices discovered");
        instances
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_service_suffix_from_fullname() {
        assert_eq!(
            instance_name("Stage Mac._qlab._tcp.local.", DEFAULT_SERVICE_TYPE),
            "Stage Mac"
        );
        assert_eq!(instance_name("odd", DEFAULT_SERVICE_TYPE), "odd");
    }
}
