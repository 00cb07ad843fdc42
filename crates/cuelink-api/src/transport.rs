// ── Device transport ──
//
// One TCP connection per device, shared by every workspace client in the
// process. Writes are serialized behind an async mutex and each reply-
// expecting call is enqueued under that same lock, so queue order always
// equals wire order. A background reader demultiplexes inbound frames into
// replies (FIFO-matched) and updates (broadcast). There is no reconnect
// loop: a dead connection is replaced on the next `send`.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use rosc::OscMessage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{broadcast, oneshot};
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::codec::SlipCodec;
use crate::error::Error;
use crate::message::{self, DeviceUpdate, Inbound};
use crate::pending::{PendingCall, PendingQueue};

// ── DeviceAddress ────────────────────────────────────────────────────

/// One reachable device endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceAddress {
    pub host: String,
    pub port: u16,
}

impl DeviceAddress {
    /// Default OSC/TCP port of the device.
    pub const DEFAULT_PORT: u16 = 53000;

    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The well-known local fallback address.
    pub fn localhost() -> Self {
        Self::new("127.0.0.1", Self::DEFAULT_PORT)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for DeviceAddress {
    type Err = Error;

    /// Accepts `host`, `host:port`, or `[v6]:port`.
    fn from_str(s: &str) -> Result<Self, Error> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidAddress(s.to_owned()));
        }

        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| Error::InvalidAddress(s.to_owned()))?;
            let port = match tail.strip_prefix(':') {
                Some(p) => p.parse().map_err(|_| Error::InvalidAddress(s.to_owned()))?,
                None if tail.is_empty() => Self::DEFAULT_PORT,
                None => return Err(Error::InvalidAddress(s.to_owned())),
            };
            return Ok(Self::new(host, port));
        }

        match s.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => {
                let port = port
                    .parse()
                    .map_err(|_| Error::InvalidAddress(s.to_owned()))?;
                Ok(Self::new(host, port))
            }
            // Bare hostname, or an IPv6 literal without brackets.
            _ => Ok(Self::new(s, Self::DEFAULT_PORT)),
        }
    }
}

// ── TransportConfig ──────────────────────────────────────────────────

/// Timing and buffering knobs for [`TcpTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// How long a reply-expecting call waits. Default: 10s.
    pub reply_timeout: Duration,
    /// Upper bound on establishing the TCP connection. Default: 3s.
    pub connect_timeout: Duration,
    /// Capacity of the update broadcast channel. Default: 256.
    pub update_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(3),
            update_capacity: 256,
        }
    }
}

// ── Transport trait ──────────────────────────────────────────────────

/// The seam between protocol clients and the physical connection.
///
/// Object-safe so the composition root can hand out `Arc<dyn Transport>`
/// and tests can substitute a scripted fake.
pub trait Transport: Send + Sync {
    /// Write `message`. With `expect_reply`, wait for the FIFO-matched
    /// reply payload; otherwise resolve as soon as the write completes
    /// with `None`.
    fn send(
        &self,
        message: OscMessage,
        expect_reply: bool,
    ) -> BoxFuture<'_, Result<Option<Value>, Error>>;

    /// Subscribe to unsolicited device updates.
    fn subscribe(&self) -> broadcast::Receiver<DeviceUpdate>;

    /// Drop the current connection, failing every outstanding call.
    fn close(&self);

    /// Whether a live connection currently exists.
    fn is_connected(&self) -> bool;

    /// Send and wait for a reply. A reply without data yields `Value::Null`.
    fn request(&self, message: OscMessage) -> BoxFuture<'_, Result<Value, Error>> {
        let fut = self.send(message, true);
        Box::pin(async move { fut.await.map(Option::unwrap_or_default) })
    }

    /// Fire-and-forget send.
    fn notify(&self, message: OscMessage) -> BoxFuture<'_, Result<(), Error>> {
        let fut = self.send(message, false);
        Box::pin(async move { fut.await.map(|_| ()) })
    }
}

// ── TcpTransport ─────────────────────────────────────────────────────

/// A single live TCP connection plus its reply queue.
struct Link {
    writer: tokio::sync::Mutex<FramedWrite<OwnedWriteHalf, SlipCodec>>,
    pending: Arc<Mutex<PendingQueue>>,
    alive: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Link {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Tear the link down, rejecting outstanding calls with `reason()`.
    fn kill(&self, reason: fn() -> Error) {
        mark_dead(&self.pending, &self.alive, reason);
        self.cancel.cancel();
    }
}

/// Production transport: OSC over SLIP-framed TCP.
pub struct TcpTransport {
    address: DeviceAddress,
    config: TransportConfig,
    link: ArcSwapOption<Link>,
    connect_lock: tokio::sync::Mutex<()>,
    updates: broadcast::Sender<DeviceUpdate>,
    next_id: AtomicU64,
}

impl TcpTransport {
    /// Create a transport for `address`. Does NOT connect; the first
    /// [`send`](Transport::send) does.
    pub fn new(address: DeviceAddress, config: TransportConfig) -> Self {
        let (updates, _) = broadcast::channel(config.update_capacity.max(1));
        Self {
            address,
            config,
            link: ArcSwapOption::empty(),
            connect_lock: tokio::sync::Mutex::new(()),
            updates,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    /// Return the live link, connecting if there is none.
    async fn link(&self) -> Result<Arc<Link>, Error> {
        if let Some(link) = self.live_link() {
            return Ok(link);
        }

        let _guard = self.connect_lock.lock().await;
        // Another caller may have connected while we waited.
        if let Some(link) = self.live_link() {
            return Ok(link);
        }

        let link = Arc::new(self.open().await?);
        self.link.store(Some(Arc::clone(&link)));
        Ok(link)
    }

    fn live_link(&self) -> Option<Arc<Link>> {
        self.link.load_full().filter(|l| l.is_alive())
    }

    async fn open(&self) -> Result<Link, Error> {
        let target = self.address.to_string();
        debug!(address = %target, "connecting to device");

        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(&target))
            .await
            .map_err(|_| Error::Connect {
                address: target.clone(),
                reason: format!(
                    "timed out after {}ms",
                    self.config.connect_timeout.as_millis()
                ),
            })?
            .map_err(|e| Error::Connect {
                address: target.clone(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true)?;

        let (read, write) = stream.into_split();
        let pending = Arc::new(Mutex::new(PendingQueue::default()));
        let alive = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        tokio::spawn(read_loop(
            FramedRead::new(read, SlipCodec::new()),
            Arc::clone(&pending),
            Arc::clone(&alive),
            self.updates.clone(),
            cancel.clone(),
        ));

        info!(address = %target, "connected to device");

        Ok(Link {
            writer: tokio::sync::Mutex::new(FramedWrite::new(write, SlipCodec::new())),
            pending,
            alive,
            cancel,
        })
    }

    async fn send_message(
        &self,
        message: OscMessage,
        expect_reply: bool,
    ) -> Result<Option<Value>, Error> {
        let address = message.addr.clone();
        let payload = message::encode(message)?;
        let link = self.link().await?;

        let waiting = {
            let mut writer = link.writer.lock().await;

            let waiting = if expect_reply {
                let (sink, rx) = oneshot::channel();
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let mut pending = lock(&link.pending);
                if !link.is_alive() {
                    return Err(Error::ConnectionLost);
                }
                pending.push(PendingCall {
                    id,
                    address: address.clone(),
                    deadline: Instant::now() + self.config.reply_timeout,
                    sink,
                });
                Some((id, rx))
            } else {
                None
            };

            if let Err(e) = writer.send(payload).await {
                warn!(address = %address, error = %e, "device write failed");
                link.kill(|| Error::ConnectionLost);
                return Err(Error::Io(e));
            }
            trace!(address = %address, expect_reply, "sent");
            waiting
        };

        let Some((id, rx)) = waiting else {
            return Ok(None);
        };

        match tokio::time::timeout(self.config.reply_timeout, rx).await {
            Ok(Ok(result)) => result.map(Some),
            Ok(Err(_)) => Err(Error::ConnectionLost),
            Err(_) => {
                lock(&link.pending).remove(id);
                debug!(address = %address, id, "reply deadline elapsed");
                Err(Error::Timeout {
                    timeout_ms: u64::try_from(self.config.reply_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                })
            }
        }
    }
}

impl Transport for TcpTransport {
    fn send(
        &self,
        message: OscMessage,
        expect_reply: bool,
    ) -> BoxFuture<'_, Result<Option<Value>, Error>> {
        Box::pin(self.send_message(message, expect_reply))
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceUpdate> {
        self.updates.subscribe()
    }

    fn close(&self) {
        if let Some(link) = self.link.swap(None) {
            info!(address = %self.address, "closing device connection");
            link.kill(|| Error::Closed);
        }
    }

    fn is_connected(&self) -> bool {
        self.live_link().is_some()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Some(link) = self.link.swap(None) {
            link.kill(|| Error::Closed);
        }
    }
}

// ── Background reader ────────────────────────────────────────────────

async fn read_loop(
    mut frames: FramedRead<OwnedReadHalf, SlipCodec>,
    pending: Arc<Mutex<PendingQueue>>,
    alive: Arc<AtomicBool>,
    updates: broadcast::Sender<DeviceUpdate>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            frame = frames.next() => match frame {
                Some(Ok(bytes)) => dispatch_frame(&bytes, &pending, &updates),
                Some(Err(e)) => {
                    warn!(error = %e, "device read failed");
                    break;
                }
                None => {
                    info!("device closed the connection");
                    break;
                }
            },
        }
    }

    mark_dead(&pending, &alive, || Error::ConnectionLost);
    debug!("device reader exiting");
}

/// Route every message in one frame.
fn dispatch_frame(
    frame: &[u8],
    pending: &Mutex<PendingQueue>,
    updates: &broadcast::Sender<DeviceUpdate>,
) {
    let messages = match message::decode(frame) {
        Ok(m) => m,
        Err(e) => {
            debug!(error = %e, "dropping undecodable frame");
            return;
        }
    };

    for msg in messages {
        match message::classify(msg) {
            Inbound::KeepAlive => trace!("keep-alive"),
            Inbound::Reply { address, outcome } => {
                let claimed = lock(pending).claim_oldest(Instant::now());
                match claimed {
                    Some(call) => {
                        if call.address != address {
                            debug!(
                                expected = %call.address,
                                got = %address,
                                "reply claimed by a different request"
                            );
                        }
                        let _ = call.sink.send(outcome);
                    }
                    None => debug!(address = %address, "no pending call, dropping reply"),
                }
            }
            Inbound::Update(update) => {
                trace!(address = %update.address, kind = ?update.kind, "device update");
                // No subscribers is fine.
                let _ = updates.send(update);
            }
            Inbound::Unknown(address) => trace!(address = %address, "ignoring message"),
        }
    }
}

/// Mark a link dead and reject its outstanding calls.
///
/// The flag flips under the queue lock, so a sender that enqueues after
/// this point sees the dead link and never waits on a reply. A link that
/// is already dead keeps the reason it died with.
fn mark_dead(pending: &Mutex<PendingQueue>, alive: &AtomicBool, reason: fn() -> Error) {
    let mut queue = lock(pending);
    alive.store(false, Ordering::Release);
    queue.fail_all(reason);
}

fn lock(pending: &Mutex<PendingQueue>) -> MutexGuard<'_, PendingQueue> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_device_address() {
        assert_eq!(
            "10.0.0.5:53100".parse::<DeviceAddress>().unwrap(),
            DeviceAddress::new("10.0.0.5", 53100)
        );
        assert_eq!(
            "show.local".parse::<DeviceAddress>().unwrap(),
            DeviceAddress::new("show.local", DeviceAddress::DEFAULT_PORT)
        );
        assert_eq!(
            "[::1]:6000".parse::<DeviceAddress>().unwrap(),
            DeviceAddress::new("::1", 6000)
        );
        assert!("host:notaport".parse::<DeviceAddress>().is_err());
        assert!("".parse::<DeviceAddress>().is_err());
    }

    #[test]
    fn display_brackets_ipv6() {
        assert_eq!(DeviceAddress::new("::1", 53000).to_string(), "[::1]:53000");
        assert_eq!(DeviceAddress::localhost().to_string(), "127.0.0.1:53000");
    }

    #[tokio::test]
    async fn unreachable_device_reports_connect_error() {
        // Bind then drop to obtain a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = TcpTransport::new(
            DeviceAddress::new("127.0.0.1", port),
            TransportConfig::default(),
        );
        let err = transport
            .send(message::bare("/thump"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connect { .. }));
        assert!(!transport.is_connected());
    }
}
