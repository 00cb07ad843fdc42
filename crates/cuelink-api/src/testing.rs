//! Scripted in-memory transport for tests.
//!
//! Records every message written and answers reply-expecting sends with a
//! caller-supplied responder. Enabled for this crate's own tests and for
//! dependents through the `test-util` feature.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use rosc::{OscMessage, OscType};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::Error;
use crate::message::DeviceUpdate;
use crate::transport::Transport;

type Responder = Box<dyn Fn(&OscMessage) -> Result<Value, Error> + Send + Sync>;

/// One message written through the fake.
#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub address: String,
    pub args: Vec<OscType>,
    pub expect_reply: bool,
}

pub struct ScriptedTransport {
    responder: Responder,
    sent: Mutex<Vec<Sent>>,
    updates: broadcast::Sender<DeviceUpdate>,
    unreachable: AtomicBool,
    closes: AtomicUsize,
    delays: Mutex<Vec<(String, Duration)>>,
}

impl ScriptedTransport {
    pub fn new(
        responder: impl Fn(&OscMessage) -> Result<Value, Error> + Send + Sync + 'static,
    ) -> Arc<Self> {
        let (updates, _) = broadcast::channel(64);
        Arc::new(Self {
            responder: Box::new(responder),
            sent: Mutex::new(Vec::new()),
            updates,
            unreachable: AtomicBool::new(false),
            closes: AtomicUsize::new(0),
            delays: Mutex::new(Vec::new()),
        })
    }

    /// Answers every request with `null`.
    pub fn ok() -> Arc<Self> {
        Self::new(|_| Ok(Value::Null))
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.sent().into_iter().map(|s| s.address).collect()
    }

    /// How many writes went to `address`.
    pub fn count(&self, address: &str) -> usize {
        self.sent().iter().filter(|s| s.address == address).count()
    }

    pub fn clear(&self) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Make every subsequent send fail with a connect error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Deliver an update to subscribers as if the device sent it.
    pub fn emit(&self, update: DeviceUpdate) {
        let _ = self.updates.send(update);
    }

    /// Hold back replies to addresses starting with `prefix` for `delay`.
    /// The request is recorded as soon as it is written.
    pub fn delay_replies(&self, prefix: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((prefix.to_owned(), delay));
    }

    fn reply_delay(&self, address: &str) -> Option<Duration> {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(prefix, _)| address.starts_with(prefix.as_str()))
            .map(|(_, delay)| *delay)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Transport for ScriptedTransport {
    fn send(
        &self,
        message: OscMessage,
        expect_reply: bool,
    ) -> BoxFuture<'_, Result<Option<Value>, Error>> {
        Box::pin(async move {
            if self.unreachable.load(Ordering::SeqCst) {
                return Err(Error::Connect {
                    address: "scripted".into(),
                    reason: "unreachable".into(),
                });
            }
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Sent {
                    address: message.addr.clone(),
                    args: message.args.clone(),
                    expect_reply,
                });
            if expect_reply {
                if let Some(delay) = self.reply_delay(&message.addr) {
                    tokio::time::sleep(delay).await;
                }
                (self.responder)(&message).map(Some)
            } else {
                Ok(None)
            }
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceUpdate> {
        self.updates.subscribe()
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        !self.unreachable.load(Ordering::SeqCst)
    }
}
