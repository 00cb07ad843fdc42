// cuelink-api: Async client for show-control workspaces over OSC/TCP

pub mod client;
pub mod codec;
pub mod discovery;
pub mod error;
pub mod message;
mod pending;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod transport;
pub mod types;

pub use client::{ClientConfig, ProtocolClient};
pub use discovery::{Browser, Discovery, DiscoveryConfig, Instance, MdnsBrowser};
pub use error::Error;
pub use message::{DeviceUpdate, UpdateKind};
pub use transport::{DeviceAddress, TcpTransport, Transport, TransportConfig};
pub use types::{Cue, CueSummary, Workspace};
