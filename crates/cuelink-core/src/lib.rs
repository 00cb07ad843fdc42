// cuelink-core: Workspace pool, caching, sessions, and update fan-out

pub mod bridge;
pub mod cache;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod model;
pub mod pool;
pub mod session;
pub mod workspace;

pub use bridge::Bridge;
pub use command::{Command, CommandResult};
pub use config::{BridgeConfig, Timings};
pub use error::CoreError;
pub use model::{
    Cue, CueInfo, CueSummary, Instance, PerformanceSnapshot, Reply, SessionEvent, Workspace,
};
pub use session::{Admission, SessionState};

pub use cuelink_api::DeviceAddress;
pub use cuelink_api::discovery::DEFAULT_SERVICE_TYPE;
