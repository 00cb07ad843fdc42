// ── Session-facing model ──
//
// Snapshots and events pushed to sessions. Device-level types are
// re-exported from cuelink-api so consumers need only this crate.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

pub use cuelink_api::{Cue, CueSummary, Instance, Workspace};

/// Current and upcoming cue for one workspace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CueInfo {
    pub current: Arc<CueSummary>,
    pub next: Arc<CueSummary>,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate command statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PerformanceSnapshot {
    /// Mean command latency in milliseconds.
    pub average_latency: f64,
    pub commands_sent: u64,
    /// Fraction of commands that failed, `0.0..=1.0`.
    pub error_rate: f64,
}

/// Answer to one session request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub op: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Reply {
    pub fn ok(op: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            op: op.into(),
            success: true,
            message: None,
            data,
        }
    }

    pub fn failure(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }
}

/// Everything a session can receive, serialized as
/// `{"event": <name>, "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum SessionEvent {
    #[serde(rename_all = "camelCase")]
    Connected {
        session_id: String,
        resumed: bool,
        workspace_id: Option<String>,
    },
    CueInfo(CueInfo),
    CueList { cues: Arc<Vec<Cue>> },
    Performance(PerformanceSnapshot),
    Result(Reply),
}

impl SessionEvent {
    /// Event name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::CueInfo(_) => "cueInfo",
            Self::CueList { .. } => "cueList",
            Self::Performance(_) => "performance",
            Self::Result(_) => "result",
        }
    }
}
