// ── Command API ──
//
// Every state-changing request from a session flows through the
// `Command` enum. The owning workspace handle routes each variant to the
// protocol client, records latency, and invalidates cached cue info.

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::CoreError;

/// All playback and selection operations a session may issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(tag = "command", rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum Command {
    Go,
    Stop,
    Panic,
    Reset,
    Next,
    Previous,
    SelectCue {
        #[serde(rename = "cueId")]
        cue_id: String,
    },
}

/// Outcome reported back to the session for a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

impl From<Result<(), CoreError>> for CommandResult {
    fn from(result: Result<(), CoreError>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(e) => Self::failure(e.to_string()),
        }
    }
}
