// ── Workspace handle ──
//
// The shared per-workspace object every attached session reaches through
// the pool. Wraps one activated `ProtocolClient` together with its
// volatile cue-info tier, and reads cue lists through the bridge-wide
// repository.

use std::sync::Arc;

use chrono::Utc;
use cuelink_api::{Cue, CueSummary, ProtocolClient, types};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{CueInfoCache, CueListRepository, CueSlot};
use crate::command::Command;
use crate::error::CoreError;
use crate::metrics::PerformanceCounters;
use crate::model::CueInfo;

pub struct WorkspaceHandle {
    workspace_id: String,
    client: ProtocolClient,
    cue_info: CueInfoCache,
    cue_lists: Arc<CueListRepository>,
    counters: Arc<PerformanceCounters>,
}

impl WorkspaceHandle {
    pub(crate) fn new(
        workspace_id: String,
        client: ProtocolClient,
        cue_info: CueInfoCache,
        cue_lists: Arc<CueListRepository>,
        counters: Arc<PerformanceCounters>,
    ) -> Self {
        Self {
            workspace_id,
            client,
            cue_info,
            cue_lists,
            counters,
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Run a state-changing command, record its latency, and drop the
    /// cached cue info so the next refresh sees the new state.
    pub async fn execute(&self, command: &Command) -> Result<(), CoreError> {
        let started = Instant::now();
        let result = match command {
            Command::Go => self.client.go().await,
            Command::Stop => self.client.stop().await,
            Command::Panic => self.client.panic().await,
            Command::Reset => self.client.reset().await,
            Command::Next => self.client.next().await,
            Command::Previous => self.client.previous().await,
            Command::SelectCue { cue_id } => self.client.select_cue(cue_id).await,
        };
        let elapsed = started.elapsed();

        self.counters.record(elapsed, result.is_ok());
        self.cue_info.invalidate();

        match result {
            Ok(()) => {
                debug!(
                    workspace = %self.workspace_id,
                    %command,
                    latency_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    "command sent"
                );
                Ok(())
            }
            Err(e) => {
                warn!(workspace = %self.workspace_id, %command, error = %e, "command failed");
                Err(e.into())
            }
        }
    }

    // ── Cached queries ───────────────────────────────────────────────

    pub async fn selected_cue(&self) -> Arc<CueSummary> {
        self.cue_info
            .get_or_fetch(CueSlot::Selected, || async {
                self.client.selected_cue().await.map_err(CoreError::from)
            })
            .await
    }

    pub async fn active_cue(&self) -> Arc<CueSummary> {
        self.cue_info
            .get_or_fetch(CueSlot::Active, || async {
                self.client.active_cue().await.map_err(CoreError::from)
            })
            .await
    }

    /// Sibling after the selected cue, resolved against the cached list.
    pub async fn next_cue(&self) -> Arc<CueSummary> {
        self.cue_info
            .get_or_fetch(CueSlot::Next, || async {
                let selected = self.selected_cue().await;
                if selected.is_placeholder() {
                    return Ok(CueSummary::end_of_list());
                }
                let cues = self.cue_list().await;
                Ok(types::next_sibling(&cues, &selected.id)
                    .map_or_else(CueSummary::end_of_list, Cue::summary))
            })
            .await
    }

    pub async fn cue_info(&self) -> CueInfo {
        let current = self.selected_cue().await;
        let next = self.next_cue().await;
        CueInfo {
            current,
            next,
            timestamp: Utc::now(),
        }
    }

    pub async fn cue_list(&self) -> Arc<Vec<Cue>> {
        self.cue_lists
            .get_or_fetch(&self.workspace_id, || async {
                self.client.cue_list().await.map_err(CoreError::from)
            })
            .await
    }

    // ── Cache control ────────────────────────────────────────────────

    pub fn invalidate_cue_info(&self) {
        self.cue_info.invalidate();
    }

    /// Release the device-side workspace connection.
    pub(crate) async fn release(&self) {
        info!(workspace = %self.workspace_id, "releasing workspace");
        self.client.release().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use cuelink_api::testing::ScriptedTransport;
    use cuelink_api::{ClientConfig, Error};
    use serde_json::{Value, json};
    use std::time::Duration;

    fn handle(transport: &Arc<ScriptedTransport>) -> WorkspaceHandle {
        WorkspaceHandle::new(
            "W1".into(),
            ProtocolClient::new(transport.clone(), ClientConfig::default()),
            CueInfoCache::new(Duration::from_secs(1), Duration::from_secs(10)),
            Arc::new(CueListRepository::new(
                Duration::from_secs(10),
                Duration::from_secs(10),
            )),
            Arc::new(PerformanceCounters::default()),
        )
    }

    fn device() -> Arc<ScriptedTransport> {
        ScriptedTransport::new(|m| match m.addr.as_str() {
            "/cue/selected/valuesForKeys" => Ok(json!({
                "uniqueID": "C1", "number": "1", "displayName": "Preset", "type": "Light"
            })),
            "/cueLists" => Ok(json!([{
                "uniqueID": "L1", "listName": "Main",
                "cues": [
                    { "uniqueID": "C1", "number": "1", "name": "Preset" },
                    { "uniqueID": "C2", "number": "2", "name": "Walk-in" }
                ]
            }])),
            _ => Ok(Value::Null),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn cue_info_is_cached_until_a_command() {
        let transport = device();
        let handle = handle(&transport);

        let first = handle.cue_info().await;
        assert_eq!(first.current.id, "C1");
        assert_eq!(first.next.id, "C2");

        let second = handle.cue_info().await;
        assert!(Arc::ptr_eq(&first.current, &second.current));
        assert_eq!(transport.count("/cue/selected/valuesForKeys"), 1);

        handle.execute(&Command::Go).await.unwrap();
        handle.cue_info().await;
        assert_eq!(transport.count("/cue/selected/valuesForKeys"), 2);
        // The cue list has its own, longer-lived tier.
        assert_eq!(transport.count("/cueLists"), 1);
    }

    #[tokio::test]
    async fn failed_command_is_counted() {
        let transport = ScriptedTransport::ok();
        let handle = handle(&transport);

        handle.execute(&Command::Stop).await.unwrap();
        transport.set_unreachable(true);
        let err = handle.execute(&Command::Stop).await.unwrap_err();
        assert!(matches!(err, CoreError::ConnectionFailed { .. }));

        let snap = handle.counters.snapshot();
        assert_eq!(snap.commands_sent, 2);
        assert!((snap.error_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn unreachable_device_yields_placeholders() {
        let transport = ScriptedTransport::new(|_| Err(Error::Timeout { timeout_ms: 10 }));
        let handle = handle(&transport);

        let info = handle.cue_info().await;
        assert_eq!(info.current.name, "No selection");
        assert_eq!(info.next.name, "End of list");
        let cues = handle.cue_list().await;
        assert_eq!(cues[0].cue_type, "error");
    }
}
