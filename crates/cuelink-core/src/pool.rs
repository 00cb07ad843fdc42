// ── Workspace pool ──
//
// One activated client per workspace id, shared by every session attached
// to it. An entry is created by the first attach (probe + activation) and
// released when its last session detaches. Attach and detach of one
// workspace id are serialized by that id's gate, so activation happens
// once per workspace while other workspaces proceed. Lookups only touch
// the entry map and never wait on the device.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cuelink_api::{ClientConfig, ProtocolClient, Transport};
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::cache::{CueInfoCache, CueListRepository};
use crate::config::Timings;
use crate::error::CoreError;
use crate::metrics::PerformanceCounters;
use crate::workspace::WorkspaceHandle;

struct PoolEntry {
    handle: Arc<WorkspaceHandle>,
    sessions: HashSet<String>,
}

pub struct WorkspacePool {
    transport: Arc<dyn Transport>,
    client_config: ClientConfig,
    timings: Timings,
    cue_lists: Arc<CueListRepository>,
    counters: Arc<PerformanceCounters>,
    entries: Mutex<HashMap<String, PoolEntry>>,
    gates: Mutex<HashMap<String, Gate>>,
}

type Gate = Arc<tokio::sync::Mutex<()>>;

impl WorkspacePool {
    pub fn new(
        transport: Arc<dyn Transport>,
        client_config: ClientConfig,
        timings: Timings,
        cue_lists: Arc<CueListRepository>,
        counters: Arc<PerformanceCounters>,
    ) -> Self {
        Self {
            transport,
            client_config,
            timings,
            cue_lists,
            counters,
            entries: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, PoolEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The lock serializing admission changes for one workspace id.
    fn gate(&self, workspace_id: &str) -> Gate {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(gates.entry(workspace_id.to_owned()).or_default())
    }

    /// Attach `session_id` to `workspace_id`, activating the workspace on
    /// the device if this is its first session.
    pub async fn attach(
        &self,
        workspace_id: &str,
        session_id: &str,
    ) -> Result<Arc<WorkspaceHandle>, CoreError> {
        let gate = self.gate(workspace_id);
        let _admission = gate.lock().await;

        let pooled = self.entries().get_mut(workspace_id).map(|entry| {
            entry.sessions.insert(session_id.to_owned());
            (Arc::clone(&entry.handle), entry.sessions.len())
        });
        if let Some((handle, ref_count)) = pooled {
            debug!(
                workspace = workspace_id,
                session = session_id,
                ref_count,
                "joined pooled workspace"
            );
            return Ok(handle);
        }

        let client = ProtocolClient::new(Arc::clone(&self.transport), self.client_config.clone());
        if !client.is_reachable().await {
            return Err(CoreError::WorkspaceUnavailable {
                workspace_id: workspace_id.to_owned(),
                reason: "device not reachable".into(),
            });
        }
        client
            .set_active_workspace(workspace_id)
            .await
            .map_err(|e| CoreError::WorkspaceUnavailable {
                workspace_id: workspace_id.to_owned(),
                reason: e.to_string(),
            })?;

        let handle = Arc::new(WorkspaceHandle::new(
            workspace_id.to_owned(),
            client,
            CueInfoCache::new(self.timings.cue_info_ttl, self.timings.stale_ceiling),
            Arc::clone(&self.cue_lists),
            Arc::clone(&self.counters),
        ));
        self.entries().insert(
            workspace_id.to_owned(),
            PoolEntry {
                handle: Arc::clone(&handle),
                sessions: HashSet::from([session_id.to_owned()]),
            },
        );
        info!(workspace = workspace_id, session = session_id, "workspace pooled");
        Ok(handle)
    }

    /// Remove `session_id` from `workspace_id`. Returns `true` when this
    /// was the last session and the entry was released.
    pub async fn detach(&self, workspace_id: &str, session_id: &str) -> bool {
        let gate = self.gate(workspace_id);
        let _admission = gate.lock().await;

        let released = {
            let mut entries = self.entries();
            let Some(entry) = entries.get_mut(workspace_id) else {
                debug!(workspace = workspace_id, "detach from unknown workspace");
                return false;
            };
            if !entry.sessions.remove(session_id) {
                warn!(
                    workspace = workspace_id,
                    session = session_id,
                    "session was not attached"
                );
            }
            if entry.sessions.is_empty() {
                entries.remove(workspace_id).map(|e| e.handle)
            } else {
                None
            }
        };

        match released {
            Some(handle) => {
                handle.release().await;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, workspace_id: &str) -> Option<Arc<WorkspaceHandle>> {
        self.entries()
            .get(workspace_id)
            .map(|e| Arc::clone(&e.handle))
    }

    /// Number of sessions attached to `workspace_id`.
    pub fn ref_count(&self, workspace_id: &str) -> usize {
        self.entries()
            .get(workspace_id)
            .map_or(0, |e| e.sessions.len())
    }

    pub fn workspace_ids(&self) -> Vec<String> {
        self.entries().keys().cloned().collect()
    }

    /// Drop cached cue info for one workspace, or for all of them.
    pub fn invalidate_cue_info(&self, workspace_id: Option<&str>) {
        let entries = self.entries();
        match workspace_id.and_then(|id| entries.get(id)) {
            Some(entry) => entry.handle.invalidate_cue_info(),
            None => entries
                .values()
                .for_each(|e| e.handle.invalidate_cue_info()),
        }
    }

    /// Release every entry.
    pub async fn clear(&self) {
        let handles: Vec<_> = self.entries().drain().map(|(_, e)| e.handle).collect();
        join_all(handles.iter().map(|handle| handle.release())).await;
    }
}
