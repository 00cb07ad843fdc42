// ── Protocol client ──
//
// Domain operations (playback, selection, cue queries, workspace
// activation) encoded as OSC messages over a shared `Transport`. The
// client keeps only two bits of state: the active workspace scope and the
// last selection request used for duplicate suppression. Neither lock is
// ever held across an await point.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rosc::OscType;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::message::{self, KEEP_ALIVE};
use crate::transport::Transport;
use crate::types::{self, CUE_VALUE_KEYS, Cue, CueSummary, Workspace};

/// Tuning for a [`ProtocolClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Identical selections inside this window are not re-sent. Default: 500ms.
    pub select_debounce: Duration,
    /// Container whose children are listed when the catalog comes back empty.
    pub fallback_container: String,
    /// Passcode sent with `connect` for protected workspaces.
    pub passcode: Option<SecretString>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            select_debounce: Duration::from_millis(500),
            fallback_container: "1".into(),
            passcode: None,
        }
    }
}

/// Workspace-scoped operations over a shared transport.
pub struct ProtocolClient {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    workspace: Mutex<Option<String>>,
    last_selection: Mutex<Option<(String, Instant)>>,
}

impl ProtocolClient {
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self {
            transport,
            config,
            workspace: Mutex::new(None),
            last_selection: Mutex::new(None),
        }
    }

    /// The active workspace id, if one has been activated.
    pub fn workspace_id(&self) -> Option<String> {
        self.workspace
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn scoped(&self, path: &str) -> String {
        match self.workspace_id() {
            Some(id) => format!("/workspace/{id}{path}"),
            None => path.to_owned(),
        }
    }

    // ── Connectivity ─────────────────────────────────────────────────

    /// Lightweight probe; `false` on any send failure.
    pub async fn is_reachable(&self) -> bool {
        match self.transport.notify(message::bare(KEEP_ALIVE)).await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "device not reachable");
                false
            }
        }
    }

    /// List workspaces open on the device.
    ///
    /// Never empty: failures and empty listings yield the synthetic
    /// default workspace.
    pub async fn list_workspaces(&self) -> Vec<Workspace> {
        match self.transport.request(message::bare("/workspaces")).await {
            Ok(data) => {
                let workspaces = types::parse_workspaces(&data);
                if workspaces.is_empty() {
                    debug!("device listed no workspaces, offering default");
                    vec![Workspace::default_workspace()]
                } else {
                    workspaces
                }
            }
            Err(e) => {
                warn!(error = %e, "workspace listing failed, offering default");
                vec![Workspace::default_workspace()]
            }
        }
    }

    /// Connect to a workspace, enable update delivery, and fetch its
    /// catalog. An empty id selects unscoped operation.
    ///
    /// The three round-trips run in order; any failure aborts the whole
    /// activation and leaves the previous scope untouched.
    pub async fn set_active_workspace(&self, workspace_id: &str) -> Result<(), Error> {
        if workspace_id.is_empty() {
            *self.workspace.lock().unwrap_or_else(PoisonError::into_inner) = None;
            return Ok(());
        }

        let base = format!("/workspace/{workspace_id}");

        let connect_args = self
            .config
            .passcode
            .as_ref()
            .map(|p| vec![OscType::String(p.expose_secret().to_owned())])
            .unwrap_or_default();
        let connect_address = format!("{base}/connect");
        let reply = self
            .transport
            .request(message::with_args(connect_address.as_str(), connect_args))
            .await
            .inspect_err(|e| warn!(workspace = workspace_id, error = %e, "connect failed"))?;
        if reply.as_str() == Some("badpass") {
            warn!(workspace = workspace_id, "workspace rejected passcode");
            return Err(Error::Protocol {
                address: connect_address,
                status: "badpass".into(),
                message: None,
            });
        }

        self.transport
            .request(message::with_args(
                format!("{base}/updates"),
                vec![OscType::Int(1)],
            ))
            .await
            .inspect_err(|e| warn!(workspace = workspace_id, error = %e, "enabling updates failed"))?;

        self.transport
            .request(message::bare(format!("{base}/cueLists")))
            .await
            .inspect_err(|e| warn!(workspace = workspace_id, error = %e, "catalog fetch failed"))?;

        *self.workspace.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(workspace_id.to_owned());
        info!(workspace = workspace_id, "workspace active");
        Ok(())
    }

    /// Tell the device this client is done with its workspace.
    pub async fn release(&self) {
        let Some(id) = self
            .workspace
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };
        if let Err(e) = self
            .transport
            .notify(message::bare(format!("/workspace/{id}/disconnect")))
            .await
        {
            debug!(workspace = %id, error = %e, "disconnect not delivered");
        }
    }

    // ── Playback ─────────────────────────────────────────────────────

    async fn command(&self, path: &str) -> Result<(), Error> {
        self.transport
            .notify(message::bare(self.scoped(path)))
            .await
    }

    pub async fn go(&self) -> Result<(), Error> {
        self.command("/go").await
    }

    pub async fn stop(&self) -> Result<(), Error> {
        self.command("/stop").await
    }

    pub async fn panic(&self) -> Result<(), Error> {
        self.command("/panic").await
    }

    pub async fn reset(&self) -> Result<(), Error> {
        self.command("/reset").await
    }

    pub async fn next(&self) -> Result<(), Error> {
        self.command("/playhead/next").await
    }

    pub async fn previous(&self) -> Result<(), Error> {
        self.command("/playhead/previous").await
    }

    /// Select a cue by id. Repeats of the same id inside the debounce
    /// window succeed without touching the wire.
    pub async fn select_cue(&self, cue_id: &str) -> Result<(), Error> {
        {
            let mut last = self
                .last_selection
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            if let Some((id, at)) = last.as_ref() {
                if id == cue_id && now.duration_since(*at) < self.config.select_debounce {
                    debug!(cue = cue_id, "duplicate selection suppressed");
                    return Ok(());
                }
            }
            *last = Some((cue_id.to_owned(), now));
        }

        let result = self.command(&format!("/select_id/{cue_id}")).await;
        if result.is_err() {
            // Let an immediate retry through.
            *self
                .last_selection
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = None;
        }
        result
    }

    // ── Queries ──────────────────────────────────────────────────────

    async fn cue_values(&self, selector: &str) -> Result<CueSummary, Error> {
        let keys = Value::from(CUE_VALUE_KEYS.to_vec()).to_string();
        let data = self
            .transport
            .request(message::with_args(
                self.scoped(&format!("/cue/{selector}/valuesForKeys")),
                vec![OscType::String(keys)],
            ))
            .await?;
        Ok(types::parse_cue_values(&data).unwrap_or_else(CueSummary::no_selection))
    }

    /// The currently selected cue, or a placeholder.
    pub async fn selected_cue(&self) -> Result<CueSummary, Error> {
        self.cue_values("selected").await
    }

    /// The currently running cue, or a placeholder.
    pub async fn active_cue(&self) -> Result<CueSummary, Error> {
        self.cue_values("active").await
    }

    /// The sibling following the selected cue, or `End of list`.
    pub async fn next_cue(&self) -> Result<CueSummary, Error> {
        let selected = self.selected_cue().await?;
        if selected.is_placeholder() {
            return Ok(CueSummary::end_of_list());
        }
        let cues = self.cue_list().await?;
        Ok(types::next_sibling(&cues, &selected.id)
            .map_or_else(CueSummary::end_of_list, Cue::summary))
    }

    /// Fetch and flatten the catalog, falling back to the main
    /// container's children when the catalog is empty.
    pub async fn cue_list(&self) -> Result<Vec<Cue>, Error> {
        let data = self
            .transport
            .request(message::bare(self.scoped("/cueLists")))
            .await?;
        let cues = types::flatten_cues(&data);
        if !cues.is_empty() {
            return Ok(cues);
        }

        debug!(
            container = %self.config.fallback_container,
            "empty catalog, listing container children"
        );
        let children = self
            .transport
            .request(message::bare(self.scoped(&format!(
                "/cue/{}/children",
                self.config.fallback_container
            ))))
            .await?;
        Ok(types::flatten_cues(&children))
    }

    /// Flattened cue list; an outright failure becomes one placeholder entry.
    pub async fn all_cues(&self) -> Vec<Cue> {
        match self.cue_list().await {
            Ok(cues) => cues,
            Err(e) => {
                warn!(error = %e, "cue list unavailable");
                vec![Cue::error_placeholder(&e.to_string())]
            }
        }
    }
}
