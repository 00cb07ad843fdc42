// ── Bridge ──
//
// Composition root: owns the device transport, discovery, the workspace
// pool, the session registry, the cue-list repository, performance
// counters, and the two background tasks (device update listener and
// debounced refresher). Every session-facing operation enters here.

use std::sync::{Arc, Mutex, PoisonError};

use cuelink_api::{
    DeviceAddress, DeviceUpdate, Discovery, ProtocolClient, TcpTransport, Transport, UpdateKind,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::cache::CueListRepository;
use crate::command::{Command, CommandResult};
use crate::config::BridgeConfig;
use crate::dispatch::UpdateDispatcher;
use crate::error::CoreError;
use crate::metrics::PerformanceCounters;
use crate::model::{Cue, CueInfo, Instance, PerformanceSnapshot, SessionEvent, Workspace};
use crate::pool::WorkspacePool;
use crate::session::{Admission, SessionRegistry, SessionSnapshot};
use crate::workspace::WorkspaceHandle;

/// The main entry point for consumers.
///
/// Cheaply cloneable. Background tasks run until [`shutdown`](Self::shutdown).
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    config: BridgeConfig,
    transport: Arc<dyn Transport>,
    discovery: Discovery,
    probe: ProtocolClient,
    pool: Arc<WorkspacePool>,
    sessions: Arc<SessionRegistry>,
    cue_lists: Arc<CueListRepository>,
    counters: Arc<PerformanceCounters>,
    dispatcher: UpdateDispatcher,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Bridge {
    /// Resolve the device (configured address, else first discovered
    /// instance) and start a bridge on a TCP transport to it. The
    /// connection itself opens lazily on first use.
    pub async fn start(config: BridgeConfig) -> Self {
        let discovery = Discovery::new(config.discovery.clone());
        let address = resolve_device(&config, &discovery).await;
        info!(device = %address, "using device");
        let transport = Arc::new(TcpTransport::new(address, config.transport_config()));
        Self::with_parts(config, transport, discovery)
    }

    /// Start a bridge on an existing transport.
    pub fn with_transport(config: BridgeConfig, transport: Arc<dyn Transport>) -> Self {
        let discovery = Discovery::new(config.discovery.clone());
        Self::with_parts(config, transport, discovery)
    }

    /// Assemble from parts and spawn background tasks. Must be called
    /// inside a tokio runtime.
    pub fn with_parts(
        config: BridgeConfig,
        transport: Arc<dyn Transport>,
        discovery: Discovery,
    ) -> Self {
        let timings = config.timings.clone();
        let cancel = CancellationToken::new();
        let counters = Arc::new(PerformanceCounters::default());
        let cue_lists = Arc::new(CueListRepository::new(
            timings.cue_list_ttl,
            timings.stale_ceiling,
        ));
        let sessions = Arc::new(SessionRegistry::new());
        let pool = Arc::new(WorkspacePool::new(
            Arc::clone(&transport),
            config.client_config(),
            timings.clone(),
            Arc::clone(&cue_lists),
            Arc::clone(&counters),
        ));

        let (dispatcher, refresher) = UpdateDispatcher::spawn(
            timings.refresh_quiet,
            cancel.clone(),
            Arc::clone(&sessions),
            Arc::clone(&pool),
            Arc::clone(&counters),
        );
        let listener = tokio::spawn(update_listener(
            transport.subscribe(),
            Arc::clone(&pool),
            Arc::clone(&cue_lists),
            dispatcher.clone(),
            cancel.clone(),
        ));

        let probe = ProtocolClient::new(Arc::clone(&transport), config.client_config());

        Self {
            inner: Arc::new(BridgeInner {
                config,
                transport,
                discovery,
                probe,
                pool,
                sessions,
                cue_lists,
                counters,
                dispatcher,
                cancel,
                tasks: Mutex::new(vec![refresher, listener]),
            }),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn pool(&self) -> &Arc<WorkspacePool> {
        &self.inner.pool
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.inner.sessions
    }

    // ── Session lifecycle ────────────────────────────────────────────

    /// Admit a session. A known id inside its grace period is resumed
    /// with its attachment intact; anything else starts a new session.
    pub async fn connect_session(
        &self,
        requested_id: Option<&str>,
        sink: mpsc::Sender<SessionEvent>,
    ) -> (String, Admission) {
        let session_id = requested_id
            .filter(|id| !id.is_empty())
            .map_or_else(|| Uuid::new_v4().to_string(), str::to_owned);

        let admission = self.inner.sessions.connect(&session_id, sink);
        let workspace_id = match &admission {
            Admission::Resumed { workspace_id } => workspace_id.clone(),
            Admission::New => None,
        };
        self.inner.sessions.send(
            &session_id,
            SessionEvent::Connected {
                session_id: session_id.clone(),
                resumed: matches!(admission, Admission::Resumed { .. }),
                workspace_id: workspace_id.clone(),
            },
        );

        if let Some(handle) = workspace_id.and_then(|ws| self.inner.pool.get(&ws)) {
            let cues = handle.cue_list().await;
            self.inner
                .sessions
                .send(&session_id, SessionEvent::CueList { cues });
            self.inner.dispatcher.trigger();
        }

        (session_id, admission)
    }

    /// Start the session's grace period. If it does not reconnect in
    /// time it is detached and forgotten.
    pub fn disconnect_session(&self, session_id: &str) {
        let Some(cancel) = self.inner.sessions.begin_grace(session_id) else {
            return;
        };
        let grace = self.inner.config.timings.session_grace;
        let bridge = self.clone();
        let session_id = session_id.to_owned();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => trace!(session = %session_id, "grace timer cancelled"),
                () = tokio::time::sleep(grace) => bridge.expire_session(&session_id).await,
            }
        });
    }

    async fn expire_session(&self, session_id: &str) {
        let Some(workspace) = self.inner.sessions.expire(session_id) else {
            return;
        };
        if let Some(workspace_id) = workspace {
            self.inner.pool.detach(&workspace_id, session_id).await;
        }
        self.inner.sessions.remove_expired(session_id);
    }

    pub fn session(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.inner.sessions.snapshot(session_id)
    }

    // ── Workspace attachment ─────────────────────────────────────────

    /// Attach a session to a workspace, detaching it from any other first.
    pub async fn attach(&self, session_id: &str, workspace_id: &str) -> Result<(), CoreError> {
        let sessions = &self.inner.sessions;
        let pool = &self.inner.pool;
        sessions.touch(session_id);

        let previous = sessions.workspace_of(session_id)?;
        if previous.as_deref() == Some(workspace_id) {
            if let Some(handle) = pool.get(workspace_id) {
                self.push_cue_list(session_id, &handle).await;
                self.inner.dispatcher.trigger();
                return Ok(());
            }
        }
        if let Some(previous) = previous {
            sessions.set_workspace(session_id, None)?;
            pool.detach(&previous, session_id).await;
        }

        let handle = pool.attach(workspace_id, session_id).await?;
        if let Err(e) = sessions.set_workspace(session_id, Some(workspace_id.to_owned())) {
            // Session vanished while the workspace was activating.
            pool.detach(workspace_id, session_id).await;
            return Err(e);
        }
        info!(session = session_id, workspace = workspace_id, "session attached");

        sessions.send(
            session_id,
            SessionEvent::Connected {
                session_id: session_id.to_owned(),
                resumed: false,
                workspace_id: Some(workspace_id.to_owned()),
            },
        );
        self.push_cue_list(session_id, &handle).await;
        self.inner.dispatcher.trigger();
        Ok(())
    }

    pub async fn detach(&self, session_id: &str) -> Result<(), CoreError> {
        if let Some(workspace_id) = self.inner.sessions.set_workspace(session_id, None)? {
            self.inner.pool.detach(&workspace_id, session_id).await;
            info!(session = session_id, workspace = %workspace_id, "session detached");
        }
        Ok(())
    }

    async fn push_cue_list(&self, session_id: &str, handle: &WorkspaceHandle) {
        let cues = handle.cue_list().await;
        self.inner
            .sessions
            .send(session_id, SessionEvent::CueList { cues });
    }

    fn handle_for(&self, session_id: &str) -> Result<Arc<WorkspaceHandle>, CoreError> {
        let workspace_id = self
            .inner
            .sessions
            .workspace_of(session_id)?
            .ok_or(CoreError::NotConnected)?;
        self.inner
            .pool
            .get(&workspace_id)
            .ok_or(CoreError::NotConnected)
    }

    // ── Commands & queries ───────────────────────────────────────────

    /// Run a command on the session's workspace. Never fails outright:
    /// problems come back as an unsuccessful result.
    pub async fn execute(&self, session_id: &str, command: Command) -> CommandResult {
        self.inner.sessions.touch(session_id);
        let handle = match self.handle_for(session_id) {
            Ok(handle) => handle,
            Err(e) => {
                debug!(session = session_id, %command, error = %e, "command refused");
                return CommandResult::failure(e.to_string());
            }
        };
        let result = handle.execute(&command).await;
        // Refresh either way: state or counters changed.
        self.inner.dispatcher.trigger();
        result.into()
    }

    pub async fn cue_info(&self, session_id: &str) -> Result<CueInfo, CoreError> {
        let handle = self.handle_for(session_id)?;
        let info = handle.cue_info().await;
        self.inner.sessions.record_cue_info(session_id, &info);
        Ok(info)
    }

    pub async fn cue_list(&self, session_id: &str) -> Result<Arc<Vec<Cue>>, CoreError> {
        let handle = self.handle_for(session_id)?;
        Ok(handle.cue_list().await)
    }

    /// Workspaces open on the device; never empty.
    pub async fn list_workspaces(&self) -> Vec<Workspace> {
        self.inner.probe.list_workspaces().await
    }

    pub async fn instances(&self) -> Vec<Instance> {
        self.inner.discovery.discover().await
    }

    pub async fn rescan(&self) -> Vec<Instance> {
        self.inner.discovery.rescan().await
    }

    pub fn performance(&self) -> PerformanceSnapshot {
        self.inner.counters.snapshot()
    }

    pub fn clear_performance(&self) {
        self.inner.counters.clear();
        self.inner.dispatcher.trigger();
    }

    /// Request a coalesced refresh of every session.
    pub fn refresh(&self) {
        self.inner.dispatcher.trigger();
    }

    // ── Shutdown ─────────────────────────────────────────────────────

    /// Stop background tasks, release every workspace, forget every
    /// session, and close the device connection. Idempotent.
    pub async fn shutdown(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        info!("bridge shutting down");
        self.inner.cancel.cancel();

        let sessions = self.inner.sessions.drain();
        self.inner.pool.clear().await;
        self.inner.cue_lists.clear();
        self.inner.transport.close();

        let tasks: Vec<_> = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            let _ = task.await;
        }
        info!(sessions = sessions.len(), "bridge stopped");
    }
}

async fn resolve_device(config: &BridgeConfig, discovery: &Discovery) -> DeviceAddress {
    if let Some(address) = &config.device {
        return address.clone();
    }
    if !config.discovery_enabled {
        return config.discovery.fallback.clone();
    }
    discovery
        .discover()
        .await
        .first()
        .map_or_else(|| config.discovery.fallback.clone(), Instance::device_address)
}

/// Turn device updates into cache invalidations and refresh triggers.
async fn update_listener(
    mut updates: broadcast::Receiver<DeviceUpdate>,
    pool: Arc<WorkspacePool>,
    cue_lists: Arc<CueListRepository>,
    dispatcher: UpdateDispatcher,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            r = updates.recv() => r,
        };
        match received {
            Ok(update) => {
                trace!(address = %update.address, kind = ?update.kind, "device update");
                let workspace = update
                    .workspace_id
                    .as_deref()
                    .filter(|ws| pool.get(ws).is_some());
                pool.invalidate_cue_info(workspace);
                if update.kind == UpdateKind::CueList {
                    match workspace {
                        Some(ws) => cue_lists.invalidate(ws),
                        None => cue_lists.invalidate_all(),
                    }
                }
                dispatcher.trigger();
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "update listener lagged, invalidating all caches");
                pool.invalidate_cue_info(None);
                cue_lists.invalidate_all();
                dispatcher.trigger();
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("update listener exiting");
}
