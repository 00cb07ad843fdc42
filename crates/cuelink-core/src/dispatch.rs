// ── Update dispatcher ──
//
// Bursts of change signals (device updates, commands, attaches) collapse
// into one refresh cycle. The debouncer is a single task: the first
// trigger opens a quiet window, every further trigger restarts it, and
// the cycle runs once the window passes without a trigger. Triggers that
// arrive while a cycle runs queue up the next one, so two cycles never
// overlap.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::CoreError;
use crate::metrics::PerformanceCounters;
use crate::model::SessionEvent;
use crate::pool::WorkspacePool;
use crate::session::SessionRegistry;

// ── Debouncer ────────────────────────────────────────────────────────

/// Cheap handle for scheduling a debounced run.
#[derive(Debug, Clone)]
pub struct Debouncer {
    trigger: mpsc::Sender<()>,
}

impl Debouncer {
    /// Spawn the scheduler task. `run` is invoked once per quiet window.
    pub fn spawn<F, Fut>(quiet: Duration, cancel: CancellationToken, run: F) -> (Self, JoinHandle<()>)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        // One slot: a queued trigger already guarantees another cycle.
        let (trigger, rx) = mpsc::channel(1);
        let task = tokio::spawn(schedule(quiet, rx, cancel, run));
        (Self { trigger }, task)
    }

    /// Schedule a run, or push back the pending one.
    pub fn trigger(&self) {
        // Full means a trigger is already pending; closed means shut down.
        let _ = self.trigger.try_send(());
    }
}

async fn schedule<F, Fut>(
    quiet: Duration,
    mut triggers: mpsc::Receiver<()>,
    cancel: CancellationToken,
    mut run: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            t = triggers.recv() => if t.is_none() { return },
        }

        let mut deadline = Instant::now() + quiet;
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                t = triggers.recv() => match t {
                    Some(()) => {
                        trace!("refresh pushed back");
                        deadline = Instant::now() + quiet;
                    }
                    None => return,
                },
                () = tokio::time::sleep_until(deadline) => break,
            }
        }

        run().await;
    }
}

// ── Refresh cycle ────────────────────────────────────────────────────

/// Refresh every connected, attached session and push aggregate
/// performance to everyone.
///
/// Cue info is read once per workspace and fanned out to that
/// workspace's sessions. Workspaces refresh independently; one failing
/// does not stop the others.
pub async fn refresh_sessions(
    registry: &SessionRegistry,
    pool: &WorkspacePool,
    counters: &PerformanceCounters,
) {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (session, workspace) in registry.refresh_targets() {
        groups.entry(workspace).or_default().push(session);
    }
    debug!(workspaces = groups.len(), "refresh cycle");

    let outcomes = join_all(
        groups
            .iter()
            .map(|(workspace, sessions)| refresh_workspace(registry, pool, workspace, sessions)),
    )
    .await;

    for (workspace, outcome) in groups.keys().zip(outcomes) {
        if let Err(e) = outcome {
            warn!(workspace = %workspace, error = %e, "workspace refresh failed");
        }
    }

    registry.broadcast(&SessionEvent::Performance(counters.snapshot()));
}

async fn refresh_workspace(
    registry: &SessionRegistry,
    pool: &WorkspacePool,
    workspace: &str,
    sessions: &[String],
) -> Result<(), CoreError> {
    let handle = pool
        .get(workspace)
        .ok_or_else(|| CoreError::WorkspaceUnavailable {
            workspace_id: workspace.to_owned(),
            reason: "not pooled".into(),
        })?;
    let info = handle.cue_info().await;
    for session in sessions {
        registry.record_cue_info(session, &info);
        if !registry.send(session, SessionEvent::CueInfo(info.clone())) {
            debug!(session = %session, "cue info not delivered");
        }
    }
    Ok(())
}

/// The bridge's debounced refresher.
#[derive(Debug, Clone)]
pub struct UpdateDispatcher {
    debouncer: Debouncer,
}

impl UpdateDispatcher {
    pub fn spawn(
        quiet: Duration,
        cancel: CancellationToken,
        registry: Arc<SessionRegistry>,
        pool: Arc<WorkspacePool>,
        counters: Arc<PerformanceCounters>,
    ) -> (Self, JoinHandle<()>) {
        let (debouncer, task) = Debouncer::spawn(quiet, cancel, move || {
            let registry = Arc::clone(&registry);
            let pool = Arc::clone(&pool);
            let counters = Arc::clone(&counters);
            async move { refresh_sessions(&registry, &pool, &counters).await }
        });
        (Self { debouncer }, task)
    }

    /// Request a coalesced refresh.
    pub fn trigger(&self) {
        self.debouncer.trigger();
    }
}
