// ── Session registry ──
//
// Tracks every viewer session: its attached workspace, last pushed cue
// snapshot, and lifecycle state. Sessions move Connected → GracePeriod on
// disconnect and back on reconnect; a grace period that runs out moves
// the session to Expired, after which the bridge detaches and removes it.
// The grace timer itself belongs to the bridge; the registry only holds
// the token that cancels it.

use std::sync::Arc;
use std::time::Duration;

use cuelink_api::CueSummary;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use strum::Display;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::model::{CueInfo, SessionEvent};

/// Observable lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum SessionState {
    Connected,
    GracePeriod,
    Expired,
}

enum Phase {
    Connected,
    GracePeriod {
        cancel: CancellationToken,
        since: Instant,
    },
    Expired,
}

impl Phase {
    fn state(&self) -> SessionState {
        match self {
            Self::Connected => SessionState::Connected,
            Self::GracePeriod { .. } => SessionState::GracePeriod,
            Self::Expired => SessionState::Expired,
        }
    }
}

struct Session {
    workspace_id: Option<String>,
    last_selected: Option<Arc<CueSummary>>,
    last_next: Option<Arc<CueSummary>>,
    last_activity: Instant,
    phase: Phase,
    sink: Option<mpsc::Sender<SessionEvent>>,
}

impl Session {
    fn new(sink: mpsc::Sender<SessionEvent>) -> Self {
        Self {
            workspace_id: None,
            last_selected: None,
            last_next: None,
            last_activity: Instant::now(),
            phase: Phase::Connected,
            sink: Some(sink),
        }
    }
}

/// Point-in-time copy of one session's record.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub workspace_id: Option<String>,
    pub last_selected: Option<Arc<CueSummary>>,
    pub last_next: Option<Arc<CueSummary>>,
    pub state: SessionState,
    pub idle: Duration,
    /// Time spent disconnected, while in the grace period.
    pub disconnected_for: Option<Duration>,
}

/// How a connecting session was admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    New,
    Resumed { workspace_id: Option<String> },
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a session, resuming it if it is still known.
    ///
    /// Resuming a session in its grace period cancels the expiry timer.
    pub fn connect(&self, session_id: &str, sink: mpsc::Sender<SessionEvent>) -> Admission {
        match self.sessions.entry(session_id.to_owned()) {
            Entry::Occupied(mut occupied) => {
                let session = occupied.get_mut();
                if matches!(session.phase, Phase::Expired) {
                    occupied.insert(Session::new(sink));
                    info!(session = session_id, "session started");
                    return Admission::New;
                }
                if let Phase::GracePeriod { cancel, since } = &session.phase {
                    cancel.cancel();
                    info!(
                        session = session_id,
                        away_ms = u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX),
                        "session resumed"
                    );
                } else {
                    debug!(session = session_id, "session taken over by a new connection");
                }
                session.phase = Phase::Connected;
                session.sink = Some(sink);
                session.last_activity = Instant::now();
                Admission::Resumed {
                    workspace_id: session.workspace_id.clone(),
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Session::new(sink));
                info!(session = session_id, "session started");
                Admission::New
            }
        }
    }

    /// Move a connected session into its grace period. Returns the token
    /// that cancels the expiry timer, or `None` if the session is not
    /// connected.
    pub fn begin_grace(&self, session_id: &str) -> Option<CancellationToken> {
        let mut session = self.sessions.get_mut(session_id)?;
        if !matches!(session.phase, Phase::Connected) {
            return None;
        }
        let cancel = CancellationToken::new();
        session.phase = Phase::GracePeriod {
            cancel: cancel.clone(),
            since: Instant::now(),
        };
        session.sink = None;
        debug!(session = session_id, "session disconnected, grace period started");
        Some(cancel)
    }

    /// End a grace period that ran out. Returns the workspace the session
    /// was attached to, or `None` if the session is no longer waiting.
    pub fn expire(&self, session_id: &str) -> Option<Option<String>> {
        let mut session = self.sessions.get_mut(session_id)?;
        if !matches!(session.phase, Phase::GracePeriod { .. }) {
            return None;
        }
        session.phase = Phase::Expired;
        session.sink = None;
        info!(session = session_id, "session expired");
        Some(session.workspace_id.clone())
    }

    /// Forget an expired session.
    pub fn remove_expired(&self, session_id: &str) -> bool {
        self.sessions
            .remove_if(session_id, |_, s| matches!(s.phase, Phase::Expired))
            .is_some()
    }

    pub fn state(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.get(session_id).map(|s| s.phase.state())
    }

    /// Whether `sink` is the session's current connection. A session taken
    /// over by a newer connection no longer belongs to the old one.
    pub fn is_bound_to(&self, session_id: &str, sink: &mpsc::Sender<SessionEvent>) -> bool {
        self.sessions.get(session_id).is_some_and(|s| {
            s.sink
                .as_ref()
                .is_some_and(|own| own.same_channel(sink))
        })
    }

    pub fn workspace_of(&self, session_id: &str) -> Result<Option<String>, CoreError> {
        self.sessions
            .get(session_id)
            .map(|s| s.workspace_id.clone())
            .ok_or_else(|| not_found(session_id))
    }

    /// Record the session's attachment. Returns the previous workspace.
    pub fn set_workspace(
        &self,
        session_id: &str,
        workspace_id: Option<String>,
    ) -> Result<Option<String>, CoreError> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| not_found(session_id))?;
        session.last_selected = None;
        session.last_next = None;
        session.last_activity = Instant::now();
        Ok(std::mem::replace(&mut session.workspace_id, workspace_id))
    }

    pub fn touch(&self, session_id: &str) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.last_activity = Instant::now();
        }
    }

    pub fn record_cue_info(&self, session_id: &str, info: &CueInfo) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.last_selected = Some(Arc::clone(&info.current));
            session.last_next = Some(Arc::clone(&info.next));
        }
    }

    pub fn snapshot(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.sessions.get(session_id).map(|s| SessionSnapshot {
            session_id: session_id.to_owned(),
            workspace_id: s.workspace_id.clone(),
            last_selected: s.last_selected.clone(),
            last_next: s.last_next.clone(),
            state: s.phase.state(),
            idle: s.last_activity.elapsed(),
            disconnected_for: match &s.phase {
                Phase::GracePeriod { since, .. } => Some(since.elapsed()),
                Phase::Connected | Phase::Expired => None,
            },
        })
    }

    /// Queue an event for one connected session. A full or closed sink
    /// drops the event.
    pub fn send(&self, session_id: &str, event: SessionEvent) -> bool {
        let Some(sink) = self
            .sessions
            .get(session_id)
            .and_then(|s| s.sink.clone())
        else {
            return false;
        };
        deliver(session_id, &sink, event)
    }

    /// Queue an event for every connected session. Returns how many
    /// accepted it.
    pub fn broadcast(&self, event: &SessionEvent) -> usize {
        let sinks: Vec<(String, mpsc::Sender<SessionEvent>)> = self
            .sessions
            .iter()
            .filter_map(|s| s.sink.clone().map(|sink| (s.key().clone(), sink)))
            .collect();
        sinks
            .iter()
            .filter(|(id, sink)| deliver(id, sink, event.clone()))
            .count()
    }

    /// Connected sessions that have a workspace, as `(session, workspace)`.
    pub fn refresh_targets(&self) -> Vec<(String, String)> {
        self.sessions
            .iter()
            .filter(|s| matches!(s.phase, Phase::Connected))
            .filter_map(|s| s.workspace_id.clone().map(|ws| (s.key().clone(), ws)))
            .collect()
    }

    /// Remove every session, cancelling grace timers. Returns each removed
    /// session with its workspace.
    pub fn drain(&self) -> Vec<(String, Option<String>)> {
        let ids: Vec<String> = self.sessions.iter().map(|s| s.key().clone()).collect();
        ids.into_iter()
            .filter_map(|id| self.sessions.remove(&id))
            .map(|(id, session)| {
                if let Phase::GracePeriod { cancel, .. } = &session.phase {
                    cancel.cancel();
                }
                (id, session.workspace_id)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

fn deliver(session_id: &str, sink: &mpsc::Sender<SessionEvent>, event: SessionEvent) -> bool {
    let name = event.name();
    match sink.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(session = session_id, event = name, "session backlog full, dropping event");
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!(session = session_id, event = name, "session sink closed");
            false
        }
    }
}

fn not_found(session_id: &str) -> CoreError {
    CoreError::SessionNotFound {
        session_id: session_id.to_owned(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::PerformanceSnapshot;
    use pretty_assertions::assert_eq;

    fn sink() -> (mpsc::Sender<SessionEvent>, mpsc::Receiver<SessionEvent>) {
        mpsc::channel(8)
    }

    fn perf() -> SessionEvent {
        SessionEvent::Performance(PerformanceSnapshot {
            average_latency: 0.0,
            commands_sent: 0,
            error_rate: 0.0,
        })
    }

    #[test]
    fn takeover_rebinds_the_session() {
        let registry = SessionRegistry::new();
        let (first, _rx1) = sink();
        registry.connect("s1", first.clone());
        assert!(registry.is_bound_to("s1", &first));

        let (second, _rx2) = sink();
        registry.connect("s1", second.clone());
        assert!(!registry.is_bound_to("s1", &first));
        assert!(registry.is_bound_to("s1", &second));
        assert!(!registry.is_bound_to("nobody", &second));
    }

    #[test]
    fn grace_then_resume_cancels_timer() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = sink();
        assert_eq!(registry.connect("s1", tx), Admission::New);
        registry.set_workspace("s1", Some("W1".into())).unwrap();

        let cancel = registry.begin_grace("s1").unwrap();
        assert_eq!(registry.state("s1"), Some(SessionState::GracePeriod));
        assert!(registry.begin_grace("s1").is_none());

        let (tx, _rx) = sink();
        assert_eq!(
            registry.connect("s1", tx),
            Admission::Resumed {
                workspace_id: Some("W1".into())
            }
        );
        assert!(cancel.is_cancelled());
        assert_eq!(registry.state("s1"), Some(SessionState::Connected));
        assert!(registry.expire("s1").is_none());
    }

    #[test]
    fn expiry_hands_back_workspace_then_removes() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = sink();
        registry.connect("s1", tx);
        registry.set_workspace("s1", Some("W1".into())).unwrap();
        registry.begin_grace("s1").unwrap();

        assert_eq!(registry.expire("s1"), Some(Some("W1".into())));
        assert_eq!(registry.state("s1"), Some(SessionState::Expired));
        assert!(registry.remove_expired("s1"));
        assert!(registry.state("s1").is_none());
    }

    #[test]
    fn reconnect_after_expiry_starts_fresh() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = sink();
        registry.connect("s1", tx);
        registry.set_workspace("s1", Some("W1".into())).unwrap();
        registry.begin_grace("s1").unwrap();
        registry.expire("s1");

        let (tx, _rx) = sink();
        assert_eq!(registry.connect("s1", tx), Admission::New);
        assert_eq!(registry.workspace_of("s1").unwrap(), None);
    }

    #[test]
    fn events_reach_only_connected_sessions() {
        let registry = SessionRegistry::new();
        let (tx1, mut rx1) = sink();
        let (tx2, mut rx2) = sink();
        registry.connect("s1", tx1);
        registry.connect("s2", tx2);
        registry.begin_grace("s2");

        assert_eq!(registry.broadcast(&perf()), 1);
        assert!(!registry.send("s2", perf()));
        assert_eq!(rx1.try_recv().unwrap().name(), "performance");
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn unknown_session_is_an_error() {
        let registry = SessionRegistry::new();
        assert!(matches!(
            registry.set_workspace("ghost", None),
            Err(CoreError::SessionNotFound { .. })
        ));
    }

    #[test]
    fn refresh_targets_skip_unattached_and_waiting_sessions() {
        let registry = SessionRegistry::new();
        for id in ["a", "b", "c"] {
            let (tx, _rx) = sink();
            registry.connect(id, tx);
        }
        registry.set_workspace("a", Some("W1".into())).unwrap();
        registry.set_workspace("c", Some("W1".into())).unwrap();
        registry.begin_grace("c");

        assert_eq!(
            registry.refresh_targets(),
            vec![("a".to_owned(), "W1".to_owned())]
        );

        let drained = registry.drain();
        assert_eq!(drained.len(), 3);
        assert!(registry.is_empty());
    }
}
