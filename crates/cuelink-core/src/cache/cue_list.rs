use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cuelink_api::Cue;
use tracing::debug;

use super::Tier;
use crate::error::CoreError;

/// Flattened cue lists for every workspace, shared by all sessions.
///
/// Owned by the bridge rather than by pool entries, so a list survives a
/// workspace being released and re-attached within its TTL.
#[derive(Debug)]
pub struct CueListRepository {
    tier: Tier<String, Vec<Cue>>,
}

impl CueListRepository {
    pub fn new(ttl: Duration, stale_ceiling: Duration) -> Self {
        Self {
            tier: Tier::new("cue_list", ttl, stale_ceiling),
        }
    }

    /// Cached list for `workspace_id`, fetching on miss. Failures with no
    /// usable fallback produce a single error entry.
    pub async fn get_or_fetch<F, Fut>(&self, workspace_id: &str, fetch: F) -> Arc<Vec<Cue>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Cue>, CoreError>>,
    {
        self.tier
            .read_through(workspace_id.to_owned(), fetch, |e| {
                vec![Cue::error_placeholder(&e.to_string())]
            })
            .await
    }

    pub fn invalidate(&self, workspace_id: &str) {
        debug!(workspace = workspace_id, "cue list invalidated");
        self.tier.invalidate(&workspace_id.to_owned());
    }

    pub fn invalidate_all(&self) {
        self.tier.invalidate_where(|_| true);
    }

    pub fn clear(&self) {
        self.tier.clear();
    }

    pub fn len(&self) -> usize {
        self.tier.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tier.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn lists_are_keyed_by_workspace() {
        let repo = CueListRepository::new(Duration::from_secs(10), Duration::from_secs(10));
        let cue = |id: &str| Cue {
            id: id.into(),
            number: "1".into(),
            display_name: id.into(),
            cue_type: "Audio".into(),
            depth: 0,
            original_index: 0,
        };

        let a = repo.get_or_fetch("W1", || async { Ok(vec![cue("A")]) }).await;
        let b = repo.get_or_fetch("W2", || async { Ok(vec![cue("B")]) }).await;
        assert_eq!(a[0].id, "A");
        assert_eq!(b[0].id, "B");
        assert_eq!(repo.len(), 2);

        let again = repo
            .get_or_fetch("W1", || async { Err(CoreError::NotConnected) })
            .await;
        assert!(Arc::ptr_eq(&a, &again));
    }

    #[tokio::test]
    async fn failure_without_history_is_error_entry() {
        let repo = CueListRepository::new(Duration::from_secs(10), Duration::from_secs(10));
        let list = repo
            .get_or_fetch("W1", || async { Err(CoreError::Timeout { timeout_ms: 10 }) })
            .await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].cue_type, "error");
        assert!(repo.is_empty());
    }
}
