use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cuelink_api::CueSummary;

use super::Tier;
use crate::error::CoreError;

/// Which single-cue answer an entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CueSlot {
    Selected,
    Active,
    Next,
}

/// Volatile per-workspace tier for selected/active/next cue answers.
///
/// Wiped on every state-changing command so the next read goes to the
/// device.
#[derive(Debug)]
pub struct CueInfoCache {
    tier: Tier<CueSlot, CueSummary>,
}

impl CueInfoCache {
    pub fn new(ttl: Duration, stale_ceiling: Duration) -> Self {
        Self {
            tier: Tier::new("cue_info", ttl, stale_ceiling),
        }
    }

    pub async fn get_or_fetch<F, Fut>(&self, slot: CueSlot, fetch: F) -> Arc<CueSummary>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CueSummary, CoreError>>,
    {
        let placeholder: fn() -> CueSummary = match slot {
            CueSlot::Next => CueSummary::end_of_list,
            CueSlot::Selected | CueSlot::Active => CueSummary::no_selection,
        };
        self.tier
            .read_through(slot, fetch, |_| placeholder())
            .await
    }

    pub fn invalidate(&self) {
        self.tier.invalidate_where(|_| true);
    }
}
