// ── Response cache ──
//
// Short-lived memoization of device answers, tiered by volatility. Each
// tier is a concurrent map of timestamped entries. Reads inside the TTL
// return the same `Arc`; expired or invalidated entries are refetched,
// and a failed refetch falls back to the old value while it is younger
// than the stale ceiling. Map guards are never held across an await.

mod cue_info;
mod cue_list;

pub use cue_info::{CueInfoCache, CueSlot};
pub use cue_list::CueListRepository;

use std::fmt::{Debug, Display};
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// A cached value with its age and freshness window.
#[derive(Debug)]
pub struct CacheEntry<T> {
    value: Arc<T>,
    updated: Instant,
    ttl: Duration,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, ttl: Duration) -> Self {
        Self {
            value: Arc::new(value),
            updated: Instant::now(),
            ttl,
        }
    }

    /// The shared value handed to readers.
    pub fn shared(&self) -> &Arc<T> {
        &self.value
    }

    pub fn age(&self) -> Duration {
        self.updated.elapsed()
    }

    pub fn is_fresh(&self) -> bool {
        self.age() < self.ttl
    }

    /// Force the next read to refetch while keeping the value as a
    /// stale fallback.
    pub fn expire(&mut self) {
        self.ttl = Duration::ZERO;
    }
}

/// One cache tier keyed by `K`.
#[derive(Debug)]
pub struct Tier<K, T>
where
    K: Eq + Hash,
{
    name: &'static str,
    entries: DashMap<K, CacheEntry<T>>,
    ttl: Duration,
    stale_ceiling: Duration,
}

impl<K, T> Tier<K, T>
where
    K: Eq + Hash + Clone + Debug,
{
    pub fn new(name: &'static str, ttl: Duration, stale_ceiling: Duration) -> Self {
        Self {
            name,
            entries: DashMap::new(),
            ttl,
            stale_ceiling,
        }
    }

    /// The cached value if it is still inside its TTL.
    pub fn fresh(&self, key: &K) -> Option<Arc<T>> {
        self.entries
            .get(key)
            .filter(|e| e.is_fresh())
            .map(|e| Arc::clone(e.shared()))
    }

    /// The cached value if it is younger than the stale ceiling.
    pub fn stale(&self, key: &K) -> Option<Arc<T>> {
        self.entries
            .get(key)
            .filter(|e| e.age() < self.stale_ceiling)
            .map(|e| Arc::clone(e.shared()))
    }

    pub fn store(&self, key: K, value: T) -> Arc<T> {
        let entry = CacheEntry::new(value, self.ttl);
        let value = Arc::clone(entry.shared());
        self.entries.insert(key, entry);
        value
    }

    pub fn invalidate(&self, key: &K) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expire();
        }
    }

    /// Invalidate every entry matching `predicate`.
    pub fn invalidate_where(&self, predicate: impl Fn(&K) -> bool) {
        for mut entry in self.entries.iter_mut() {
            if predicate(entry.key()) {
                entry.value_mut().expire();
            }
        }
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serve from cache, else fetch and store.
    ///
    /// A failed fetch serves the stale value under the ceiling, otherwise
    /// `placeholder(&error)`. Placeholders are never stored.
    pub async fn read_through<F, Fut, E>(
        &self,
        key: K,
        fetch: F,
        placeholder: impl FnOnce(&E) -> T,
    ) -> Arc<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        if let Some(value) = self.fresh(&key) {
            trace!(tier = self.name, key = ?key, "cache hit");
            return value;
        }

        match fetch().await {
            Ok(value) => {
                debug!(tier = self.name, key = ?key, "cache refreshed");
                self.store(key, value)
            }
            Err(e) => {
                if let Some(value) = self.stale(&key) {
                    warn!(tier = self.name, key = ?key, error = %e, "serving stale value");
                    value
                } else {
                    warn!(tier = self.name, key = ?key, error = %e, "no usable cached value");
                    Arc::new(placeholder(&e))
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tier() -> Tier<&'static str, String> {
        Tier::new("test", Duration::from_secs(1), Duration::from_secs(10))
    }

    async fn read(tier: &Tier<&'static str, String>, fetches: &AtomicUsize, ok: bool) -> Arc<String> {
        tier.read_through(
            "k",
            || async {
                let n = fetches.fetch_add(1, Ordering::SeqCst);
                if ok {
                    Ok(format!("v{n}"))
                } else {
                    Err("device gone")
                }
            },
            |e| format!("placeholder: {e}"),
        )
        .await
    }

    #[tokio::test(start_paused = true)]
    async fn lookups_hand_out_the_stored_arc() {
        let tier = tier();
        let stored = tier.store("k", "v".to_owned());

        assert!(Arc::ptr_eq(&tier.fresh(&"k").unwrap(), &stored));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(tier.fresh(&"k").is_none());
        assert!(Arc::ptr_eq(&tier.stale(&"k").unwrap(), &stored));
        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(tier.stale(&"k").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn reads_inside_ttl_share_one_value() {
        let tier = tier();
        let fetches = AtomicUsize::new(0);

        let a = read(&tier, &fetches, true).await;
        let b = read(&tier, &fetches, true).await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(1100)).await;
        let c = read(&tier, &fetches, true).await;
        let d = read(&tier, &fetches, true).await;
        assert!(!Arc::ptr_eq(&a, &c));
        assert!(Arc::ptr_eq(&c, &d));
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_serves_stale_under_ceiling() {
        let tier = tier();
        let fetches = AtomicUsize::new(0);
        let first = read(&tier, &fetches, true).await;

        tokio::time::advance(Duration::from_secs(5)).await;
        let stale = read(&tier, &fetches, false).await;
        assert!(Arc::ptr_eq(&first, &stale));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_past_ceiling_yields_placeholder() {
        let tier = tier();
        let fetches = AtomicUsize::new(0);
        read(&tier, &fetches, true).await;

        tokio::time::advance(Duration::from_secs(11)).await;
        let value = read(&tier, &fetches, false).await;
        assert_eq!(value.as_str(), "placeholder: device gone");
        // Placeholders are not cached.
        assert_eq!(read(&tier, &fetches, true).await.as_str(), "v2");
    }

    #[tokio::test(start_paused = true)]
    async fn invalidation_refetches_but_keeps_fallback() {
        let tier = tier();
        let fetches = AtomicUsize::new(0);
        let first = read(&tier, &fetches, true).await;

        tier.invalidate(&"k");
        assert!(tier.fresh(&"k").is_none());
        let fallback = read(&tier, &fetches, false).await;
        assert!(Arc::ptr_eq(&first, &fallback));

        let refreshed = read(&tier, &fetches, true).await;
        assert_eq!(refreshed.as_str(), "v2");
    }
}
