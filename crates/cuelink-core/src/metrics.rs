use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::model::PerformanceSnapshot;

/// Process-wide command counters.
#[derive(Debug, Default)]
pub struct PerformanceCounters {
    commands_sent: AtomicU64,
    errors: AtomicU64,
    total_latency_ms: AtomicU64,
}

impl PerformanceCounters {
    pub fn record(&self, latency: Duration, success: bool) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.commands_sent.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(ms, Ordering::Relaxed);
        if !success {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
    pub fn snapshot(&self) -> PerformanceSnapshot {
        let sent = self.commands_sent.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        if sent == 0 {
            return PerformanceSnapshot {
                average_latency: 0.0,
                commands_sent: 0,
                error_rate: 0.0,
            };
        }
        PerformanceSnapshot {
            average_latency: total as f64 / sent as f64,
            commands_sent: sent,
            error_rate: errors as f64 / sent as f64,
        }
    }

    pub fn clear(&self) {
        self.commands_sent.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.total_latency_ms.store(0, Ordering::Relaxed);
    }
}
