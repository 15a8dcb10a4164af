//! Alert suppression keyed by pod identity
//!
//! Records when each pod last had an alert dispatch attempt and rejects
//! further attempts until the suppression window has elapsed. The record is
//! committed before delivery, so a failed delivery still suppresses.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info};

use crate::models::PodKey;
use crate::observability::MonitorMetrics;

/// Default suppression window (2 hours)
pub const DEFAULT_SUPPRESSION_WINDOW: Duration = Duration::from_secs(2 * 60 * 60);

/// Default interval between expired-entry sweeps (10 minutes)
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Monotonic time source
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Clock backed by `Instant::now`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Outcome of a suppression check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Suppressed,
}

/// Concurrency-safe map from pod key to last alert time
#[derive(Debug, Default)]
pub struct SuppressionCache {
    entries: RwLock<HashMap<PodKey, Instant>>,
}

impl SuppressionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow the alert and record `now` unless one was recorded within `window`
    pub fn check_and_mark(&self, key: &PodKey, now: Instant, window: Duration) -> Decision {
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if Self::within_window(entries.get(key), now, window) {
                return Decision::Suppressed;
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have marked the key between the two locks.
        if Self::within_window(entries.get(key), now, window) {
            return Decision::Suppressed;
        }

        let stored = match entries.get(key) {
            Some(last) if *last > now => *last,
            _ => now,
        };
        entries.insert(key.clone(), stored);
        Decision::Allowed
    }

    /// Last recorded alert time for a key
    pub fn last_alert_at(&self, key: &PodKey) -> Option<Instant> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).copied()
    }

    /// Drop entries old enough that they could no longer suppress anything.
    /// Returns the number of entries removed.
    pub fn evict_expired(&self, now: Instant, window: Duration) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, last| now.saturating_duration_since(*last) < window);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn within_window(last: Option<&Instant>, now: Instant, window: Duration) -> bool {
        match last {
            Some(last) => now.saturating_duration_since(*last) < window,
            None => false,
        }
    }
}

/// Periodically evicts expired suppression entries until shutdown
pub struct SuppressionSweeper {
    cache: Arc<SuppressionCache>,
    clock: Arc<dyn Clock>,
    window: Duration,
    sweep_interval: Duration,
    metrics: MonitorMetrics,
}

impl SuppressionSweeper {
    pub fn new(
        cache: Arc<SuppressionCache>,
        clock: Arc<dyn Clock>,
        window: Duration,
        sweep_interval: Duration,
        metrics: MonitorMetrics,
    ) -> Self {
        Self {
            cache,
            clock,
            window,
            sweep_interval,
            metrics,
        }
    }

    /// Run one sweep and refresh the cache size gauge
    pub fn sweep(&self) -> usize {
        let removed = self.cache.evict_expired(self.clock.now(), self.window);
        self.metrics.set_suppression_cache_entries(self.cache.len() as i64);
        if removed > 0 {
            debug!(removed = removed, remaining = self.cache.len(), "Evicted expired alert records");
        }
        removed
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.sweep_interval.as_secs(),
            window_secs = self.window.as_secs(),
            "Starting suppression cache sweeper"
        );

        let mut ticker = interval(self.sweep_interval);
        // The first tick completes immediately and the cache is empty at startup.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep();
                }
                _ = shutdown.recv() => {
                    info!("Shutting down suppression cache sweeper");
                    break;
                }
            }
        }
    }
}
