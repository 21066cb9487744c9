//! Eviction-storm detection.
//!
//! A handful of evictions is normal LRU churn. Many inside a short window
//! means the budget is too small for the prefetch radius and the cache is
//! thrashing; that gets a rate-limited warning.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

use crate::cache::EvictionObserver;

#[derive(Debug)]
struct StormState {
    recent: VecDeque<Instant>,
    last_warning: Option<Instant>,
}

/// [`EvictionObserver`] that warns when evictions cluster.
#[derive(Debug)]
pub struct EvictionStormMonitor {
    window: Duration,
    threshold: usize,
    cooldown: Duration,
    state: Mutex<StormState>,
    warnings: AtomicU64,
}

impl EvictionStormMonitor {
    pub fn new(window: Duration, threshold: usize, cooldown: Duration) -> Self {
        Self {
            window,
            threshold,
            cooldown,
            state: Mutex::new(StormState {
                recent: VecDeque::new(),
                last_warning: None,
            }),
            warnings: AtomicU64::new(0),
        }
    }

    /// Record one eviction at `now`. Returns `true` if a warning was emitted.
    pub fn record_at(&self, now: Instant) -> bool {
        // Never block the evicting thread; a contended sample is dropped.
        let Some(mut state) = self.state.try_lock() else {
            return false;
        };

        state.recent.push_back(now);
        while let Some(&oldest) = state.recent.front() {
            if now.saturating_duration_since(oldest) > self.window {
                state.recent.pop_front();
            } else {
                break;
            }
        }

        if state.recent.len() <= self.threshold {
            return false;
        }
        let cooled = state
            .last_warning
            .map_or(true, |last| now.saturating_duration_since(last) > self.cooldown);
        if !cooled {
            return false;
        }

        state.last_warning = Some(now);
        self.warnings.fetch_add(1, Ordering::Relaxed);
        warn!(
            evictions = state.recent.len(),
            window_secs = self.window.as_secs_f64(),
            "Cache thrashing: raise the cache size or lower the prefetch radius"
        );
        true
    }

    /// Number of storm warnings emitted so far.
    pub fn warnings(&self) -> u64 {
        self.warnings.load(Ordering::Relaxed)
    }
}

impl EvictionObserver for EvictionStormMonitor {
    fn on_evict(&self) {
        self.record_at(Instant::now());
    }
}
