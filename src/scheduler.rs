//! Prefetch scheduler: keeps the window around the focus index warm.
//!
//! Each `update` recomputes the window, cancels work that fell out of it and
//! submits what is missing in priority order. Bookkeeping of what has already
//! been dispatched is kept per generation and pruned when the generation
//! moves on.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::cache::{CacheKey, ImageCache};
use crate::pool::WorkerPool;
use crate::prefetch::{compute_window, priority_order, Direction, FocusWindow, PrefetchConfig};
use crate::view::ViewSource;

#[derive(Debug, Default)]
struct SchedulerState {
    focus: Option<usize>,
    direction: Option<Direction>,
    navigations: u32,
    radius_expanded: bool,
    window: FocusWindow,
    /// Indices dispatched per generation.
    scheduled: HashMap<u64, HashSet<usize>>,
}

/// Drives the worker pool from focus changes.
pub struct PrefetchScheduler {
    pool: Arc<WorkerPool>,
    cache: Arc<ImageCache>,
    view: Arc<dyn ViewSource>,
    config: Mutex<PrefetchConfig>,
    state: Mutex<SchedulerState>,
}

impl PrefetchScheduler {
    pub fn new(
        config: PrefetchConfig,
        pool: Arc<WorkerPool>,
        cache: Arc<ImageCache>,
        view: Arc<dyn ViewSource>,
    ) -> Self {
        pool.set_safety_radius(config.safety_radius);
        Self {
            pool,
            cache,
            view,
            config: Mutex::new(config),
            state: Mutex::new(SchedulerState::default()),
        }
    }

    /// Recompute the window around `focus` and reconcile work against it.
    ///
    /// Returns the indices newly submitted, in submission order. The caller
    /// clamps `focus`; only the window endpoints are clamped here.
    pub fn update(&self, focus: usize, is_navigation: bool, direction: Option<Direction>) -> Vec<usize> {
        let config = self.config.lock().clone();
        let mut state = self.state.lock();

        if is_navigation {
            if direction.is_some() {
                state.direction = direction;
            }
            state.navigations = state.navigations.saturating_add(1);
            if !state.radius_expanded && state.navigations >= config.navigation_threshold {
                state.radius_expanded = true;
                info!(
                    from = config.startup_radius,
                    to = config.radius,
                    "expanding prefetch radius after navigation settled"
                );
            }
        }
        state.focus = Some(focus);

        let radius = effective_radius(&config, state.radius_expanded);
        let sequence = self.pool.sequence();
        let window = compute_window(focus, sequence.len(), radius, config.direction_bias, state.direction);
        state.window = window;

        let generation = self.view.generation();
        let cancelled = self.pool.cancel_outside(window);
        for indices in state.scheduled.values_mut() {
            indices.retain(|&i| window.contains(i));
        }
        if !cancelled.is_empty() {
            debug!(?cancelled, "cancelled prefetch outside window");
        }

        let order = priority_order(window, focus, state.direction);
        let mut submitted = Vec::new();
        let scheduled = state.scheduled.entry(generation).or_default();
        for index in order {
            let Some(source) = sequence.get(index) else {
                continue;
            };
            if self.cache.contains(&CacheKey::new(source.id, generation)) {
                scheduled.insert(index);
                continue;
            }
            // Live under this generation, possibly started by a read or preload.
            // Anything else (preempted, failed, evicted, older generation) is resubmitted.
            if self
                .pool
                .handle(index)
                .is_some_and(|handle| handle.generation() == generation)
            {
                scheduled.insert(index);
                continue;
            }
            if self.pool.submit(index, generation, false).is_some() {
                scheduled.insert(index);
                submitted.push(index);
            }
        }

        state.scheduled.retain(|&g, _| g == generation);

        debug!(
            focus,
            radius,
            start = window.start,
            end = window.end,
            generation,
            submitted = submitted.len(),
            "prefetch window updated"
        );
        submitted
    }

    /// Cancel all work and forget what was scheduled.
    pub fn cancel_all(&self) {
        self.pool.cancel_all();
        self.state.lock().scheduled.clear();
    }

    /// Re-run the last update without counting it as navigation.
    pub fn refresh(&self) -> Vec<usize> {
        let focus = self.state.lock().focus;
        match focus {
            Some(focus) => self.update(focus, false, None),
            None => Vec::new(),
        }
    }

    /// Forget focus and direction, e.g. after the sequence changed.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.focus = None;
        state.direction = None;
        state.window = FocusWindow::EMPTY;
        state.scheduled.clear();
    }

    /// Takes effect on the next update.
    pub fn set_radius(&self, radius: usize) {
        self.config.lock().radius = radius.max(1);
    }

    pub fn set_direction_bias(&self, bias: f64) {
        self.config.lock().direction_bias = bias.clamp(0.0, 1.0);
    }

    pub fn set_safety_radius(&self, radius: usize) {
        self.config.lock().safety_radius = radius;
        self.pool.set_safety_radius(radius);
    }

    pub fn config(&self) -> PrefetchConfig {
        self.config.lock().clone()
    }

    pub fn current_window(&self) -> FocusWindow {
        self.state.lock().window
    }

    pub fn focus(&self) -> Option<usize> {
        self.state.lock().focus
    }

    pub fn radius_expanded(&self) -> bool {
        self.state.lock().radius_expanded
    }

    /// Radius the next update will use.
    pub fn effective_radius(&self) -> usize {
        let config = self.config.lock().clone();
        effective_radius(&config, self.state.lock().radius_expanded)
    }

    /// Indices recorded as dispatched under `generation`.
    pub fn scheduled(&self, generation: u64) -> Vec<usize> {
        let state = self.state.lock();
        let mut indices: Vec<usize> = state
            .scheduled
            .get(&generation)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        indices.sort_unstable();
        indices
    }

    /// Generations with scheduling bookkeeping still held.
    pub fn tracked_generations(&self) -> Vec<u64> {
        let mut gens: Vec<u64> = self.state.lock().scheduled.keys().copied().collect();
        gens.sort_unstable();
        gens
    }
}

fn effective_radius(config: &PrefetchConfig, expanded: bool) -> usize {
    if expanded {
        config.radius
    } else {
        config.startup_radius.min(config.radius)
    }
}
