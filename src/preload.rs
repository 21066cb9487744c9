//! Background "preload everything" pass.
//!
//! Walks the whole sequence furthest-from-focus first, so that once the
//! budget fills the images nearest the focus are the most recently used and
//! survive eviction. Work goes through the shared worker pool as ordinary
//! non-priority tasks, a bounded number at a time.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, ImageCache};
use crate::error::CoreResult;
use crate::pool::{TaskHandle, WorkerPool};
use crate::view::ViewSource;

/// How often the preload thread re-checks its cancel flag while waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Snapshot of preload progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreloadProgress {
    pub done: usize,
    pub total: usize,
}

impl PreloadProgress {
    /// Completion percentage in `[0, 100]`.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.done.min(self.total) * 100) / self.total) as u8
    }
}

#[derive(Debug, Default)]
struct Counters {
    done: AtomicUsize,
    total: AtomicUsize,
}

/// Sequence-wide preloader running on its own coordinating thread.
pub struct BulkPreloader {
    pool: Arc<WorkerPool>,
    cache: Arc<ImageCache>,
    view: Arc<dyn ViewSource>,
    cancelled: Arc<AtomicBool>,
    counters: Arc<Counters>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BulkPreloader {
    pub fn new(pool: Arc<WorkerPool>, cache: Arc<ImageCache>, view: Arc<dyn ViewSource>) -> Self {
        Self {
            pool,
            cache,
            view,
            cancelled: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
            handle: Mutex::new(None),
        }
    }

    /// Start preloading every index around `focus`.
    ///
    /// Cancels any previous run. Already-cached images are skipped, except
    /// those within `2 * radius` of the focus, which are touched again so
    /// they end up most recently used. Returns the number of indices queued.
    pub fn start(&self, focus: usize, radius: usize) -> CoreResult<usize> {
        self.cancel();

        let sequence = self.pool.sequence();
        let generation = self.view.generation();
        let keep_warm = radius.saturating_mul(2);

        let mut order: Vec<usize> = (0..sequence.len()).collect();
        order.sort_by_key(|&i| std::cmp::Reverse(i.abs_diff(focus)));

        let mut work = Vec::with_capacity(order.len());
        let mut skipped = 0usize;
        for index in order {
            let Some(source) = sequence.get(index) else {
                continue;
            };
            let key = CacheKey::new(source.id, generation);
            if self.cache.contains(&key) && index.abs_diff(focus) > keep_warm {
                skipped += 1;
                continue;
            }
            work.push((index, key));
        }

        self.counters.done.store(0, Ordering::Release);
        self.counters.total.store(work.len(), Ordering::Release);
        if work.is_empty() {
            info!(skipped, "Preload: everything already cached");
            return Ok(0);
        }

        self.cancelled.store(false, Ordering::Release);
        let queued = work.len();
        info!(queued, skipped, generation, "Preload started");

        let pool = Arc::clone(&self.pool);
        let cache = Arc::clone(&self.cache);
        let view = Arc::clone(&self.view);
        let cancelled = Arc::clone(&self.cancelled);
        let counters = Arc::clone(&self.counters);
        let max_outstanding = pool.num_threads() * 2;

        let handle = std::thread::Builder::new()
            .name("bulk-preload-main".into())
            .spawn(move || {
                let mut outstanding: VecDeque<TaskHandle> = VecDeque::new();
                for (index, key) in work {
                    if cancelled.load(Ordering::Acquire) {
                        info!("Preload cancelled");
                        return;
                    }
                    if view.generation() != generation {
                        info!(generation, "Preload stopped: view parameters changed");
                        return;
                    }

                    // Touch to bump recency
                    if cache.get(&key).is_some() {
                        counters.done.fetch_add(1, Ordering::AcqRel);
                        continue;
                    }

                    while outstanding.len() >= max_outstanding {
                        let Some(front) = outstanding.front() else {
                            break;
                        };
                        if front.wait_timeout(POLL_INTERVAL).is_some() {
                            outstanding.pop_front();
                            counters.done.fetch_add(1, Ordering::AcqRel);
                        } else if cancelled.load(Ordering::Acquire) {
                            info!("Preload cancelled");
                            return;
                        }
                    }

                    match pool.submit(index, generation, false) {
                        Some(task) => outstanding.push_back(task),
                        None => {
                            debug!(index, "preload submit rejected");
                            counters.done.fetch_add(1, Ordering::AcqRel);
                        }
                    }
                }

                while let Some(front) = outstanding.front() {
                    if front.wait_timeout(POLL_INTERVAL).is_some() {
                        outstanding.pop_front();
                        counters.done.fetch_add(1, Ordering::AcqRel);
                    } else if cancelled.load(Ordering::Acquire) {
                        info!("Preload cancelled");
                        return;
                    }
                }
                info!("Preload complete");
            })?;

        *self.handle.lock() = Some(handle);
        Ok(queued)
    }

    /// Cancel any running preload and wait for its thread to exit.
    ///
    /// Tasks already handed to the pool are left to the pool.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(handle) = self.handle.lock().take() {
            join_preload_thread(handle);
        }
    }

    pub fn is_running(&self) -> bool {
        let guard = self.handle.lock();
        match guard.as_ref() {
            Some(h) => !h.is_finished(),
            None => false,
        }
    }

    pub fn progress(&self) -> PreloadProgress {
        PreloadProgress {
            done: self.counters.done.load(Ordering::Acquire),
            total: self.counters.total.load(Ordering::Acquire),
        }
    }

    /// Wait for a running preload to finish without cancelling it.
    #[cfg(test)]
    pub fn wait(&self) {
        if let Some(handle) = self.handle.lock().take() {
            join_preload_thread(handle);
        }
    }
}

/// Join the preload thread, logging a panic instead of dropping it silently.
/// Returns whether the thread exited normally.
fn join_preload_thread(handle: JoinHandle<()>) -> bool {
    match handle.join() {
        Ok(()) => true,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            warn!(panic = %message, "bulk preload thread panicked");
            false
        }
    }
}

impl Drop for BulkPreloader {
    fn drop(&mut self) {
        self.cancel();
    }
}
