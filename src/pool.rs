//! Bounded decode worker pool with cancellable, awaitable task handles.
//!
//! At most one live task exists per index. Workers never touch scheduler
//! state; they report back only through their [`TaskHandle`]. Before writing
//! to the cache a worker re-reads the live generation and drops its result on
//! mismatch, which is what keeps stale decodes out of the cache. Cancellation
//! only stops tasks that have not started yet.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::cache::{CacheKey, ImageCache};
use crate::decoder::Decoder;
use crate::prefetch::FocusWindow;
use crate::sequence::{ImageList, SourceDescriptor, SourceSequence};
use crate::view::{ViewSnapshot, ViewSource};

/// Number of decode threads: twice the CPU count, capped at `max_workers`.
///
/// Decoding mixes file I/O with CPU work, so mild oversubscription helps.
pub fn pool_size(max_workers: usize) -> usize {
    (num_cpus::get() * 2).clamp(1, max_workers.max(1))
}

/// How a task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Result stored in the cache under this key.
    Decoded(CacheKey),
    /// Generation moved on before the result could be stored.
    Stale { generation: u64 },
    /// Decode failed; nothing was stored.
    Failed(String),
    /// Cancelled before it started.
    Cancelled,
}

#[derive(Debug)]
enum TaskState {
    Pending,
    Running,
    Finished(TaskOutcome),
}

#[derive(Debug)]
struct TaskInner {
    index: usize,
    generation: u64,
    priority: bool,
    cancel_requested: AtomicBool,
    state: Mutex<TaskState>,
    done: Condvar,
}

/// Shared handle to one submitted decode.
#[derive(Debug, Clone)]
pub struct TaskHandle(Arc<TaskInner>);

impl TaskHandle {
    fn new(index: usize, generation: u64, priority: bool) -> Self {
        Self(Arc::new(TaskInner {
            index,
            generation,
            priority,
            cancel_requested: AtomicBool::new(false),
            state: Mutex::new(TaskState::Pending),
            done: Condvar::new(),
        }))
    }

    pub fn index(&self) -> usize {
        self.0.index
    }

    /// Generation captured at submission.
    pub fn generation(&self) -> u64 {
        self.0.generation
    }

    pub fn is_priority(&self) -> bool {
        self.0.priority
    }

    pub fn is_finished(&self) -> bool {
        matches!(*self.0.state.lock(), TaskState::Finished(_))
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.0.cancel_requested.load(Ordering::Acquire)
    }

    pub fn outcome(&self) -> Option<TaskOutcome> {
        match &*self.0.state.lock() {
            TaskState::Finished(outcome) => Some(outcome.clone()),
            _ => None,
        }
    }

    /// Request cancellation.
    ///
    /// Returns `true` if the task had not started and is now finished as
    /// cancelled. A running task keeps going; its staleness check still
    /// governs whether it writes.
    pub fn cancel(&self) -> bool {
        self.0.cancel_requested.store(true, Ordering::Release);
        let mut state = self.0.state.lock();
        if matches!(*state, TaskState::Pending) {
            *state = TaskState::Finished(TaskOutcome::Cancelled);
            self.0.done.notify_all();
            true
        } else {
            false
        }
    }

    /// Block until the task finishes or `timeout` elapses.
    ///
    /// Returns `None` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskOutcome> {
        let deadline = Instant::now() + timeout;
        let mut state = self.0.state.lock();
        loop {
            if let TaskState::Finished(outcome) = &*state {
                return Some(outcome.clone());
            }
            if self.0.done.wait_until(&mut state, deadline).timed_out() {
                return match &*state {
                    TaskState::Finished(outcome) => Some(outcome.clone()),
                    _ => None,
                };
            }
        }
    }

    /// Whether both handles refer to the same submission.
    pub fn same_task(&self, other: &TaskHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Move Pending -> Running. Returns `false` if cancelled first.
    fn start(&self) -> bool {
        let mut state = self.0.state.lock();
        match *state {
            TaskState::Pending if !self.is_cancel_requested() => {
                *state = TaskState::Running;
                true
            }
            TaskState::Pending => {
                *state = TaskState::Finished(TaskOutcome::Cancelled);
                self.0.done.notify_all();
                false
            }
            _ => false,
        }
    }

    fn finish(&self, outcome: TaskOutcome) {
        let mut state = self.0.state.lock();
        *state = TaskState::Finished(outcome);
        self.0.done.notify_all();
    }
}

/// State every worker needs, shared read-only.
struct WorkerContext {
    cache: Arc<ImageCache>,
    view: Arc<dyn ViewSource>,
    decoder: Arc<dyn Decoder>,
}

impl WorkerContext {
    /// Body of one decode task.
    fn run(&self, handle: &TaskHandle, source: &SourceDescriptor, snapshot: ViewSnapshot) {
        if !handle.start() {
            debug!(index = handle.index(), "skipping cancelled task");
            return;
        }

        let captured = snapshot.generation;

        // Quick exit before paying for a decode
        if self.view.generation() != captured {
            debug!(index = handle.index(), captured, "dropping stale task before decode");
            handle.finish(TaskOutcome::Stale { generation: captured });
            return;
        }

        let decoded = panic::catch_unwind(AssertUnwindSafe(|| {
            self.decoder.decode(source, snapshot.target, snapshot.color)
        }));
        let decoded = match decoded {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(
                    index = handle.index(),
                    path = %source.path.display(),
                    panic = %message,
                    "decoder panicked"
                );
                handle.finish(TaskOutcome::Failed(format!("decoder panicked: {}", message)));
                return;
            }
        };

        let outcome = match decoded {
            Ok(image) => {
                // The critical guard: the generation may have moved during decode
                let live = self.view.generation();
                if live != captured {
                    debug!(
                        index = handle.index(),
                        captured, live, "generation changed during decode, discarding result"
                    );
                    TaskOutcome::Stale { generation: captured }
                } else {
                    let key = CacheKey::new(source.id, captured);
                    self.cache.put(key, Arc::new(image));
                    debug!(index = handle.index(), %key, "decoded and cached");
                    TaskOutcome::Decoded(key)
                }
            }
            Err(e) => {
                warn!(
                    index = handle.index(),
                    path = %source.path.display(),
                    error = %e,
                    "decode failed"
                );
                TaskOutcome::Failed(e.to_string())
            }
        };
        handle.finish(outcome);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Fixed-size pool of decode threads plus the index -> handle table.
pub struct WorkerPool {
    context: Arc<WorkerContext>,
    sequence: RwLock<Arc<dyn SourceSequence>>,
    threads: RwLock<Option<rayon::ThreadPool>>,
    tasks: Mutex<HashMap<usize, TaskHandle>>,
    safety_radius: AtomicUsize,
    num_threads: usize,
    shut_down: AtomicBool,
}

impl WorkerPool {
    /// Create a pool with `num_threads` dedicated decode threads.
    pub fn new(
        num_threads: usize,
        cache: Arc<ImageCache>,
        view: Arc<dyn ViewSource>,
        decoder: Arc<dyn Decoder>,
        safety_radius: usize,
    ) -> Self {
        let num_threads = num_threads.max(1);
        let threads = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|idx| format!("prefetch-{}", idx))
            .build();
        let threads = match threads {
            Ok(pool) => Some(pool),
            Err(e) => {
                // Submissions become no-ops, same as after shutdown
                warn!(error = %e, "failed to create prefetch thread pool");
                None
            }
        };
        info!(num_threads, "prefetch pool started");

        Self {
            context: Arc::new(WorkerContext { cache, view, decoder }),
            sequence: RwLock::new(Arc::new(ImageList::default())),
            threads: RwLock::new(threads),
            tasks: Mutex::new(HashMap::new()),
            safety_radius: AtomicUsize::new(safety_radius),
            num_threads,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn set_safety_radius(&self, radius: usize) {
        self.safety_radius.store(radius, Ordering::Relaxed);
    }

    pub fn safety_radius(&self) -> usize {
        self.safety_radius.load(Ordering::Relaxed)
    }

    /// Replace the source sequence. Does not cancel; callers decide that.
    pub fn set_sequence(&self, sequence: Arc<dyn SourceSequence>) {
        *self.sequence.write() = sequence;
    }

    pub fn sequence(&self) -> Arc<dyn SourceSequence> {
        Arc::clone(&self.sequence.read())
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Submit a decode of `index` under `generation`.
    ///
    /// Returns the existing handle if a live task for `index` exists under
    /// the same generation; one from an older generation is cancelled and
    /// replaced. With `priority`, first cancels every live task further
    /// than the safety radius from `index`. Returns `None` after shutdown, for an index
    /// outside the sequence, or when `generation` is already superseded.
    pub fn submit(&self, index: usize, generation: u64, priority: bool) -> Option<TaskHandle> {
        if self.is_shut_down() {
            return None;
        }

        let mut tasks = self.tasks.lock();
        tasks.retain(|_, handle| !handle.is_finished());

        if priority {
            let radius = self.safety_radius();
            let far: Vec<usize> = tasks
                .keys()
                .copied()
                .filter(|&i| i.abs_diff(index) > radius)
                .collect();
            for i in &far {
                if let Some(handle) = tasks.remove(i) {
                    handle.cancel();
                }
            }
            if !far.is_empty() {
                debug!(index, cancelled = ?far, "priority submit preempted tasks");
            }
        }

        if let Some(existing) = tasks.get(&index) {
            if existing.generation() == generation {
                return Some(existing.clone());
            }
        }

        let Some(source) = self.sequence.read().get(index) else {
            debug!(index, "submit for index outside the sequence");
            return None;
        };

        let snapshot = self.context.view.snapshot();
        if snapshot.generation != generation {
            debug!(
                index,
                generation,
                live = snapshot.generation,
                "submit with superseded generation"
            );
            return None;
        }

        // A live task from an older generation can only end stale
        if let Some(old) = tasks.remove(&index) {
            old.cancel();
            debug!(index, old = old.generation(), generation, "replacing task from older generation");
        }

        let threads = self.threads.read();
        let pool = threads.as_ref()?;

        let handle = TaskHandle::new(index, generation, priority);
        let task = handle.clone();
        let context = Arc::clone(&self.context);
        pool.spawn(move || context.run(&task, &source, snapshot));

        tasks.insert(index, handle.clone());
        debug!(index, generation, priority, "submitted decode task");
        Some(handle)
    }

    /// Live handle for `index`, if any.
    pub fn handle(&self, index: usize) -> Option<TaskHandle> {
        self.tasks
            .lock()
            .get(&index)
            .filter(|h| !h.is_finished())
            .cloned()
    }

    /// Sorted indices with an unfinished task.
    pub fn in_flight(&self) -> Vec<usize> {
        let mut tasks = self.tasks.lock();
        tasks.retain(|_, handle| !handle.is_finished());
        let mut indices: Vec<usize> = tasks.keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    /// Cancel and forget every task outside `window`. Returns their indices.
    pub fn cancel_outside(&self, window: FocusWindow) -> Vec<usize> {
        let mut tasks = self.tasks.lock();
        let mut removed = Vec::new();
        tasks.retain(|&index, handle| {
            if handle.is_finished() {
                return false;
            }
            if window.contains(index) {
                return true;
            }
            handle.cancel();
            removed.push(index);
            false
        });
        removed.sort_unstable();
        removed
    }

    /// Cancel and forget every task.
    pub fn cancel_all(&self) {
        let mut tasks = self.tasks.lock();
        let count = tasks.len();
        for (_, handle) in tasks.drain() {
            handle.cancel();
        }
        if count > 0 {
            debug!(count, "cancelled all prefetch tasks");
        }
    }

    /// Cancel everything and release the threads. Later submits return `None`.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Shutting down prefetch thread pool");
        self.cancel_all();
        // Dropping the rayon pool lets its threads exit once idle
        self.threads.write().take();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
