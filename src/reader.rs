//! Blocking read path for the foreground "show image N now" request.
//!
//! The caller always gets something back: the requested image if it can be
//! had within the timeout, otherwise the last image that was successfully
//! shown, with the reason attached for logging.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheKey, ImageCache};
use crate::decoder::DecodedImage;
use crate::error::CoreError;
use crate::pool::{TaskOutcome, WorkerPool};
use crate::sequence::SourceDescriptor;
use crate::view::ViewSource;

/// Check if verbose cache-miss diagnostics are enabled via env var.
pub fn debug_cache_enabled() -> bool {
    std::env::var("FASTSTACK_DEBUG_CACHE").is_ok_and(|v| v == "1" || v == "true")
}

/// Result of a blocking read.
#[derive(Debug)]
pub enum ReadOutcome {
    /// Served from the cache.
    Hit(Arc<DecodedImage>),
    /// Decoded (or awaited) on demand.
    Decoded(Arc<DecodedImage>),
    /// The requested image was unavailable; `image` is the last one shown.
    Fallback {
        image: Option<Arc<DecodedImage>>,
        cause: CoreError,
    },
}

impl ReadOutcome {
    pub fn image(&self) -> Option<&Arc<DecodedImage>> {
        match self {
            ReadOutcome::Hit(image) | ReadOutcome::Decoded(image) => Some(image),
            ReadOutcome::Fallback { image, .. } => image.as_ref(),
        }
    }

    pub fn into_image(self) -> Option<Arc<DecodedImage>> {
        match self {
            ReadOutcome::Hit(image) | ReadOutcome::Decoded(image) => Some(image),
            ReadOutcome::Fallback { image, .. } => image,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ReadOutcome::Fallback { .. })
    }

    pub fn cause(&self) -> Option<&CoreError> {
        match self {
            ReadOutcome::Fallback { cause, .. } => Some(cause),
            _ => None,
        }
    }
}

/// Synchronous facade over cache and pool.
pub struct BlockingReader {
    pool: Arc<WorkerPool>,
    cache: Arc<ImageCache>,
    view: Arc<dyn ViewSource>,
    timeout: Duration,
    last_displayed: Mutex<Option<Arc<DecodedImage>>>,
    /// Cached from FASTSTACK_DEBUG_CACHE at construction.
    debug_cache: bool,
}

impl BlockingReader {
    pub fn new(
        pool: Arc<WorkerPool>,
        cache: Arc<ImageCache>,
        view: Arc<dyn ViewSource>,
        timeout: Duration,
    ) -> Self {
        Self {
            pool,
            cache,
            view,
            timeout,
            last_displayed: Mutex::new(None),
            debug_cache: debug_cache_enabled(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Last image returned by a successful read.
    pub fn last_displayed(&self) -> Option<Arc<DecodedImage>> {
        self.last_displayed.lock().clone()
    }

    /// Get the image at `index` under the live generation, waiting up to
    /// the timeout for a decode.
    pub fn read(&self, index: usize) -> ReadOutcome {
        let sequence = self.pool.sequence();
        let Some(source) = sequence.get(index) else {
            return self.fallback(CoreError::IndexOutOfRange {
                index,
                len: sequence.len(),
            });
        };

        let generation = self.view.generation();
        let key = CacheKey::new(source.id, generation);
        if let Some(image) = self.cache.get(&key) {
            self.remember(&image);
            return ReadOutcome::Hit(image);
        }

        if self.debug_cache {
            self.log_miss(index, &source, generation);
        }

        let Some(handle) = self.pool.submit(index, generation, true) else {
            let cause = if self.pool.is_shut_down() {
                CoreError::ShutDown
            } else {
                CoreError::Stale { index, generation }
            };
            return self.fallback(cause);
        };

        let started = Instant::now();
        let outcome = handle.wait_timeout(self.timeout);
        let waited = started.elapsed();

        let cause = match outcome {
            // Already counted as a miss above
            Some(TaskOutcome::Decoded(done)) => match self.cache.get_untracked(&done) {
                Some(image) => {
                    debug!(index, waited_ms = waited.as_millis() as u64, "blocking decode complete");
                    self.remember(&image);
                    return ReadOutcome::Decoded(image);
                }
                None => CoreError::Decode(format!("image {} evicted before it could be read", done)),
            },
            Some(TaskOutcome::Stale { generation }) => CoreError::Stale { index, generation },
            Some(TaskOutcome::Failed(message)) => CoreError::Decode(message),
            Some(TaskOutcome::Cancelled) => CoreError::Cancelled { index },
            None => CoreError::Timeout { index, waited },
        };
        self.fallback(cause)
    }

    fn remember(&self, image: &Arc<DecodedImage>) {
        *self.last_displayed.lock() = Some(Arc::clone(image));
    }

    fn fallback(&self, cause: CoreError) -> ReadOutcome {
        match &cause {
            CoreError::Decode(_) | CoreError::EmptySource { .. } | CoreError::Io(_) => {
                error!(error = %cause, "requested image failed to decode, showing last image")
            }
            CoreError::Timeout { .. } => warn!(error = %cause, "showing last image"),
            _ => info!(error = %cause, "requested image unavailable, showing last image"),
        }
        ReadOutcome::Fallback {
            image: self.last_displayed(),
            cause,
        }
    }

    fn log_miss(&self, index: usize, source: &SourceDescriptor, generation: u64) {
        let resident = self.cache.generations_for(source.id);
        let stats = self.cache.stats();
        info!(
            index,
            source = %source.id,
            path = %source.path.display(),
            generation,
            ?resident,
            in_flight = ?self.pool.in_flight(),
            cache_mb = stats.size_bytes as f64 / (1024.0 * 1024.0),
            cache_max_mb = stats.max_bytes as f64 / (1024.0 * 1024.0),
            entries = stats.num_entries,
            "cache miss"
        );
    }
}
