//! FastStack Core - prefetching image cache for sequential photo culling.
//!
//! This crate provides:
//! - Byte-budgeted LRU cache keyed by (source, generation)
//! - Generation clock that invalidates decodes when view parameters change
//! - Bounded decode pool with cancellation and priority preemption
//! - Direction-biased prefetch around the focus index
//! - Blocking read path with last-image fallback
//! - Optional Python bindings (feature `python`)

pub mod cache;
pub mod color;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod logging;
pub mod pool;
pub mod prefetch;
pub mod preload;
pub mod reader;
pub mod scheduler;
pub mod sequence;
pub mod thrash;
pub mod view;

#[cfg(feature = "python")]
mod buffer;
#[cfg(feature = "python")]
mod python;
#[cfg(test)]
pub(crate) mod test_utils;

pub use cache::{ByteLruCache, CacheKey, CacheStats, EvictionObserver, ImageCache};
pub use color::{ColorMode, ProfileTransformCache};
pub use config::CoreConfig;
pub use decoder::{DecodedImage, Decoder, JpegDecoder, PixelFormat};
pub use engine::PrefetchEngine;
pub use error::{CoreError, CoreResult};
pub use pool::{TaskHandle, TaskOutcome, WorkerPool};
pub use prefetch::{Direction, FocusWindow, PrefetchConfig};
pub use reader::ReadOutcome;
pub use sequence::{ImageList, SourceDescriptor, SourceId, SourceSequence};
pub use view::{TargetSize, ViewSnapshot, ViewSource, ViewState};
