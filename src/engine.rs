//! Caller-facing facade wiring cache, view state, pool and scheduler.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::cache::{CacheStats, ImageCache};
use crate::color::{ColorMode, ProfileTransformCache};
use crate::config::{clamp_cache_gb, gb_to_bytes, CoreConfig};
use crate::decoder::{Decoder, JpegDecoder};
use crate::error::CoreResult;
use crate::pool::WorkerPool;
use crate::prefetch::{Direction, FocusWindow};
use crate::preload::{BulkPreloader, PreloadProgress};
use crate::reader::{BlockingReader, ReadOutcome};
use crate::scheduler::PrefetchScheduler;
use crate::sequence::{same_sources, SourceSequence};
use crate::thrash::EvictionStormMonitor;
use crate::view::{ViewSource, ViewState};

/// Prefetching image engine for a navigable sequence of images.
///
/// Prefetch is deferred until the first display size arrives; the focus
/// requested meanwhile is remembered and replayed then.
pub struct PrefetchEngine {
    config: RwLock<CoreConfig>,
    view: Arc<ViewState>,
    cache: Arc<ImageCache>,
    monitor: Arc<EvictionStormMonitor>,
    transforms: Arc<ProfileTransformCache>,
    pool: Arc<WorkerPool>,
    scheduler: PrefetchScheduler,
    reader: BlockingReader,
    preloader: BulkPreloader,
    pending_focus: Mutex<Option<usize>>,
}

impl PrefetchEngine {
    /// Engine with its own view state and the given decoder.
    pub fn new(
        config: CoreConfig,
        sequence: Arc<dyn SourceSequence>,
        decoder: Arc<dyn Decoder>,
    ) -> CoreResult<Self> {
        Self::build(
            config,
            sequence,
            decoder,
            Arc::new(ProfileTransformCache::new()),
            Arc::new(ViewState::new()),
        )
    }

    /// Engine sharing `view` with the host.
    pub fn with_view(
        config: CoreConfig,
        sequence: Arc<dyn SourceSequence>,
        decoder: Arc<dyn Decoder>,
        view: Arc<ViewState>,
    ) -> CoreResult<Self> {
        Self::build(config, sequence, decoder, Arc::new(ProfileTransformCache::new()), view)
    }

    /// Engine decoding JPEGs from disk.
    pub fn jpeg(config: CoreConfig, sequence: Arc<dyn SourceSequence>) -> CoreResult<Self> {
        let transforms = Arc::new(ProfileTransformCache::new());
        let decoder = Arc::new(JpegDecoder::new(Arc::clone(&transforms)));
        Self::build(config, sequence, decoder, transforms, Arc::new(ViewState::new()))
    }

    fn build(
        config: CoreConfig,
        sequence: Arc<dyn SourceSequence>,
        decoder: Arc<dyn Decoder>,
        transforms: Arc<ProfileTransformCache>,
        view: Arc<ViewState>,
    ) -> CoreResult<Self> {
        config.validate()?;

        let monitor = Arc::new(EvictionStormMonitor::new(
            config.thrash_window(),
            config.thrash_threshold,
            config.thrash_cooldown(),
        ));
        let cache = Arc::new(ImageCache::for_images(
            config.cache_size_bytes(),
            Some(monitor.clone()),
        ));
        let view_source: Arc<dyn ViewSource> = view.clone();

        let pool = Arc::new(WorkerPool::new(
            config.pool_size(),
            Arc::clone(&cache),
            Arc::clone(&view_source),
            decoder,
            config.safety_radius,
        ));
        pool.set_sequence(sequence);

        let scheduler = PrefetchScheduler::new(
            config.prefetch_config(),
            Arc::clone(&pool),
            Arc::clone(&cache),
            Arc::clone(&view_source),
        );
        let reader = BlockingReader::new(
            Arc::clone(&pool),
            Arc::clone(&cache),
            Arc::clone(&view_source),
            config.blocking_timeout(),
        );
        let preloader = BulkPreloader::new(Arc::clone(&pool), Arc::clone(&cache), view_source);

        info!(
            workers = pool.num_threads(),
            cache_gb = config.cache_size_gb,
            radius = config.prefetch_radius,
            "prefetch engine ready"
        );

        Ok(Self {
            config: RwLock::new(config),
            view,
            cache,
            monitor,
            transforms,
            pool,
            scheduler,
            reader,
            preloader,
            pending_focus: Mutex::new(None),
        })
    }

    /// Replace the source sequence.
    ///
    /// Cancels all work if the new list differs from the current one.
    /// Returns whether it differed.
    pub fn set_sequence(&self, sequence: Arc<dyn SourceSequence>) -> bool {
        let current = self.pool.sequence();
        if same_sources(current.as_ref(), sequence.as_ref()) {
            self.pool.set_sequence(sequence);
            return false;
        }
        info!(old = current.len(), new = sequence.len(), "image list changed");
        self.preloader.cancel();
        self.scheduler.cancel_all();
        self.scheduler.reset();
        self.pool.set_sequence(sequence);
        true
    }

    /// Move the focus and reconcile prefetch work.
    ///
    /// Returns the indices newly submitted. Before the display is ready
    /// nothing is submitted and `focus` is kept for later.
    pub fn update(&self, focus: usize, is_navigation: bool, direction: Option<Direction>) -> Vec<usize> {
        let len = self.pool.sequence().len();
        if len == 0 {
            return Vec::new();
        }
        let focus = focus.min(len - 1);

        if !self.view.display_ready() {
            debug!(focus, "display not ready, deferring prefetch");
            *self.pending_focus.lock() = Some(focus);
            return Vec::new();
        }
        self.scheduler.update(focus, is_navigation, direction)
    }

    /// Get the image at `index` now, falling back to the last image shown.
    pub fn get_decoded_image(&self, index: usize) -> ReadOutcome {
        self.reader.read(index)
    }

    /// Apply a debounced display size. The first valid report enables
    /// prefetch and replays any deferred focus.
    pub fn set_display_size(&self, width: u32, height: u32) -> bool {
        let first = !self.view.display_ready();
        if !self.view.set_display_size(width, height) {
            return false;
        }
        self.scheduler.cancel_all();

        let pending = if first { self.pending_focus.lock().take() } else { None };
        match pending {
            Some(focus) => {
                info!(focus, "display size stable, running deferred prefetch");
                self.scheduler.update(focus, false, None);
            }
            None => {
                self.scheduler.refresh();
            }
        }
        true
    }

    /// Zoomed views decode at full resolution.
    pub fn set_zoomed(&self, zoomed: bool) -> bool {
        if !self.view.set_zoomed(zoomed) {
            return false;
        }
        self.scheduler.cancel_all();
        self.scheduler.refresh();
        true
    }

    /// Switch colour mode: drops every decoded image and transform.
    pub fn set_color_mode(&self, mode: ColorMode) -> bool {
        // Bump first so running workers discard their results
        if !self.view.set_color_mode(mode) {
            return false;
        }
        self.transforms.clear();
        self.cache.clear();
        self.scheduler.cancel_all();
        self.scheduler.refresh();
        true
    }

    /// Resize the cache budget. Returns the size applied after clamping.
    pub fn set_cache_size_gb(&self, gb: f64) -> f64 {
        let gb = clamp_cache_gb(gb);
        let bytes = gb_to_bytes(gb);
        self.config.write().cache_size_gb = gb;
        if bytes != self.cache.max_size() {
            info!(
                from_gb = self.cache.max_size() as f64 / (1024.0 * 1024.0 * 1024.0),
                to_gb = gb,
                "resizing decoded image cache"
            );
            self.cache.resize(bytes);
        }
        gb
    }

    pub fn set_prefetch_radius(&self, radius: usize) {
        let radius = radius.max(1);
        self.config.write().prefetch_radius = radius;
        self.scheduler.set_radius(radius);
        self.scheduler.refresh();
    }

    pub fn set_direction_bias(&self, bias: f64) {
        let bias = bias.clamp(0.0, 1.0);
        self.config.write().direction_bias = bias;
        self.scheduler.set_direction_bias(bias);
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn reset_cache_stats(&self) {
        self.cache.reset_stats();
    }

    /// Eviction-storm warnings emitted so far.
    pub fn eviction_warnings(&self) -> u64 {
        self.monitor.warnings()
    }

    /// Cancel all prefetch work.
    pub fn cancel_all(&self) {
        self.scheduler.cancel_all();
    }

    /// Preload the whole sequence around the current focus.
    pub fn preload_all(&self) -> CoreResult<usize> {
        let focus = self
            .scheduler
            .focus()
            .or(*self.pending_focus.lock())
            .unwrap_or(0);
        let radius = self.config.read().prefetch_radius;
        self.preloader.start(focus, radius)
    }

    pub fn cancel_preload(&self) {
        self.preloader.cancel();
    }

    pub fn preload_progress(&self) -> PreloadProgress {
        self.preloader.progress()
    }

    pub fn is_preloading(&self) -> bool {
        self.preloader.is_running()
    }

    /// Stop all background work. Later reads fall back and updates submit nothing.
    pub fn shutdown(&self) {
        self.preloader.cancel();
        self.scheduler.cancel_all();
        self.pool.shutdown();
    }

    pub fn generation(&self) -> u64 {
        self.view.generation()
    }

    pub fn display_ready(&self) -> bool {
        self.view.display_ready()
    }

    pub fn current_window(&self) -> FocusWindow {
        self.scheduler.current_window()
    }

    pub fn in_flight(&self) -> Vec<usize> {
        self.pool.in_flight()
    }

    pub fn config(&self) -> CoreConfig {
        self.config.read().clone()
    }

    pub fn view(&self) -> &Arc<ViewState> {
        &self.view
    }
}

impl Drop for PrefetchEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::ProfileKey;
    use crate::test_utils::{image_list, wait_idle, Gate, ScriptedDecoder};
    use crate::view::TargetSize;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn engine_with(config: CoreConfig, decoder: Arc<ScriptedDecoder>, len: usize) -> PrefetchEngine {
        PrefetchEngine::new(config, Arc::new(image_list(len)), decoder).unwrap()
    }

    fn ready_engine(decoder: Arc<ScriptedDecoder>) -> PrefetchEngine {
        let engine = engine_with(CoreConfig::default(), decoder, 100);
        engine.set_display_size(1920, 1080);
        engine
    }

    #[test]
    fn test_prefetch_deferred_until_display_ready() {
        let decoder = Arc::new(ScriptedDecoder::new(64));
        let engine = engine_with(CoreConfig::default(), decoder.clone(), 100);

        assert!(engine.update(30, false, None).is_empty());
        assert_eq!(decoder.calls(), 0);

        assert!(engine.set_display_size(1920, 1080));
        assert_eq!(engine.current_window(), FocusWindow { start: 28, end: 33 });
        assert!(wait_idle(&engine.pool, WAIT));
        assert_eq!(engine.cache_stats().num_entries, 5);
    }

    #[test]
    fn test_navigation_expands_window() {
        let engine = ready_engine(Arc::new(ScriptedDecoder::new(64)));
        engine.update(50, false, None);
        engine.update(51, true, Some(Direction::Forward));
        engine.update(52, true, Some(Direction::Forward));

        assert_eq!(engine.current_window(), FocusWindow { start: 51, end: 56 });
        assert!(wait_idle(&engine.pool, WAIT));
    }

    #[test]
    fn test_steady_state_window_without_direction() {
        let config = CoreConfig {
            startup_radius: 4,
            ..Default::default()
        };
        let engine = engine_with(config, Arc::new(ScriptedDecoder::new(64)), 100);
        engine.set_display_size(800, 600);
        engine.update(50, false, None);
        // [46, 54] inclusive
        assert_eq!(engine.current_window(), FocusWindow { start: 46, end: 55 });
        assert!(wait_idle(&engine.pool, WAIT));
    }

    #[test]
    fn test_focus_clamped_to_sequence() {
        let engine = ready_engine(Arc::new(ScriptedDecoder::new(64)));
        engine.update(500, false, None);
        assert_eq!(engine.current_window(), FocusWindow { start: 97, end: 100 });
        assert!(wait_idle(&engine.pool, WAIT));
    }

    #[test]
    fn test_read_uses_display_target() {
        let decoder = Arc::new(ScriptedDecoder::new(64));
        let engine = ready_engine(decoder.clone());
        assert!(matches!(engine.get_decoded_image(3), ReadOutcome::Decoded(_)));

        let (_, target, _) = decoder.targets().last().cloned().unwrap();
        assert_eq!(target, TargetSize::new(1920, 1080));
    }

    #[test]
    fn test_zoom_decodes_full_resolution() {
        let decoder = Arc::new(ScriptedDecoder::new(64));
        let engine = ready_engine(decoder.clone());
        let before = engine.generation();

        assert!(engine.set_zoomed(true));
        assert!(!engine.set_zoomed(true));
        assert_eq!(engine.generation(), before + 1);

        engine.get_decoded_image(7);
        let (_, target, _) = decoder.targets().last().cloned().unwrap();
        assert!(target.is_full());
    }

    #[test]
    fn test_resize_invalidates_by_generation() {
        let engine = ready_engine(Arc::new(ScriptedDecoder::new(64)));
        assert!(matches!(engine.get_decoded_image(2), ReadOutcome::Decoded(_)));
        assert!(matches!(engine.get_decoded_image(2), ReadOutcome::Hit(_)));

        engine.set_display_size(1280, 720);
        assert!(matches!(engine.get_decoded_image(2), ReadOutcome::Decoded(_)));
        // Identical report is a no-op.
        assert!(!engine.set_display_size(1280, 720));
    }

    #[test]
    fn test_color_mode_clears_caches() {
        let decoder = Arc::new(ScriptedDecoder::new(64));
        let engine = ready_engine(decoder.clone());
        engine.get_decoded_image(1);
        engine.transforms.get_or_build(ProfileKey::Saturation(0.8f32.to_bits()));
        assert!(engine.cache_stats().num_entries >= 1);

        let mode = ColorMode::Saturation { factor: 0.8 };
        assert!(engine.set_color_mode(mode));
        assert!(engine.transforms.is_empty());
        assert!(!engine.set_color_mode(mode));

        engine.get_decoded_image(1);
        let (_, _, color) = decoder.targets().last().cloned().unwrap();
        assert_eq!(color, mode);
    }

    #[test]
    fn test_blocking_read_falls_back_on_failure() {
        let decoder = Arc::new(ScriptedDecoder::new(64).failing([9]));
        let engine = ready_engine(decoder);

        let shown = engine.get_decoded_image(8).into_image().unwrap();
        let outcome = engine.get_decoded_image(9);
        assert!(outcome.is_fallback());
        assert!(Arc::ptr_eq(outcome.image().unwrap(), &shown));
    }

    #[test]
    fn test_read_after_shared_view_change() {
        let gate = Gate::new();
        let decoder = Arc::new(ScriptedDecoder::new(64).gated(gate.clone()));
        let view = Arc::new(ViewState::new());
        let engine = PrefetchEngine::with_view(
            CoreConfig::default(),
            Arc::new(image_list(100)),
            decoder,
            view.clone(),
        )
        .unwrap();
        engine.set_display_size(800, 600);
        assert!(engine.update(10, false, None).contains(&10));
        gate.wait_for_arrivals(1, WAIT);

        // Host changes the view directly, bypassing the engine setters
        assert!(view.set_zoomed(true));
        gate.open();

        let outcome = engine.get_decoded_image(10);
        assert!(matches!(outcome, ReadOutcome::Decoded(_)), "{:?}", outcome.cause());
        assert!(wait_idle(&engine.pool, WAIT));
    }

    #[test]
    fn test_cache_size_setter_clamps_and_evicts() {
        let engine = ready_engine(Arc::new(ScriptedDecoder::new(64)));
        assert_eq!(engine.set_cache_size_gb(100.0), 16.0);
        assert_eq!(engine.set_cache_size_gb(0.0), 0.5);
        assert_eq!(engine.cache_stats().max_bytes, gb_to_bytes(0.5));
        assert_eq!(engine.config().cache_size_gb, 0.5);
    }

    #[test]
    fn test_set_sequence_cancels_only_on_change() {
        let gate = Gate::new();
        let decoder = Arc::new(ScriptedDecoder::new(64).gated(gate.clone()));
        let engine = ready_engine(decoder);
        engine.update(10, false, None);
        assert!(!engine.in_flight().is_empty());

        assert!(!engine.set_sequence(Arc::new(image_list(100))));
        assert!(!engine.in_flight().is_empty());

        assert!(engine.set_sequence(Arc::new(image_list(50))));
        assert!(engine.in_flight().is_empty());
        gate.open();
    }

    #[test]
    fn test_set_prefetch_radius_refreshes() {
        let engine = ready_engine(Arc::new(ScriptedDecoder::new(64)));
        engine.update(50, true, None);
        engine.update(50, true, None);
        engine.set_prefetch_radius(6);
        assert_eq!(engine.current_window(), FocusWindow { start: 44, end: 57 });
        assert_eq!(engine.config().prefetch_radius, 6);
        assert!(wait_idle(&engine.pool, WAIT));
    }

    #[test]
    fn test_preload_all() {
        let decoder = Arc::new(ScriptedDecoder::new(64));
        let engine = engine_with(CoreConfig::default(), decoder, 20);
        engine.set_display_size(640, 480);
        engine.update(10, false, None);
        assert!(wait_idle(&engine.pool, WAIT));

        engine.preload_all().unwrap();
        engine.preloader.wait();
        assert_eq!(engine.cache_stats().num_entries, 20);
        let progress = engine.preload_progress();
        assert_eq!(progress.done, progress.total);
    }

    #[test]
    fn test_shutdown_stops_work() {
        let engine = ready_engine(Arc::new(ScriptedDecoder::new(64)));
        engine.shutdown();
        assert!(engine.update(5, true, Some(Direction::Forward)).is_empty());
        assert!(engine.get_decoded_image(5).is_fallback());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = CoreConfig {
            max_workers: 0,
            ..Default::default()
        };
        let result = PrefetchEngine::new(config, Arc::new(image_list(3)), Arc::new(ScriptedDecoder::new(1)));
        assert!(result.is_err());
    }
}
