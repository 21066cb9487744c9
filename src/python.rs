//! Python bindings.

use std::path::Path;
use std::sync::Arc;

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::buffer::ImageBuffer;
use crate::color::ColorMode;
use crate::config::CoreConfig;
use crate::engine::PrefetchEngine;
use crate::logging;
use crate::prefetch::Direction;
use crate::sequence::ImageList;

/// Python-exposed prefetching image engine.
///
/// Usage:
/// ```python
/// from faststack_core import RustPrefetchEngine
///
/// engine = RustPrefetchEngine(paths, cache_size_gb=2.0, prefetch_radius=4)
/// engine.set_display_size(1920, 1080)
/// engine.update_prefetch(index, is_navigation=True, direction=1)
///
/// # Blocks up to the configured timeout; falls back to the last image shown
/// image = engine.get_decoded_image(index)
/// if image is not None:
///     buf, width, height, stride = image
///
/// engine.shutdown()
/// ```
#[pyclass]
pub struct RustPrefetchEngine {
    inner: PrefetchEngine,
}

#[pymethods]
impl RustPrefetchEngine {
    /// Create an engine over `paths`.
    ///
    /// Args:
    ///     paths: Image file paths in display order
    ///     config_path: Optional JSON config file
    ///     cache_size_gb: Overrides the configured cache size
    ///     prefetch_radius: Overrides the configured radius
    #[new]
    #[pyo3(signature = (paths, config_path=None, cache_size_gb=None, prefetch_radius=None))]
    fn new(
        paths: Vec<String>,
        config_path: Option<&str>,
        cache_size_gb: Option<f64>,
        prefetch_radius: Option<usize>,
    ) -> PyResult<Self> {
        let mut config = match config_path {
            Some(path) => CoreConfig::load(Path::new(path))?,
            None => CoreConfig::default(),
        };
        if let Some(gb) = cache_size_gb {
            config.cache_size_gb = gb;
        }
        if let Some(radius) = prefetch_radius {
            config.prefetch_radius = radius;
        }
        let inner = PrefetchEngine::jpeg(config, Arc::new(ImageList::from_paths(paths)))?;
        Ok(Self { inner })
    }

    /// Replace the image list. Returns True if it differed from the current one.
    fn set_image_files(&self, paths: Vec<String>) -> bool {
        self.inner.set_sequence(Arc::new(ImageList::from_paths(paths)))
    }

    /// Move the focus and prefetch around it.
    ///
    /// Args:
    ///     index: Focus index
    ///     is_navigation: True when called from user navigation
    ///     direction: 1 forward, -1 backward, None to keep the last direction
    ///
    /// Returns:
    ///     Indices newly submitted for decode
    #[pyo3(signature = (index, is_navigation=false, direction=None))]
    fn update_prefetch(&self, index: usize, is_navigation: bool, direction: Option<i64>) -> Vec<usize> {
        let direction = direction.and_then(Direction::from_step);
        self.inner.update(index, is_navigation, direction)
    }

    /// Get the image at `index`, waiting for a decode if needed.
    ///
    /// Returns:
    ///     Tuple of (ImageBuffer, width, height, stride), or None if neither
    ///     the requested image nor any earlier image is available
    fn get_decoded_image(
        &self,
        py: Python<'_>,
        index: usize,
    ) -> PyResult<Option<(Py<ImageBuffer>, u32, u32, usize)>> {
        let outcome = py.allow_threads(|| self.inner.get_decoded_image(index));
        let Some(image) = outcome.into_image() else {
            return Ok(None);
        };
        let (width, height, stride) = (image.width, image.height, image.stride);
        let buf = Py::new(py, ImageBuffer::new(image))?;
        Ok(Some((buf, width, height, stride)))
    }

    /// Report the debounced display size in physical pixels.
    fn set_display_size(&self, width: u32, height: u32) -> bool {
        self.inner.set_display_size(width, height)
    }

    fn set_zoomed(&self, zoomed: bool) -> bool {
        self.inner.set_zoomed(zoomed)
    }

    /// Set the colour mode: "none" or "saturation".
    #[pyo3(signature = (mode, saturation_factor=0.85))]
    fn set_color_mode(&self, mode: &str, saturation_factor: f32) -> PyResult<bool> {
        let mode = ColorMode::parse(mode, saturation_factor)
            .ok_or_else(|| PyValueError::new_err(format!("Invalid color mode: {}", mode)))?;
        Ok(self.inner.set_color_mode(mode))
    }

    /// Resize the cache. Returns the size applied after clamping to 0.5-16 GB.
    fn set_cache_size(&self, size_gb: f64) -> f64 {
        self.inner.set_cache_size_gb(size_gb)
    }

    fn set_prefetch_radius(&self, radius: usize) {
        self.inner.set_prefetch_radius(radius);
    }

    /// Returns:
    ///     Dict with keys: hits, misses, hit_ratio, size_bytes, max_bytes,
    ///     num_entries, eviction_warnings
    fn cache_stats<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let stats = self.inner.cache_stats();
        let dict = PyDict::new(py);
        dict.set_item("hits", stats.hits)?;
        dict.set_item("misses", stats.misses)?;
        dict.set_item("hit_ratio", stats.hit_ratio())?;
        dict.set_item("size_bytes", stats.size_bytes)?;
        dict.set_item("max_bytes", stats.max_bytes)?;
        dict.set_item("num_entries", stats.num_entries)?;
        dict.set_item("eviction_warnings", self.inner.eviction_warnings())?;
        Ok(dict)
    }

    fn reset_cache_stats(&self) {
        self.inner.reset_cache_stats();
    }

    fn cancel_all(&self) {
        self.inner.cancel_all();
    }

    /// Start preloading every image. Returns the number queued.
    fn preload_all(&self) -> PyResult<usize> {
        Ok(self.inner.preload_all()?)
    }

    fn cancel_preload(&self) {
        self.inner.cancel_preload();
    }

    /// Returns:
    ///     Tuple of (done, total)
    fn preload_progress(&self) -> (usize, usize) {
        let progress = self.inner.preload_progress();
        (progress.done, progress.total)
    }

    #[getter]
    fn is_preloading(&self) -> bool {
        self.inner.is_preloading()
    }

    #[getter]
    fn generation(&self) -> u64 {
        self.inner.generation()
    }

    fn shutdown(&self, py: Python<'_>) {
        py.allow_threads(|| self.inner.shutdown());
    }
}

/// Install a stderr log subscriber filtered by RUST_LOG or `filter`.
#[pyfunction]
#[pyo3(signature = (filter=None))]
fn init_logging(filter: Option<&str>) -> PyResult<()> {
    Ok(logging::init_logging(filter.unwrap_or(logging::default_filter()))?)
}

/// Whether the Rust extension was compiled without optimizations (debug build).
#[pyfunction]
fn is_debug_build() -> bool {
    cfg!(debug_assertions)
}

/// FastStack Core - prefetching image cache for sequential photo culling.
#[pymodule]
fn faststack_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<RustPrefetchEngine>()?;
    m.add_class::<ImageBuffer>()?;
    m.add_function(wrap_pyfunction!(init_logging, m)?)?;
    m.add_function(wrap_pyfunction!(is_debug_build, m)?)?;
    Ok(())
}
