//! View parameters and the generation clock.
//!
//! The generation is bumped once per change to anything that affects what a
//! decode produces (target size, zoom, colour mode). Navigation never bumps
//! it. Cache keys embed the generation, so a bump makes every older entry
//! unreachable without sweeping the cache.

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::color::ColorMode;

/// Target decode box. `(0, 0)` means decode at full resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
}

impl TargetSize {
    pub const FULL: TargetSize = TargetSize { width: 0, height: 0 };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether this target asks for no resize at all.
    pub fn is_full(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// One consistent read of the decode-affecting view parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewSnapshot {
    pub target: TargetSize,
    pub color: ColorMode,
    pub generation: u64,
}

/// Source of the live view parameters.
///
/// `snapshot` must return target, colour and generation from the same
/// generation; workers rely on that to never mix parameters.
pub trait ViewSource: Send + Sync {
    fn snapshot(&self) -> ViewSnapshot;

    /// Live generation only; cheaper than a full snapshot.
    fn generation(&self) -> u64 {
        self.snapshot().generation
    }
}

#[derive(Debug, Clone, Copy)]
struct ViewInner {
    display: TargetSize,
    zoomed: bool,
    color: ColorMode,
    generation: u64,
    display_ready: bool,
}

/// The engine's own [`ViewSource`]: display size, zoom and colour mode
/// behind one lock so snapshots are atomic.
#[derive(Debug)]
pub struct ViewState {
    inner: RwLock<ViewInner>,
}

impl Default for ViewState {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewState {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(ViewInner {
                display: TargetSize::FULL,
                zoomed: false,
                color: ColorMode::Original,
                generation: 0,
                display_ready: false,
            }),
        }
    }

    /// Apply a debounced display size report.
    ///
    /// Returns `true` if the generation was bumped. Zero-sized reports are
    /// ignored.
    pub fn set_display_size(&self, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 {
            debug!(width, height, "ignoring invalid display size");
            return false;
        }
        let mut inner = self.inner.write();
        let size = TargetSize::new(width, height);
        let first = !inner.display_ready;
        inner.display_ready = true;
        if inner.display == size && !first {
            return false;
        }
        inner.display = size;
        inner.generation += 1;
        info!(width, height, generation = inner.generation, "display size changed");
        true
    }

    /// Zoomed views decode at full resolution.
    pub fn set_zoomed(&self, zoomed: bool) -> bool {
        let mut inner = self.inner.write();
        if inner.zoomed == zoomed {
            return false;
        }
        inner.zoomed = zoomed;
        inner.generation += 1;
        info!(zoomed, generation = inner.generation, "zoom state changed");
        true
    }

    pub fn set_color_mode(&self, color: ColorMode) -> bool {
        let mut inner = self.inner.write();
        if inner.color == color {
            return false;
        }
        inner.color = color;
        inner.generation += 1;
        info!(?color, generation = inner.generation, "color mode changed");
        true
    }

    pub fn display_ready(&self) -> bool {
        self.inner.read().display_ready
    }

    pub fn is_zoomed(&self) -> bool {
        self.inner.read().zoomed
    }

    pub fn color_mode(&self) -> ColorMode {
        self.inner.read().color
    }
}

impl ViewSource for ViewState {
    fn snapshot(&self) -> ViewSnapshot {
        let inner = self.inner.read();
        ViewSnapshot {
            target: if inner.zoomed {
                TargetSize::FULL
            } else {
                inner.display
            },
            color: inner.color,
            generation: inner.generation,
        }
    }

    fn generation(&self) -> u64 {
        self.inner.read().generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let view = ViewState::new();
        assert!(!view.display_ready());
        let snap = view.snapshot();
        assert_eq!(snap.generation, 0);
        assert!(snap.target.is_full());
    }

    #[test]
    fn test_first_display_size_bumps_generation() {
        let view = ViewState::new();
        assert!(view.set_display_size(1920, 1080));
        assert!(view.display_ready());
        assert_eq!(view.generation(), 1);
        assert_eq!(view.snapshot().target, TargetSize::new(1920, 1080));
    }

    #[test]
    fn test_unchanged_size_does_not_bump() {
        let view = ViewState::new();
        view.set_display_size(800, 600);
        assert!(!view.set_display_size(800, 600));
        assert_eq!(view.generation(), 1);
    }

    #[test]
    fn test_zero_size_ignored() {
        let view = ViewState::new();
        assert!(!view.set_display_size(0, 600));
        assert!(!view.display_ready());
        assert_eq!(view.generation(), 0);
    }

    #[test]
    fn test_zoom_uses_full_resolution() {
        let view = ViewState::new();
        view.set_display_size(800, 600);
        assert!(view.set_zoomed(true));
        let snap = view.snapshot();
        assert!(snap.target.is_full());
        assert_eq!(snap.generation, 2);
        assert!(!view.set_zoomed(true));

        view.set_zoomed(false);
        assert_eq!(view.snapshot().target, TargetSize::new(800, 600));
        assert_eq!(view.generation(), 3);
    }

    #[test]
    fn test_color_mode_change_bumps_once() {
        let view = ViewState::new();
        let mode = ColorMode::Saturation { factor: 0.8 };
        assert!(view.set_color_mode(mode));
        assert!(!view.set_color_mode(mode));
        assert_eq!(view.generation(), 1);
        assert_eq!(view.color_mode(), mode);
    }
}
