//! Direction-biased prefetch window calculation.
//!
//! Pure functions: given a focus index, a radius and the direction of
//! travel, work out which indices should be warm and in what order to
//! request them. The scheduler owns the state that feeds these.

/// Direction of the last navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    /// Map a signed step (`+1` / `-1`) to a direction; zero has none.
    pub fn from_step(step: i64) -> Option<Self> {
        match step.signum() {
            1 => Some(Direction::Forward),
            -1 => Some(Direction::Backward),
            _ => None,
        }
    }
}

/// Configuration for prefetching behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct PrefetchConfig {
    /// Steady-state radius once navigation has settled.
    pub radius: usize,
    /// Reduced radius used until `navigation_threshold` navigations happen.
    pub startup_radius: usize,
    /// Share of the radius placed ahead in the direction of travel.
    pub direction_bias: f64,
    /// Navigations needed before switching to the steady-state radius.
    pub navigation_threshold: u32,
    /// Priority requests leave in-flight work within this distance alone.
    pub safety_radius: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            radius: 4,
            startup_radius: 2,
            direction_bias: 0.7,
            navigation_threshold: 2,
            safety_radius: 2,
        }
    }
}

/// Half-open index range `[start, end)` the scheduler wants warm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FocusWindow {
    pub start: usize,
    pub end: usize,
}

impl FocusWindow {
    pub const EMPTY: FocusWindow = FocusWindow { start: 0, end: 0 };

    pub fn contains(&self, index: usize) -> bool {
        index >= self.start && index < self.end
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Split `radius` into (behind, ahead) relative to the direction of travel.
///
/// Ahead gets `round(radius * bias)` clamped to `[1, radius]`; behind gets
/// the remainder, floored at 1, so both immediate neighbours are always
/// covered. With no direction yet both sides get the full radius.
pub fn split_radius(radius: usize, bias: f64, direction: Option<Direction>) -> (usize, usize) {
    if radius == 0 {
        return (0, 0);
    }
    if direction.is_none() {
        return (radius, radius);
    }
    let ahead = ((radius as f64 * bias).round() as usize).clamp(1, radius);
    let behind = radius.saturating_sub(ahead).max(1);
    (behind, ahead)
}

/// Window of indices around `focus`, clamped to `[0, len)`.
pub fn compute_window(
    focus: usize,
    len: usize,
    radius: usize,
    bias: f64,
    direction: Option<Direction>,
) -> FocusWindow {
    if len == 0 {
        return FocusWindow::EMPTY;
    }
    let (behind, ahead) = split_radius(radius, bias, direction);
    let (below, above) = match direction {
        Some(Direction::Backward) => (ahead, behind),
        _ => (behind, ahead),
    };
    let start = focus.saturating_sub(below).min(len);
    let end = focus.saturating_add(above).saturating_add(1).min(len);
    FocusWindow { start, end }
}

/// Indices of `window` in request order: focus, then the direction of
/// travel nearest first, then the opposite side nearest first.
///
/// With no direction, forward is treated as the direction of travel.
pub fn priority_order(window: FocusWindow, focus: usize, direction: Option<Direction>) -> Vec<usize> {
    let mut order = Vec::with_capacity(window.len());
    if window.contains(focus) {
        order.push(focus);
    }

    let above = (focus.saturating_add(1).max(window.start)..window.end).collect::<Vec<_>>();
    let below = (window.start..focus.min(window.end)).rev().collect::<Vec<_>>();

    match direction {
        Some(Direction::Backward) => {
            order.extend(below);
            order.extend(above);
        }
        _ => {
            order.extend(above);
            order.extend(below);
        }
    }
    order
}
