//! Engine configuration, loadable from a JSON file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::pool::pool_size;
use crate::prefetch::PrefetchConfig;

/// Smallest cache budget the setter accepts, in GB.
pub const MIN_CACHE_GB: f64 = 0.5;
/// Largest cache budget the setter accepts, in GB.
pub const MAX_CACHE_GB: f64 = 16.0;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Clamp a requested cache size to the supported range.
pub fn clamp_cache_gb(gb: f64) -> f64 {
    if gb.is_nan() {
        return MIN_CACHE_GB;
    }
    gb.clamp(MIN_CACHE_GB, MAX_CACHE_GB)
}

/// Convert GB to a byte budget.
pub fn gb_to_bytes(gb: f64) -> usize {
    (gb * BYTES_PER_GB) as usize
}

/// Tunables for the prefetch engine. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub cache_size_gb: f64,
    pub prefetch_radius: usize,
    pub startup_radius: usize,
    pub direction_bias: f64,
    pub navigation_threshold: u32,
    pub safety_radius: usize,
    pub max_workers: usize,
    pub blocking_timeout_ms: u64,
    pub thrash_window_ms: u64,
    pub thrash_threshold: usize,
    pub thrash_cooldown_secs: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            cache_size_gb: 1.5,
            prefetch_radius: 4,
            startup_radius: 2,
            direction_bias: 0.7,
            navigation_threshold: 2,
            safety_radius: 2,
            max_workers: 8,
            blocking_timeout_ms: 5000,
            thrash_window_ms: 2000,
            thrash_threshold: 5,
            thrash_cooldown_secs: 300,
        }
    }
}

impl CoreConfig {
    /// Load from a JSON file and validate.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CoreConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write as pretty JSON.
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.cache_size_gb.is_nan() || self.cache_size_gb <= 0.0 {
            return Err(CoreError::Config(format!(
                "cache_size_gb must be positive, got {}",
                self.cache_size_gb
            )));
        }
        if !(self.direction_bias > 0.0 && self.direction_bias < 1.0) {
            return Err(CoreError::Config(format!(
                "direction_bias must be in (0, 1), got {}",
                self.direction_bias
            )));
        }
        if self.prefetch_radius == 0 || self.startup_radius == 0 {
            return Err(CoreError::Config("prefetch radii must be at least 1".into()));
        }
        if self.max_workers == 0 {
            return Err(CoreError::Config("max_workers must be at least 1".into()));
        }
        if self.blocking_timeout_ms == 0 {
            return Err(CoreError::Config("blocking_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    /// Byte budget after clamping to the supported range.
    pub fn cache_size_bytes(&self) -> usize {
        gb_to_bytes(clamp_cache_gb(self.cache_size_gb))
    }

    pub fn pool_size(&self) -> usize {
        pool_size(self.max_workers)
    }

    pub fn prefetch_config(&self) -> PrefetchConfig {
        PrefetchConfig {
            radius: self.prefetch_radius,
            startup_radius: self.startup_radius,
            direction_bias: self.direction_bias,
            navigation_threshold: self.navigation_threshold,
            safety_radius: self.safety_radius,
        }
    }

    pub fn blocking_timeout(&self) -> Duration {
        Duration::from_millis(self.blocking_timeout_ms)
    }

    pub fn thrash_window(&self) -> Duration {
        Duration::from_millis(self.thrash_window_ms)
    }

    pub fn thrash_cooldown(&self) -> Duration {
        Duration::from_secs(self.thrash_cooldown_secs)
    }
}
