//! Colour-mode transforms and their process-scoped cache.
//!
//! Building a transform is the expensive part of colour handling, so built
//! transforms are shared through a [`ProfileTransformCache`] that the engine
//! owns and injects into the decoder. Workers call it concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Rec. 709 luma weights in 16.16 fixed point.
const LUMA_R: i32 = 13933;
const LUMA_G: i32 = 46871;
const LUMA_B: i32 = 4732;
const ONE: i32 = 1 << 16;

/// How decoded pixels are colour-managed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ColorMode {
    /// Pixels are used as decoded.
    #[default]
    Original,
    /// Saturation compensation for wide-gamut sources shown on sRGB displays.
    Saturation { factor: f32 },
}

impl ColorMode {
    /// Identity of the transform this mode needs, or `None` for a pass-through.
    pub fn profile_key(&self) -> Option<ProfileKey> {
        match self {
            ColorMode::Original => None,
            ColorMode::Saturation { factor } => {
                Some(ProfileKey::Saturation(factor.clamp(0.0, 1.0).to_bits()))
            }
        }
    }

    /// Parse the names used in the config file (`none`, `saturation`).
    pub fn parse(name: &str, saturation_factor: f32) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" | "original" => Some(ColorMode::Original),
            "saturation" => Some(ColorMode::Saturation {
                factor: saturation_factor.clamp(0.0, 1.0),
            }),
            _ => None,
        }
    }
}

/// Cache key for a built transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileKey {
    Saturation(u32),
}

/// A colour matrix in 16.16 fixed point, applied to packed RGB8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorTransform {
    matrix: [[i32; 3]; 3],
}

impl ColorTransform {
    /// Blend each pixel toward its luma by `1 - factor`.
    pub fn saturation(factor: f32) -> Self {
        let s = (factor.clamp(0.0, 1.0) * ONE as f32).round() as i32;
        let inv = ONE - s;
        let luma = [LUMA_R, LUMA_G, LUMA_B];
        let mut matrix = [[0i32; 3]; 3];
        for (row, out) in matrix.iter_mut().enumerate() {
            for (col, cell) in out.iter_mut().enumerate() {
                let weighted = ((inv as i64 * luma[col] as i64) >> 16) as i32;
                *cell = weighted + if row == col { s } else { 0 };
            }
        }
        Self { matrix }
    }

    fn build(key: ProfileKey) -> Self {
        match key {
            ProfileKey::Saturation(bits) => Self::saturation(f32::from_bits(bits)),
        }
    }

    /// Apply in place to tightly packed RGB8 rows of `stride` bytes.
    pub fn apply(&self, rgb: &mut [u8], width: usize, stride: usize) {
        let row_bytes = width * 3;
        for row in rgb.chunks_mut(stride.max(1)) {
            let usable = row_bytes.min(row.len());
            for px in row[..usable].chunks_exact_mut(3) {
                let (r, g, b) = (px[0] as i32, px[1] as i32, px[2] as i32);
                for (channel, weights) in px.iter_mut().zip(self.matrix.iter()) {
                    let v = (weights[0] * r + weights[1] * g + weights[2] * b + (ONE >> 1)) >> 16;
                    *channel = v.clamp(0, 255) as u8;
                }
            }
        }
    }
}

/// Shared cache of built colour transforms.
///
/// Owned explicitly (no global state) so each engine and each test gets its
/// own instance; cleared whenever the colour mode changes.
#[derive(Debug, Default)]
pub struct ProfileTransformCache {
    transforms: RwLock<HashMap<ProfileKey, Arc<ColorTransform>>>,
}

impl ProfileTransformCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached transform for `key`, building it on first use.
    pub fn get_or_build(&self, key: ProfileKey) -> Arc<ColorTransform> {
        if let Some(transform) = self.transforms.read().get(&key) {
            return Arc::clone(transform);
        }
        let mut transforms = self.transforms.write();
        Arc::clone(
            transforms
                .entry(key)
                .or_insert_with(|| Arc::new(ColorTransform::build(key))),
        )
    }

    /// Drop every built transform.
    pub fn clear(&self) {
        self.transforms.write().clear();
    }

    pub fn len(&self) -> usize {
        self.transforms.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_saturation_is_identity() {
        let transform = ColorTransform::saturation(1.0);
        let mut px = vec![200u8, 10, 90];
        transform.apply(&mut px, 1, 3);
        assert_eq!(px, vec![200, 10, 90]);
    }

    #[test]
    fn test_zero_saturation_is_gray() {
        let transform = ColorTransform::saturation(0.0);
        let mut px = vec![255u8, 0, 0];
        transform.apply(&mut px, 1, 3);
        assert_eq!(px[0], px[1]);
        assert_eq!(px[1], px[2]);
    }

    #[test]
    fn test_apply_skips_row_padding() {
        let transform = ColorTransform::saturation(0.0);
        // One pixel per row, stride 4: the trailing byte is padding.
        let mut rows = vec![255u8, 0, 0, 7, 0, 255, 0, 7];
        transform.apply(&mut rows, 1, 4);
        assert_eq!(rows[3], 7);
        assert_eq!(rows[7], 7);
    }

    #[test]
    fn test_transform_cache_reuses_entries() {
        let cache = ProfileTransformCache::new();
        let key = ColorMode::Saturation { factor: 0.85 }.profile_key().unwrap();
        let a = cache.get_or_build(key);
        let b = cache.get_or_build(key);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_original_mode_has_no_profile() {
        assert!(ColorMode::Original.profile_key().is_none());
    }

    #[test]
    fn test_parse_color_mode() {
        assert_eq!(ColorMode::parse("none", 0.5), Some(ColorMode::Original));
        assert_eq!(
            ColorMode::parse("Saturation", 1.5),
            Some(ColorMode::Saturation { factor: 1.0 })
        );
        assert_eq!(ColorMode::parse("icc", 0.5), None);
    }
}
