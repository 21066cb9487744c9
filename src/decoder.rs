//! Image decoding for the prefetch workers.
//!
//! The engine only cares whether a decode succeeded and what it weighs;
//! [`Decoder`] is the seam. [`JpegDecoder`] is the production implementation,
//! using zune-jpeg for fast SIMD-accelerated decoding.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use zune_jpeg::JpegDecoder as ZuneDecoder;

use crate::color::{ColorMode, ProfileTransformCache};
use crate::error::{CoreError, CoreResult};
use crate::sequence::SourceDescriptor;
use crate::view::TargetSize;

/// Pixel layout of a decoded buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Gray8,
    Rgb8,
    Rgba8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
        }
    }
}

/// A decoded image ready for display. Never mutated once built.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    /// Pixel rows, `stride` bytes apart.
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    /// Bytes per row, at least `width * bytes_per_pixel`.
    pub stride: usize,
    pub format: PixelFormat,
}

impl DecodedImage {
    /// Tightly packed image (`stride == width * bpp`).
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data: Bytes::from(data),
            width,
            height,
            stride: width as usize * format.bytes_per_pixel(),
            format,
        }
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }
}

/// Byte weight of a decoded image for the cache budget.
///
/// Uses the literal buffer length; falls back to `width * height * bpp`
/// only when no buffer has been attached. Never zero for a real image.
pub fn decoded_image_size(image: &DecodedImage) -> usize {
    if !image.data.is_empty() {
        image.data.len()
    } else {
        image.width as usize * image.height as usize * image.format.bytes_per_pixel()
    }
}

/// Decode function used by the worker pool.
///
/// Must be safe to call from several workers at once.
pub trait Decoder: Send + Sync {
    fn decode(
        &self,
        source: &SourceDescriptor,
        target: TargetSize,
        color: ColorMode,
    ) -> CoreResult<DecodedImage>;
}

/// JPEG decoder with fit-to-box downscaling and colour transforms.
pub struct JpegDecoder {
    transforms: Arc<ProfileTransformCache>,
}

impl JpegDecoder {
    pub fn new(transforms: Arc<ProfileTransformCache>) -> Self {
        Self { transforms }
    }
}

impl Decoder for JpegDecoder {
    fn decode(
        &self,
        source: &SourceDescriptor,
        target: TargetSize,
        color: ColorMode,
    ) -> CoreResult<DecodedImage> {
        let jpeg = read_source_bytes(&source.path)?;
        let mut image = decode_jpeg_bytes(&jpeg)?;

        if !target.is_full() {
            let (w, h) = fit_within(image.width, image.height, target);
            if (w, h) != (image.width, image.height) {
                image = resample_nearest(&image, w, h);
            }
        }

        if let Some(key) = color.profile_key() {
            let transform = self.transforms.get_or_build(key);
            let mut pixels = image.data.to_vec();
            transform.apply(&mut pixels, image.width as usize, image.stride);
            image.data = Bytes::from(pixels);
        }

        Ok(image)
    }
}

/// Read a source file, rejecting empty files up front.
pub fn read_source_bytes(path: &Path) -> CoreResult<Bytes> {
    let mut file = File::open(path)?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;
    if data.is_empty() {
        return Err(CoreError::EmptySource {
            path: path.to_path_buf(),
        });
    }
    Ok(Bytes::from(data))
}

/// Decode JPEG bytes to packed RGB8.
///
/// Handles grayscale-to-RGB conversion automatically.
pub fn decode_jpeg_bytes(jpeg: &[u8]) -> CoreResult<DecodedImage> {
    let mut decoder = ZuneDecoder::new(jpeg);

    let pixels = decoder
        .decode()
        .map_err(|e| CoreError::Decode(format!("Failed to decode JPEG: {:?}", e)))?;

    let info = decoder
        .info()
        .ok_or_else(|| CoreError::Decode("Failed to get image info".into()))?;

    let width = info.width as u32;
    let height = info.height as u32;

    let rgb = if info.components == 1 {
        pixels.iter().flat_map(|&gray| [gray, gray, gray]).collect()
    } else {
        pixels
    };

    Ok(DecodedImage::new(rgb, width, height, PixelFormat::Rgb8))
}

/// Largest size with the source aspect ratio that fits the target box.
/// Never upscales.
pub fn fit_within(width: u32, height: u32, target: TargetSize) -> (u32, u32) {
    if target.is_full() || width == 0 || height == 0 {
        return (width, height);
    }
    if width <= target.width && height <= target.height {
        return (width, height);
    }
    let scale = (target.width as f64 / width as f64).min(target.height as f64 / height as f64);
    let w = ((width as f64 * scale).round() as u32).clamp(1, target.width);
    let h = ((height as f64 * scale).round() as u32).clamp(1, target.height);
    (w, h)
}

/// Nearest-neighbour resample to `width` x `height`, tightly packed.
pub fn resample_nearest(image: &DecodedImage, width: u32, height: u32) -> DecodedImage {
    let bpp = image.format.bytes_per_pixel();
    let mut out = Vec::with_capacity(width as usize * height as usize * bpp);
    for y in 0..height as usize {
        let src_y = y * image.height as usize / height as usize;
        let row = &image.data[src_y * image.stride..];
        for x in 0..width as usize {
            let src_x = x * image.width as usize / width as usize;
            out.extend_from_slice(&row[src_x * bpp..src_x * bpp + bpp]);
        }
    }
    DecodedImage::new(out, width, height, image.format)
}
