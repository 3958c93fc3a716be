//! Foreground/background segmentation of control and generated images
//!
//! Both images are first fitted into a common square comparison canvas so
//! their masks line up pixel for pixel.

use crate::io::configuration::{
    ADAPTIVE_BRIGHTNESS_FLOOR, ADAPTIVE_MEAN_FRACTION, ADAPTIVE_MIN_THRESHOLD,
    DEFAULT_FIXED_THRESHOLD, SCORING_SIZE,
};
use crate::io::error::{Result, invalid_parameter};
use crate::raster::buffer::RasterImage;
use crate::raster::rasterizer::MAX_CANVAS_SIZE;
use bitvec::prelude::*;
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use serde::Deserialize;
use tracing::trace;

/// How a mask's intensity cut is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ThresholdMode {
    /// Caller-supplied cut, for high-contrast control images
    Fixed {
        /// Pixels brighter than this are foreground
        cut: u8,
    },
    /// Cut derived from the mean of non-black pixels, for generated images
    Adaptive,
    /// Cut maximizing between-class variance of the histogram
    Otsu,
}

/// The cut a mask was actually produced with
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MaskThreshold {
    /// Caller-supplied cut
    Fixed(u8),
    /// Computed from bright pixels
    Adaptive {
        /// Cut used for binarization
        cut: f64,
        /// Mean intensity of pixels above the brightness floor
        bright_mean: f64,
    },
    /// Computed by Otsu's method
    Otsu(u8),
}

impl MaskThreshold {
    /// Intensity cut; pixels strictly above it are foreground
    pub fn cut(&self) -> f64 {
        match self {
            Self::Fixed(cut) | Self::Otsu(cut) => f64::from(*cut),
            Self::Adaptive { cut, .. } => *cut,
        }
    }
}

/// Mask extraction settings
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct MaskConfig {
    /// Side length of the square comparison canvas
    pub size: u32,
    /// Mode applied to the control image
    pub control_mode: ThresholdMode,
    /// Mode applied to generated images
    pub generated_mode: ThresholdMode,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            size: SCORING_SIZE,
            control_mode: ThresholdMode::Fixed {
                cut: DEFAULT_FIXED_THRESHOLD,
            },
            generated_mode: ThresholdMode::Adaptive,
        }
    }
}

impl MaskConfig {
    /// Check the comparison size
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for a zero or oversized comparison canvas
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 || self.size > MAX_CANVAS_SIZE {
            return Err(invalid_parameter(
                "mask.size",
                &self.size,
                &format!("must be within [1, {MAX_CANVAS_SIZE}]"),
            ));
        }
        Ok(())
    }
}

/// Per-pixel foreground flags in row-major order
///
/// Invariant: `bits.len() == width * height`.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryMask {
    width: u32,
    height: u32,
    bits: BitVec,
    threshold: MaskThreshold,
}

impl BinaryMask {
    /// Wrap existing flags
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the flag count does not match the dimensions
    pub fn from_bits(
        width: u32,
        height: u32,
        bits: BitVec,
        threshold: MaskThreshold,
    ) -> Result<Self> {
        let expected = (width as usize) * (height as usize);
        if bits.len() != expected {
            return Err(invalid_parameter(
                "mask.bits",
                &bits.len(),
                &format!("expected {expected} flags for {width}x{height}"),
            ));
        }
        Ok(Self {
            width,
            height,
            bits,
            threshold,
        })
    }

    /// Build a mask by evaluating `f(x, y)` for every pixel
    pub fn from_fn(
        width: u32,
        height: u32,
        threshold: MaskThreshold,
        mut f: impl FnMut(u32, u32) -> bool,
    ) -> Self {
        let mut bits = BitVec::with_capacity((width as usize) * (height as usize));
        for y in 0..height {
            for x in 0..width {
                bits.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            bits,
            threshold,
        }
    }

    /// Width in pixels
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Dimensions as (width, height)
    pub const fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Threshold that produced this mask
    pub const fn threshold(&self) -> MaskThreshold {
        self.threshold
    }

    /// Row-major flags
    pub fn bits(&self) -> &BitSlice {
        &self.bits
    }

    /// Foreground flag at a pixel, false outside the mask
    pub fn get(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let index = (y as usize) * (self.width as usize) + x as usize;
        self.bits.get(index).as_deref() == Some(&true)
    }

    /// Number of foreground pixels
    pub fn count(&self) -> usize {
        self.bits.count_ones()
    }

    /// Whether no pixel is foreground
    pub fn is_empty(&self) -> bool {
        self.bits.not_any()
    }

    /// Foreground pixels shared with `other`
    pub fn intersection_count(&self, other: &Self) -> usize {
        self.bits
            .iter()
            .by_vals()
            .zip(other.bits.iter().by_vals())
            .filter(|&(a, b)| a && b)
            .count()
    }

    /// Pixels that are foreground in either mask
    pub fn union_count(&self, other: &Self) -> usize {
        self.bits
            .iter()
            .by_vals()
            .zip(other.bits.iter().by_vals())
            .filter(|&(a, b)| a || b)
            .count()
    }

    /// White-on-black rendering for inspection
    pub fn to_gray_image(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            Luma([if self.get(x, y) { 255 } else { 0 }])
        })
    }
}

/// Convert an image into a mask on a `size` x `size` comparison canvas
pub fn extract_mask(image: &RasterImage, mode: ThresholdMode, size: u32) -> BinaryMask {
    let fitted = contain_resize(&image.to_luma(), size);
    binarize(&fitted, mode)
}

/// Binarize an intensity image at its current size
pub fn binarize(gray: &GrayImage, mode: ThresholdMode) -> BinaryMask {
    let threshold = match mode {
        ThresholdMode::Fixed { cut } => MaskThreshold::Fixed(cut),
        ThresholdMode::Adaptive => {
            let (cut, bright_mean) = adaptive_threshold(&intensity_histogram(gray));
            MaskThreshold::Adaptive { cut, bright_mean }
        }
        ThresholdMode::Otsu => MaskThreshold::Otsu(otsu_threshold(&intensity_histogram(gray))),
    };

    let cut = threshold.cut();
    trace!(?threshold, "binarizing");
    BinaryMask::from_fn(gray.width(), gray.height(), threshold, |x, y| {
        f64::from(gray.get_pixel(x, y).0[0]) > cut
    })
}

/// Fit an image inside a black square canvas, preserving aspect ratio
pub fn contain_resize(gray: &GrayImage, size: u32) -> GrayImage {
    let (width, height) = gray.dimensions();
    if width == size && height == size {
        return gray.clone();
    }

    let mut canvas = GrayImage::new(size, size);
    if width == 0 || height == 0 {
        return canvas;
    }

    let scale = (f64::from(size) / f64::from(width)).min(f64::from(size) / f64::from(height));
    let fitted_width = ((f64::from(width) * scale).round() as u32).clamp(1, size);
    let fitted_height = ((f64::from(height) * scale).round() as u32).clamp(1, size);
    let resized = imageops::resize(gray, fitted_width, fitted_height, FilterType::Triangle);

    let offset_x = i64::from((size - fitted_width) / 2);
    let offset_y = i64::from((size - fitted_height) / 2);
    imageops::overlay(&mut canvas, &resized, offset_x, offset_y);
    canvas
}

/// Count of pixels at each intensity level
pub fn intensity_histogram(gray: &GrayImage) -> [u64; 256] {
    let mut histogram = [0u64; 256];
    for pixel in gray.pixels() {
        if let Some(bin) = histogram.get_mut(usize::from(pixel.0[0])) {
            *bin += 1;
        }
    }
    histogram
}

/// Adaptive cut: `max(30, 0.6 * mean of pixels brighter than 10)`
///
/// Returns the cut together with the bright-pixel mean (0 when no pixel
/// clears the floor).
pub fn adaptive_threshold(histogram: &[u64; 256]) -> (f64, f64) {
    let floor = usize::from(ADAPTIVE_BRIGHTNESS_FLOOR);
    let (count, sum) = histogram
        .iter()
        .enumerate()
        .skip(floor + 1)
        .fold((0u64, 0f64), |(count, sum), (level, &n)| {
            (count + n, (level as f64).mul_add(n as f64, sum))
        });

    let bright_mean = if count == 0 { 0.0 } else { sum / count as f64 };
    let cut = (ADAPTIVE_MEAN_FRACTION * bright_mean).max(f64::from(ADAPTIVE_MIN_THRESHOLD));
    (cut, bright_mean)
}

/// Otsu's cut: the level maximizing between-class variance
///
/// Pixels strictly above the returned level form the bright class. A histogram
/// with a single occupied level has no split and yields 255.
pub fn otsu_threshold(histogram: &[u64; 256]) -> u8 {
    let total: u64 = histogram.iter().sum();
    let weighted_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(level, &n)| level as f64 * n as f64)
        .sum();

    let mut background_count = 0u64;
    let mut background_sum = 0f64;
    let mut best_level = u8::MAX;
    let mut best_variance = -1f64;

    for (level, &n) in histogram.iter().enumerate() {
        background_count += n;
        if background_count == 0 {
            continue;
        }
        let foreground_count = total - background_count;
        if foreground_count == 0 {
            break;
        }

        background_sum += level as f64 * n as f64;
        let background_mean = background_sum / background_count as f64;
        let foreground_mean = (weighted_total - background_sum) / foreground_count as f64;
        let spread = background_mean - foreground_mean;
        let variance = background_count as f64 * foreground_count as f64 * spread * spread;

        if variance > best_variance {
            best_variance = variance;
            best_level = level as u8;
        }
    }

    best_level
}
