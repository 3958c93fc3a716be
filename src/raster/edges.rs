//! Binary edge maps used as generation-time control images
//!
//! Strictly ordered stages: optional Gaussian blur, 3x3 Laplacian, min-max
//! stretch of the absolute response to 0-255, binary threshold, and optional
//! polarity inversion.

use crate::io::configuration::{DEFAULT_BLUR_SIGMA, DEFAULT_EDGE_THRESHOLD};
use crate::io::error::{Result, invalid_parameter};
use crate::raster::buffer::RasterImage;
use image::{GrayImage, Rgba, RgbaImage};
use imageproc::filter::gaussian_blur_f32;
use ndarray::Array2;
use serde::Deserialize;
use tracing::debug;

/// Laplacian weights, row major (+8 center, -1 for each neighbor)
pub const LAPLACIAN_KERNEL: [[f32; 3]; 3] = [[-1.0, -1.0, -1.0], [-1.0, 8.0, -1.0], [-1.0, -1.0, -1.0]];

/// Edge detection settings
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    /// Sigma of the pre-blur, 0 disables it
    pub blur_sigma: f32,
    /// Cut applied to the stretched response (0-255)
    pub edge_threshold: u8,
    /// Emit dark edges on a light background instead of light on dark
    pub invert_output: bool,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            blur_sigma: DEFAULT_BLUR_SIGMA,
            edge_threshold: DEFAULT_EDGE_THRESHOLD,
            invert_output: false,
        }
    }
}

impl EdgeConfig {
    /// Check the blur sigma
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for a negative or non-finite sigma
    pub fn validate(&self) -> Result<()> {
        if !(self.blur_sigma.is_finite() && self.blur_sigma >= 0.0) {
            return Err(invalid_parameter(
                "edges.blur_sigma",
                &self.blur_sigma,
                &"must be a finite non-negative number",
            ));
        }
        Ok(())
    }
}

/// Two-level image tagged as a conditioning input
///
/// Produced once per request and shared read-only by every generation call.
#[derive(Debug, Clone)]
pub struct EdgeMap {
    raster: RasterImage,
    inverted: bool,
}

impl EdgeMap {
    /// Underlying pixels
    pub const fn raster(&self) -> &RasterImage {
        &self.raster
    }

    /// Whether edges are drawn dark on light
    pub const fn inverted(&self) -> bool {
        self.inverted
    }

    /// Number of pixels classified as edge, independent of polarity
    pub fn edge_pixel_count(&self) -> usize {
        let total = (self.raster.width() as usize) * (self.raster.height() as usize);
        let bright = self.raster.count_above(127);
        if self.inverted { total - bright } else { bright }
    }

    /// PNG bytes handed to the generator
    ///
    /// # Errors
    ///
    /// Returns `RasterizationFailure` if encoding fails
    pub fn to_png(&self) -> Result<Vec<u8>> {
        self.raster.to_png()
    }

    /// Consume and return the underlying raster
    pub fn into_raster(self) -> RasterImage {
        self.raster
    }
}

/// Derive a binary edge map from a raster image
///
/// # Errors
///
/// Returns `InvalidParameter` for an invalid configuration
pub fn generate_edge_map(image: &RasterImage, config: &EdgeConfig) -> Result<EdgeMap> {
    config.validate()?;

    let mut gray = image.to_luma();
    if config.blur_sigma > 0.0 {
        gray = gaussian_blur_f32(&gray, config.blur_sigma);
    }

    let response = laplacian_response(&gray);
    let stretched = stretch_to_full_range(&response);

    let (on, off) = if config.invert_output {
        (0u8, 255u8)
    } else {
        (255u8, 0u8)
    };

    let (height, width) = stretched.dim();
    let mut pixels = RgbaImage::new(width as u32, height as u32);
    let mut edge_pixels = 0usize;
    for ((y, x), &value) in stretched.indexed_iter() {
        let level = if value > config.edge_threshold {
            edge_pixels += 1;
            on
        } else {
            off
        };
        pixels.put_pixel(x as u32, y as u32, Rgba([level, level, level, 255]));
    }

    debug!(
        edge_pixels,
        threshold = config.edge_threshold,
        inverted = config.invert_output,
        "generated edge map"
    );

    Ok(EdgeMap {
        raster: RasterImage::new(pixels),
        inverted: config.invert_output,
    })
}

/// Absolute Laplacian response with replicated borders, indexed `(row, col)`
pub fn laplacian_response(gray: &GrayImage) -> Array2<f32> {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return Array2::zeros((height as usize, width as usize));
    }

    let intensity = Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
        f32::from(gray.get_pixel(x as u32, y as u32).0[0])
    });
    let max_row = intensity.nrows() - 1;
    let max_col = intensity.ncols() - 1;

    Array2::from_shape_fn(intensity.dim(), |(y, x)| {
        let mut sum = 0.0f32;
        for (ky, kernel_row) in LAPLACIAN_KERNEL.iter().enumerate() {
            let row = (y + ky).saturating_sub(1).min(max_row);
            for (kx, weight) in kernel_row.iter().enumerate() {
                let col = (x + kx).saturating_sub(1).min(max_col);
                sum += weight * intensity.get((row, col)).copied().unwrap_or(0.0);
            }
        }
        sum.abs()
    })
}

/// Min-max stretch of a response to 0-255
///
/// A constant response maps to all zeros.
pub fn stretch_to_full_range(response: &Array2<f32>) -> Array2<u8> {
    let (min, max) = response
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });

    let range = max - min;
    if !range.is_finite() || range <= f32::EPSILON {
        return Array2::zeros(response.dim());
    }

    response.mapv(|v| ((v - min) / range * 255.0).round().clamp(0.0, 255.0) as u8)
}
