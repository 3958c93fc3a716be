//! Rendering of normalized vector documents into square pixel buffers

use crate::io::configuration::{CONDITIONING_SIZE, DEFAULT_SHARPEN_AMOUNT, DEFAULT_SHARPEN_SIGMA};
use crate::io::error::{Result, invalid_parameter, rasterization_failure};
use crate::raster::buffer::RasterImage;
use crate::vector::{Color, VectorDocument};
use image::{Rgba, RgbaImage};
use imageproc::filter::gaussian_blur_f32;
use resvg::{tiny_skia, usvg};
use serde::Deserialize;
use tracing::debug;

/// Largest canvas side accepted, guards against runaway allocations
pub const MAX_CANVAS_SIZE: u32 = 8192;

/// Unsharp mask parameters
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct SharpenConfig {
    /// Gaussian sigma of the low-pass copy
    pub sigma: f32,
    /// Weight of the high-frequency detail added back
    pub amount: f32,
}

impl Default for SharpenConfig {
    fn default() -> Self {
        Self {
            sigma: DEFAULT_SHARPEN_SIGMA,
            amount: DEFAULT_SHARPEN_AMOUNT,
        }
    }
}

/// Rendering settings
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RasterConfig {
    /// Side length of the square output
    pub size: u32,
    /// Sharpening pass applied after rendering, if any
    pub sharpen: Option<SharpenConfig>,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            size: CONDITIONING_SIZE,
            sharpen: Some(SharpenConfig::default()),
        }
    }
}

impl RasterConfig {
    /// Same settings rendered at a different size
    #[must_use]
    pub const fn with_size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    /// Check size and sharpening ranges
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for a zero or oversized canvas, or a
    /// non-positive sharpening sigma
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 || self.size > MAX_CANVAS_SIZE {
            return Err(invalid_parameter(
                "raster.size",
                &self.size,
                &format!("must be within [1, {MAX_CANVAS_SIZE}]"),
            ));
        }
        if let Some(sharpen) = self.sharpen {
            if !(sharpen.sigma.is_finite() && sharpen.sigma > 0.0) {
                return Err(invalid_parameter(
                    "raster.sharpen.sigma",
                    &sharpen.sigma,
                    &"must be positive",
                ));
            }
            if !(sharpen.amount.is_finite() && sharpen.amount >= 0.0) {
                return Err(invalid_parameter(
                    "raster.sharpen.amount",
                    &sharpen.amount,
                    &"must be non-negative",
                ));
            }
        }
        Ok(())
    }
}

/// Render a document into a square canvas with "contain" fit
///
/// The drawing keeps its aspect ratio, is centered, and the remaining area is
/// letterboxed with the document background.
///
/// # Errors
///
/// Returns `RasterizationFailure` if the document has nothing to draw, the
/// markup fails to parse, the canvas cannot be allocated, or rendering leaves
/// the canvas blank; returns
/// `InvalidParameter` for an invalid configuration
pub fn rasterize(document: &VectorDocument, config: &RasterConfig) -> Result<RasterImage> {
    config.validate()?;
    if document.stroke_elements() == 0 {
        return Err(rasterization_failure(
            "parse",
            &"document contains no stroke-bearing elements",
        ));
    }

    let tree = usvg::Tree::from_str(document.markup(), &usvg::Options::default())
        .map_err(|e| rasterization_failure("parse", &e))?;

    let size = config.size;
    let mut pixmap = tiny_skia::Pixmap::new(size, size)
        .ok_or_else(|| rasterization_failure("allocate", &format!("{size}x{size} canvas")))?;

    if let Color::Rgb(r, g, b) = document.background() {
        pixmap.fill(tiny_skia::Color::from_rgba8(r, g, b, 255));
    }

    let tree_size = tree.size();
    let side = size as f32;
    let scale = (side / tree_size.width()).min(side / tree_size.height());
    let offset_x = tree_size.width().mul_add(-scale, side) / 2.0;
    let offset_y = tree_size.height().mul_add(-scale, side) / 2.0;
    let transform = tiny_skia::Transform::from_row(scale, 0.0, 0.0, scale, offset_x, offset_y);

    resvg::render(&tree, transform, &mut pixmap.as_mut());

    // Hidden, zero-sized or defs-only strokes parse fine but leave the canvas untouched
    let background = match document.background() {
        Color::Rgb(r, g, b) => tiny_skia::Color::from_rgba8(r, g, b, 255)
            .premultiply()
            .to_color_u8(),
        Color::Transparent => tiny_skia::PremultipliedColorU8::TRANSPARENT,
    };
    if pixmap.pixels().iter().all(|pixel| *pixel == background) {
        return Err(rasterization_failure("render", &"no stroke reached the canvas"));
    }

    let mut pixels = RgbaImage::new(size, size);
    for (dst, src) in pixels.pixels_mut().zip(pixmap.pixels()) {
        let color = src.demultiply();
        *dst = Rgba([color.red(), color.green(), color.blue(), color.alpha()]);
    }

    if let Some(sharpen) = config.sharpen {
        pixels = unsharp_mask(&pixels, sharpen);
    }

    debug!(size, scale, "rasterized vector document");
    Ok(RasterImage::new(pixels))
}

/// Sharpen color channels with `original + (original - blurred) * amount`
///
/// Alpha is left untouched.
pub fn unsharp_mask(image: &RgbaImage, config: SharpenConfig) -> RgbaImage {
    let blurred = gaussian_blur_f32(image, config.sigma);
    let mut out = image.clone();
    for (pixel, soft) in out.pixels_mut().zip(blurred.pixels()) {
        for channel in 0..3 {
            let (Some(value), Some(low)) = (pixel.0.get_mut(channel), soft.0.get(channel)) else {
                continue;
            };
            let original = f32::from(*value);
            let detail = original - f32::from(*low);
            *value = detail.mul_add(config.amount, original).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}
