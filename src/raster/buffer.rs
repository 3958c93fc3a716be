//! In-memory RGBA pixel buffers shared by every raster stage

use crate::io::error::{PipelineError, Result, rasterization_failure};
use image::{GrayImage, ImageFormat, RgbaImage};
use std::io::Cursor;

/// Inclusive pixel rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBounds {
    /// Leftmost column
    pub min_x: u32,
    /// Topmost row
    pub min_y: u32,
    /// Rightmost column
    pub max_x: u32,
    /// Bottom row
    pub max_y: u32,
}

impl PixelBounds {
    /// Whether the rectangle keeps at least one pixel of margin on every side
    pub const fn strictly_inside(&self, width: u32, height: u32) -> bool {
        self.min_x > 0 && self.min_y > 0 && self.max_x + 1 < width && self.max_y + 1 < height
    }
}

/// RGBA8 image together with the encoding it came from or will be written in
///
/// Owned exclusively by the operation that produced it.
#[derive(Debug, Clone)]
pub struct RasterImage {
    pixels: RgbaImage,
    format: ImageFormat,
}

impl RasterImage {
    /// Wrap a pixel buffer destined for PNG encoding
    pub const fn new(pixels: RgbaImage) -> Self {
        Self {
            pixels,
            format: ImageFormat::Png,
        }
    }

    /// Decode an encoded image of any supported format
    ///
    /// # Errors
    ///
    /// Returns `DecodeFailure` if the bytes are not a decodable image
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let format = image::guess_format(bytes)?;
        let decoded = image::load_from_memory_with_format(bytes, format)
            .map_err(|e| PipelineError::DecodeFailure { source: e })?;
        Ok(Self {
            pixels: decoded.to_rgba8(),
            format,
        })
    }

    /// Width in pixels
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Encoding format tag
    pub const fn format(&self) -> ImageFormat {
        self.format
    }

    /// Borrow the pixel buffer
    pub const fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Consume and return the pixel buffer
    pub fn into_pixels(self) -> RgbaImage {
        self.pixels
    }

    /// Single-channel intensity view
    pub fn to_luma(&self) -> GrayImage {
        image::imageops::grayscale(&self.pixels)
    }

    /// Number of pixels whose intensity exceeds `threshold`
    pub fn count_above(&self, threshold: u8) -> usize {
        self.to_luma().pixels().filter(|p| p.0[0] > threshold).count()
    }

    /// Smallest rectangle containing every pixel brighter than `threshold`
    pub fn foreground_bounds(&self, threshold: u8) -> Option<PixelBounds> {
        let mut bounds: Option<PixelBounds> = None;
        for (x, y, pixel) in self.to_luma().enumerate_pixels() {
            if pixel.0[0] <= threshold {
                continue;
            }
            bounds = Some(match bounds {
                None => PixelBounds {
                    min_x: x,
                    min_y: y,
                    max_x: x,
                    max_y: y,
                },
                Some(b) => PixelBounds {
                    min_x: b.min_x.min(x),
                    min_y: b.min_y.min(y),
                    max_x: b.max_x.max(x),
                    max_y: b.max_y.max(y),
                },
            });
        }
        bounds
    }

    /// Encode as PNG
    ///
    /// # Errors
    ///
    /// Returns `RasterizationFailure` if the encoder rejects the buffer
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        self.pixels
            .write_to(&mut cursor, ImageFormat::Png)
            .map_err(|e| rasterization_failure("encode", &e))?;
        Ok(cursor.into_inner())
    }
}
