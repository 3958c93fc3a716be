//! Pixel-side stages: rendering, edge detection and mask extraction

/// Owned RGBA buffers and PNG encoding
pub mod buffer;
/// Blur, Laplacian and threshold into a binary control image
pub mod edges;
/// Fixed, adaptive and Otsu binarization
pub mod mask;
/// SVG rendering with contain fit and sharpening
pub mod rasterizer;

pub use buffer::{PixelBounds, RasterImage};
pub use edges::{EdgeConfig, EdgeMap, generate_edge_map};
pub use mask::{BinaryMask, MaskConfig, MaskThreshold, ThresholdMode, extract_mask};
pub use rasterizer::{RasterConfig, SharpenConfig, rasterize};
