//! Vector input handling
//!
//! This module contains the markup side of the pipeline:
//! - Color parsing for stroke and background configuration
//! - Viewbox derivation and padding
//! - Markup normalization into thick single-color line art

/// Stroke and background colors
pub mod color;
/// Markup normalization
pub mod preprocess;
/// Viewbox parsing and padding
pub mod viewbox;

pub use color::Color;
pub use preprocess::{PreprocessConfig, VectorDocument, preprocess_markup};
pub use viewbox::ViewBox;
