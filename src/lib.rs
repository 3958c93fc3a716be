//! Structure-preserving conditioning images and similarity scoring for line-art sigils
//!
//! A vector sigil is normalized into thick single-color strokes, rendered,
//! and turned into a binary edge map that an external generative model uses as
//! its conditioning input. Each generated variation is then masked and compared
//! pixel by pixel with the original render to decide whether the sigil's
//! structure survived restyling.

#![forbid(unsafe_code)]

/// Input/output operations, configuration and error handling
pub mod io;
/// Batch orchestration around the external generator
pub mod pipeline;
/// Rendering, edge detection and mask extraction
pub mod raster;
/// Mask comparison and classification
pub mod scoring;
/// Vector markup normalization
pub mod vector;

pub use io::error::{PipelineError, Result};
