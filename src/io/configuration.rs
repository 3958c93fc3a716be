//! Pipeline constants, runtime configuration defaults and config file loading

use crate::io::error::{PipelineError, Result};
use crate::pipeline::orchestrator::OrchestratorConfig;
use crate::raster::edges::EdgeConfig;
use crate::raster::mask::MaskConfig;
use crate::raster::rasterizer::RasterConfig;
use crate::scoring::similarity::ScoringConfig;
use crate::vector::preprocess::PreprocessConfig;
use serde::Deserialize;
use std::path::Path;

// Canvas sizes
/// Side length of the conditioning image handed to the generator
pub const CONDITIONING_SIZE: u32 = 1024;
/// Side length both masks are resized to before comparison
pub const SCORING_SIZE: u32 = 512;

// Vector normalization
/// Stroke color forced onto every stroke-bearing element
pub const DEFAULT_STROKE_COLOR: &str = "#FFFFFF";
/// Background color of the injected canvas rectangle
pub const DEFAULT_BACKGROUND_COLOR: &str = "#000000";
/// Stroke width multiplier applied to every element
pub const DEFAULT_STROKE_MULTIPLIER: f64 = 2.0;
/// Accepted stroke multiplier range
pub const STROKE_MULTIPLIER_RANGE: (f64, f64) = (1.0, 2.5);
/// Fraction of each viewbox dimension added on both sides
pub const DEFAULT_PADDING_FRACTION: f64 = 0.12;
/// Padding fractions must stay strictly below this value
pub const PADDING_FRACTION_LIMIT: f64 = 0.5;
/// Largest padding fraction known to keep sigils legible after generation
pub const RECOMMENDED_MAX_PADDING: f64 = 0.18;
/// Stroke width given to elements that declare none, in user units
pub const DEFAULT_BASE_STROKE_WIDTH: f64 = 2.0;
/// Viewbox used when the document declares neither viewBox nor width/height
pub const DEFAULT_VIEWBOX_SIZE: f64 = 100.0;

// Sharpening
/// Gaussian sigma of the unsharp mask applied after rasterization
pub const DEFAULT_SHARPEN_SIGMA: f32 = 1.2;
/// Weight of the high-frequency component added back by the unsharp mask
pub const DEFAULT_SHARPEN_AMOUNT: f32 = 1.5;

// Edge map
/// Gaussian sigma applied before the Laplacian
pub const DEFAULT_BLUR_SIGMA: f32 = 0.5;
/// Binary cut applied to the stretched Laplacian response (0-255)
pub const DEFAULT_EDGE_THRESHOLD: u8 = 10;

// Mask extraction
/// Cut used for high-contrast control images
pub const DEFAULT_FIXED_THRESHOLD: u8 = 128;
/// Pixels at or below this intensity are excluded from the adaptive mean
pub const ADAPTIVE_BRIGHTNESS_FLOOR: u8 = 10;
/// Lowest cut the adaptive mode will ever use
pub const ADAPTIVE_MIN_THRESHOLD: u8 = 30;
/// Fraction of the bright-pixel mean used as the adaptive cut
pub const ADAPTIVE_MEAN_FRACTION: f64 = 0.6;

// Scoring
/// Square dilation radius of the control mask for edge overlap
pub const DEFAULT_TOLERANCE_PX: u32 = 3;
/// Weight of the IoU term in the combined score
pub const DEFAULT_IOU_WEIGHT: f64 = 0.7;
/// Weight of the edge overlap term in the combined score
pub const DEFAULT_EDGE_WEIGHT: f64 = 0.3;
/// Combined score at or above which structure counts as preserved
pub const DEFAULT_PRESERVED_CUT: f64 = 0.85;
/// Combined score at or above which the result counts as artistic
pub const DEFAULT_ARTISTIC_CUT: f64 = 0.70;
/// Score reported for every metric when a generated image cannot be read
pub const DEGRADED_SCORE: f64 = 0.5;

// Orchestration
/// Number of variations requested per batch
pub const DEFAULT_VARIATIONS: usize = 4;
/// Simultaneous generator calls
pub const DEFAULT_GENERATION_CONCURRENCY: usize = 4;
/// Simultaneous decode-and-score tasks
pub const DEFAULT_SCORING_CONCURRENCY: usize = 2;
/// Wall-clock budget for the whole scoring phase
pub const DEFAULT_SCORING_BUDGET_MS: u64 = 30_000;
/// Seed the per-variation seeds are derived from
pub const DEFAULT_BASE_SEED: u64 = 2000;
/// Minimum passing variations before a batch is worth regenerating
pub const DEFAULT_MIN_PASSING: usize = 2;

// Fetching
/// Timeout for a single generated-image download
pub const FETCH_TIMEOUT_MS: u64 = 20_000;
/// Redirects followed before a fetch is abandoned
pub const FETCH_MAX_REDIRECTS: u32 = 5;
/// Largest generated image accepted, in bytes
pub const FETCH_MAX_BYTES: u64 = 32 * 1024 * 1024;

// Output naming
/// Suffix appended to the input stem for written edge maps
pub const CONTROL_OUTPUT_SUFFIX: &str = "_control";

// Progress bar display settings
/// Width of progress bars in characters
pub const PROGRESS_BAR_WIDTH: u16 = 40;

/// Complete configuration for one pipeline run
///
/// Every section falls back to its defaults when omitted from a config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Vector normalization settings
    pub preprocess: PreprocessConfig,
    /// Rendering settings for the conditioning image
    pub raster: RasterConfig,
    /// Edge detection settings
    pub edges: EdgeConfig,
    /// Mask extraction settings
    pub mask: MaskConfig,
    /// Similarity scoring settings
    pub scoring: ScoringConfig,
    /// Batch orchestration settings
    pub orchestrator: OrchestratorConfig,
}

impl PipelineConfig {
    /// Parse a configuration from JSON text
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or any section fails validation
    pub fn from_json_str(json: &str, origin: &Path) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| PipelineError::ConfigParse {
                path: origin.to_path_buf(),
                source: e,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| PipelineError::FileSystem {
            path: path.to_path_buf(),
            operation: "read config",
            source: e,
        })?;
        Self::from_json_str(&json, path)
    }

    /// Check every section
    ///
    /// # Errors
    ///
    /// Returns the first `InvalidParameter` found
    pub fn validate(&self) -> Result<()> {
        self.preprocess.validate()?;
        self.raster.validate()?;
        self.edges.validate()?;
        self.mask.validate()?;
        self.scoring.validate()?;
        self.orchestrator.validate()
    }
}
