//! Error types for the preprocessing, rendering and scoring stages

use std::fmt;
use std::path::PathBuf;

/// Main error type for all pipeline operations
#[derive(Debug)]
pub enum PipelineError {
    /// Vector input is empty or is not an SVG document
    InvalidMarkup {
        /// Description of what's wrong with the markup
        reason: String,
    },

    /// Converting normalized markup into pixels (or encoding them) failed
    RasterizationFailure {
        /// Stage that failed, such as "parse" or "encode"
        stage: &'static str,
        /// Description of the failure
        reason: String,
    },

    /// Generated image could not be retrieved
    ImageFetchFailure {
        /// Location the image was requested from
        url: String,
        /// HTTP status when the server answered with something other than 200
        status: Option<u16>,
        /// Description of the failure
        reason: String,
    },

    /// Downloaded or supplied bytes are not a decodable raster image
    DecodeFailure {
        /// Underlying decoder error
        source: image::ImageError,
    },

    /// The external generator did not return an image for a variation
    GenerationFailure {
        /// Request index of the variation
        variation: usize,
        /// Description reported by the generator
        reason: String,
    },

    /// A scoring task did not finish inside the batch wall-clock budget
    ScoringTimedOut {
        /// Request index of the variation
        variation: usize,
        /// Budget that was exceeded, in milliseconds
        budget_ms: u64,
    },

    /// A scoring task panicked instead of returning a result
    ScoringPanicked {
        /// Request index of the variation
        variation: usize,
        /// Panic message, when it carried one
        reason: String,
    },

    /// Configuration parameter validation failed
    InvalidParameter {
        /// Name of the invalid parameter
        parameter: &'static str,
        /// Provided value that failed validation
        value: String,
        /// Explanation of why the value is invalid
        reason: String,
    },

    /// Two masks being compared do not share dimensions
    MaskDimensionMismatch {
        /// Dimensions of the control mask (width, height)
        control: (u32, u32),
        /// Dimensions of the generated mask (width, height)
        generated: (u32, u32),
    },

    /// Configuration file could not be parsed
    ConfigParse {
        /// Path to the configuration file
        path: PathBuf,
        /// Underlying JSON error
        source: serde_json::Error,
    },

    /// Failed to save an image to disk
    ImageExport {
        /// Path where export was attempted
        path: PathBuf,
        /// Underlying image export error
        source: image::ImageError,
    },

    /// General file system operation failure
    FileSystem {
        /// Path involved in the operation
        path: PathBuf,
        /// Description of the operation that failed
        operation: &'static str,
        /// Underlying I/O error
        source: std::io::Error,
    },
}

impl PipelineError {
    /// Whether this error aborts the whole request rather than one variation
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidMarkup { .. }
                | Self::RasterizationFailure { .. }
                | Self::InvalidParameter { .. }
                | Self::ConfigParse { .. }
        )
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMarkup { reason } => {
                write!(f, "Invalid markup: {reason}")
            }
            Self::RasterizationFailure { stage, reason } => {
                write!(f, "Rasterization failed during {stage}: {reason}")
            }
            Self::ImageFetchFailure {
                url,
                status,
                reason,
            } => match status {
                Some(code) => write!(f, "Failed to fetch '{url}' (HTTP {code}): {reason}"),
                None => write!(f, "Failed to fetch '{url}': {reason}"),
            },
            Self::DecodeFailure { source } => {
                write!(f, "Failed to decode image: {source}")
            }
            Self::GenerationFailure { variation, reason } => {
                write!(f, "Generation failed for variation {variation}: {reason}")
            }
            Self::ScoringTimedOut {
                variation,
                budget_ms,
            } => {
                write!(
                    f,
                    "Scoring of variation {variation} did not finish within {budget_ms} ms"
                )
            }
            Self::ScoringPanicked { variation, reason } => {
                write!(f, "Scoring of variation {variation} panicked: {reason}")
            }
            Self::InvalidParameter {
                parameter,
                value,
                reason,
            } => {
                write!(f, "Invalid parameter '{parameter}' = '{value}': {reason}")
            }
            Self::MaskDimensionMismatch { control, generated } => {
                write!(
                    f,
                    "Mask dimensions differ: control {}x{}, generated {}x{}",
                    control.0, control.1, generated.0, generated.1
                )
            }
            Self::ConfigParse { path, source } => {
                write!(f, "Failed to parse config '{}': {source}", path.display())
            }
            Self::ImageExport { path, source } => {
                write!(
                    f,
                    "Failed to export image to '{}': {source}",
                    path.display()
                )
            }
            Self::FileSystem {
                path,
                operation,
                source,
            } => {
                write!(
                    f,
                    "File system error during {operation} on '{}': {source}",
                    path.display()
                )
            }
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::DecodeFailure { source } | Self::ImageExport { source, .. } => Some(source),
            Self::ConfigParse { source, .. } => Some(source),
            Self::FileSystem { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Convenience type alias for pipeline results
pub type Result<T> = std::result::Result<T, PipelineError>;

impl From<image::ImageError> for PipelineError {
    fn from(err: image::ImageError) -> Self {
        Self::DecodeFailure { source: err }
    }
}

/// Create an invalid parameter error
pub fn invalid_parameter(
    parameter: &'static str,
    value: &impl ToString,
    reason: &impl ToString,
) -> PipelineError {
    PipelineError::InvalidParameter {
        parameter,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Create an invalid markup error
pub fn invalid_markup(reason: &impl ToString) -> PipelineError {
    PipelineError::InvalidMarkup {
        reason: reason.to_string(),
    }
}

/// Create a rasterization error for the given stage
pub fn rasterization_failure(stage: &'static str, reason: &impl ToString) -> PipelineError {
    PipelineError::RasterizationFailure {
        stage,
        reason: reason.to_string(),
    }
}

/// Create a fetch error
pub fn fetch_failure(url: &str, status: Option<u16>, reason: &impl ToString) -> PipelineError {
    PipelineError::ImageFetchFailure {
        url: url.to_string(),
        status,
        reason: reason.to_string(),
    }
}
