//! Structural comparison of generated variations against the control mask

/// Square dilation used for the tolerance band
pub mod dilation;
/// IoU, tolerant edge overlap, classification and regeneration advice
pub mod similarity;

pub use dilation::dilate_square;
pub use similarity::{
    ClassificationCuts, PixelCounts, ScoreWeights, ScoringConfig, SimilarityReport,
    StructureClass, needs_regeneration, score_masks, score_source,
};
