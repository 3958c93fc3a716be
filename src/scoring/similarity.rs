//! Structural similarity between a control mask and a generated mask
//!
//! Two signals are combined: IoU, which is strict about stroke placement and
//! thickness, and a tolerant edge overlap that only asks whether generated
//! foreground lies within a few pixels of the control strokes.

use crate::io::configuration::{
    DEFAULT_ARTISTIC_CUT, DEFAULT_EDGE_WEIGHT, DEFAULT_IOU_WEIGHT, DEFAULT_MIN_PASSING,
    DEFAULT_PRESERVED_CUT, DEFAULT_TOLERANCE_PX, DEGRADED_SCORE,
};
use crate::io::error::{PipelineError, Result, invalid_parameter};
use crate::io::fetch::{GeneratedImage, ImageFetcher, resolve_bytes};
use crate::raster::buffer::RasterImage;
use crate::raster::mask::{BinaryMask, MaskConfig, extract_mask};
use crate::scoring::dilation::dilate_square;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Three-way verdict on a combined score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StructureClass {
    /// Combined score at or above the preserved cut
    #[serde(rename = "Structure Preserved")]
    StructurePreserved,
    /// Combined score at or above the artistic cut
    #[serde(rename = "More Artistic")]
    MoreArtistic,
    /// Anything lower
    #[serde(rename = "Style Drift")]
    StyleDrift,
}

impl fmt::Display for StructureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::StructurePreserved => "Structure Preserved",
            Self::MoreArtistic => "More Artistic",
            Self::StyleDrift => "Style Drift",
        };
        f.write_str(label)
    }
}

/// Weights of the two terms in the combined score
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    /// Weight of IoU
    pub iou: f64,
    /// Weight of tolerant edge overlap
    pub edge_overlap: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            iou: DEFAULT_IOU_WEIGHT,
            edge_overlap: DEFAULT_EDGE_WEIGHT,
        }
    }
}

/// Combined-score cuts separating the three classes
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClassificationCuts {
    /// Lowest score classified as structure preserved
    pub preserved: f64,
    /// Lowest score classified as more artistic
    pub artistic: f64,
}

impl Default for ClassificationCuts {
    fn default() -> Self {
        Self {
            preserved: DEFAULT_PRESERVED_CUT,
            artistic: DEFAULT_ARTISTIC_CUT,
        }
    }
}

/// Scoring settings
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Dilation radius of the control mask, in pixels
    pub tolerance_px: u32,
    /// Combined score weights
    pub weights: ScoreWeights,
    /// Classification cuts
    pub cuts: ClassificationCuts,
    /// Passing variations below which a batch should be regenerated
    pub min_passing: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            tolerance_px: DEFAULT_TOLERANCE_PX,
            weights: ScoreWeights::default(),
            cuts: ClassificationCuts::default(),
            min_passing: DEFAULT_MIN_PASSING,
        }
    }
}

impl ScoringConfig {
    /// Check weights and cuts
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` when weights are negative or do not sum to 1,
    /// or when cuts are outside [0, 1] or out of order
    pub fn validate(&self) -> Result<()> {
        let ScoreWeights { iou, edge_overlap } = self.weights;
        if !(iou >= 0.0 && edge_overlap >= 0.0) || ((iou + edge_overlap) - 1.0).abs() > 1e-9 {
            return Err(invalid_parameter(
                "scoring.weights",
                &format!("{iou}/{edge_overlap}"),
                &"weights must be non-negative and sum to 1",
            ));
        }

        let ClassificationCuts {
            preserved,
            artistic,
        } = self.cuts;
        if !(0.0..=1.0).contains(&artistic)
            || !(0.0..=1.0).contains(&preserved)
            || artistic > preserved
        {
            return Err(invalid_parameter(
                "scoring.cuts",
                &format!("{preserved}/{artistic}"),
                &"cuts must lie in [0, 1] with artistic <= preserved",
            ));
        }
        Ok(())
    }
}

/// Raw pixel counts behind a report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PixelCounts {
    /// Foreground pixels in the control mask
    pub control_foreground: usize,
    /// Foreground pixels in the generated mask
    pub generated_foreground: usize,
    /// Pixels set in both masks
    pub intersection: usize,
    /// Pixels set in either mask
    pub union: usize,
    /// Generated foreground pixels inside the dilated control mask
    pub covered: usize,
}

/// Outcome of comparing one generated variation against the control
///
/// Created once per variation and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityReport {
    /// Intersection over union of foreground pixels
    pub iou_score: f64,
    /// Share of generated foreground within the control tolerance band
    pub edge_overlap_score: f64,
    /// Weighted combination of both scores
    pub combined_score: f64,
    /// Verdict on the combined score
    pub classification: StructureClass,
    /// Whether the combined score reaches the preserved cut
    pub structure_preserved: bool,
    /// Pixel counts for diagnostics
    pub counts: PixelCounts,
    /// Whether this is the fallback report for an unreadable image
    pub degraded: bool,
}

impl SimilarityReport {
    /// Build a report from the two metric values
    pub fn from_scores(
        iou_score: f64,
        edge_overlap_score: f64,
        counts: PixelCounts,
        config: &ScoringConfig,
    ) -> Self {
        let combined_score = combine(iou_score, edge_overlap_score, config.weights);
        let classification = classify(combined_score, config.cuts);
        Self {
            iou_score,
            edge_overlap_score,
            combined_score,
            classification,
            structure_preserved: classification == StructureClass::StructurePreserved,
            counts,
            degraded: false,
        }
    }

    /// Fallback report used when a generated image cannot be fetched or decoded
    pub fn degraded(config: &ScoringConfig) -> Self {
        let combined_score = combine(DEGRADED_SCORE, DEGRADED_SCORE, config.weights);
        Self {
            iou_score: DEGRADED_SCORE,
            edge_overlap_score: DEGRADED_SCORE,
            combined_score,
            classification: StructureClass::MoreArtistic,
            structure_preserved: false,
            counts: PixelCounts::default(),
            degraded: true,
        }
    }
}

/// Weighted sum of the two metrics
// Plain multiply-add keeps the result identical to the documented formula
#[allow(clippy::suboptimal_flops)]
pub fn combine(iou: f64, edge_overlap: f64, weights: ScoreWeights) -> f64 {
    weights.iou * iou + weights.edge_overlap * edge_overlap
}

/// Classify a combined score against the cuts
pub fn classify(combined_score: f64, cuts: ClassificationCuts) -> StructureClass {
    if combined_score >= cuts.preserved {
        StructureClass::StructurePreserved
    } else if combined_score >= cuts.artistic {
        StructureClass::MoreArtistic
    } else {
        StructureClass::StyleDrift
    }
}

fn ensure_same_dimensions(control: &BinaryMask, generated: &BinaryMask) -> Result<()> {
    if control.dimensions() == generated.dimensions() {
        Ok(())
    } else {
        Err(PipelineError::MaskDimensionMismatch {
            control: control.dimensions(),
            generated: generated.dimensions(),
        })
    }
}

/// Intersection over union, 0 when both masks are empty
///
/// # Errors
///
/// Returns `MaskDimensionMismatch` if the masks differ in size
pub fn iou(control: &BinaryMask, generated: &BinaryMask) -> Result<f64> {
    ensure_same_dimensions(control, generated)?;
    Ok(ratio(
        control.intersection_count(generated),
        control.union_count(generated),
    ))
}

/// Share of generated foreground lying inside the control mask dilated by
/// `radius`, 0 when the generated mask is empty
///
/// # Errors
///
/// Returns `MaskDimensionMismatch` if the masks differ in size
pub fn edge_overlap(control: &BinaryMask, generated: &BinaryMask, radius: u32) -> Result<f64> {
    ensure_same_dimensions(control, generated)?;
    let band = dilate_square(control, radius);
    Ok(ratio(band.intersection_count(generated), generated.count()))
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Compare two masks of identical dimensions
///
/// # Errors
///
/// Returns `MaskDimensionMismatch` if the masks differ in size
pub fn score_masks(
    control: &BinaryMask,
    generated: &BinaryMask,
    config: &ScoringConfig,
) -> Result<SimilarityReport> {
    ensure_same_dimensions(control, generated)?;

    let band = dilate_square(control, config.tolerance_px);
    let counts = PixelCounts {
        control_foreground: control.count(),
        generated_foreground: generated.count(),
        intersection: control.intersection_count(generated),
        union: control.union_count(generated),
        covered: band.intersection_count(generated),
    };

    let iou_score = ratio(counts.intersection, counts.union);
    let edge_overlap_score = ratio(counts.covered, counts.generated_foreground);
    Ok(SimilarityReport::from_scores(
        iou_score,
        edge_overlap_score,
        counts,
        config,
    ))
}

/// Decode a generated image, mask it and compare it with the control mask
///
/// # Errors
///
/// Returns `DecodeFailure` for undecodable bytes and `MaskDimensionMismatch`
/// when the comparison size differs from the control mask
pub fn score_bytes(
    control: &BinaryMask,
    bytes: &[u8],
    mask_config: &MaskConfig,
    config: &ScoringConfig,
) -> Result<SimilarityReport> {
    let image = RasterImage::from_bytes(bytes)?;
    let generated = extract_mask(&image, mask_config.generated_mode, mask_config.size);
    score_masks(control, &generated, config)
}

/// Score a generated image wherever it lives, never failing
///
/// Fetch and decode failures produce the degraded report so a single bad
/// download cannot abort scoring of a whole batch.
pub fn score_source(
    control: &BinaryMask,
    source: &GeneratedImage,
    fetcher: &dyn ImageFetcher,
    mask_config: &MaskConfig,
    config: &ScoringConfig,
) -> SimilarityReport {
    let scored = resolve_bytes(source, fetcher)
        .and_then(|bytes| score_bytes(control, &bytes, mask_config, config));

    match scored {
        Ok(report) => report,
        Err(error) => {
            warn!(%error, "scoring fell back to the degraded report");
            SimilarityReport::degraded(config)
        }
    }
}

/// Whether fewer than `min_passing` reports preserved structure
///
/// Also returns the indices of the passing reports.
pub fn needs_regeneration(reports: &[SimilarityReport], min_passing: usize) -> (bool, Vec<usize>) {
    let passing: Vec<usize> = reports
        .iter()
        .enumerate()
        .filter(|(_, report)| report.structure_preserved)
        .map(|(index, _)| index)
        .collect();
    (passing.len() < min_passing, passing)
}
