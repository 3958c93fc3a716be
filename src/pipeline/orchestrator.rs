//! Batch coordination: one conditioning image, N generations, N scores
//!
//! The control image is prepared once and must fully succeed before any
//! generation starts. Generation calls run on their own pool, bounded by the
//! provider ceiling. Scoring runs on a second, smaller pool so that only a few
//! large decodes are in memory at once, and the whole scoring phase is bounded
//! by a wall-clock budget. A panic inside a generator call or a scoring task
//! is contained to its variation.

use crate::io::configuration::{
    DEFAULT_BASE_SEED, DEFAULT_GENERATION_CONCURRENCY, DEFAULT_SCORING_BUDGET_MS,
    DEFAULT_SCORING_CONCURRENCY, DEFAULT_VARIATIONS, PipelineConfig,
};
use crate::io::error::{PipelineError, Result, invalid_parameter};
use crate::io::fetch::{GeneratedImage, ImageFetcher, resolve_bytes};
use crate::pipeline::generation::{
    GenerationRequest, ImageGenerator, Prompt, build_requests, variation_seeds,
};
use crate::raster::buffer::RasterImage;
use crate::raster::edges::{EdgeMap, generate_edge_map};
use crate::raster::mask::{BinaryMask, MaskConfig, extract_mask};
use crate::raster::rasterizer::rasterize;
use crate::scoring::similarity::{ScoringConfig, SimilarityReport, score_bytes};
use crate::vector::preprocess::{PreprocessConfig, VectorDocument, preprocess_markup};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Batch size, concurrency ceilings and scoring budget
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Variations requested per batch
    pub variations: usize,
    /// Simultaneous generator calls, set to the provider's ceiling
    pub generation_concurrency: usize,
    /// Simultaneous decode-and-score tasks
    pub scoring_concurrency: usize,
    /// Wall-clock budget for the whole scoring phase
    pub scoring_budget_ms: u64,
    /// Seed the per-variation seeds derive from
    pub base_seed: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            variations: DEFAULT_VARIATIONS,
            generation_concurrency: DEFAULT_GENERATION_CONCURRENCY,
            scoring_concurrency: DEFAULT_SCORING_CONCURRENCY,
            scoring_budget_ms: DEFAULT_SCORING_BUDGET_MS,
            base_seed: DEFAULT_BASE_SEED,
        }
    }
}

impl OrchestratorConfig {
    /// Check counts and budget
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` when any count or the budget is zero
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("orchestrator.variations", self.variations),
            (
                "orchestrator.generation_concurrency",
                self.generation_concurrency,
            ),
            ("orchestrator.scoring_concurrency", self.scoring_concurrency),
        ];
        for (parameter, value) in checks {
            if value == 0 {
                return Err(invalid_parameter(parameter, &value, &"must be at least 1"));
            }
        }
        if self.scoring_budget_ms == 0 {
            return Err(invalid_parameter(
                "orchestrator.scoring_budget_ms",
                &self.scoring_budget_ms,
                &"must be positive",
            ));
        }
        Ok(())
    }

    /// Scoring budget as a duration
    pub const fn scoring_budget(&self) -> Duration {
        Duration::from_millis(self.scoring_budget_ms)
    }
}

/// Everything derived from the vector input before generation
///
/// Immutable after preparation; the PNG and the mask are shared by every
/// variation of the batch.
#[derive(Debug, Clone)]
pub struct ControlImage {
    document: VectorDocument,
    edge_map: EdgeMap,
    control_png: Arc<[u8]>,
    mask: Arc<BinaryMask>,
}

impl ControlImage {
    /// Normalized vector document
    pub const fn document(&self) -> &VectorDocument {
        &self.document
    }

    /// Edge map handed to the generator
    pub const fn edge_map(&self) -> &EdgeMap {
        &self.edge_map
    }

    /// PNG encoding of the edge map
    pub fn control_png(&self) -> &[u8] {
        &self.control_png
    }

    /// Mask of the rendered sigil on the comparison canvas
    pub fn mask(&self) -> &BinaryMask {
        &self.mask
    }
}

/// Scored variation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariationReport {
    /// Position in the batch
    pub index: usize,
    /// Seed the generator was asked to use, absent for caller-supplied images
    pub seed: Option<u64>,
    /// Similarity against the control mask
    pub report: SimilarityReport,
}

/// Variation excluded from scoring
#[derive(Debug)]
pub struct VariationFailure {
    /// Position in the batch
    pub index: usize,
    /// Why it was excluded
    pub error: PipelineError,
}

/// Result of a batch
///
/// Reports and failures are both ordered by batch index, independent of the
/// order in which work completed.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Scored variations
    pub reports: Vec<VariationReport>,
    /// Excluded variations
    pub failures: Vec<VariationFailure>,
    /// Batch index of the highest combined score, lowest index on ties
    pub best_index: Option<usize>,
    /// Variations whose structure was preserved
    pub passing_count: usize,
}

impl BatchOutcome {
    fn assemble(scored: BTreeMap<usize, Result<VariationReport>>) -> Self {
        let mut outcome = Self::default();
        for (index, result) in scored {
            match result {
                Ok(report) => outcome.reports.push(report),
                Err(error) => outcome.failures.push(VariationFailure { index, error }),
            }
        }

        let mut best: Option<&VariationReport> = None;
        for candidate in &outcome.reports {
            if best.is_none_or(|b| candidate.report.combined_score > b.report.combined_score) {
                best = Some(candidate);
            }
        }
        outcome.best_index = best.map(|b| b.index);
        outcome.passing_count = outcome
            .reports
            .iter()
            .filter(|v| v.report.structure_preserved)
            .count();
        outcome
    }

    /// The best scored variation, if any was scored
    pub fn best(&self) -> Option<&VariationReport> {
        let index = self.best_index?;
        self.reports.iter().find(|v| v.index == index)
    }

    /// Whether too few variations preserved structure
    pub const fn needs_regeneration(&self, min_passing: usize) -> bool {
        self.passing_count < min_passing
    }
}

/// Whether a slot holds a report whose structure was preserved
fn is_passing(slot: &Result<VariationReport>) -> bool {
    matches!(slot, Ok(v) if v.report.structure_preserved)
}

/// Keep the stronger of two results for the same variation
///
/// Any report beats a failure; between two reports the higher combined score
/// wins and the earlier one is kept on ties.
fn keep_better(
    current: Option<Result<VariationReport>>,
    candidate: Result<VariationReport>,
) -> Result<VariationReport> {
    match (current, candidate) {
        (Some(Ok(old)), Ok(new)) if new.report.combined_score <= old.report.combined_score => {
            Ok(old)
        }
        (Some(Ok(old)), Err(error)) => {
            debug!(variation = old.index, %error, "retry failed, keeping earlier report");
            Ok(old)
        }
        (_, candidate) => candidate,
    }
}

/// Drives preparation, generation and scoring for batches of variations
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    generator: Option<Arc<dyn ImageGenerator>>,
    fetcher: Arc<dyn ImageFetcher>,
    generation_pool: ThreadPool,
    scoring_pool: ThreadPool,
}

impl PipelineOrchestrator {
    /// Validate the configuration and build both worker pools
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for an invalid configuration or when a pool
    /// cannot be created
    pub fn new(config: PipelineConfig, fetcher: Arc<dyn ImageFetcher>) -> Result<Self> {
        config.validate()?;
        let generation_pool = build_pool(
            "orchestrator.generation_concurrency",
            config.orchestrator.generation_concurrency,
            "sigil-generate",
        )?;
        let scoring_pool = build_pool(
            "orchestrator.scoring_concurrency",
            config.orchestrator.scoring_concurrency,
            "sigil-score",
        )?;
        Ok(Self {
            config,
            generator: None,
            fetcher,
            generation_pool,
            scoring_pool,
        })
    }

    /// Attach the external generator used by [`Self::run`]
    #[must_use]
    pub fn with_generator(mut self, generator: Arc<dyn ImageGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Active configuration
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Preprocess, rasterize and edge-detect the sigil, then mask the render
    ///
    /// # Errors
    ///
    /// Returns `InvalidMarkup` or `RasterizationFailure`; both abort the batch
    pub fn prepare(&self, markup: &str) -> Result<ControlImage> {
        prepare_control(markup, &self.config)
    }

    /// Run a full batch: prepare once, generate N variations, score them
    ///
    /// # Errors
    ///
    /// Returns preparation errors, or `InvalidParameter` when no generator is
    /// attached; per-variation failures are recorded in the outcome
    #[instrument(skip_all, fields(variations = self.config.orchestrator.variations))]
    pub fn run(&self, markup: &str, prompt: &Prompt) -> Result<BatchOutcome> {
        let control = self.prepare(markup)?;
        self.run_with_control(&control, prompt)
    }

    /// Generate and score a batch against an already prepared control image
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` when no generator is attached
    #[instrument(skip_all)]
    pub fn run_with_control(&self, control: &ControlImage, prompt: &Prompt) -> Result<BatchOutcome> {
        let generator = self.attached_generator()?;
        let orchestrator = &self.config.orchestrator;
        let requests = build_requests(
            prompt,
            &control.control_png,
            orchestrator.base_seed,
            orchestrator.variations,
        );

        let scored = self.generate_and_score(generator, control, &requests);
        let outcome = BatchOutcome::assemble(scored);
        info!(
            scored = outcome.reports.len(),
            failed = outcome.failures.len(),
            passing = outcome.passing_count,
            best = ?outcome.best_index,
            "batch complete"
        );
        Ok(outcome)
    }

    /// Run a batch and regenerate variations until enough preserve structure
    ///
    /// The control image is prepared once. After each attempt, every variation
    /// that failed or did not preserve structure is generated again with a
    /// fresh seed, as long as fewer than `scoring.min_passing` variations pass
    /// and attempts remain. Each variation keeps its best result across
    /// attempts.
    ///
    /// # Errors
    ///
    /// Returns preparation errors, or `InvalidParameter` when no generator is
    /// attached or `max_attempts` is zero
    #[instrument(skip_all, fields(max_attempts = max_attempts))]
    pub fn run_with_retry(
        &self,
        markup: &str,
        prompt: &Prompt,
        max_attempts: usize,
    ) -> Result<BatchOutcome> {
        if max_attempts == 0 {
            return Err(invalid_parameter(
                "max_attempts",
                &max_attempts,
                &"must be at least 1",
            ));
        }
        let generator = self.attached_generator()?;
        let control = self.prepare(markup)?;

        let orchestrator = &self.config.orchestrator;
        let variations = orchestrator.variations;
        let min_passing = self.config.scoring.min_passing;
        // Attempt k draws the seeds at positions k*N..(k+1)*N of one stream,
        // so the first attempt matches a plain run
        let seeds = variation_seeds(orchestrator.base_seed, variations * max_attempts);
        let prompt = Arc::new(prompt.clone());

        let mut slots: BTreeMap<usize, Result<VariationReport>> = BTreeMap::new();
        let mut pending: Vec<usize> = (0..variations).collect();
        for attempt in 0..max_attempts {
            let requests: Vec<GenerationRequest> = pending
                .iter()
                .filter_map(|&variation| {
                    seeds.get(attempt * variations + variation).map(|&seed| GenerationRequest {
                        variation,
                        seed,
                        prompt: Arc::clone(&prompt),
                        control_png: Arc::clone(&control.control_png),
                    })
                })
                .collect();

            for (index, result) in self.generate_and_score(generator, &control, &requests) {
                let kept = keep_better(slots.remove(&index), result);
                slots.insert(index, kept);
            }

            let passing = slots.values().filter(|slot| is_passing(slot)).count();
            if passing >= min_passing {
                debug!(attempt, passing, "enough variations preserved structure");
                break;
            }
            pending = slots
                .iter()
                .filter(|(_, slot)| !is_passing(slot))
                .map(|(&index, _)| index)
                .collect();
            if attempt + 1 < max_attempts {
                info!(
                    attempt,
                    passing,
                    min_passing,
                    regenerating = pending.len(),
                    "too few variations preserved structure"
                );
            }
        }

        let outcome = BatchOutcome::assemble(slots);
        info!(
            scored = outcome.reports.len(),
            failed = outcome.failures.len(),
            passing = outcome.passing_count,
            best = ?outcome.best_index,
            "batch complete"
        );
        Ok(outcome)
    }

    /// Score caller-supplied images against a prepared control image
    ///
    /// Sources that could not be loaded are recorded as failures at their
    /// index. `on_scored` is called with the batch index as each variation
    /// finishes, on the calling thread.
    #[instrument(skip_all, fields(images = sources.len()))]
    pub fn score_generated(
        &self,
        control: &ControlImage,
        sources: Vec<Result<GeneratedImage>>,
        on_scored: &mut dyn FnMut(usize),
    ) -> BatchOutcome {
        let mut failed = BTreeMap::new();
        let mut jobs = Vec::with_capacity(sources.len());
        for (index, source) in sources.into_iter().enumerate() {
            match source {
                Ok(source) => jobs.push(ScoringJob {
                    index,
                    seed: None,
                    source,
                }),
                Err(error) => {
                    warn!(variation = index, %error, "generated image unavailable");
                    failed.insert(index, Err(error));
                    on_scored(index);
                }
            }
        }

        let mut scored = self.score_jobs(control, jobs, on_scored);
        scored.append(&mut failed);
        BatchOutcome::assemble(scored)
    }

    fn attached_generator(&self) -> Result<&dyn ImageGenerator> {
        self.generator.as_deref().ok_or_else(|| {
            invalid_parameter("generator", &"none", &"attach a generator before running a batch")
        })
    }

    /// Generate every request, then score what came back, keyed by variation
    fn generate_and_score(
        &self,
        generator: &dyn ImageGenerator,
        control: &ControlImage,
        requests: &[GenerationRequest],
    ) -> BTreeMap<usize, Result<VariationReport>> {
        let generated = self.generate_all(generator, requests);
        let mut failed = BTreeMap::new();
        let mut jobs = Vec::with_capacity(generated.len());
        for (request, result) in requests.iter().zip(generated) {
            match result {
                Ok(image) => jobs.push(ScoringJob {
                    index: request.variation,
                    seed: Some(request.seed),
                    source: image,
                }),
                Err(error) => {
                    warn!(variation = request.variation, %error, "generation failed");
                    failed.insert(request.variation, Err(error));
                }
            }
        }

        let mut scored = self.score_jobs(control, jobs, &mut |_| {});
        scored.append(&mut failed);
        scored
    }

    fn generate_all(
        &self,
        generator: &dyn ImageGenerator,
        requests: &[GenerationRequest],
    ) -> Vec<Result<GeneratedImage>> {
        self.generation_pool.install(|| {
            requests
                .par_iter()
                .map(|request| {
                    debug!(variation = request.variation, seed = request.seed, "generating");
                    catch_unwind(AssertUnwindSafe(|| generator.generate(request)))
                        .unwrap_or_else(|payload| {
                            let message = panic_message(payload.as_ref());
                            Err(PipelineError::GenerationFailure {
                                variation: request.variation,
                                reason: format!("generator panicked: {message}"),
                            })
                        })
                })
                .collect()
        })
    }

    fn score_jobs(
        &self,
        control: &ControlImage,
        jobs: Vec<ScoringJob>,
        on_scored: &mut dyn FnMut(usize),
    ) -> BTreeMap<usize, Result<VariationReport>> {
        let budget = self.config.orchestrator.scoring_budget();
        let deadline = Instant::now() + budget;
        let cancelled = Arc::new(AtomicBool::new(false));
        let (sender, receiver) = mpsc::channel();

        let mut pending = BTreeSet::new();
        for job in jobs {
            pending.insert(job.index);
            let sender = sender.clone();
            let cancelled = Arc::clone(&cancelled);
            let mask = Arc::clone(&control.mask);
            let fetcher = Arc::clone(&self.fetcher);
            let mask_config = self.config.mask;
            let scoring_config = self.config.scoring;

            self.scoring_pool.spawn(move || {
                if cancelled.load(Ordering::Acquire) {
                    return;
                }
                let result = catch_unwind(AssertUnwindSafe(|| {
                    score_job(&job, &mask, fetcher.as_ref(), &mask_config, &scoring_config)
                }))
                .unwrap_or_else(|payload| {
                    Err(PipelineError::ScoringPanicked {
                        variation: job.index,
                        reason: panic_message(payload.as_ref()),
                    })
                });
                let _ = sender.send((job.index, result));
            });
        }
        drop(sender);

        let mut scored = BTreeMap::new();
        while !pending.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match receiver.recv_timeout(remaining) {
                Ok((index, result)) => {
                    pending.remove(&index);
                    if let Err(error) = &result {
                        warn!(variation = index, %error, "variation excluded from scoring");
                    }
                    scored.insert(index, result);
                    on_scored(index);
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => break,
            }
        }
        cancelled.store(true, Ordering::Release);

        let budget_ms = self.config.orchestrator.scoring_budget_ms;
        for index in pending {
            warn!(variation = index, budget_ms, "scoring budget exhausted");
            scored.insert(
                index,
                Err(PipelineError::ScoringTimedOut {
                    variation: index,
                    budget_ms,
                }),
            );
        }
        scored
    }
}

struct ScoringJob {
    index: usize,
    seed: Option<u64>,
    source: GeneratedImage,
}

fn score_job(
    job: &ScoringJob,
    control: &BinaryMask,
    fetcher: &dyn ImageFetcher,
    mask_config: &MaskConfig,
    scoring_config: &ScoringConfig,
) -> Result<VariationReport> {
    let bytes = resolve_bytes(&job.source, fetcher)?;
    let report = score_bytes(control, &bytes, mask_config, scoring_config)?;
    debug!(
        variation = job.index,
        combined = report.combined_score,
        class = %report.classification,
        "scored variation"
    );
    Ok(VariationReport {
        index: job.index,
        seed: job.seed,
        report,
    })
}

/// Text carried by a panic payload, if it was a string
fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

fn build_pool(parameter: &'static str, threads: usize, name: &'static str) -> Result<ThreadPool> {
    ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(move |i| format!("{name}-{i}"))
        .panic_handler(move |payload| {
            error!(pool = name, message = %panic_message(payload.as_ref()), "worker panicked");
        })
        .build()
        .map_err(|e| invalid_parameter(parameter, &threads, &e))
}

/// Build the shared control image for a batch
///
/// # Errors
///
/// Returns `InvalidMarkup` for unusable input and `RasterizationFailure` when
/// rendering or encoding fails
#[instrument(skip_all, fields(markup_len = markup.len()))]
pub fn prepare_control(markup: &str, config: &PipelineConfig) -> Result<ControlImage> {
    let preprocess = PreprocessConfig {
        working_size: config.raster.size,
        ..config.preprocess
    };
    let document = preprocess_markup(markup, &preprocess)?;
    let rendered: RasterImage = rasterize(&document, &config.raster)?;
    let edge_map = generate_edge_map(&rendered, &config.edges)?;
    let control_png: Arc<[u8]> = edge_map.to_png()?.into();
    let mask = extract_mask(&rendered, config.mask.control_mode, config.mask.size);

    info!(
        edge_pixels = edge_map.edge_pixel_count(),
        mask_pixels = mask.count(),
        "control image prepared"
    );
    Ok(ControlImage {
        document,
        edge_map,
        control_png,
        mask: Arc::new(mask),
    })
}
