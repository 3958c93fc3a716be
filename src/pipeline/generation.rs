//! Boundary to the external image generator
//!
//! The generator itself lives outside this crate. The orchestrator only builds
//! requests, hands them over and collects whatever comes back.

use crate::io::error::Result;
use crate::io::fetch::GeneratedImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

/// Text guidance sent with every variation of a batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prompt {
    /// What the generated image should look like
    pub text: String,
    /// What the generated image should avoid
    pub negative: Option<String>,
}

impl Prompt {
    /// Prompt without negative guidance
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            negative: None,
        }
    }

    /// Attach negative guidance
    #[must_use]
    pub fn with_negative(mut self, negative: impl Into<String>) -> Self {
        self.negative = Some(negative.into());
        self
    }
}

/// A single generation call
///
/// The conditioning PNG is shared by every request of a batch.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Position of this variation in the batch
    pub variation: usize,
    /// Seed the generator should use
    pub seed: u64,
    /// Text guidance
    pub prompt: Arc<Prompt>,
    /// PNG-encoded edge map
    pub control_png: Arc<[u8]>,
}

/// External generative model producing one image per request
pub trait ImageGenerator: Send + Sync {
    /// Produce one variation
    ///
    /// # Errors
    ///
    /// Implementations return `GenerationFailure` when the model call fails;
    /// the orchestrator excludes that variation and carries on
    fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage>;
}

/// Deterministic per-variation seeds
///
/// The same base seed always yields the same sequence, and every prefix of a
/// longer batch matches a shorter batch.
pub fn variation_seeds(base_seed: u64, count: usize) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(base_seed);
    (0..count).map(|_| rng.random::<u64>()).collect()
}

/// Requests for a whole batch, in variation order
pub fn build_requests(
    prompt: &Prompt,
    control_png: &Arc<[u8]>,
    base_seed: u64,
    count: usize,
) -> Vec<GenerationRequest> {
    let prompt = Arc::new(prompt.clone());
    variation_seeds(base_seed, count)
        .into_iter()
        .enumerate()
        .map(|(variation, seed)| GenerationRequest {
            variation,
            seed,
            prompt: Arc::clone(&prompt),
            control_png: Arc::clone(control_png),
        })
        .collect()
}
