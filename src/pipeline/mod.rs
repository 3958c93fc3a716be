//! Batch orchestration around the external generator

/// Generator boundary, prompts and seed derivation
pub mod generation;
/// Control image preparation, concurrent generation and bounded scoring
pub mod orchestrator;

pub use generation::{GenerationRequest, ImageGenerator, Prompt};
pub use orchestrator::{
    BatchOutcome, ControlImage, OrchestratorConfig, PipelineOrchestrator, VariationFailure,
    VariationReport, prepare_control,
};
