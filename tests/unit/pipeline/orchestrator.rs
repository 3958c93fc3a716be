//! Tests for batch orchestration: preparation, partial failures, ordering and the scoring budget

#[cfg(test)]
mod tests {
    use image::{Rgba, RgbaImage};
    use sigilguard::PipelineError;
    use sigilguard::io::configuration::PipelineConfig;
    use sigilguard::io::error::fetch_failure;
    use sigilguard::io::fetch::{GeneratedImage, ImageFetcher};
    use sigilguard::pipeline::generation::variation_seeds;
    use sigilguard::pipeline::{
        GenerationRequest, ImageGenerator, OrchestratorConfig, PipelineOrchestrator, Prompt,
        prepare_control,
    };
    use sigilguard::raster::{MaskConfig, RasterConfig, RasterImage, ThresholdMode, rasterize};
    use sigilguard::vector::PreprocessConfig;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    const CIRCLE: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 100 100"><circle cx="50" cy="50" r="40"/></svg>"#;

    /// Generator answering every request with a URL naming its variation
    struct UrlGenerator {
        failing: Vec<usize>,
    }

    impl ImageGenerator for UrlGenerator {
        fn generate(&self, request: &GenerationRequest) -> sigilguard::Result<GeneratedImage> {
            if self.failing.contains(&request.variation) {
                return Err(PipelineError::GenerationFailure {
                    variation: request.variation,
                    reason: "provider rejected the request".to_string(),
                });
            }
            Ok(GeneratedImage::Url(format!("mem://{}", request.variation)))
        }
    }

    /// Generator whose URL changes with each attempt at a variation
    ///
    /// Attempt `k` of variation `v` answers `mem://{v + 10k}`; variations in
    /// `fail_first` return an error on their first attempt.
    #[derive(Default)]
    struct AttemptGenerator {
        fail_first: Vec<usize>,
        calls: Mutex<HashMap<usize, usize>>,
        seeds: Mutex<Vec<(usize, u64)>>,
    }

    impl AttemptGenerator {
        fn failing_first(fail_first: Vec<usize>) -> Self {
            Self {
                fail_first,
                ..Self::default()
            }
        }

        fn calls_for(&self, variation: usize) -> usize {
            self.calls
                .lock()
                .expect("lock is not poisoned")
                .get(&variation)
                .copied()
                .unwrap_or(0)
        }
    }

    impl ImageGenerator for AttemptGenerator {
        fn generate(&self, request: &GenerationRequest) -> sigilguard::Result<GeneratedImage> {
            let attempt = {
                let mut calls = self.calls.lock().expect("lock is not poisoned");
                let count = calls.entry(request.variation).or_insert(0);
                *count += 1;
                *count - 1
            };
            self.seeds
                .lock()
                .expect("lock is not poisoned")
                .push((request.variation, request.seed));
            if attempt == 0 && self.fail_first.contains(&request.variation) {
                return Err(PipelineError::GenerationFailure {
                    variation: request.variation,
                    reason: "provider timed out".to_string(),
                });
            }
            Ok(GeneratedImage::Url(format!("mem://{}", request.variation + 10 * attempt)))
        }
    }

    /// Generator that unwinds for one variation
    struct CrashingGenerator {
        crashing: usize,
    }

    impl ImageGenerator for CrashingGenerator {
        fn generate(&self, request: &GenerationRequest) -> sigilguard::Result<GeneratedImage> {
            if request.variation == self.crashing {
                std::panic::resume_unwind(Box::new("generator crashed"));
            }
            Ok(GeneratedImage::Url(format!("mem://{}", request.variation)))
        }
    }

    /// Fetcher that unwinds for every request
    struct CrashingFetcher;

    impl ImageFetcher for CrashingFetcher {
        fn fetch(&self, _url: &str) -> sigilguard::Result<Vec<u8>> {
            std::panic::resume_unwind(Box::new(String::from("fetcher crashed")))
        }
    }

    /// In-memory fetcher with per-URL bodies, delays and missing entries
    #[derive(Default)]
    struct MemoryFetcher {
        bodies: HashMap<String, Vec<u8>>,
        delays: HashMap<String, Duration>,
        requested: Mutex<Vec<String>>,
    }

    impl MemoryFetcher {
        fn serve(mut self, variation: usize, body: Vec<u8>) -> Self {
            self.bodies.insert(format!("mem://{variation}"), body);
            self
        }

        fn delay(mut self, variation: usize, delay: Duration) -> Self {
            self.delays.insert(format!("mem://{variation}"), delay);
            self
        }
    }

    impl ImageFetcher for MemoryFetcher {
        fn fetch(&self, url: &str) -> sigilguard::Result<Vec<u8>> {
            self.requested
                .lock()
                .expect("lock is not poisoned")
                .push(url.to_string());
            if let Some(delay) = self.delays.get(url) {
                thread::sleep(*delay);
            }
            self.bodies
                .get(url)
                .cloned()
                .ok_or_else(|| fetch_failure(url, Some(404), &"not found"))
        }
    }

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            raster: RasterConfig {
                size: 128,
                sharpen: None,
            },
            mask: MaskConfig {
                size: 64,
                control_mode: ThresholdMode::Fixed { cut: 128 },
                generated_mode: ThresholdMode::Fixed { cut: 128 },
            },
            orchestrator: OrchestratorConfig {
                variations: 4,
                ..OrchestratorConfig::default()
            },
            ..PipelineConfig::default()
        }
    }

    /// PNG of the sigil exactly as the control mask sees it
    fn faithful_png(config: &PipelineConfig) -> Vec<u8> {
        let control = prepare_control(CIRCLE, config).expect("circle prepares");
        rasterize(control.document(), &config.raster)
            .expect("renders")
            .to_png()
            .expect("encodes")
    }

    fn blank_png() -> Vec<u8> {
        RasterImage::new(RgbaImage::from_pixel(64, 64, Rgba([0, 0, 0, 255])))
            .to_png()
            .expect("encodes")
    }

    fn orchestrator(
        config: PipelineConfig,
        fetcher: MemoryFetcher,
        failing: Vec<usize>,
    ) -> PipelineOrchestrator {
        PipelineOrchestrator::new(config, Arc::new(fetcher))
            .expect("valid configuration")
            .with_generator(Arc::new(UrlGenerator { failing }))
    }

    // Tests one missing download out of four leaves three reports
    // Verified by aborting the batch on the first fetch failure
    #[test]
    fn test_fetch_failure_excluded() {
        let config = test_config();
        let faithful = faithful_png(&config);
        let fetcher = MemoryFetcher::default()
            .serve(0, faithful.clone())
            .serve(1, faithful.clone())
            .serve(3, faithful);

        let outcome = orchestrator(config, fetcher, Vec::new())
            .run(CIRCLE, &Prompt::new("stone carving"))
            .expect("batch runs");

        assert_eq!(outcome.reports.len(), 3);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].index, 2);
        assert!(matches!(
            outcome.failures[0].error,
            PipelineError::ImageFetchFailure {
                status: Some(404),
                ..
            }
        ));
        let indices: Vec<usize> = outcome.reports.iter().map(|v| v.index).collect();
        assert_eq!(indices, vec![0, 1, 3]);
    }

    // Tests generator failures are excluded without fetching anything for them
    #[test]
    fn test_generation_failure_excluded() {
        let config = test_config();
        let faithful = faithful_png(&config);
        let fetcher = (0..4).fold(MemoryFetcher::default(), |f, i| f.serve(i, faithful.clone()));
        let fetcher = Arc::new(fetcher);

        let outcome = PipelineOrchestrator::new(config, Arc::clone(&fetcher) as Arc<dyn ImageFetcher>)
            .expect("valid configuration")
            .with_generator(Arc::new(UrlGenerator { failing: vec![1] }))
            .run(CIRCLE, &Prompt::new("neon"))
            .expect("batch runs");

        assert_eq!(outcome.reports.len(), 3);
        assert_eq!(outcome.failures.len(), 1);
        assert!(matches!(
            outcome.failures[0].error,
            PipelineError::GenerationFailure { variation: 1, .. }
        ));
        let requested = fetcher.requested.lock().expect("lock is not poisoned");
        assert!(!requested.contains(&"mem://1".to_string()));
        assert_eq!(requested.len(), 3);
    }

    // Tests reports come back in batch order with seeds, and ties pick the lowest index
    // Verified by collecting reports in completion order
    #[test]
    fn test_ordering_and_best_index() {
        let config = PipelineConfig {
            orchestrator: OrchestratorConfig {
                variations: 4,
                scoring_concurrency: 4,
                ..OrchestratorConfig::default()
            },
            ..test_config()
        };
        let base_seed = config.orchestrator.base_seed;
        let faithful = faithful_png(&config);
        let fetcher = MemoryFetcher::default()
            .serve(0, blank_png())
            .serve(1, faithful.clone())
            .serve(2, faithful)
            .serve(3, blank_png())
            .delay(1, Duration::from_millis(80))
            .delay(0, Duration::from_millis(40));

        let outcome = orchestrator(config, fetcher, Vec::new())
            .run(CIRCLE, &Prompt::new("watercolor"))
            .expect("batch runs");

        let indices: Vec<usize> = outcome.reports.iter().map(|v| v.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);

        let seeds = variation_seeds(base_seed, 4);
        for report in &outcome.reports {
            assert_eq!(report.seed, Some(seeds[report.index]));
        }

        assert!((outcome.reports[1].report.combined_score - 1.0).abs() < 1e-12);
        assert!((outcome.reports[2].report.combined_score - 1.0).abs() < 1e-12);
        assert!(outcome.reports[0].report.combined_score.abs() < f64::EPSILON);
        assert_eq!(outcome.best_index, Some(1));
        assert_eq!(outcome.best().map(|v| v.index), Some(1));
        assert_eq!(outcome.passing_count, 2);
        assert!(!outcome.needs_regeneration(2));
        assert!(outcome.needs_regeneration(3));
    }

    // Tests a scoring task outliving the budget is reported as timed out
    // Verified by waiting for every task regardless of the budget
    #[test]
    fn test_scoring_budget() {
        let config = PipelineConfig {
            orchestrator: OrchestratorConfig {
                variations: 2,
                scoring_concurrency: 2,
                scoring_budget_ms: 100,
                ..OrchestratorConfig::default()
            },
            ..test_config()
        };
        let faithful = faithful_png(&config);
        let fetcher = MemoryFetcher::default()
            .serve(0, faithful.clone())
            .serve(1, faithful)
            .delay(1, Duration::from_secs(2));

        let outcome = orchestrator(config, fetcher, Vec::new())
            .run(CIRCLE, &Prompt::new("chalk"))
            .expect("batch runs");

        assert_eq!(outcome.reports.len(), 1);
        assert_eq!(outcome.reports[0].index, 0);
        assert!(matches!(
            outcome.failures[0].error,
            PipelineError::ScoringTimedOut {
                variation: 1,
                budget_ms: 100
            }
        ));
    }

    // Tests a batch with every variation failing still completes
    #[test]
    fn test_all_variations_failed() {
        let outcome = orchestrator(test_config(), MemoryFetcher::default(), Vec::new())
            .run(CIRCLE, &Prompt::new("gold leaf"))
            .expect("batch runs");

        assert!(outcome.reports.is_empty());
        assert_eq!(outcome.failures.len(), 4);
        assert_eq!(outcome.best_index, None);
        assert!(outcome.best().is_none());
        assert!(outcome.needs_regeneration(1));
    }

    // Tests running a batch without a generator is rejected
    #[test]
    fn test_run_requires_generator() {
        let orchestrator =
            PipelineOrchestrator::new(test_config(), Arc::new(MemoryFetcher::default()))
                .expect("valid configuration");
        assert!(matches!(
            orchestrator.run(CIRCLE, &Prompt::new("any")),
            Err(PipelineError::InvalidParameter {
                parameter: "generator",
                ..
            })
        ));
    }

    // Tests malformed markup aborts the batch before any generation
    #[test]
    fn test_invalid_markup_is_fatal() {
        let fetcher = Arc::new(MemoryFetcher::default());
        let orchestrator =
            PipelineOrchestrator::new(test_config(), Arc::clone(&fetcher) as Arc<dyn ImageFetcher>)
                .expect("valid configuration")
                .with_generator(Arc::new(UrlGenerator {
                    failing: Vec::new(),
                }));

        for markup in ["", "<html><body/></html>"] {
            let error = orchestrator
                .run(markup, &Prompt::new("any"))
                .expect_err("markup is rejected");
            assert!(matches!(error, PipelineError::InvalidMarkup { .. }), "{error}");
            assert!(error.is_fatal());
        }
        assert!(fetcher.requested.lock().expect("lock is not poisoned").is_empty());
    }

    // Tests an invalid configuration is rejected when the orchestrator is built
    #[test]
    fn test_invalid_configuration_rejected() {
        let config = PipelineConfig {
            orchestrator: OrchestratorConfig {
                variations: 0,
                ..OrchestratorConfig::default()
            },
            ..PipelineConfig::default()
        };
        assert!(PipelineOrchestrator::new(config, Arc::new(MemoryFetcher::default())).is_err());
        assert!(OrchestratorConfig::default().validate().is_ok());
        assert_eq!(
            OrchestratorConfig::default().scoring_budget(),
            Duration::from_secs(30)
        );
    }

    // Tests caller-supplied images are scored with progress callbacks
    #[test]
    fn test_score_generated() {
        let config = test_config();
        let faithful = faithful_png(&config);
        let orchestrator = PipelineOrchestrator::new(config, Arc::new(MemoryFetcher::default()))
            .expect("valid configuration");
        let control = orchestrator.prepare(CIRCLE).expect("circle prepares");

        let mut seen = Vec::new();
        let outcome = orchestrator.score_generated(
            &control,
            vec![
                Ok(GeneratedImage::Bytes(faithful)),
                Ok(GeneratedImage::Bytes(b"garbage".to_vec())),
            ],
            &mut |index| seen.push(index),
        );

        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1]);
        assert_eq!(outcome.reports.len(), 1);
        assert_eq!(outcome.reports[0].seed, None);
        assert!(outcome.reports[0].report.structure_preserved);
        assert!(matches!(
            outcome.failures[0].error,
            PipelineError::DecodeFailure { .. }
        ));
    }

    // Tests sources that failed to load keep their index among the scored ones
    // Verified by dropping failed sources before numbering the jobs
    #[test]
    fn test_score_generated_with_unloadable_source() {
        let config = test_config();
        let faithful = faithful_png(&config);
        let orchestrator = PipelineOrchestrator::new(config, Arc::new(MemoryFetcher::default()))
            .expect("valid configuration");
        let control = orchestrator.prepare(CIRCLE).expect("circle prepares");

        let missing = sigilguard::io::cli::parse_generated("/definitely/missing/image.png");
        let mut seen = Vec::new();
        let outcome = orchestrator.score_generated(
            &control,
            vec![missing, Ok(GeneratedImage::Bytes(faithful))],
            &mut |index| seen.push(index),
        );

        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1]);
        assert_eq!(outcome.reports.len(), 1);
        assert_eq!(outcome.reports[0].index, 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].index, 0);
        assert!(matches!(
            outcome.failures[0].error,
            PipelineError::FileSystem { .. }
        ));
        assert_eq!(outcome.best_index, Some(1));
    }

    // Tests a generator panic becomes a failure for its variation only
    // Verified by calling the generator without containing the unwind
    #[test]
    fn test_generator_panic_isolated() {
        let config = test_config();
        let faithful = faithful_png(&config);
        let fetcher = (0..4).fold(MemoryFetcher::default(), |f, i| f.serve(i, faithful.clone()));

        let outcome = PipelineOrchestrator::new(config, Arc::new(fetcher))
            .expect("valid configuration")
            .with_generator(Arc::new(CrashingGenerator { crashing: 2 }))
            .run(CIRCLE, &Prompt::new("ink"))
            .expect("batch runs");

        assert_eq!(outcome.reports.len(), 3);
        assert_eq!(outcome.failures.len(), 1);
        assert!(matches!(
            &outcome.failures[0].error,
            PipelineError::GenerationFailure { variation: 2, reason } if reason.contains("generator crashed")
        ));
    }

    // Tests a panic inside a scoring task is reported instead of aborting the process
    // Verified by spawning the scoring closure without containing the unwind
    #[test]
    fn test_scoring_panic_isolated() {
        let config = test_config();
        let faithful = faithful_png(&config);
        let orchestrator = PipelineOrchestrator::new(config, Arc::new(CrashingFetcher))
            .expect("valid configuration");
        let control = orchestrator.prepare(CIRCLE).expect("circle prepares");

        let outcome = orchestrator.score_generated(
            &control,
            vec![
                Ok(GeneratedImage::Url("mem://0".to_string())),
                Ok(GeneratedImage::Bytes(faithful)),
            ],
            &mut |_| {},
        );

        assert_eq!(outcome.reports.len(), 1);
        assert_eq!(outcome.reports[0].index, 1);
        assert!(matches!(
            &outcome.failures[0].error,
            PipelineError::ScoringPanicked { variation: 0, reason } if reason == "fetcher crashed"
        ));
    }

    // Tests variations failing their first attempt are regenerated with fresh seeds
    // Verified by retrying with the seeds of the first attempt
    #[test]
    fn test_retry_regenerates_failed_variations() {
        let config = test_config();
        let base_seed = config.orchestrator.base_seed;
        let faithful = faithful_png(&config);
        let fetcher = (10..14).fold(MemoryFetcher::default(), |f, i| f.serve(i, faithful.clone()));
        let generator = Arc::new(AttemptGenerator::failing_first(vec![0, 1, 2, 3]));

        let outcome = PipelineOrchestrator::new(config, Arc::new(fetcher))
            .expect("valid configuration")
            .with_generator(Arc::clone(&generator) as Arc<dyn ImageGenerator>)
            .run_with_retry(CIRCLE, &Prompt::new("embossed"), 2)
            .expect("batch runs");

        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.reports.len(), 4);
        assert_eq!(outcome.passing_count, 4);
        assert_eq!(outcome.best_index, Some(0));

        let seeds = variation_seeds(base_seed, 8);
        for report in &outcome.reports {
            assert_eq!(report.seed, Some(seeds[4 + report.index]));
            assert_eq!(generator.calls_for(report.index), 2);
        }
        let used = generator.seeds.lock().expect("lock is not poisoned");
        let first_attempt: Vec<u64> = used.iter().filter(|(v, _)| *v == 0).map(|(_, s)| *s).collect();
        assert_eq!(first_attempt.len(), 2);
        assert_ne!(first_attempt[0], first_attempt[1]);
    }

    // Tests only variations that did not preserve structure are regenerated
    #[test]
    fn test_retry_only_regenerates_non_passing() {
        let config = PipelineConfig {
            orchestrator: OrchestratorConfig {
                variations: 2,
                ..OrchestratorConfig::default()
            },
            ..test_config()
        };
        let faithful = faithful_png(&config);
        let fetcher = MemoryFetcher::default()
            .serve(0, faithful.clone())
            .serve(1, blank_png())
            .serve(11, faithful);
        let generator = Arc::new(AttemptGenerator::default());

        let outcome = PipelineOrchestrator::new(config, Arc::new(fetcher))
            .expect("valid configuration")
            .with_generator(Arc::clone(&generator) as Arc<dyn ImageGenerator>)
            .run_with_retry(CIRCLE, &Prompt::new("mosaic"), 3)
            .expect("batch runs");

        assert_eq!(outcome.passing_count, 2);
        assert!(!outcome.needs_regeneration(2));
        assert_eq!(generator.calls_for(0), 1);
        assert_eq!(generator.calls_for(1), 2);
    }

    // Tests a worse retry never replaces an earlier report
    // Verified by always keeping the latest attempt
    #[test]
    fn test_retry_keeps_better_report() {
        let config = PipelineConfig {
            orchestrator: OrchestratorConfig {
                variations: 2,
                ..OrchestratorConfig::default()
            },
            ..test_config()
        };
        let base_seed = config.orchestrator.base_seed;
        let faithful = faithful_png(&config);
        let fetcher = MemoryFetcher::default()
            .serve(0, faithful)
            .serve(1, blank_png());
        let generator = Arc::new(AttemptGenerator::default());

        let outcome = PipelineOrchestrator::new(config, Arc::new(fetcher))
            .expect("valid configuration")
            .with_generator(Arc::clone(&generator) as Arc<dyn ImageGenerator>)
            .run_with_retry(CIRCLE, &Prompt::new("mosaic"), 3)
            .expect("batch runs");

        // Retries of variation 1 point at URLs that are never served
        assert_eq!(generator.calls_for(1), 3);
        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.reports.len(), 2);
        assert_eq!(outcome.reports[1].seed, Some(variation_seeds(base_seed, 6)[1]));
        assert!(!outcome.reports[1].report.structure_preserved);
        assert_eq!(outcome.passing_count, 1);
        assert!(outcome.needs_regeneration(2));
    }

    // Tests a single attempt behaves like a plain run and zero attempts are rejected
    #[test]
    fn test_retry_attempt_bounds() {
        let config = test_config();
        let generator = Arc::new(AttemptGenerator::failing_first(vec![0, 1, 2, 3]));
        let orchestrator = PipelineOrchestrator::new(config, Arc::new(MemoryFetcher::default()))
            .expect("valid configuration")
            .with_generator(Arc::clone(&generator) as Arc<dyn ImageGenerator>);

        assert!(matches!(
            orchestrator.run_with_retry(CIRCLE, &Prompt::new("any"), 0),
            Err(PipelineError::InvalidParameter {
                parameter: "max_attempts",
                ..
            })
        ));

        let outcome = orchestrator
            .run_with_retry(CIRCLE, &Prompt::new("any"), 1)
            .expect("batch runs");
        assert_eq!(outcome.failures.len(), 4);
        assert!(
            outcome
                .failures
                .iter()
                .all(|f| matches!(f.error, PipelineError::GenerationFailure { .. }))
        );
        assert_eq!(generator.calls_for(0), 1);
    }

    // Tests the regeneration check follows the passing count
    #[test]
    fn test_needs_regeneration_uses_passing_count() {
        let outcome = sigilguard::pipeline::BatchOutcome {
            passing_count: 3,
            ..sigilguard::pipeline::BatchOutcome::default()
        };
        assert!(!outcome.needs_regeneration(3));
        assert!(outcome.needs_regeneration(4));
        assert!(!outcome.needs_regeneration(0));
    }

    // Tests the full-size control image for a padded circle
    // Verified by dropping the viewbox padding
    #[test]
    fn test_prepare_control_circle() {
        let config = PipelineConfig {
            preprocess: PreprocessConfig {
                stroke_width_multiplier: 2.5,
                padding_fraction: 0.15,
                ..PreprocessConfig::default()
            },
            raster: RasterConfig {
                size: 512,
                ..RasterConfig::default()
            },
            ..PipelineConfig::default()
        };
        let control = prepare_control(CIRCLE, &config).expect("circle prepares");

        let edges = control.edge_map().raster();
        assert_eq!((edges.width(), edges.height()), (512, 512));
        assert!(control.edge_map().edge_pixel_count() > 0);
        let bounds = edges.foreground_bounds(127).expect("edges are visible");
        assert!(bounds.strictly_inside(512, 512), "{bounds:?}");

        let decoded = RasterImage::from_bytes(control.control_png()).expect("png decodes");
        assert_eq!((decoded.width(), decoded.height()), (512, 512));

        let mask = control.mask();
        assert_eq!(mask.dimensions(), (config.mask.size, config.mask.size));
        assert!(!mask.is_empty());
    }
}
