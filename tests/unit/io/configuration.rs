//! Tests for configuration constants and config file loading

#[cfg(test)]
mod tests {
    use sigilguard::PipelineError;
    use sigilguard::io::configuration::{
        DEFAULT_ARTISTIC_CUT, DEFAULT_EDGE_WEIGHT, DEFAULT_IOU_WEIGHT, DEFAULT_PADDING_FRACTION,
        DEFAULT_PRESERVED_CUT, PADDING_FRACTION_LIMIT, PipelineConfig, RECOMMENDED_MAX_PADDING,
        STROKE_MULTIPLIER_RANGE, DEFAULT_STROKE_MULTIPLIER,
    };
    use sigilguard::raster::ThresholdMode;
    use sigilguard::vector::Color;
    use std::io::Write;
    use std::path::Path;

    // Tests constants are mutually consistent
    #[test]
    fn test_constant_relationships() {
        assert!((DEFAULT_IOU_WEIGHT + DEFAULT_EDGE_WEIGHT - 1.0).abs() < 1e-12);
        assert!(DEFAULT_ARTISTIC_CUT < DEFAULT_PRESERVED_CUT);
        assert!(DEFAULT_PADDING_FRACTION <= RECOMMENDED_MAX_PADDING);
        assert!(RECOMMENDED_MAX_PADDING < PADDING_FRACTION_LIMIT);
        let (low, high) = STROKE_MULTIPLIER_RANGE;
        assert!((low..=high).contains(&DEFAULT_STROKE_MULTIPLIER));
    }

    // Tests the default configuration validates
    #[test]
    fn test_default_config_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    // Tests omitted sections and fields keep their defaults
    // Verified by removing serde(default) from a section
    #[test]
    fn test_partial_json() {
        let json = r##"{
            "preprocess": { "stroke_color": "#F00", "padding_fraction": 0.15 },
            "mask": { "generated_mode": { "mode": "otsu" } },
            "scoring": { "tolerance_px": 5 }
        }"##;
        let config = PipelineConfig::from_json_str(json, Path::new("inline.json")).expect("parses");

        assert_eq!(config.preprocess.stroke_color, Color::Rgb(255, 0, 0));
        assert!((config.preprocess.padding_fraction - 0.15).abs() < f64::EPSILON);
        assert!((config.preprocess.stroke_width_multiplier - DEFAULT_STROKE_MULTIPLIER).abs() < f64::EPSILON);
        assert_eq!(config.mask.generated_mode, ThresholdMode::Otsu);
        assert_eq!(config.mask.control_mode, ThresholdMode::Fixed { cut: 128 });
        assert_eq!(config.scoring.tolerance_px, 5);
        assert_eq!(config.orchestrator.variations, 4);
    }

    // Tests out-of-range values are rejected after parsing
    #[test]
    fn test_invalid_values_rejected() {
        for json in [
            r#"{ "preprocess": { "padding_fraction": 0.5 } }"#,
            r#"{ "preprocess": { "stroke_width_multiplier": 3.0 } }"#,
            r#"{ "scoring": { "weights": { "iou": 0.9 } } }"#,
            r#"{ "orchestrator": { "scoring_concurrency": 0 } }"#,
            r#"{ "raster": { "size": 0 } }"#,
        ] {
            let result = PipelineConfig::from_json_str(json, Path::new("inline.json"));
            assert!(
                matches!(result, Err(PipelineError::InvalidParameter { .. })),
                "{json}"
            );
        }
    }

    // Tests malformed JSON and bad colors report the config path
    #[test]
    fn test_parse_errors() {
        let malformed = PipelineConfig::from_json_str("{ not json", Path::new("broken.json"));
        assert!(matches!(
            malformed,
            Err(PipelineError::ConfigParse { ref path, .. }) if path == Path::new("broken.json")
        ));

        let bad_color = PipelineConfig::from_json_str(
            r#"{ "preprocess": { "stroke_color": "teal-ish" } }"#,
            Path::new("color.json"),
        );
        assert!(matches!(bad_color, Err(PipelineError::ConfigParse { .. })));
    }

    // Tests loading from disk
    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(br#"{ "orchestrator": { "variations": 6 } }"#)
            .expect("writes");
        let config = PipelineConfig::from_json_file(file.path()).expect("loads");
        assert_eq!(config.orchestrator.variations, 6);

        assert!(matches!(
            PipelineConfig::from_json_file(Path::new("/definitely/missing.json")),
            Err(PipelineError::FileSystem { .. })
        ));
    }
}
