//! Tests for pipeline configuration loading and validation.

use super::*;
use serial_test::serial;
use std::io::Write;

fn write_yaml(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn assert_invalid(config: &PipelineConfig, expected_field: &str) {
    match config.validate() {
        Err(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, expected_field),
        other => panic!("expected InvalidValue for {expected_field}, got: {other:?}"),
    }
}

mod defaults {
    use super::*;

    /// Verify defaults match the documented values and validate.
    #[test]
    fn test_default_values() {
        let config = PipelineConfig::default();

        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 200);
        assert_eq!(config.retry.max_delay_ms, 10_000);
        assert_eq!(config.retry.backoff_multiplier, 2.0);
        assert!(!config.retry.use_jitter);
        assert_eq!(config.dispatch.processor_timeout_ms, 30_000);
        assert_eq!(config.dispatch.max_concurrent_processors, 16);
        assert_eq!(config.aggregation.identifier_field, "id");
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json_format);
        assert!(config.validate().is_ok());
    }

    /// Verify a partial document fills the rest from defaults.
    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: PipelineConfig =
            serde_yaml::from_str("dispatch:\n  processor_timeout_ms: 5000\n").unwrap();

        assert_eq!(config.dispatch.processor_timeout_ms, 5000);
        assert_eq!(config.dispatch.max_concurrent_processors, 16);
        assert_eq!(config.retry, RetrySettings::default());
    }

    /// Verify settings convert into runtime types.
    #[test]
    fn test_settings_conversions() {
        let settings = RetrySettings {
            max_attempts: 4,
            base_delay_ms: 50,
            max_delay_ms: 1_000,
            backoff_multiplier: 3.0,
            use_jitter: true,
            jitter_percent: 0.1,
        };

        let policy = RetryPolicy::from(&settings);
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.base_delay, Duration::from_millis(50));
        assert_eq!(policy.max_delay, Duration::from_secs(1));
        assert!(policy.use_jitter);
        assert_eq!(policy.jitter_percent, 0.1);

        let dispatch = DispatchSettings {
            processor_timeout_ms: 1500,
            max_concurrent_processors: 2,
        };
        assert_eq!(dispatch.processor_timeout(), Duration::from_millis(1500));

        let aggregation = AggregationSettings {
            identifier_field: "key".to_string(),
        };
        assert_eq!(aggregation.identity_resolver().field(), "key");
    }
}

mod validation {
    use super::*;

    #[test]
    fn test_rejects_zero_attempts() {
        let mut config = PipelineConfig::default();
        config.retry.max_attempts = 0;
        assert_invalid(&config, "retry.max_attempts");
    }

    #[test]
    fn test_rejects_too_many_attempts() {
        let mut config = PipelineConfig::default();
        config.retry.max_attempts = 11;
        assert_invalid(&config, "retry.max_attempts");
    }

    #[test]
    fn test_rejects_shrinking_multiplier() {
        let mut config = PipelineConfig::default();
        config.retry.backoff_multiplier = 0.5;
        assert_invalid(&config, "retry.backoff_multiplier");
    }

    #[test]
    fn test_rejects_max_delay_below_base() {
        let mut config = PipelineConfig::default();
        config.retry.max_delay_ms = 100;
        assert_invalid(&config, "retry.max_delay_ms");
    }

    #[test]
    fn test_rejects_jitter_out_of_range() {
        let mut config = PipelineConfig::default();
        config.retry.jitter_percent = 1.5;
        assert_invalid(&config, "retry.jitter_percent");
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let mut config = PipelineConfig::default();
        config.dispatch.processor_timeout_ms = 0;
        assert_invalid(&config, "dispatch.processor_timeout_ms");
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let mut config = PipelineConfig::default();
        config.dispatch.max_concurrent_processors = 0;
        assert_invalid(&config, "dispatch.max_concurrent_processors");
    }

    #[test]
    fn test_rejects_blank_identifier_field() {
        let mut config = PipelineConfig::default();
        config.aggregation.identifier_field = "  ".to_string();
        assert_invalid(&config, "aggregation.identifier_field");
    }
}

mod loading {
    use super::*;

    /// Verify values are read from an explicit file.
    #[test]
    #[serial]
    fn test_load_from_explicit_file() {
        let file = write_yaml(
            "retry:\n  max_attempts: 5\n  base_delay_ms: 100\ndispatch:\n  max_concurrent_processors: 4\nlogging:\n  json_format: true\n",
        );

        let config = PipelineConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 100);
        assert_eq!(config.dispatch.max_concurrent_processors, 4);
        assert_eq!(config.dispatch.processor_timeout_ms, 30_000);
        assert!(config.logging.json_format);
    }

    /// Verify environment variables override file values.
    #[test]
    #[serial]
    fn test_environment_overrides_file() {
        let file = write_yaml("dispatch:\n  processor_timeout_ms: 1000\n");
        std::env::set_var("HOOKLINE__DISPATCH__PROCESSOR_TIMEOUT_MS", "5000");

        let result = PipelineConfig::load(Some(file.path()));
        std::env::remove_var("HOOKLINE__DISPATCH__PROCESSOR_TIMEOUT_MS");

        assert_eq!(result.unwrap().dispatch.processor_timeout_ms, 5000);
    }

    /// Verify a missing explicit file is an error.
    #[test]
    #[serial]
    fn test_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.yaml");

        let result = PipelineConfig::load(Some(&missing));

        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    /// Verify loaded values are validated.
    #[test]
    #[serial]
    fn test_load_validates() {
        let file = write_yaml("retry:\n  max_attempts: 0\n");

        let result = PipelineConfig::load(Some(file.path()));

        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    /// Verify loading with no sources yields defaults.
    #[test]
    #[serial]
    fn test_load_without_sources() {
        let config = PipelineConfig::load(None).unwrap();
        assert_eq!(config, PipelineConfig::default());
    }
}
