//! Layered configuration for the approver.
//!
//! Configuration is loaded once at startup from, lowest priority first:
//! 1. Built-in defaults
//! 2. A TOML file
//! 3. Environment variables prefixed with `APPROVER_`
//!    (`APPROVER_PERSISTENCE__TABLE`, `APPROVER_REJECTION_CODE`, ...)

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::events::EventSink;
use crate::observability::LoggingConfig;
use crate::persistence::{PersistenceConfig, PersistenceStep, RecordStore};
use crate::pipeline::{
    PipelineBuilder, PipelineDefinition, RetryConfig, StageSpec, DEFAULT_REJECTION_CODE,
    DEFAULT_STAGE_TIMEOUT,
};
use crate::validators::{Validator, ValidatorRegistry};
use crate::workflow::Orchestrator;

/// Prefix of environment variables read by [`load_config`].
pub const ENV_PREFIX: &str = "APPROVER_";

/// One stage entry in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Stage name, unique within the pipeline.
    pub name: String,
    /// Registered validator to call. Defaults to the stage name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator: Option<String>,
    /// Per-stage timeout override in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Per-stage retry override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    /// HTTP endpoint used when no validator is registered under the name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl StageConfig {
    /// Creates a stage entry calling the validator of the same name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            validator: None,
            timeout_ms: None,
            retry: None,
            endpoint: None,
        }
    }

    /// Name of the validator this stage calls.
    #[must_use]
    pub fn validator_name(&self) -> &str {
        self.validator.as_deref().unwrap_or(&self.name)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApproverConfig {
    /// Pipeline name used in logs and reports.
    pub pipeline_name: String,
    /// Status code that rejects a record.
    pub rejection_code: i64,
    /// Timeout for stages without an override, in milliseconds.
    pub default_timeout_ms: u64,
    /// Retry policy for stages without an override.
    pub default_retry: RetryConfig,
    /// Stages, in execution order.
    pub stages: Vec<StageConfig>,
    /// Persistence settings.
    pub persistence: PersistenceConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl Default for ApproverConfig {
    fn default() -> Self {
        Self {
            pipeline_name: "approver".to_string(),
            rejection_code: DEFAULT_REJECTION_CODE,
            default_timeout_ms: u64::try_from(DEFAULT_STAGE_TIMEOUT.as_millis())
                .unwrap_or(u64::MAX),
            default_retry: RetryConfig::default(),
            stages: vec![
                StageConfig::new("check_email"),
                StageConfig::new("check_pincode"),
            ],
            persistence: PersistenceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ApproverConfig {
    /// Resolves every stage against `registry` and builds the pipeline.
    ///
    /// A stage whose validator is not registered falls back to an HTTP
    /// validator when it declares an `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownValidator`] for an unresolvable stage and
    /// [`ConfigError::Pipeline`] when the resulting pipeline is invalid.
    pub fn build_pipeline(
        &self,
        registry: &ValidatorRegistry,
    ) -> Result<PipelineDefinition, ConfigError> {
        let mut builder = PipelineBuilder::new(&self.pipeline_name)
            .rejection_code(self.rejection_code)
            .default_timeout(Duration::from_millis(self.default_timeout_ms))
            .default_retry(self.default_retry.clone());

        for stage in &self.stages {
            let validator = resolve_validator(stage, registry)?;
            let mut spec = StageSpec::new(&stage.name, validator);
            if let Some(ms) = stage.timeout_ms {
                spec = spec.with_timeout(Duration::from_millis(ms));
            }
            if let Some(retry) = &stage.retry {
                spec = spec.with_retry(retry.clone());
            }
            builder = builder.stage_spec(spec);
        }

        let pipeline = builder.build()?;
        tracing::debug!(
            pipeline = %pipeline.name(),
            stages = ?pipeline.stage_names(),
            rejection_code = pipeline.rejection_code(),
            "Pipeline built from configuration"
        );
        Ok(pipeline)
    }

    /// Builds an orchestrator writing to `store` and reporting to `events`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the pipeline cannot be built or the
    /// persistence settings are invalid.
    pub fn build_orchestrator(
        &self,
        registry: &ValidatorRegistry,
        store: Arc<dyn RecordStore>,
        events: Arc<dyn EventSink>,
    ) -> Result<Orchestrator, ConfigError> {
        self.persistence.validate()?;
        let pipeline = self.build_pipeline(registry)?;
        Ok(Orchestrator::with_event_sink(
            Arc::new(pipeline),
            PersistenceStep::new(store, self.persistence.clone()),
            events,
        ))
    }
}

fn resolve_validator(
    stage: &StageConfig,
    registry: &ValidatorRegistry,
) -> Result<Arc<dyn Validator>, ConfigError> {
    let name = stage.validator_name();
    if let Some(validator) = registry.get(name) {
        return Ok(validator);
    }

    #[cfg(feature = "http")]
    if let Some(endpoint) = &stage.endpoint {
        return Ok(Arc::new(crate::validators::HttpValidator::new(
            name,
            endpoint.as_str(),
        )));
    }

    Err(ConfigError::UnknownValidator {
        stage: stage.name.clone(),
        validator: name.to_string(),
    })
}

/// Returns the layered configuration sources.
#[must_use]
pub fn figment(path: Option<&Path>) -> Figment {
    let mut figment = Figment::from(Serialized::defaults(ApproverConfig::default()));
    if let Some(path) = path {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Loads the configuration.
///
/// # Errors
///
/// Returns [`ConfigError::Load`] when `path` does not exist or a source
/// cannot be parsed into [`ApproverConfig`].
pub fn load_config(path: Option<&Path>) -> Result<ApproverConfig, ConfigError> {
    if let Some(path) = path {
        if !path.exists() {
            return Err(ConfigError::Load(format!(
                "config file {} does not exist",
                path.display()
            )));
        }
    }

    figment(path)
        .extract()
        .map_err(|e| ConfigError::Load(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::WriteMode;
    use crate::validators::PassThroughValidator;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn registry() -> ValidatorRegistry {
        ValidatorRegistry::new()
            .with(Arc::new(PassThroughValidator::new("check_email")))
            .with(Arc::new(PassThroughValidator::new("check_pincode")))
    }

    #[test]
    fn test_defaults() {
        let config = ApproverConfig::default();
        assert_eq!(config.rejection_code, 400);
        assert_eq!(config.default_timeout_ms, 10_000);
        assert_eq!(config.persistence.key_field.as_deref(), Some("email"));
        assert_eq!(config.stages.len(), 2);
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
pipeline_name = "signup"
rejection_code = 409

[[stages]]
name = "email"
validator = "check_email"
timeout_ms = 2500

[stages.retry]
max_attempts = 5

[[stages]]
name = "check_pincode"

[persistence]
table = "users"
write_mode = "insert_only"
timeout_ms = 1500
"#
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();

        assert_eq!(config.pipeline_name, "signup");
        assert_eq!(config.rejection_code, 409);
        assert_eq!(config.stages.len(), 2);
        assert_eq!(config.stages[0].validator_name(), "check_email");
        assert_eq!(config.stages[0].retry.as_ref().unwrap().max_attempts, 5);
        assert_eq!(config.persistence.table, "users");
        assert_eq!(config.persistence.write_mode, WriteMode::InsertOnly);
        assert_eq!(config.persistence.key_field.as_deref(), Some("email"));
        assert_eq!(config.persistence.timeout_ms, 1500);

        let pipeline = config.build_pipeline(&registry()).unwrap();
        assert_eq!(pipeline.name(), "signup");
        assert_eq!(pipeline.rejection_code(), 409);
        assert_eq!(pipeline.stage_names(), vec!["email", "check_pincode"]);
        assert_eq!(pipeline.stages()[0].timeout, Duration::from_millis(2500));
        assert_eq!(pipeline.stages()[0].retry.max_attempts, 5);
        assert_eq!(pipeline.stages()[1].timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "rejection_code = \"not a number\"").unwrap();

        let result = load_config(Some(file.path()));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_unknown_validator() {
        let config = ApproverConfig {
            stages: vec![StageConfig::new("check_phone")],
            ..ApproverConfig::default()
        };

        let err = config.build_pipeline(&registry()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnknownValidator { ref stage, .. } if stage == "check_phone"
        ));
    }

    #[test]
    fn test_invalid_pipeline_is_reported() {
        let config = ApproverConfig {
            stages: Vec::new(),
            ..ApproverConfig::default()
        };

        let err = config.build_pipeline(&registry()).unwrap_err();
        assert!(matches!(err, ConfigError::Pipeline(_)));
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_endpoint_falls_back_to_http_validator() {
        let mut stage = StageConfig::new("check_phone");
        stage.endpoint = Some("http://localhost:9/check".to_string());
        let config = ApproverConfig {
            stages: vec![stage],
            ..ApproverConfig::default()
        };

        let pipeline = config.build_pipeline(&registry()).unwrap();
        assert_eq!(pipeline.stages()[0].validator.name(), "check_phone");
    }

    #[tokio::test]
    async fn test_build_orchestrator() {
        let store = Arc::new(crate::persistence::InMemoryRecordStore::new());
        let orchestrator = ApproverConfig::default()
            .build_orchestrator(&registry(), store, Arc::new(crate::events::NoOpEventSink))
            .unwrap();

        let submission = crate::core::Submission::from_raw(serde_json::json!({
            "email": "a@example.com",
            "pincode": "560001",
        }))
        .unwrap();
        let report = orchestrator.run(submission).await;
        assert!(report.is_accepted());
    }

    #[test]
    fn test_unsafe_table_is_refused() {
        let mut config = ApproverConfig::default();
        config.persistence.table = "../../etc".to_string();

        let result = config.build_orchestrator(
            &registry(),
            Arc::new(crate::persistence::InMemoryRecordStore::new()),
            Arc::new(crate::events::NoOpEventSink),
        );

        assert!(matches!(result, Err(ConfigError::Persistence(_))));
    }
}
