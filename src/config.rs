//! Layered configuration: defaults, an optional file, then environment
//!
//! Environment variables use the `PANEL` prefix and `__` between levels,
//! e.g. `PANEL__MODEL__ACTIVE=gemini-2.0-flash-exp` or
//! `PANEL__ORCHESTRATOR__QUORUM=3`.

use crate::agents::OrchestratorConfig;
use crate::backend::chat_completions::ChatCompletionsConfig;
use crate::backend::generate_content::GenerateContentConfig;
use crate::backend::{ModelSpec, RetryConfig};
use crate::context::{TokenBudgetConfig, TokenizerKind};
use crate::error::{PanelError, Result};
use crate::knowledge::KnowledgeConfig;
use crate::logging::LoggingConfig;
use crate::quota::QuotaConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "PANEL";

/// Environment variable naming a config file when none is passed explicitly
pub const CONFIG_PATH_ENV: &str = "EXPERT_PANEL_CONFIG";

fn default_active_model() -> String {
    "grok-beta".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_summary_name() -> String {
    "Investment Masters".to_string()
}

/// Model selection and sampling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model used at startup; `gemini*` ids go to the generate-content backend
    #[serde(default = "default_active_model")]
    pub active: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Persona name the summary speaks as
    #[serde(default = "default_summary_name")]
    pub summary_name: String,

    #[serde(default)]
    pub tokenizer: TokenizerKind,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            active: default_active_model(),
            temperature: default_temperature(),
            summary_name: default_summary_name(),
            tokenizer: TokenizerKind::default(),
        }
    }
}

impl ModelConfig {
    pub fn active_spec(&self) -> ModelSpec {
        ModelSpec::infer(self.active.clone())
    }
}

/// Per-backend settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendsConfig {
    #[serde(default)]
    pub chat_completions: ChatCompletionsConfig,

    #[serde(default)]
    pub generate_content: GenerateContentConfig,
}

/// Complete panel configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub budget: TokenBudgetConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub backends: BackendsConfig,

    #[serde(default)]
    pub quota: QuotaConfig,

    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load `.env`, then `path` (or `$EXPERT_PANEL_CONFIG`), then `PANEL__*`
    /// environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Ok(dotenv) = dotenvy::dotenv() {
            debug!("Loaded environment from {}", dotenv.display());
        }

        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

        Self::load_from(path.as_deref(), ENV_PREFIX)
    }

    /// Load from an optional file plus environment variables under `prefix`
    pub fn load_from(path: Option<&Path>, prefix: &str) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            debug!("Reading configuration from {}", path.display());
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(prefix)
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate that the configuration is consistent
    pub fn validate(&self) -> Result<()> {
        self.budget.validate()?;

        if self.model.active.trim().is_empty() {
            return Err(PanelError::Configuration(
                "model.active must name a model".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(PanelError::Configuration(format!(
                "model.temperature must be within [0, 2], got {}",
                self.model.temperature
            )));
        }

        if self.orchestrator.quorum == 0 {
            return Err(PanelError::Configuration(
                "orchestrator.quorum must be at least 1".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(PanelError::Configuration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.knowledge.extensions.is_empty() {
            return Err(PanelError::Configuration(
                "knowledge.extensions must list at least one extension".to_string(),
            ));
        }

        Ok(())
    }
}
