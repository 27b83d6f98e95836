//! The assembled expert panel
//!
//! Owns the backend registry, the shared budget manager, every agent and
//! the orchestrator. Nothing here is process-global.

use crate::agents::{ExpertAgent, ResponseOrchestrator, RoundEvent, Summarizer, SummaryGenerator};
use crate::backend::{BackendRegistry, ModelSpec};
use crate::config::Config;
use crate::context::{TokenBudgetManager, Tokenizer};
use crate::error::Result;
use crate::knowledge::{ensure_unique, KnowledgeError, KnowledgeLoader, Persona};
use crate::quota::QuotaSnapshot;
use futures::stream::BoxStream;
use std::sync::Arc;
use tracing::info;

/// Wraps a user's thesis in the review instructions sent to every expert
pub const THESIS_PROMPT_TEMPLATE: &str = "Having read my thesis below, what questions would you \
raise? Point out where it is not deep enough and needs strengthening. Drawing on your own past \
experience, say what it would take for this to be investable and propose a solution. Group your \
answer by key question:\n\n{thesis}";

pub fn thesis_prompt(thesis: &str) -> String {
    THESIS_PROMPT_TEMPLATE.replacen("{thesis}", thesis, 1)
}

pub struct ExpertPanel {
    config: Config,
    registry: Arc<BackendRegistry>,
    budget: Arc<TokenBudgetManager>,
    agents: Vec<Arc<ExpertAgent>>,
    orchestrator: ResponseOrchestrator,
}

impl ExpertPanel {
    /// Build HTTP backends and load personas as configured
    pub fn from_config(config: Config, loader: &dyn KnowledgeLoader) -> Result<Self> {
        let tokenizer = config.model.tokenizer.build()?;
        let registry = Arc::new(BackendRegistry::from_config(&config)?);
        let personas = loader.load()?;
        Self::new(config, personas, registry, tokenizer)
    }

    /// Assemble a panel from explicit parts
    pub fn new(
        config: Config,
        personas: Vec<Persona>,
        registry: Arc<BackendRegistry>,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Result<Self> {
        if personas.is_empty() {
            return Err(KnowledgeError::NoExperts(config.knowledge.data_dir.clone()).into());
        }
        ensure_unique(&personas)?;

        let budget = Arc::new(TokenBudgetManager::new(config.budget.clone(), tokenizer)?);
        let temperature = config.model.temperature;

        let agents = personas
            .into_iter()
            .map(|persona| {
                ExpertAgent::new(persona, Arc::clone(&budget), Arc::clone(&registry), temperature)
                    .map(Arc::new)
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let summarizer = Arc::new(SummaryGenerator::new(
            Arc::clone(&registry),
            config.model.summary_name.clone(),
            temperature,
        ));
        let orchestrator = ResponseOrchestrator::new(config.orchestrator.clone(), summarizer)
            .with_registry(Arc::clone(&registry));

        info!(
            "Panel ready with {} experts on {}",
            agents.len(),
            registry.active_model()
        );

        Ok(Self {
            config,
            registry,
            budget,
            agents,
            orchestrator,
        })
    }

    /// Replace the summary strategy
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.orchestrator = ResponseOrchestrator::new(self.config.orchestrator.clone(), summarizer)
            .with_registry(Arc::clone(&self.registry));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn agents(&self) -> &[Arc<ExpertAgent>] {
        &self.agents
    }

    pub fn agent(&self, name: &str) -> Option<&Arc<ExpertAgent>> {
        self.agents.iter().find(|agent| agent.name() == name)
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn budget(&self) -> &Arc<TokenBudgetManager> {
        &self.budget
    }

    pub fn active_model(&self) -> ModelSpec {
        self.registry.active_model()
    }

    /// Switch every agent and the summary to another model
    pub fn set_active_model(&self, model_id: &str) -> Result<()> {
        self.registry.set_active_model(ModelSpec::infer(model_id))?;
        Ok(())
    }

    pub fn quota(&self) -> Option<QuotaSnapshot> {
        self.registry.quota_snapshot(&self.active_model().model_id)
    }

    /// Ask every expert to review a thesis
    pub async fn ask(&self, thesis: &str) -> BoxStream<'static, RoundEvent> {
        self.ask_raw(&thesis_prompt(thesis)).await
    }

    /// Send `prompt` to every expert unchanged
    pub async fn ask_raw(&self, prompt: &str) -> BoxStream<'static, RoundEvent> {
        self.orchestrator.run_round(&self.agents, prompt).await
    }
}
