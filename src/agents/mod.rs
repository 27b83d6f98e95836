//! Expert agents, round orchestration and summaries

pub mod expert;
pub mod orchestrator;
pub mod summary;

pub use expert::{render_system_prompt, ExpertAgent, Reply, SYSTEM_PROMPT_TEMPLATE};
pub use orchestrator::{
    AgentTurn, OrchestratorConfig, ResponseBuffer, ResponseOrchestrator, RoundEvent, RoundSummary,
    SummaryPolicy,
};
pub use summary::{SummaryGenerator, Summarizer, SUMMARY_FALLBACK};
