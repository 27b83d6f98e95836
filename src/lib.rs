//! Concurrent expert-persona panel for language models
//!
//! Every expert answers the same prompt concurrently under its own token
//! budget. Answers stream back as they complete, and a cross-expert summary
//! is produced once enough experts have answered.

pub mod agents;
pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod knowledge;
pub mod logging;
pub mod metrics;
pub mod panel;
pub mod quota;
pub mod ratelimit;

pub use error::{PanelError, Result};

pub mod prelude {
    pub use crate::agents::{
        AgentTurn, ExpertAgent, OrchestratorConfig, Reply, ResponseBuffer, ResponseOrchestrator,
        RoundEvent, RoundSummary, SummaryGenerator, SummaryPolicy, Summarizer, SUMMARY_FALLBACK,
    };
    pub use crate::backend::{
        BackendAdapter, BackendError, BackendRegistry, ChatCompletionsBackend, CompletionRequest,
        FnBackend, GenerateContentBackend, ModelBackend, ModelSpec, RetryConfig, RetryPolicy,
    };
    pub use crate::config::Config;
    pub use crate::context::{
        CharTokenizer, ConversationHistory, Exchange, TiktokenTokenizer, TokenBudgetConfig,
        TokenBudgetManager, Tokenizer,
    };
    pub use crate::error::{PanelError, Result};
    pub use crate::knowledge::{Avatar, DirectoryLoader, KnowledgeLoader, Persona, StaticLoader};
    pub use crate::panel::ExpertPanel;
    pub use crate::quota::{InMemoryQuotaTracker, QuotaTracker};
    pub use crate::ratelimit::{BackendLimiter, IntervalLimiter, SlidingWindowLimiter};
}
