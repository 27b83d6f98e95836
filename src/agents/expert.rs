//! A single expert persona backed by a language model

use crate::backend::{BackendError, BackendRegistry, CompletionRequest};
use crate::context::{
    BudgetError, ConversationHistory, Exchange, KnowledgeBudget, TokenBudgetManager,
};
use crate::knowledge::{Avatar, Persona};
use crate::metrics::METRICS;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// System prompt for every expert. `{name}` is substituted throughout and
/// `{knowledge}` once.
pub const SYSTEM_PROMPT_TEMPLATE: &str = "You are {name}. Answer as {name} would, drawing on \
the material below, which is your own writing and the record of your thinking.

Your knowledge:
{knowledge}

When answering:
1. Let your core principles show in every answer
2. Support your views with concrete cases from your own experience
3. Keep your characteristic way of thinking and speaking
4. Be concise and lead with what matters most
5. Say so plainly when a question falls outside your expertise
6. When reviewing a thesis, point out risks and weak spots, suggest concrete \
improvements, and share comparable cases
";

/// Render the system prompt for `name` with the given knowledge slice
pub fn render_system_prompt(name: &str, knowledge: &str) -> String {
    match SYSTEM_PROMPT_TEMPLATE.split_once("{knowledge}") {
        Some((head, tail)) => format!(
            "{}{}{}",
            head.replace("{name}", name),
            knowledge,
            tail.replace("{name}", name)
        ),
        None => SYSTEM_PROMPT_TEMPLATE.replace("{name}", name),
    }
}

/// Outcome of one agent turn as the display layer sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Answer(String),
    Fallback { apology: String, error: String },
}

impl Reply {
    pub fn is_answer(&self) -> bool {
        matches!(self, Reply::Answer(_))
    }

    /// Answer text, or the apology for a fallback
    pub fn text(&self) -> &str {
        match self {
            Reply::Answer(text) => text,
            Reply::Fallback { apology, .. } => apology,
        }
    }

    pub fn answer(&self) -> Option<&str> {
        match self {
            Reply::Answer(text) => Some(text),
            Reply::Fallback { .. } => None,
        }
    }
}

impl From<BackendError> for Reply {
    fn from(err: BackendError) -> Self {
        Reply::Fallback {
            apology: err.apology().to_string(),
            error: err.to_string(),
        }
    }
}

struct AgentState {
    history: ConversationHistory,
    knowledge: String,
    budget: KnowledgeBudget,
}

/// One persona with its own history and budget-trimmed knowledge
///
/// Turns on the same agent run one at a time; the state lock is held from
/// request assembly until the history and knowledge are updated.
pub struct ExpertAgent {
    persona: Persona,
    budget: Arc<TokenBudgetManager>,
    registry: Arc<BackendRegistry>,
    temperature: f32,
    base_tokens: usize,
    state: Mutex<AgentState>,
}

impl ExpertAgent {
    pub fn new(
        persona: Persona,
        budget: Arc<TokenBudgetManager>,
        registry: Arc<BackendRegistry>,
        temperature: f32,
    ) -> Result<Self, BudgetError> {
        let base_tokens = budget.count(&render_system_prompt(&persona.name, ""));
        let initial = budget.knowledge_budget(base_tokens, 0);
        let knowledge = budget.truncate(&persona.knowledge, initial.limit)?;
        if knowledge.len() != persona.knowledge.len() {
            METRICS.record_truncation(&persona.name);
        }

        info!(
            "Expert {} ready: base_tokens={}, knowledge_limit={}",
            persona.name, base_tokens, initial.limit
        );

        Ok(Self {
            state: Mutex::new(AgentState {
                history: ConversationHistory::new(budget.history_limit()),
                knowledge,
                budget: initial,
            }),
            persona,
            budget,
            registry,
            temperature,
            base_tokens,
        })
    }

    pub fn name(&self) -> &str {
        &self.persona.name
    }

    pub fn avatar(&self) -> &Avatar {
        &self.persona.avatar
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    pub fn base_tokens(&self) -> usize {
        self.base_tokens
    }

    /// Ask this expert a question using whichever model is active now.
    /// A successful answer is appended to history before returning.
    pub async fn respond(&self, prompt: &str) -> Result<String, BackendError> {
        let mut state = self.state.lock().await;
        let spec = self.registry.active_model();

        let request = CompletionRequest {
            system_prompt: render_system_prompt(&self.persona.name, &state.knowledge),
            history: state.history.to_vec(),
            user_prompt: prompt.to_string(),
            model_id: spec.model_id.clone(),
            temperature: self.temperature,
            max_output_tokens: None,
        };

        debug!(
            "Request for {}: system={} tokens, prompt={} tokens, history={} tokens",
            self.persona.name,
            self.budget.count(&request.system_prompt),
            self.budget.count(prompt),
            state.history.tokens()
        );

        let answer = self.registry.dispatch(&spec, &request).await?;
        self.record_exchange(&mut state, prompt, &answer);
        Ok(answer)
    }

    /// Like [`respond`](Self::respond), but failures become an apology
    pub async fn respond_or_apology(&self, prompt: &str) -> Reply {
        match self.respond(prompt).await {
            Ok(answer) => {
                METRICS.record_reply(true);
                Reply::Answer(answer)
            }
            Err(e) => {
                error!("Expert {} failed to answer: {}", self.persona.name, e);
                METRICS.record_reply(false);
                Reply::from(e)
            }
        }
    }

    fn record_exchange(&self, state: &mut AgentState, prompt: &str, answer: &str) {
        let exchange = Exchange::new(prompt, answer, self.budget.tokenizer().as_ref());
        let evicted = state.history.record(exchange);
        if !evicted.is_empty() {
            info!(
                "Expert {} evicted {} old exchanges",
                self.persona.name,
                evicted.len()
            );
            METRICS.record_evictions(&self.persona.name, evicted.len());
        }
        self.refresh_knowledge(state);
    }

    /// Re-derive the knowledge slice from the full source
    fn refresh_knowledge(&self, state: &mut AgentState) {
        let budget = self
            .budget
            .knowledge_budget(self.base_tokens, state.history.tokens());
        if budget.limit == state.budget.limit {
            state.budget = budget;
            return;
        }

        match self.budget.truncate(&self.persona.knowledge, budget.limit) {
            Ok(knowledge) => {
                if knowledge.len() != self.persona.knowledge.len() {
                    METRICS.record_truncation(&self.persona.name);
                }
                info!(
                    "Knowledge adjusted for {}: history={}, available={}, limit={}",
                    self.persona.name,
                    state.history.tokens(),
                    budget.available,
                    budget.limit
                );
                state.knowledge = knowledge;
                state.budget = budget;
            }
            Err(e) => warn!(
                "Keeping previous knowledge for {}: {}",
                self.persona.name, e
            ),
        }
    }

    pub async fn knowledge_budget(&self) -> KnowledgeBudget {
        self.state.lock().await.budget
    }

    /// The knowledge slice the next request will carry
    pub async fn knowledge(&self) -> String {
        self.state.lock().await.knowledge.clone()
    }

    pub async fn history(&self) -> Vec<Exchange> {
        self.state.lock().await.history.to_vec()
    }

    pub async fn history_tokens(&self) -> usize {
        self.state.lock().await.history.tokens()
    }
}
