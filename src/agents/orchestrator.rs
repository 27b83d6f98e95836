//! Concurrent fan-out of one prompt to every expert
//!
//! Answers stream back in completion order. Once a quorum of experts has
//! answered successfully a cross-expert summary is generated, and every
//! round ends with exactly one terminal summary event.

use super::expert::{ExpertAgent, Reply};
use super::summary::{Summarizer, SUMMARY_FALLBACK};
use crate::backend::error::GENERIC_APOLOGY;
use crate::backend::{BackendError, BackendRegistry};
use crate::knowledge::Avatar;
use crate::metrics::METRICS;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use futures::FutureExt;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

/// When summaries are generated during a round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryPolicy {
    /// Re-summarize on every successful arrival at or above quorum,
    /// superseding any older summary still in flight
    #[default]
    EveryArrival,
    /// Summarize once, after every expert has finished
    OnceComplete,
}

fn default_quorum() -> usize {
    2
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Successful answers needed before a summary is attempted
    #[serde(default = "default_quorum")]
    pub quorum: usize,

    #[serde(default)]
    pub summary_policy: SummaryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            quorum: default_quorum(),
            summary_policy: SummaryPolicy::default(),
        }
    }
}

/// One expert's contribution to a round
#[derive(Debug, Clone)]
pub struct AgentTurn {
    /// Position of the agent in the round's agent list
    pub slot: usize,
    pub agent: String,
    pub avatar: Avatar,
    pub prompt: Arc<str>,
    pub reply: Reply,
    pub completed_at: DateTime<Utc>,
    pub elapsed: Duration,
}

/// A synthesized summary and the experts it covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundSummary {
    pub text: String,
    /// Experts whose answers went into the summary, in arrival order
    pub covering: Vec<String>,
    /// Whether `text` is the fixed fallback
    pub fallback: bool,
}

impl RoundSummary {
    fn fallback(covering: Vec<String>) -> Self {
        Self {
            text: SUMMARY_FALLBACK.to_string(),
            covering,
            fallback: true,
        }
    }
}

/// Items yielded by [`ResponseOrchestrator::run_round`]
#[derive(Debug, Clone)]
pub enum RoundEvent {
    Answer(AgentTurn),
    InterimSummary(RoundSummary),
    /// Always the last event of a round
    Summary(RoundSummary),
}

/// Successful answers of the current round keyed by agent slot, in arrival
/// order. Agents sharing a name still count separately.
#[derive(Debug, Clone, Default)]
pub struct ResponseBuffer {
    responses: IndexMap<usize, (String, String)>,
}

impl ResponseBuffer {
    pub fn push(&mut self, slot: usize, agent: impl Into<String>, answer: impl Into<String>) {
        self.responses.insert(slot, (agent.into(), answer.into()));
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.responses.values().map(|(name, _)| name.clone()).collect()
    }

    pub fn pairs(&self) -> Vec<(String, String)> {
        self.responses.values().cloned().collect()
    }
}

/// Fans prompts out to agents and gathers their answers
pub struct ResponseOrchestrator {
    config: OrchestratorConfig,
    summarizer: Arc<dyn Summarizer>,
    registry: Option<Arc<BackendRegistry>>,
    round_gate: Arc<Mutex<()>>,
}

impl ResponseOrchestrator {
    pub fn new(config: OrchestratorConfig, summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            config,
            summarizer,
            registry: None,
            round_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Consult this registry's quota tracker at the start of each round
    pub fn with_registry(mut self, registry: Arc<BackendRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    fn quorum(&self) -> usize {
        self.config.quorum.max(1)
    }

    /// Ask every agent concurrently and yield each turn as it completes.
    ///
    /// The round gate is held until the stream ends or is dropped; dropping
    /// it aborts the agents still running.
    pub async fn stream_responses(
        &self,
        agents: &[Arc<ExpertAgent>],
        prompt: &str,
    ) -> BoxStream<'static, AgentTurn> {
        let (gate, span) = self.begin_round(agents).await;
        let prompt: Arc<str> = Arc::from(prompt);
        let tasks = spawn_agents(agents, &prompt, &span);

        stream::unfold((gate, tasks), |(gate, mut tasks)| async move {
            loop {
                match tasks.join_next().await? {
                    Ok(turn) => return Some((turn, (gate, tasks))),
                    Err(e) => log_join_error("agent", &e),
                }
            }
        })
        .boxed()
    }

    /// Run a full round: answers in completion order, interim summaries
    /// under [`SummaryPolicy::EveryArrival`], then one terminal summary
    pub async fn run_round(
        &self,
        agents: &[Arc<ExpertAgent>],
        prompt: &str,
    ) -> BoxStream<'static, RoundEvent> {
        let (gate, span) = self.begin_round(agents).await;
        let prompt: Arc<str> = Arc::from(prompt);

        let state = RoundState {
            _gate: gate,
            agents: spawn_agents(agents, &prompt, &span),
            summaries: JoinSet::new(),
            generation: 0,
            completed: None,
            buffer: ResponseBuffer::default(),
            queue: VecDeque::new(),
            finished: false,
            quorum: self.quorum(),
            policy: self.config.summary_policy,
            summarizer: Arc::clone(&self.summarizer),
            prompt,
            started: Instant::now(),
            span: span.clone(),
        };

        stream::unfold(state, |mut state| {
            let span = state.span.clone();
            async move {
                let event = state.next_event().await?;
                Some((event, state))
            }
            .instrument(span)
        })
        .boxed()
    }

    /// Wait for the round gate, then log the round start inside its span
    async fn begin_round(&self, agents: &[Arc<ExpertAgent>]) -> (OwnedMutexGuard<()>, Span) {
        let gate = Arc::clone(&self.round_gate).lock_owned().await;
        let span = round_span();

        span.in_scope(|| {
            info!("Starting round with {} experts", agents.len());
            let mut names: Vec<_> = agents.iter().map(|agent| agent.name()).collect();
            names.sort_unstable();
            names.dedup();
            if names.len() != agents.len() {
                warn!("Round has experts sharing a name; their answers are kept apart");
            }
            self.check_quota(agents.len());
        });

        (gate, span)
    }

    fn check_quota(&self, agents: usize) {
        let Some(registry) = &self.registry else {
            return;
        };
        let model = registry.active_model();
        if let Some(snapshot) = registry.quota_snapshot(&model.model_id) {
            let required = agents as u32 + 1;
            if snapshot.remaining_requests < required {
                warn!(
                    "Round needs {} requests but {} has {} left this minute (next slot in {}s)",
                    required,
                    model.model_id,
                    snapshot.remaining_requests,
                    snapshot.seconds_until_available
                );
            } else {
                debug!(
                    "Quota for {}: {} requests, {} conversations left",
                    model.model_id, snapshot.remaining_requests, snapshot.remaining_conversations
                );
            }
        }
    }
}

fn round_span() -> Span {
    info_span!("round", round_id = %Uuid::new_v4())
}

fn log_join_error(kind: &str, e: &JoinError) {
    if e.is_cancelled() {
        debug!("{} task cancelled", kind);
    } else {
        error!("{} task failed: {}", kind, e);
    }
}

fn spawn_agents(agents: &[Arc<ExpertAgent>], prompt: &Arc<str>, span: &Span) -> JoinSet<AgentTurn> {
    let mut tasks = JoinSet::new();
    for (slot, agent) in agents.iter().enumerate() {
        let agent = Arc::clone(agent);
        let prompt = Arc::clone(prompt);
        tasks.spawn(
            async move {
                let started = Instant::now();
                let reply = match AssertUnwindSafe(agent.respond_or_apology(&prompt))
                    .catch_unwind()
                    .await
                {
                    Ok(reply) => reply,
                    Err(_) => {
                        error!("Expert {} task panicked", agent.name());
                        METRICS.record_reply(false);
                        Reply::Fallback {
                            apology: GENERIC_APOLOGY.to_string(),
                            error: "agent task panicked".to_string(),
                        }
                    }
                };

                AgentTurn {
                    slot,
                    agent: agent.name().to_string(),
                    avatar: agent.avatar().clone(),
                    prompt,
                    reply,
                    completed_at: Utc::now(),
                    elapsed: started.elapsed(),
                }
            }
            .instrument(span.clone()),
        );
    }
    tasks
}

struct SummaryOutcome {
    generation: u64,
    covering: Vec<String>,
    result: Result<String, BackendError>,
}

enum Step {
    Agent(Result<AgentTurn, JoinError>),
    Summary(Result<SummaryOutcome, JoinError>),
}

struct RoundState {
    _gate: OwnedMutexGuard<()>,
    agents: JoinSet<AgentTurn>,
    summaries: JoinSet<SummaryOutcome>,
    /// Generation of the most recently spawned summary (0 = none yet)
    generation: u64,
    /// Result of the newest summary generation, once it finishes
    completed: Option<RoundSummary>,
    buffer: ResponseBuffer,
    queue: VecDeque<RoundEvent>,
    finished: bool,
    quorum: usize,
    policy: SummaryPolicy,
    summarizer: Arc<dyn Summarizer>,
    prompt: Arc<str>,
    started: Instant,
    span: Span,
}

impl RoundState {
    async fn next_event(&mut self) -> Option<RoundEvent> {
        loop {
            if let Some(event) = self.queue.pop_front() {
                return Some(event);
            }
            if self.finished {
                return None;
            }

            if !self.agents.is_empty() {
                let step = tokio::select! {
                    Some(joined) = self.agents.join_next() => Step::Agent(joined),
                    Some(joined) = self.summaries.join_next(), if !self.summaries.is_empty() => {
                        Step::Summary(joined)
                    }
                    else => continue,
                };

                match step {
                    Step::Agent(Ok(turn)) => self.on_answer(turn),
                    Step::Agent(Err(e)) => log_join_error("agent", &e),
                    Step::Summary(joined) => {
                        if let Some(summary) = self.on_summary(joined) {
                            self.queue.push_back(RoundEvent::InterimSummary(summary));
                        }
                    }
                }
                continue;
            }

            let summary = self.final_summary().await;
            self.finish(summary);
        }
    }

    fn on_answer(&mut self, turn: AgentTurn) {
        debug!(
            "Expert {} finished in {:?} ({})",
            turn.agent,
            turn.elapsed,
            if turn.reply.is_answer() { "answer" } else { "fallback" }
        );

        if let Some(answer) = turn.reply.answer() {
            self.buffer.push(turn.slot, turn.agent.clone(), answer);
            if self.policy == SummaryPolicy::EveryArrival && self.buffer.len() >= self.quorum {
                self.spawn_summary();
            }
        }

        self.queue.push_back(RoundEvent::Answer(turn));
    }

    /// Start a summary over every success so far, superseding older ones
    fn spawn_summary(&mut self) {
        if !self.summaries.is_empty() {
            debug!("Superseding summary generation {}", self.generation);
            self.summaries.abort_all();
        }

        self.generation += 1;
        self.completed = None;

        let generation = self.generation;
        let covering = self.buffer.names();
        let responses = self.buffer.pairs();
        let summarizer = Arc::clone(&self.summarizer);
        let prompt = Arc::clone(&self.prompt);

        debug!(
            "Spawning summary generation {} over {} answers",
            generation,
            covering.len()
        );

        self.summaries.spawn(
            async move {
                let result = AssertUnwindSafe(summarizer.summarize(&prompt, &responses))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        Err(BackendError::InvalidResponse(
                            "summary task panicked".to_string(),
                        ))
                    });
                SummaryOutcome {
                    generation,
                    covering,
                    result,
                }
            }
            .instrument(self.span.clone()),
        );
    }

    /// Record a finished summary task, returning it if it is the newest
    fn on_summary(&mut self, joined: Result<SummaryOutcome, JoinError>) -> Option<RoundSummary> {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                log_join_error("summary", &e);
                return None;
            }
        };

        if outcome.generation != self.generation {
            debug!("Dropping stale summary generation {}", outcome.generation);
            return None;
        }

        let summary = match outcome.result {
            Ok(text) => RoundSummary {
                text,
                covering: outcome.covering,
                fallback: false,
            },
            Err(e) => {
                error!("Summary generation failed: {}", e);
                RoundSummary::fallback(outcome.covering)
            }
        };

        self.completed = Some(summary.clone());
        Some(summary)
    }

    /// Summary covering the full final set of successful answers
    async fn final_summary(&mut self) -> RoundSummary {
        if self.buffer.len() < self.quorum {
            warn!(
                "Only {} of the required {} experts answered, no summary",
                self.buffer.len(),
                self.quorum
            );
            METRICS.record_summary("insufficient");
            return RoundSummary::fallback(self.buffer.names());
        }

        let up_to_date = match &self.completed {
            Some(summary) => summary.covering.len() == self.buffer.len(),
            None => self.generation > 0 && !self.summaries.is_empty(),
        };
        if !up_to_date {
            self.spawn_summary();
        }

        while self.completed.is_none() {
            match self.summaries.join_next().await {
                Some(joined) => {
                    self.on_summary(joined);
                }
                None => break,
            }
        }

        let summary = self
            .completed
            .take()
            .unwrap_or_else(|| RoundSummary::fallback(self.buffer.names()));
        METRICS.record_summary(if summary.fallback { "fallback" } else { "success" });
        summary
    }

    fn finish(&mut self, summary: RoundSummary) {
        let elapsed = self.started.elapsed();
        METRICS.record_round(elapsed);
        info!(
            "Round finished in {:?}: {} answers summarized{}",
            elapsed,
            summary.covering.len(),
            if summary.fallback { " (fallback)" } else { "" }
        );
        self.queue.push_back(RoundEvent::Summary(summary));
        self.finished = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NamesSummarizer;

    #[async_trait]
    impl Summarizer for NamesSummarizer {
        async fn summarize(
            &self,
            _prompt: &str,
            responses: &[(String, String)],
        ) -> Result<String, BackendError> {
            let names: Vec<_> = responses.iter().map(|(name, _)| name.as_str()).collect();
            Ok(names.join(", "))
        }
    }

    #[test]
    fn test_buffer_keeps_arrival_order() {
        let mut buffer = ResponseBuffer::default();
        buffer.push(1, "Bruno Park", "b");
        buffer.push(0, "Alice Ward", "a");

        assert_eq!(buffer.names(), vec!["Bruno Park", "Alice Ward"]);
        assert_eq!(buffer.pairs()[1], ("Alice Ward".to_string(), "a".to_string()));
    }

    #[test]
    fn test_config_defaults() {
        let config: OrchestratorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.quorum, 2);
        assert_eq!(config.summary_policy, SummaryPolicy::EveryArrival);

        let config: OrchestratorConfig =
            serde_json::from_str(r#"{"summary_policy":"once_complete"}"#).unwrap();
        assert_eq!(config.summary_policy, SummaryPolicy::OnceComplete);
    }

    #[tokio::test]
    async fn test_no_agents_yields_fallback_summary() {
        let orchestrator =
            ResponseOrchestrator::new(OrchestratorConfig::default(), Arc::new(NamesSummarizer));

        let events: Vec<_> = orchestrator.run_round(&[], "anything").await.collect().await;

        assert_eq!(events.len(), 1);
        match &events[0] {
            RoundEvent::Summary(summary) => {
                assert!(summary.fallback);
                assert_eq!(summary.text, SUMMARY_FALLBACK);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
