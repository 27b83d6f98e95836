//! Token budget management for persona knowledge contexts
//!
//! The model window is split between:
//! - System prompt template (fixed, measured once per persona)
//! - Conversation history (bounded to a fraction of the window)
//! - Per-turn reservation (question plus completion)
//! - Knowledge context (whatever remains, with a configurable floor)
//!
//! Knowledge that does not fit is cut down to a contiguous middle slice,
//! trimming 30% of the excess from the front and 70% from the back.

use super::tokenizer::Tokenizer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Share of the excess removed from the front when truncating
const FRONT_REMOVAL_RATIO: (usize, usize) = (3, 10);

/// How far a slice boundary may move to land on a decodable token
const MAX_BOUNDARY_NUDGE: usize = 3;

fn default_max_tokens() -> usize {
    131_072
}

fn default_tokens_per_turn() -> usize {
    2_000
}

fn default_history_fraction() -> f64 {
    0.3
}

fn default_knowledge_floor() -> usize {
    80_000
}

/// Token budget configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBudgetConfig {
    /// Model context window in tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Reserved for the current question and its answer
    #[serde(default = "default_tokens_per_turn")]
    pub tokens_per_turn: usize,

    /// Upper bound of the window that history may occupy
    #[serde(default = "default_history_fraction")]
    pub history_fraction: f64,

    /// Knowledge tokens kept whenever the window nominally allows it
    #[serde(default = "default_knowledge_floor")]
    pub knowledge_floor: usize,
}

impl Default for TokenBudgetConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            tokens_per_turn: default_tokens_per_turn(),
            history_fraction: default_history_fraction(),
            knowledge_floor: default_knowledge_floor(),
        }
    }
}

impl TokenBudgetConfig {
    /// Validate that the budget configuration is consistent
    pub fn validate(&self) -> Result<(), BudgetError> {
        if self.max_tokens == 0 {
            return Err(BudgetError::ConfigurationInvalid(
                "max_tokens must be positive".to_string(),
            ));
        }

        if !(self.history_fraction > 0.0 && self.history_fraction <= 1.0) {
            return Err(BudgetError::ConfigurationInvalid(format!(
                "history_fraction must be in (0, 1], got {}",
                self.history_fraction
            )));
        }

        if self.tokens_per_turn >= self.max_tokens {
            return Err(BudgetError::ConfigurationInvalid(format!(
                "tokens_per_turn ({}) must be smaller than max_tokens ({})",
                self.tokens_per_turn, self.max_tokens
            )));
        }

        if self.knowledge_floor > self.max_tokens {
            return Err(BudgetError::ConfigurationInvalid(format!(
                "knowledge_floor ({}) exceeds max_tokens ({})",
                self.knowledge_floor, self.max_tokens
            )));
        }

        Ok(())
    }

    /// Maximum tokens conversation history may hold
    pub fn history_limit(&self) -> usize {
        (self.max_tokens as f64 * self.history_fraction).ceil() as usize
    }
}

/// Token budget errors
#[derive(Debug, Clone, Error)]
pub enum BudgetError {
    #[error("Configuration invalid: {0}")]
    ConfigurationInvalid(String),

    #[error("Tokenizer unavailable: {0}")]
    TokenizerUnavailable(String),

    #[error("Token decoding failed: {0}")]
    DecodeFailed(String),
}

/// Knowledge allowance derived from the current history size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnowledgeBudget {
    /// Window left after prompt, history and turn reservation (may be negative)
    pub available: i64,
    /// Tokens of knowledge actually allowed
    pub limit: usize,
    /// Whether the floor raised the limit above `available`
    pub floor_applied: bool,
}

/// Token budget manager
pub struct TokenBudgetManager {
    config: TokenBudgetConfig,
    tokenizer: Arc<dyn Tokenizer>,
}

impl TokenBudgetManager {
    /// Create a new token budget manager
    pub fn new(config: TokenBudgetConfig, tokenizer: Arc<dyn Tokenizer>) -> Result<Self, BudgetError> {
        config.validate()?;
        Ok(Self { config, tokenizer })
    }

    /// Get the configuration
    pub fn config(&self) -> &TokenBudgetConfig {
        &self.config
    }

    pub fn tokenizer(&self) -> &Arc<dyn Tokenizer> {
        &self.tokenizer
    }

    pub fn count(&self, text: &str) -> usize {
        self.tokenizer.count(text)
    }

    /// Maximum tokens conversation history may hold
    pub fn history_limit(&self) -> usize {
        self.config.history_limit()
    }

    /// Derive the knowledge allowance for a persona
    pub fn knowledge_budget(&self, base_tokens: usize, history_tokens: usize) -> KnowledgeBudget {
        let max = self.config.max_tokens as i64;
        let base = base_tokens as i64;
        let per_turn = self.config.tokens_per_turn as i64;

        let available = max - base - history_tokens as i64 - per_turn;
        let nominal = (max - base - per_turn).max(0) as usize;
        let floor = self.config.knowledge_floor.min(nominal);

        let clamped = available.max(0) as usize;
        let limit = clamped.max(floor);
        let floor_applied = limit > clamped;

        if floor_applied {
            warn!(
                "Knowledge floor overrides available budget: available={}, limit={}",
                available, limit
            );
        }

        debug!(
            "Knowledge budget: base={}, history={}, per_turn={}, available={}, limit={}",
            base_tokens, history_tokens, self.config.tokens_per_turn, available, limit
        );

        KnowledgeBudget {
            available,
            limit,
            floor_applied,
        }
    }

    /// Cut `text` down to at most `max_tokens` tokens, keeping a middle slice
    /// framed by omission markers
    pub fn truncate(&self, text: &str, max_tokens: usize) -> Result<String, BudgetError> {
        if max_tokens == 0 {
            return Ok(String::new());
        }

        let tokens = self.tokenizer.encode(text);
        let total = tokens.len();
        if total <= max_tokens {
            return Ok(text.to_string());
        }

        // Marker cost is measured with the largest count either side could report
        let marker_cost =
            self.count(&omitted_before(total)) + self.count(&omitted_after(total));
        if marker_cost >= max_tokens {
            debug!(
                "Budget of {} tokens cannot hold omission markers, returning bare slice",
                max_tokens
            );
            return self.bare_slice(&tokens, max_tokens);
        }

        let mut keep = max_tokens - marker_cost;
        loop {
            let (start, end) = slice_bounds(total, keep);
            let (start, end, body) = self.decode_slice(&tokens, start, end)?;
            let truncated = format!(
                "{}{}{}",
                omitted_before(start),
                body,
                omitted_after(total - end)
            );

            let used = self.count(&truncated);
            if used <= max_tokens {
                info!(
                    "Text truncated: total={}, kept={}, removed_front={}, removed_back={}",
                    total,
                    end - start,
                    start,
                    total - end
                );
                return Ok(truncated);
            }

            if keep == 0 {
                return self.bare_slice(&tokens, max_tokens);
            }
            keep = keep.saturating_sub(used - max_tokens);
        }
    }

    fn bare_slice(&self, tokens: &[usize], max_tokens: usize) -> Result<String, BudgetError> {
        let mut keep = max_tokens;
        loop {
            let (start, end) = slice_bounds(tokens.len(), keep);
            let (_, _, body) = self.decode_slice(tokens, start, end)?;
            let used = self.count(&body);
            if used <= max_tokens || keep == 0 {
                return Ok(body);
            }
            keep = keep.saturating_sub(used - max_tokens);
        }
    }

    /// Decode `tokens[start..end]`, moving each boundary inward until the
    /// slice decodes
    fn decode_slice(
        &self,
        tokens: &[usize],
        start: usize,
        end: usize,
    ) -> Result<(usize, usize, String), BudgetError> {
        let mut last_error = None;

        for front in 0..=MAX_BOUNDARY_NUDGE {
            for back in 0..=MAX_BOUNDARY_NUDGE {
                let s = start + front;
                let e = end.saturating_sub(back);
                if s >= e {
                    return Ok((s.min(end), s.min(end), String::new()));
                }
                match self.tokenizer.decode(&tokens[s..e]) {
                    Ok(body) => return Ok((s, e, body)),
                    Err(err) => last_error = Some(err),
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            BudgetError::DecodeFailed("slice boundaries never decoded".to_string())
        }))
    }
}

fn omitted_before(count: usize) -> String {
    format!("...[{} tokens omitted before]...\n\n", count)
}

fn omitted_after(count: usize) -> String {
    format!("\n\n...[{} tokens omitted after]...", count)
}

/// Start and end of a `keep`-token middle slice out of `total`
fn slice_bounds(total: usize, keep: usize) -> (usize, usize) {
    let keep = keep.min(total);
    let remove = total - keep;
    let front = remove * FRONT_REMOVAL_RATIO.0 / FRONT_REMOVAL_RATIO.1;
    (front, front + keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tokenizer::{CharTokenizer, TiktokenTokenizer};

    fn char_manager(config: TokenBudgetConfig) -> TokenBudgetManager {
        TokenBudgetManager::new(config, Arc::new(CharTokenizer)).unwrap()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = TokenBudgetConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.history_limit(), 39_322);
    }

    #[test]
    fn test_invalid_fraction_rejected() {
        let config = TokenBudgetConfig {
            history_fraction: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(BudgetError::ConfigurationInvalid(_))
        ));
    }

    #[test]
    fn test_slice_bounds_split() {
        assert_eq!(slice_bounds(100, 0), (30, 30));
        assert_eq!(slice_bounds(100, 50), (15, 65));
        assert_eq!(slice_bounds(100, 100), (0, 100));
        assert_eq!(slice_bounds(10, 7), (0, 7));
    }

    #[test]
    fn test_truncate_identity_within_budget() {
        let manager = char_manager(TokenBudgetConfig::default());
        let text = "short knowledge";
        assert_eq!(manager.truncate(text, 100).unwrap(), text);
        assert_eq!(manager.truncate(text, text.len()).unwrap(), text);
    }

    #[test]
    fn test_truncate_zero_budget_is_empty() {
        let manager = char_manager(TokenBudgetConfig::default());
        assert_eq!(manager.truncate("anything", 0).unwrap(), "");
    }

    #[test]
    fn test_truncate_keeps_middle_with_markers() {
        let manager = char_manager(TokenBudgetConfig::default());
        let text: String = (0..1000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();

        let truncated = manager.truncate(&text, 200).unwrap();

        assert!(manager.count(&truncated) <= 200);
        assert!(truncated.starts_with("...["));
        assert!(truncated.contains("tokens omitted before]..."));
        assert!(truncated.ends_with("tokens omitted after]..."));

        let front: usize = truncated["...[".len()..]
            .split(' ')
            .next()
            .unwrap()
            .parse()
            .unwrap();
        let back: usize = truncated
            .rsplit("...[")
            .next()
            .unwrap()
            .split(' ')
            .next()
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!((front, back), (261, 610));

        let body_start = truncated.find("\n\n").unwrap() + 2;
        let body_end = truncated.rfind("\n\n").unwrap();
        assert_eq!(&truncated[body_start..body_end], &text[front..text.len() - back]);
    }

    #[test]
    fn test_truncate_bare_slice_when_markers_do_not_fit() {
        let manager = char_manager(TokenBudgetConfig::default());
        let text = "x".repeat(500);

        let truncated = manager.truncate(&text, 10).unwrap();
        assert_eq!(truncated, "x".repeat(10));
    }

    #[test]
    fn test_truncate_tiktoken_multibyte_within_budget() {
        let tokenizer: Arc<dyn Tokenizer> = Arc::new(TiktokenTokenizer::new().unwrap());
        let manager = TokenBudgetManager::new(TokenBudgetConfig::default(), tokenizer).unwrap();
        let text = "价值投资需要耐心和纪律。".repeat(400);

        let truncated = manager.truncate(&text, 300).unwrap();

        assert!(manager.count(&truncated) <= 300);
        assert!(truncated.contains("tokens omitted before"));
        assert!(truncated.contains("tokens omitted after"));
    }

    #[test]
    fn test_budget_uses_available_when_above_floor() {
        let manager = char_manager(TokenBudgetConfig::default());
        let budget = manager.knowledge_budget(1_000, 0);

        assert_eq!(budget.available, 131_072 - 1_000 - 2_000);
        assert_eq!(budget.limit, 128_072);
        assert!(!budget.floor_applied);
    }

    #[test]
    fn test_budget_floor_overrides_small_available() {
        let manager = char_manager(TokenBudgetConfig::default());
        let budget = manager.knowledge_budget(1_000, 60_000);

        assert_eq!(budget.available, 68_072);
        assert_eq!(budget.limit, 80_000);
        assert!(budget.floor_applied);
    }

    #[test]
    fn test_budget_never_negative() {
        let config = TokenBudgetConfig {
            max_tokens: 1_000,
            tokens_per_turn: 200,
            history_fraction: 0.3,
            knowledge_floor: 0,
        };
        let manager = char_manager(config);
        let budget = manager.knowledge_budget(900, 300);

        assert!(budget.available < 0);
        assert_eq!(budget.limit, 0);
    }

    #[test]
    fn test_floor_capped_by_nominal_window() {
        let config = TokenBudgetConfig {
            max_tokens: 10_000,
            tokens_per_turn: 1_000,
            history_fraction: 0.3,
            knowledge_floor: 9_000,
        };
        let manager = char_manager(config);
        let budget = manager.knowledge_budget(500, 3_000);

        assert_eq!(budget.available, 5_500);
        assert_eq!(budget.limit, 8_500);
    }
}
