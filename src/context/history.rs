//! Bounded per-agent conversation history

use super::tokenizer::Tokenizer;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// One question/answer pair with its token cost
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub question: String,
    pub answer: String,
    pub tokens: usize,
}

impl Exchange {
    /// Cost the pair as `"Q: {question}\nA: {answer}"`
    pub fn new(question: impl Into<String>, answer: impl Into<String>, tokenizer: &dyn Tokenizer) -> Self {
        let question = question.into();
        let answer = answer.into();
        let tokens = tokenizer.count(&format!("Q: {}\nA: {}", question, answer));
        Self {
            question,
            answer,
            tokens,
        }
    }
}

/// FIFO history whose token total never exceeds `limit`
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    exchanges: VecDeque<Exchange>,
    tokens: usize,
    limit: usize,
}

impl ConversationHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            exchanges: VecDeque::new(),
            tokens: 0,
            limit,
        }
    }

    /// Append an exchange, evicting the oldest ones until it fits.
    /// Returns the evicted exchanges, oldest first.
    ///
    /// An exchange larger than the whole limit empties the history and is
    /// not retained.
    pub fn record(&mut self, exchange: Exchange) -> Vec<Exchange> {
        let mut evicted = Vec::new();

        if exchange.tokens > self.limit {
            warn!(
                "Exchange of {} tokens exceeds history limit of {}, clearing history",
                exchange.tokens, self.limit
            );
            evicted.extend(self.exchanges.drain(..));
            self.tokens = 0;
            return evicted;
        }

        while self.tokens + exchange.tokens > self.limit {
            match self.exchanges.pop_front() {
                Some(old) => {
                    self.tokens -= old.tokens;
                    debug!("Evicted exchange, freed {} tokens", old.tokens);
                    evicted.push(old);
                }
                None => break,
            }
        }

        self.tokens += exchange.tokens;
        self.exchanges.push_back(exchange);
        debug!(
            "History now holds {} exchanges, {} tokens",
            self.exchanges.len(),
            self.tokens
        );
        evicted
    }

    pub fn tokens(&self) -> usize {
        self.tokens
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Exchange> {
        self.exchanges.iter()
    }

    /// Owned copy of the retained exchanges, oldest first
    pub fn to_vec(&self) -> Vec<Exchange> {
        self.exchanges.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tokenizer::CharTokenizer;

    fn exchange(question: &str, answer: &str) -> Exchange {
        Exchange::new(question, answer, &CharTokenizer)
    }

    #[test]
    fn test_exchange_cost_includes_framing() {
        let ex = exchange("why", "because");
        assert_eq!(ex.tokens, "Q: why\nA: because".chars().count());
    }

    #[test]
    fn test_fifo_eviction_keeps_bound() {
        // "Q: qN\nA: a" costs 10 tokens
        let mut history = ConversationHistory::new(25);
        let mut all_evicted = Vec::new();

        for q in ["q1", "q2", "q3", "q4"] {
            all_evicted.extend(history.record(exchange(q, "a")));
            assert!(history.tokens() <= history.limit());
        }

        let retained: Vec<_> = history.iter().map(|e| e.question.as_str()).collect();
        assert_eq!(retained, vec!["q3", "q4"]);
        let evicted: Vec<_> = all_evicted.iter().map(|e| e.question.as_str()).collect();
        assert_eq!(evicted, vec!["q1", "q2"]);
        assert_eq!(history.tokens(), 20);
    }

    #[test]
    fn test_oversized_exchange_clears_history() {
        let mut history = ConversationHistory::new(15);
        history.record(exchange("q1", "a"));

        let evicted = history.record(exchange("long question", "long answer"));

        assert_eq!(evicted.len(), 1);
        assert!(history.is_empty());
        assert_eq!(history.tokens(), 0);
    }

    #[test]
    fn test_exact_fit_is_retained() {
        let mut history = ConversationHistory::new(20);
        history.record(exchange("q1", "a"));
        history.record(exchange("q2", "a"));

        assert_eq!(history.len(), 2);
        assert_eq!(history.tokens(), 20);
    }
}
