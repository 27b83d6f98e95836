//! Tokenization using tiktoken

use super::token_budget::BudgetError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tiktoken_rs::{cl100k_base, CoreBPE};

/// Which tokenizer budgets are measured with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerKind {
    /// cl100k_base byte-pair encoding
    #[default]
    Tiktoken,
    /// One token per character
    Chars,
}

impl TokenizerKind {
    pub fn build(self) -> Result<Arc<dyn Tokenizer>, BudgetError> {
        let tokenizer: Arc<dyn Tokenizer> = match self {
            TokenizerKind::Tiktoken => Arc::new(TiktokenTokenizer::new()?),
            TokenizerKind::Chars => Arc::new(CharTokenizer),
        };
        Ok(tokenizer)
    }
}

/// Tokenizer trait for different tokenization strategies
pub trait Tokenizer: Send + Sync {
    /// Encode text into token ids
    fn encode(&self, text: &str) -> Vec<usize>;

    /// Decode a token sequence back into text
    fn decode(&self, tokens: &[usize]) -> Result<String, BudgetError>;

    /// Number of tokens in the given text
    fn count(&self, text: &str) -> usize {
        self.encode(text).len()
    }
}

/// Tiktoken-based tokenizer using cl100k_base
#[derive(Clone)]
pub struct TiktokenTokenizer {
    bpe: Arc<CoreBPE>,
}

impl TiktokenTokenizer {
    pub fn new() -> Result<Self, BudgetError> {
        let bpe = cl100k_base().map_err(|e| BudgetError::TokenizerUnavailable(e.to_string()))?;
        Ok(Self { bpe: Arc::new(bpe) })
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn encode(&self, text: &str) -> Vec<usize> {
        self.bpe.encode_with_special_tokens(text)
    }

    fn decode(&self, tokens: &[usize]) -> Result<String, BudgetError> {
        self.bpe
            .decode(tokens.to_vec())
            .map_err(|e| BudgetError::DecodeFailed(e.to_string()))
    }
}

/// One token per Unicode scalar value
#[derive(Debug, Clone, Copy, Default)]
pub struct CharTokenizer;

impl Tokenizer for CharTokenizer {
    fn encode(&self, text: &str) -> Vec<usize> {
        text.chars().map(|c| c as usize).collect()
    }

    fn decode(&self, tokens: &[usize]) -> Result<String, BudgetError> {
        tokens
            .iter()
            .map(|&t| {
                u32::try_from(t)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| BudgetError::DecodeFailed(format!("invalid scalar {}", t)))
            })
            .collect()
    }

    fn count(&self, text: &str) -> usize {
        text.chars().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiktoken_count() {
        let tokenizer = TiktokenTokenizer::new().unwrap();
        let tokens = tokenizer.count("Hello, world! This is a test.");
        assert!(tokens > 0);
        assert!(tokens < 20);
    }

    #[test]
    fn test_tiktoken_decode_roundtrip() {
        let tokenizer = TiktokenTokenizer::new().unwrap();
        let text = "Margin of safety matters more than growth.";
        let tokens = tokenizer.encode(text);
        assert_eq!(tokenizer.decode(&tokens).unwrap(), text);
    }

    #[test]
    fn test_char_tokenizer_counts_scalars() {
        let tokenizer = CharTokenizer;
        assert_eq!(tokenizer.count("héllo"), 5);
        assert_eq!(tokenizer.count("投资"), 2);
        assert_eq!(tokenizer.decode(&tokenizer.encode("投资 ok")).unwrap(), "投资 ok");
    }

    #[test]
    fn test_kind_builds_matching_tokenizer() {
        let chars = TokenizerKind::Chars.build().unwrap();
        assert_eq!(chars.count("abc"), 3);

        let kind: TokenizerKind = serde_json::from_str("\"tiktoken\"").unwrap();
        assert_eq!(kind, TokenizerKind::Tiktoken);
    }

    #[test]
    fn test_char_tokenizer_rejects_surrogates() {
        assert!(CharTokenizer.decode(&[0xD800]).is_err());
    }
}
