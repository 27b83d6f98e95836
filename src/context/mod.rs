//! Token accounting for persona prompts
//!
//! Knowledge contexts are sized against the model window after the system
//! prompt, the bounded conversation history and a per-turn reservation.

pub mod history;
pub mod token_budget;
pub mod tokenizer;

pub use history::{ConversationHistory, Exchange};
pub use token_budget::{BudgetError, KnowledgeBudget, TokenBudgetConfig, TokenBudgetManager};
pub use tokenizer::{CharTokenizer, TiktokenTokenizer, Tokenizer, TokenizerKind};
