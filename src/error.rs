//! Crate-level error type

use crate::backend::BackendError;
use crate::context::BudgetError;
use crate::knowledge::KnowledgeError;
use thiserror::Error;

/// Errors surfaced while assembling or running an expert panel
#[derive(Debug, Error)]
pub enum PanelError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to load configuration: {0}")]
    ConfigSource(#[from] config::ConfigError),

    #[error(transparent)]
    Budget(#[from] BudgetError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Knowledge(#[from] KnowledgeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PanelError>;
