//! Expert personas and where their knowledge comes from

pub mod loader;

pub use loader::{DirectoryLoader, KnowledgeConfig};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Emoji used when an expert has no avatar image
pub const DEFAULT_AVATAR: &str = "🤖";

/// Display reference for an expert, never interpreted here
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Avatar {
    Image(PathBuf),
    DataUri(String),
    Emoji(String),
}

impl Default for Avatar {
    fn default() -> Self {
        Avatar::Emoji(DEFAULT_AVATAR.to_string())
    }
}

/// One expert: a unique name and the full source text of their knowledge
#[derive(Debug, Clone)]
pub struct Persona {
    pub name: String,
    pub knowledge: Arc<str>,
    pub avatar: Avatar,
}

impl Persona {
    pub fn new(name: impl Into<String>, knowledge: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            knowledge: knowledge.into(),
            avatar: Avatar::default(),
        }
    }

    pub fn with_avatar(mut self, avatar: Avatar) -> Self {
        self.avatar = avatar;
        self
    }
}

/// Knowledge loading errors
#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid file pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Duplicate expert name: {0}")]
    DuplicateName(String),

    #[error("No experts found under {0}")]
    NoExperts(PathBuf),
}

/// Supplies the personas a panel is built from
pub trait KnowledgeLoader: Send + Sync {
    fn load(&self) -> Result<Vec<Persona>, KnowledgeError>;
}

/// Fixed list of personas, for embedding and tests
#[derive(Debug, Clone, Default)]
pub struct StaticLoader {
    personas: Vec<Persona>,
}

impl StaticLoader {
    pub fn new(personas: Vec<Persona>) -> Self {
        Self { personas }
    }
}

impl KnowledgeLoader for StaticLoader {
    fn load(&self) -> Result<Vec<Persona>, KnowledgeError> {
        ensure_unique(&self.personas)?;
        Ok(self.personas.clone())
    }
}

/// Reject persona lists that repeat a name
pub fn ensure_unique(personas: &[Persona]) -> Result<(), KnowledgeError> {
    let mut seen = std::collections::HashSet::new();
    for persona in personas {
        if !seen.insert(persona.name.as_str()) {
            return Err(KnowledgeError::DuplicateName(persona.name.clone()));
        }
    }
    Ok(())
}
