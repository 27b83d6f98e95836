//! Directory-per-expert knowledge loader
//!
//! Layout under the data root:
//!
//! ```text
//! data/
//!   Alice Ward/
//!     head.png
//!     letters.txt
//!     notes.md
//! ```

use super::{ensure_unique, Avatar, KnowledgeError, KnowledgeLoader, Persona};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_extensions() -> Vec<String> {
    vec!["txt".to_string(), "md".to_string()]
}

fn default_avatar_file() -> String {
    "head.png".to_string()
}

/// Knowledge loading configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Root holding one sub-directory per expert
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Document extensions read as knowledge
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Image used as the expert's avatar when present
    #[serde(default = "default_avatar_file")]
    pub avatar_file: String,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            extensions: default_extensions(),
            avatar_file: default_avatar_file(),
        }
    }
}

/// Loads one persona per sub-directory of the data root
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    config: KnowledgeConfig,
}

impl DirectoryLoader {
    pub fn new(config: KnowledgeConfig) -> Self {
        Self { config }
    }

    fn load_expert(&self, dir: &Path, name: &str) -> Result<Option<Persona>, KnowledgeError> {
        let mut documents = Vec::new();
        let escaped = Pattern::escape(&dir.to_string_lossy());
        for ext in &self.config.extensions {
            let pattern = format!("{}/*.{}", escaped, Pattern::escape(ext));
            documents.extend(glob::glob(&pattern)?.filter_map(|entry| match entry {
                Ok(path) if path.is_file() => Some(path),
                Ok(_) => None,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    None
                }
            }));
        }
        documents.sort();

        let mut texts = Vec::with_capacity(documents.len());
        for path in &documents {
            let text = std::fs::read_to_string(path).map_err(|source| KnowledgeError::Read {
                path: path.clone(),
                source,
            })?;
            debug!("Loaded {} ({} bytes) for {}", path.display(), text.len(), name);
            texts.push(text);
        }

        let knowledge = texts.join("\n\n");
        if knowledge.trim().is_empty() {
            warn!("Expert {} has no documents, skipping", name);
            return Ok(None);
        }

        let avatar_path = dir.join(&self.config.avatar_file);
        let avatar = if avatar_path.is_file() {
            Avatar::Image(avatar_path)
        } else {
            Avatar::default()
        };

        Ok(Some(Persona::new(name, knowledge).with_avatar(avatar)))
    }
}

impl KnowledgeLoader for DirectoryLoader {
    fn load(&self) -> Result<Vec<Persona>, KnowledgeError> {
        let root = &self.config.data_dir;
        if !root.is_dir() {
            warn!("Knowledge directory {} does not exist", root.display());
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(root).map_err(|source| KnowledgeError::Read {
            path: root.clone(),
            source,
        })?;

        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_dir())
            .collect();
        dirs.sort();

        let mut personas = Vec::new();
        for dir in dirs {
            let Some(name) = dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            if let Some(persona) = self.load_expert(&dir, &name)? {
                personas.push(persona);
            }
        }

        ensure_unique(&personas)?;
        info!("Loaded {} experts from {}", personas.len(), root.display());
        Ok(personas)
    }
}
