//! Prompt sequences and where they come from.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::PromptError;

/// One prompt in a sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub name: String,
    pub text: String,
}

impl Prompt {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

/// An ordered scenario of prompts. Every run walks it front to back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSequence {
    pub name: String,
    pub prompts: Vec<Prompt>,
}

impl PromptSequence {
    pub fn new(name: impl Into<String>, prompts: Vec<Prompt>) -> Self {
        Self {
            name: name.into(),
            prompts,
        }
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

/// Supplies prompt sequences by name.
pub trait PromptSource: Send + Sync {
    /// Names of all available sequences, in a stable order.
    fn sequence_names(&self) -> Vec<String>;

    fn load(&self, name: &str) -> Result<PromptSequence, PromptError>;

    /// Load several sequences, failing on the first missing one.
    fn load_all(&self, names: &[String]) -> Result<Vec<PromptSequence>, PromptError> {
        names.iter().map(|n| self.load(n)).collect()
    }
}

/// In-memory prompt source.
#[derive(Debug, Clone, Default)]
pub struct StaticPromptSource {
    sequences: BTreeMap<String, Vec<Prompt>>,
}

impl StaticPromptSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sequence(mut self, name: impl Into<String>, prompts: Vec<Prompt>) -> Self {
        self.sequences.insert(name.into(), prompts);
        self
    }
}

impl PromptSource for StaticPromptSource {
    fn sequence_names(&self) -> Vec<String> {
        self.sequences.keys().cloned().collect()
    }

    fn load(&self, name: &str) -> Result<PromptSequence, PromptError> {
        self.sequences
            .get(name)
            .map(|prompts| PromptSequence::new(name, prompts.clone()))
            .ok_or_else(|| PromptError::SequenceNotFound {
                name: name.to_string(),
            })
    }
}

/// Prompt source backed by a JSON file of the form
/// `{"<sequence>": [{"name": "...", "text": "..."}, ...], ...}`.
#[derive(Debug, Clone)]
pub struct JsonPromptSource {
    inner: StaticPromptSource,
}

impl JsonPromptSource {
    pub fn from_path(path: &Path) -> Result<Self, PromptError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw).map_err(|reason| PromptError::Parse {
            path: path.display().to_string(),
            reason,
        })
    }

    fn from_json(raw: &str) -> Result<Self, String> {
        let sequences: BTreeMap<String, Vec<Prompt>> =
            serde_json::from_str(raw).map_err(|e| e.to_string())?;
        Ok(Self {
            inner: StaticPromptSource { sequences },
        })
    }
}

impl PromptSource for JsonPromptSource {
    fn sequence_names(&self) -> Vec<String> {
        self.inner.sequence_names()
    }

    fn load(&self, name: &str) -> Result<PromptSequence, PromptError> {
        self.inner.load(name)
    }
}
