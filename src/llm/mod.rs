//! Generation backends.
//!
//! The runner only sees two seams:
//! - [`GenerationBackend`]: one async `generate(prompt)` call per prompt
//! - [`BackendFactory`]: builds a backend for a configured model
//!
//! Shipped implementations:
//! - **HTTP**: any OpenAI-compatible chat-completions endpoint via reqwest
//! - **Echo**: deterministic offline backend for dry runs

mod echo;
pub mod openai_compat;
pub mod provider;

pub use echo::{EchoBackend, EchoBackendFactory};
pub use openai_compat::{HttpBackendFactory, OpenAiCompatBackend, ProviderEndpoint};
pub use provider::Provider;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// A model to evaluate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model identifier as the provider knows it.
    pub id: String,
    /// Explicit provider; classified from `id` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
}

impl ModelConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider: None,
        }
    }

    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Provider bucket used for rate limiting.
    pub fn provider(&self) -> Provider {
        self.provider
            .unwrap_or_else(|| Provider::classify(&self.id))
    }
}

/// Output of a single generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub elapsed: Duration,
}

/// A model endpoint that turns prompt text into a response.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Model identifier this backend talks to.
    fn model_name(&self) -> &str;

    /// Generate a response for the full (context-accumulated) prompt text.
    async fn generate(&self, prompt: &str) -> Result<Generation, LlmError>;
}

/// Builds a backend for each model under evaluation.
pub trait BackendFactory: Send + Sync {
    fn create(&self, model: &ModelConfig) -> Result<Arc<dyn GenerationBackend>, LlmError>;
}
