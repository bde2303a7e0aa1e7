//! Offline backend that answers without calling any API.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::LlmError;
use crate::llm::{BackendFactory, Generation, GenerationBackend, ModelConfig};

/// Replies with a short digest of the prompt after an optional simulated latency.
pub struct EchoBackend {
    model: String,
    latency: Duration,
}

impl EchoBackend {
    pub fn new(model: impl Into<String>, latency: Duration) -> Self {
        Self {
            model: model.into(),
            latency,
        }
    }
}

#[async_trait]
impl GenerationBackend for EchoBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<Generation, LlmError> {
        let start = Instant::now();
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let last_line = prompt.lines().last().unwrap_or_default();
        Ok(Generation {
            text: format!(
                "[{}] {} chars in context; last line: {}",
                self.model,
                prompt.len(),
                last_line
            ),
            elapsed: start.elapsed(),
        })
    }
}

/// Factory producing [`EchoBackend`]s for dry runs.
#[derive(Debug, Clone, Default)]
pub struct EchoBackendFactory {
    latency: Duration,
}

impl EchoBackendFactory {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

impl BackendFactory for EchoBackendFactory {
    fn create(&self, model: &ModelConfig) -> Result<Arc<dyn GenerationBackend>, LlmError> {
        Ok(Arc::new(EchoBackend::new(model.id.clone(), self.latency)))
    }
}
