//! Error types for sequence-eval.

use std::time::Duration;

use crate::llm::Provider;

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Rate limit error: {0}")]
    RateLimit(#[from] RateLimitError),

    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Persistence sink errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Generation backend errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("No API key for provider {provider}: set {env_var}")]
    MissingApiKey { provider: String, env_var: String },
}

/// Admission-control errors raised by the rate limit manager.
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Circuit open for provider {provider}, backed off {cooldown:?}")]
    CircuitOpen {
        provider: Provider,
        cooldown: Duration,
    },

    #[error("Rate limiter for provider {provider} is shut down")]
    Closed { provider: Provider },
}

impl RateLimitError {
    /// Whether the caller may try again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

/// Prompt source errors.
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("Sequence {name} not found")]
    SequenceNotFound { name: String },

    #[error("Failed to parse prompt file {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Worker-level errors captured at the fan-out boundary.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker {worker_id} panicked: {reason}")]
    Panicked { worker_id: String, reason: String },

    #[error("Worker {worker_id} was cancelled")]
    Cancelled { worker_id: String },

    #[error("Run {run} cannot transition from {from} to {to}")]
    InvalidTransition { run: u32, from: String, to: String },
}

/// Orchestration-level errors. These are the only failures that abort an evaluation.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("No models configured")]
    NoModels,

    #[error("No sequences configured")]
    NoSequences,

    #[error("Number of runs must be at least 1")]
    NoRuns,

    #[error("No workers could be constructed: {reason}")]
    NoWorkers { reason: String },
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn open(missing: &std::path::Path) -> Result<String> {
        let raw = std::fs::read_to_string(missing).map_err(PromptError::from)?;
        Ok(raw)
    }

    #[test]
    fn concern_errors_convert_with_question_mark() {
        let err = open(std::path::Path::new("/nonexistent/prompts.json")).unwrap_err();
        assert!(matches!(err, Error::Prompt(PromptError::Io(_))));
        assert!(err.to_string().starts_with("Prompt error: IO error"));

        let err: Error = ConfigError::InvalidValue {
            key: "SEQ_EVAL_RUNS".into(),
            message: "must be at least 1".into(),
        }
        .into();
        assert!(matches!(err, Error::Config(_)));
    }
}
