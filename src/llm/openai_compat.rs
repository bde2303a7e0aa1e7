//! OpenAI-compatible chat-completions backend.
//!
//! Every supported vendor exposes a `/chat/completions` endpoint that speaks
//! the OpenAI wire format, so one reqwest-based client covers them all. The
//! accumulated prompt is sent as a single user message.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::llm::{BackendFactory, Generation, GenerationBackend, ModelConfig, Provider};

/// Default per-request timeout. Long creative-writing completions can take minutes.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Where a provider's API lives and which env var holds its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoint {
    pub base_url: String,
    pub api_key_env: String,
}

impl ProviderEndpoint {
    pub fn new(base_url: impl Into<String>, api_key_env: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key_env: api_key_env.into(),
        }
    }

    /// Built-in endpoint for a provider. `Unknown` has none.
    pub fn default_for(provider: Provider) -> Option<Self> {
        let (url, env) = match provider {
            Provider::Anthropic => ("https://api.anthropic.com/v1", "ANTHROPIC_API_KEY"),
            Provider::OpenAi => ("https://api.openai.com/v1", "OPENAI_API_KEY"),
            Provider::Google => (
                "https://generativelanguage.googleapis.com/v1beta/openai",
                "GEMINI_API_KEY",
            ),
            Provider::DeepSeek => ("https://api.deepseek.com/v1", "DEEPSEEK_API_KEY"),
            Provider::OpenRouter => ("https://openrouter.ai/api/v1", "OPENROUTER_API_KEY"),
            Provider::Unknown => return None,
        };
        Some(Self::new(url, env))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Backend for one model on one OpenAI-compatible endpoint.
pub struct OpenAiCompatBackend {
    client: reqwest::Client,
    provider: Provider,
    base_url: String,
    api_key: SecretString,
    model: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl OpenAiCompatBackend {
    pub fn new(
        client: reqwest::Client,
        provider: Provider,
        base_url: impl Into<String>,
        api_key: SecretString,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            provider,
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn request_body<'a>(&'a self, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

#[async_trait]
impl GenerationBackend for OpenAiCompatBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<Generation, LlmError> {
        let provider = self.provider.to_string();
        let start = Instant::now();

        let resp = self
            .client
            .post(self.completions_url())
            .bearer_auth(self.api_key.expose_secret())
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: provider.clone(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(LlmError::AuthFailed { provider });
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(LlmError::RateLimited {
                provider,
                retry_after,
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed {
                provider,
                reason: format!("HTTP {status}: {}", body.chars().take(500).collect::<String>()),
            });
        }

        let parsed: ChatResponse = resp.json().await.map_err(|e| LlmError::InvalidResponse {
            provider: provider.clone(),
            reason: e.to_string(),
        })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| LlmError::InvalidResponse {
                provider,
                reason: "completion contained no text".to_string(),
            })?;

        Ok(Generation {
            text,
            elapsed: start.elapsed(),
        })
    }
}

/// Builds [`OpenAiCompatBackend`]s, reading API keys from the environment.
pub struct HttpBackendFactory {
    client: reqwest::Client,
    endpoints: HashMap<Provider, ProviderEndpoint>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl HttpBackendFactory {
    /// Factory with the built-in endpoint table and the default request timeout.
    pub fn new() -> Result<Self, LlmError> {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: "http".to_string(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;

        let endpoints = Provider::ALL
            .into_iter()
            .filter_map(|p| ProviderEndpoint::default_for(p).map(|e| (p, e)))
            .collect();

        Ok(Self {
            client,
            endpoints,
            max_tokens: None,
            temperature: None,
        })
    }

    /// Override (or add) the endpoint used for a provider.
    pub fn with_endpoint(mut self, provider: Provider, endpoint: ProviderEndpoint) -> Self {
        self.endpoints.insert(provider, endpoint);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

impl BackendFactory for HttpBackendFactory {
    fn create(
        &self,
        model: &ModelConfig,
    ) -> Result<std::sync::Arc<dyn GenerationBackend>, LlmError> {
        let provider = model.provider();
        let endpoint = self
            .endpoints
            .get(&provider)
            .ok_or_else(|| LlmError::RequestFailed {
                provider: provider.to_string(),
                reason: format!("No endpoint configured for model {}", model.id),
            })?;

        let api_key = std::env::var(&endpoint.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| LlmError::MissingApiKey {
                provider: provider.to_string(),
                env_var: endpoint.api_key_env.clone(),
            })?;

        let mut backend = OpenAiCompatBackend::new(
            self.client.clone(),
            provider,
            endpoint.base_url.clone(),
            SecretString::from(api_key),
            model.id.clone(),
        );
        if let Some(max_tokens) = self.max_tokens {
            backend = backend.with_max_tokens(max_tokens);
        }
        if let Some(temperature) = self.temperature {
            backend = backend.with_temperature(temperature);
        }

        tracing::info!(model = %model.id, provider = %provider, "Using HTTP backend");
        Ok(std::sync::Arc::new(backend))
    }
}
