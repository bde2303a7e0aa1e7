//! Static admission limits per provider.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::llm::Provider;

/// Static limits for one provider. Immutable once the manager is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderLimit {
    /// Maximum in-flight calls.
    pub max_concurrent: usize,
    /// Maximum admitted calls in any rolling 60 s window.
    pub requests_per_minute: usize,
    /// Burst size the provider tolerates. Reported, not enforced.
    pub burst_capacity: usize,
    /// Backoff multiplier the provider recommends. Reported, not enforced.
    pub backoff_factor: f64,
}

impl ProviderLimit {
    pub fn new(max_concurrent: usize, requests_per_minute: usize) -> Self {
        Self {
            max_concurrent,
            requests_per_minute,
            burst_capacity: max_concurrent,
            backoff_factor: 2.0,
        }
    }

    pub fn with_burst_capacity(mut self, burst_capacity: usize) -> Self {
        self.burst_capacity = burst_capacity;
        self
    }

    pub fn with_backoff_factor(mut self, backoff_factor: f64) -> Self {
        self.backoff_factor = backoff_factor;
        self
    }

    fn validate(&self, key: &str) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::InvalidValue {
                key: format!("{key}.max_concurrent"),
                message: "must be at least 1".to_string(),
            });
        }
        if self.requests_per_minute == 0 {
            return Err(ConfigError::InvalidValue {
                key: format!("{key}.requests_per_minute"),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Provider → limit lookup with an explicit fallback entry.
///
/// Providers without their own entry (always including [`Provider::Unknown`]
/// unless one is added) are admitted under `fallback`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitTable {
    entries: HashMap<Provider, ProviderLimit>,
    fallback: ProviderLimit,
}

impl LimitTable {
    /// Empty table: every provider uses `fallback`.
    pub fn new(fallback: ProviderLimit) -> Self {
        Self {
            entries: HashMap::new(),
            fallback,
        }
    }

    pub fn with_limit(mut self, provider: Provider, limit: ProviderLimit) -> Self {
        self.entries.insert(provider, limit);
        self
    }

    pub fn with_fallback(mut self, fallback: ProviderLimit) -> Self {
        self.fallback = fallback;
        self
    }

    /// Limit for a provider, or the fallback when it has no entry.
    pub fn get(&self, provider: Provider) -> &ProviderLimit {
        self.entries.get(&provider).unwrap_or(&self.fallback)
    }

    pub fn uses_fallback(&self, provider: Provider) -> bool {
        !self.entries.contains_key(&provider)
    }

    pub fn fallback(&self) -> &ProviderLimit {
        &self.fallback
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (provider, limit) in &self.entries {
            limit.validate(&format!("limits.{provider}"))?;
        }
        self.fallback.validate("limits.fallback")
    }
}

impl Default for LimitTable {
    fn default() -> Self {
        Self::new(ProviderLimit::new(2, 20))
            .with_limit(Provider::Anthropic, ProviderLimit::new(5, 50))
            .with_limit(
                Provider::OpenAi,
                ProviderLimit::new(10, 500).with_burst_capacity(20),
            )
            .with_limit(Provider::Google, ProviderLimit::new(5, 60))
            .with_limit(Provider::DeepSeek, ProviderLimit::new(5, 60))
            .with_limit(
                Provider::OpenRouter,
                ProviderLimit::new(8, 200).with_burst_capacity(10),
            )
    }
}

/// Circuit breaker thresholds, shared by all providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerPolicy {
    /// Consecutive uncompensated errors that trip the breaker.
    pub threshold: u32,
    /// Time after a trip at which the breaker closes again.
    pub reset_after: Duration,
    /// Sleep imposed on a caller that hits an open breaker.
    pub open_cooldown: Duration,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            threshold: 5,
            reset_after: Duration::from_secs(30),
            open_cooldown: Duration::from_secs(5),
        }
    }
}

impl BreakerPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threshold == 0 {
            return Err(ConfigError::InvalidValue {
                key: "breaker.threshold".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
