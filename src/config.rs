//! Configuration types.

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::ratelimit::{BreakerPolicy, LimitTable, ProviderLimit};

/// Evaluation configuration.
#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Maximum sequences of one model running at the same time.
    pub max_concurrent_sequences: usize,
    /// Runs per (model, sequence) pair.
    pub num_runs: u32,
    /// Interval between progress reports.
    pub progress_interval: Duration,
    /// Per-provider admission limits.
    pub limits: LimitTable,
    /// Circuit breaker thresholds.
    pub breaker: BreakerPolicy,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sequences: 5,
            num_runs: 1,
            progress_interval: Duration::from_secs(30),
            limits: LimitTable::default(),
            breaker: BreakerPolicy::default(),
        }
    }
}

impl EvalConfig {
    /// Defaults overridden by `SEQ_EVAL_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(n) = parse_var(&lookup, "SEQ_EVAL_MAX_CONCURRENT")? {
            config.max_concurrent_sequences = n;
        }
        if let Some(n) = parse_var(&lookup, "SEQ_EVAL_RUNS")? {
            config.num_runs = n;
        }
        if let Some(secs) = parse_var(&lookup, "SEQ_EVAL_PROGRESS_SECS")? {
            config.progress_interval = Duration::from_secs(secs);
        }
        if let Some(n) = parse_var(&lookup, "SEQ_EVAL_BREAKER_THRESHOLD")? {
            config.breaker.threshold = n;
        }
        if let Some(secs) = parse_var(&lookup, "SEQ_EVAL_BREAKER_RESET_SECS")? {
            config.breaker.reset_after = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&lookup, "SEQ_EVAL_BREAKER_COOLDOWN_SECS")? {
            config.breaker.open_cooldown = Duration::from_secs(secs);
        }

        let fallback = config.limits.fallback().clone();
        let concurrent = parse_var(&lookup, "SEQ_EVAL_FALLBACK_CONCURRENT")?;
        let rpm = parse_var(&lookup, "SEQ_EVAL_FALLBACK_RPM")?;
        if concurrent.is_some() || rpm.is_some() {
            let limit = ProviderLimit::new(
                concurrent.unwrap_or(fallback.max_concurrent),
                rpm.unwrap_or(fallback.requests_per_minute),
            )
            .with_backoff_factor(fallback.backoff_factor);
            config.limits = config.limits.with_fallback(limit);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_sequences == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_concurrent_sequences".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.progress_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "progress_interval".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        self.limits.validate()?;
        self.breaker.validate()
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = EvalConfig::default();
        assert_eq!(config.max_concurrent_sequences, 5);
        assert_eq!(config.progress_interval, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides() {
        let config = EvalConfig::from_lookup(lookup(&[
            ("SEQ_EVAL_MAX_CONCURRENT", "3"),
            ("SEQ_EVAL_RUNS", "4"),
            ("SEQ_EVAL_BREAKER_THRESHOLD", "7"),
            ("SEQ_EVAL_FALLBACK_RPM", "12"),
        ]))
        .unwrap();

        assert_eq!(config.max_concurrent_sequences, 3);
        assert_eq!(config.num_runs, 4);
        assert_eq!(config.breaker.threshold, 7);
        assert_eq!(config.limits.fallback().requests_per_minute, 12);
        // Untouched half of the fallback keeps its default.
        assert_eq!(config.limits.fallback().max_concurrent, 2);
    }

    #[test]
    fn invalid_value_names_the_key() {
        let err = EvalConfig::from_lookup(lookup(&[("SEQ_EVAL_PROGRESS_SECS", "soon")])).unwrap_err();
        let ConfigError::InvalidValue { key, .. } = err;
        assert_eq!(key, "SEQ_EVAL_PROGRESS_SECS");
    }

    #[test]
    fn zero_concurrency_rejected() {
        assert!(EvalConfig::from_lookup(lookup(&[("SEQ_EVAL_MAX_CONCURRENT", "0")])).is_err());
        assert!(EvalConfig::from_lookup(lookup(&[("SEQ_EVAL_FALLBACK_CONCURRENT", "0")])).is_err());
    }

    #[test]
    fn blank_values_are_ignored() {
        let config = EvalConfig::from_lookup(lookup(&[("SEQ_EVAL_RUNS", "  ")])).unwrap();
        assert_eq!(config.num_runs, 1);
    }
}
