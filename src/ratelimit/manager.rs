//! Per-provider admission control.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, RateLimitError};
use crate::llm::Provider;
use crate::ratelimit::limits::{BreakerPolicy, LimitTable, ProviderLimit};

/// Length of the rolling request-quota window.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Mutable admission state for one provider.
#[derive(Debug, Default)]
struct ProviderRuntimeState {
    /// Admission timestamps, oldest first.
    admitted: VecDeque<Instant>,
    consecutive_errors: u32,
    breaker_open: bool,
    tripped_at: Option<Instant>,
}

impl ProviderRuntimeState {
    /// Drop timestamps that have aged out of the window.
    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.admitted.front() {
            if now.saturating_duration_since(*oldest) >= RATE_WINDOW {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
    }

    /// Admissions inside the window, without pruning.
    fn recent_count(&self, now: Instant) -> usize {
        self.admitted
            .iter()
            .filter(|t| now.saturating_duration_since(**t) < RATE_WINDOW)
            .count()
    }

    fn breaker_due_for_reset(&self, now: Instant, reset_after: Duration) -> bool {
        self.breaker_open
            && self
                .tripped_at
                .is_some_and(|t| now.saturating_duration_since(t) >= reset_after)
    }

    fn close_breaker(&mut self) {
        self.breaker_open = false;
        self.tripped_at = None;
        self.consecutive_errors = 0;
    }
}

struct ProviderBucket {
    provider: Provider,
    limit: ProviderLimit,
    uses_fallback: bool,
    slots: Arc<Semaphore>,
    state: Mutex<ProviderRuntimeState>,
}

impl ProviderBucket {
    fn new(provider: Provider, limits: &LimitTable) -> Self {
        let limit = limits.get(provider).clone();
        Self {
            provider,
            slots: Arc::new(Semaphore::new(limit.max_concurrent)),
            limit,
            uses_fallback: limits.uses_fallback(provider),
            state: Mutex::new(ProviderRuntimeState::default()),
        }
    }

    fn in_flight(&self) -> usize {
        self.limit
            .max_concurrent
            .saturating_sub(self.slots.available_permits())
    }
}

/// An admitted call's concurrency slot. Dropping it releases the slot, so
/// the slot comes back on every exit path: success, error, panic unwinding
/// or cancellation of the owning future.
#[must_use = "the slot is released as soon as the guard is dropped"]
pub struct SlotGuard {
    provider: Provider,
    _permit: OwnedSemaphorePermit,
}

impl SlotGuard {
    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Release the slot now.
    pub fn release(self) {
        drop(self);
    }
}

impl std::fmt::Debug for SlotGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotGuard")
            .field("provider", &self.provider)
            .finish()
    }
}

/// Read-only view of one provider's admission state, for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderStats {
    pub provider: Provider,
    pub max_concurrent: usize,
    pub current_concurrency: usize,
    pub requests_per_minute: usize,
    pub recent_requests: usize,
    /// Recent requests as a percentage of the per-minute quota.
    pub utilization_pct: f64,
    pub breaker_open: bool,
    pub consecutive_errors: u32,
    pub uses_fallback: bool,
}

/// Admission control shared by every worker.
///
/// One bucket exists for every [`Provider`] from construction on. Each bucket
/// enforces a concurrency cap (semaphore), a rolling-minute quota (timestamp
/// window) and a circuit breaker. Buckets never affect each other.
pub struct RateLimitManager {
    buckets: [ProviderBucket; Provider::ALL.len()],
    breaker: BreakerPolicy,
}

impl RateLimitManager {
    /// Build a manager after validating the limit table and breaker policy.
    pub fn new(limits: LimitTable, breaker: BreakerPolicy) -> Result<Self, ConfigError> {
        limits.validate()?;
        breaker.validate()?;
        Ok(Self::build(limits, breaker))
    }

    fn build(limits: LimitTable, breaker: BreakerPolicy) -> Self {
        Self {
            buckets: Provider::ALL.map(|p| ProviderBucket::new(p, &limits)),
            breaker,
        }
    }

    fn bucket(&self, provider: Provider) -> &ProviderBucket {
        &self.buckets[provider.index()]
    }

    /// Limits in force for a provider.
    pub fn limit(&self, provider: Provider) -> &ProviderLimit {
        &self.bucket(provider).limit
    }

    pub fn breaker_policy(&self) -> &BreakerPolicy {
        &self.breaker
    }

    /// Wait for a concurrency slot and quota room for `provider`.
    ///
    /// Suspends only the calling task. When the provider's breaker is open,
    /// before or at any point while waiting, this sleeps for the breaker
    /// cooldown and returns [`RateLimitError::CircuitOpen`] instead of
    /// waiting for recovery.
    pub async fn acquire(&self, provider: Provider) -> Result<SlotGuard, RateLimitError> {
        let bucket = self.bucket(provider);

        {
            let mut state = bucket.state.lock().await;
            if self.breaker_blocks(&mut state, provider) {
                drop(state);
                return Err(self.reject(provider).await);
            }
        }

        let permit = Arc::clone(&bucket.slots)
            .acquire_owned()
            .await
            .map_err(|_| RateLimitError::Closed { provider })?;

        loop {
            let wait = {
                let mut state = bucket.state.lock().await;
                // The breaker may have tripped while this caller was queued.
                if self.breaker_blocks(&mut state, provider) {
                    drop(state);
                    drop(permit);
                    return Err(self.reject(provider).await);
                }

                let now = Instant::now();
                state.prune(now);
                if state.admitted.len() < bucket.limit.requests_per_minute {
                    state.admitted.push_back(now);
                    None
                } else {
                    // Sleep exactly until the oldest admission leaves the window.
                    // An empty window here means a zero quota: never admit.
                    Some(
                        state
                            .admitted
                            .front()
                            .map(|oldest| (*oldest + RATE_WINDOW).saturating_duration_since(now))
                            .unwrap_or(RATE_WINDOW),
                    )
                }
            };

            match wait {
                None => break,
                Some(wait) => {
                    debug!(
                        provider = %provider,
                        wait_ms = wait.as_millis() as u64,
                        "Per-minute quota exhausted, waiting"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }

        Ok(SlotGuard {
            provider,
            _permit: permit,
        })
    }

    /// Whether the breaker currently rejects callers. Closes a breaker whose
    /// reset interval has passed.
    fn breaker_blocks(&self, state: &mut ProviderRuntimeState, provider: Provider) -> bool {
        if !state.breaker_open {
            return false;
        }
        if state.breaker_due_for_reset(Instant::now(), self.breaker.reset_after) {
            state.close_breaker();
            info!(provider = %provider, "Circuit breaker closed");
            return false;
        }
        true
    }

    /// Impose the open-breaker cooldown on a rejected caller.
    async fn reject(&self, provider: Provider) -> RateLimitError {
        let cooldown = self.breaker.open_cooldown;
        warn!(
            provider = %provider,
            cooldown_ms = cooldown.as_millis() as u64,
            "Circuit open, rejecting request"
        );
        tokio::time::sleep(cooldown).await;
        RateLimitError::CircuitOpen { provider, cooldown }
    }

    /// Count a failed call. Trips the breaker at the configured threshold.
    pub async fn record_error(&self, provider: Provider) {
        let bucket = self.bucket(provider);
        let mut state = bucket.state.lock().await;
        state.consecutive_errors = state.consecutive_errors.saturating_add(1);

        if !state.breaker_open && state.consecutive_errors >= self.breaker.threshold {
            state.breaker_open = true;
            state.tripped_at = Some(Instant::now());
            warn!(
                provider = %provider,
                errors = state.consecutive_errors,
                "Circuit breaker tripped"
            );
        }
    }

    /// Count a successful call: one step back towards a clean error count.
    pub async fn record_success(&self, provider: Provider) {
        let bucket = self.bucket(provider);
        let mut state = bucket.state.lock().await;
        state.consecutive_errors = state.consecutive_errors.saturating_sub(1);
    }

    /// Whether an open breaker has waited long enough to close.
    pub async fn should_reset_breaker(&self, provider: Provider) -> bool {
        let state = self.bucket(provider).state.lock().await;
        state.breaker_due_for_reset(Instant::now(), self.breaker.reset_after)
    }

    /// Snapshot of one provider. Never mutates admission state.
    pub async fn provider_stats(&self, provider: Provider) -> ProviderStats {
        let bucket = self.bucket(provider);
        let state = bucket.state.lock().await;
        let recent = state.recent_count(Instant::now());

        ProviderStats {
            provider: bucket.provider,
            max_concurrent: bucket.limit.max_concurrent,
            current_concurrency: bucket.in_flight(),
            requests_per_minute: bucket.limit.requests_per_minute,
            recent_requests: recent,
            utilization_pct: if bucket.limit.requests_per_minute == 0 {
                0.0
            } else {
                recent as f64 / bucket.limit.requests_per_minute as f64 * 100.0
            },
            breaker_open: state.breaker_open,
            consecutive_errors: state.consecutive_errors,
            uses_fallback: bucket.uses_fallback,
        }
    }

    /// Snapshot of every provider, in [`Provider::ALL`] order.
    pub async fn all_provider_stats(&self) -> Vec<ProviderStats> {
        let mut stats = Vec::with_capacity(Provider::ALL.len());
        for provider in Provider::ALL {
            stats.push(self.provider_stats(provider).await);
        }
        stats
    }
}

impl Default for RateLimitManager {
    fn default() -> Self {
        Self::build(LimitTable::default(), BreakerPolicy::default())
    }
}
