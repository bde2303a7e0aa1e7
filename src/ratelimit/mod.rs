//! Per-provider admission control.
//!
//! - `limits` — static per-provider limits, the fallback entry and breaker policy
//! - `manager` — `RateLimitManager`: concurrency cap, rolling-minute quota, circuit breaker

pub mod limits;
pub mod manager;

pub use limits::{BreakerPolicy, LimitTable, ProviderLimit};
pub use manager::{ProviderStats, RATE_WINDOW, RateLimitManager, SlotGuard};
