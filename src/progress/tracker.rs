//! Aggregate progress counters and derived metrics.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::ratelimit::ProviderStats;

/// Point-in-time view of an evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub total_workers: usize,
    pub active_workers: usize,
    pub completed_workers: usize,
    pub failed_workers: usize,
    pub total_prompts: usize,
    pub completed_prompts: usize,
    pub failed_prompts: usize,
    /// Planned prompts that will never run: their worker was skipped or died.
    pub abandoned_prompts: usize,
    /// `completed_prompts / total_prompts * 100`.
    pub completion_pct: f64,
    /// Completed prompts per minute of wall time.
    pub prompts_per_minute: f64,
    /// Time left at the current processing rate, if there is a rate yet.
    /// Zero once every planned prompt is completed, failed or abandoned.
    pub eta: Option<Duration>,
    pub providers: Vec<ProviderStats>,
}

/// Lock-free counters shared by the runner and every worker.
///
/// All counters only ever grow, except `active_workers` which tracks
/// workers currently between start and finish.
#[derive(Debug)]
pub struct ProgressTracker {
    started: Instant,
    started_at: DateTime<Utc>,
    total_workers: usize,
    total_prompts: usize,
    active_workers: AtomicUsize,
    completed_workers: AtomicUsize,
    failed_workers: AtomicUsize,
    completed_prompts: AtomicUsize,
    failed_prompts: AtomicUsize,
    abandoned_prompts: AtomicUsize,
}

impl ProgressTracker {
    pub fn new(total_workers: usize, total_prompts: usize) -> Self {
        Self {
            started: Instant::now(),
            started_at: Utc::now(),
            total_workers,
            total_prompts,
            active_workers: AtomicUsize::new(0),
            completed_workers: AtomicUsize::new(0),
            failed_workers: AtomicUsize::new(0),
            completed_prompts: AtomicUsize::new(0),
            failed_prompts: AtomicUsize::new(0),
            abandoned_prompts: AtomicUsize::new(0),
        }
    }

    pub fn worker_started(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    pub fn worker_finished(&self, success: bool) {
        self.leave_active();
        if success {
            self.completed_workers.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed_workers.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// A worker that died without reporting its own finish.
    pub fn worker_aborted(&self) {
        self.leave_active();
        self.failed_workers.fetch_add(1, Ordering::SeqCst);
    }

    /// Workers that were never started because their model could not be set up.
    pub fn workers_skipped(&self, count: usize) {
        self.failed_workers.fetch_add(count, Ordering::SeqCst);
    }

    pub fn prompt_completed(&self) {
        self.completed_prompts.fetch_add(1, Ordering::SeqCst);
    }

    pub fn prompt_failed(&self) {
        self.failed_prompts.fetch_add(1, Ordering::SeqCst);
    }

    /// Prompts that will never be attempted.
    pub fn prompts_abandoned(&self, count: usize) {
        self.abandoned_prompts.fetch_add(count, Ordering::SeqCst);
    }

    fn leave_active(&self) {
        let _ = self
            .active_workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn completion_pct(&self) -> f64 {
        percentage(self.completed_prompts.load(Ordering::SeqCst), self.total_prompts)
    }

    /// Build a snapshot. Provider stats come from the rate limit manager.
    pub fn snapshot(&self, providers: Vec<ProviderStats>) -> ProgressSnapshot {
        let elapsed = self.elapsed();
        let completed = self.completed_prompts.load(Ordering::SeqCst);
        let failed = self.failed_prompts.load(Ordering::SeqCst);
        let abandoned = self.abandoned_prompts.load(Ordering::SeqCst);

        ProgressSnapshot {
            started_at: self.started_at,
            elapsed,
            total_workers: self.total_workers,
            active_workers: self.active_workers.load(Ordering::SeqCst),
            completed_workers: self.completed_workers.load(Ordering::SeqCst),
            failed_workers: self.failed_workers.load(Ordering::SeqCst),
            total_prompts: self.total_prompts,
            completed_prompts: completed,
            failed_prompts: failed,
            abandoned_prompts: abandoned,
            completion_pct: percentage(completed, self.total_prompts),
            prompts_per_minute: per_minute(completed, elapsed),
            eta: estimate_remaining(completed + failed, abandoned, self.total_prompts, elapsed),
            providers,
        }
    }
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

fn per_minute(count: usize, elapsed: Duration) -> f64 {
    let minutes = elapsed.as_secs_f64() / 60.0;
    if minutes <= 0.0 {
        0.0
    } else {
        count as f64 / minutes
    }
}

/// Remaining time at the rate prompts have been processed so far.
/// Abandoned prompts never run, so they add no time.
fn estimate_remaining(
    processed: usize,
    abandoned: usize,
    total: usize,
    elapsed: Duration,
) -> Option<Duration> {
    let remaining = total.saturating_sub(processed + abandoned);
    if remaining == 0 {
        return Some(Duration::ZERO);
    }
    if processed == 0 || elapsed.is_zero() {
        return None;
    }
    let secs_per_prompt = elapsed.as_secs_f64() / processed as f64;
    Some(Duration::from_secs_f64(secs_per_prompt * remaining as f64))
}
