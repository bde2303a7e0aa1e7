//! Periodic progress reporting.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::progress::tracker::{ProgressSnapshot, ProgressTracker};
use crate::ratelimit::RateLimitManager;
use crate::runner::EvaluationResult;

/// Receives progress snapshots and the final result.
///
/// Reporting is best-effort: a reporter that panics is logged and skipped,
/// it never affects the evaluation.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, snapshot: &ProgressSnapshot);

    fn finish(&self, _result: &EvaluationResult) {}
}

/// Emits snapshots as structured `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ProgressReporter for LogReporter {
    fn report(&self, snapshot: &ProgressSnapshot) {
        let eta_secs = snapshot.eta.map(|eta| eta.as_secs());
        info!(
            completion_pct = %format!("{:.1}", snapshot.completion_pct),
            completed = snapshot.completed_prompts,
            failed = snapshot.failed_prompts,
            abandoned = snapshot.abandoned_prompts,
            total = snapshot.total_prompts,
            active_workers = snapshot.active_workers,
            prompts_per_minute = %format!("{:.1}", snapshot.prompts_per_minute),
            eta_secs = ?eta_secs,
            "Evaluation progress"
        );
        for stats in &snapshot.providers {
            info!(
                provider = %stats.provider,
                in_flight = stats.current_concurrency,
                max_concurrent = stats.max_concurrent,
                recent_requests = stats.recent_requests,
                utilization_pct = %format!("{:.1}", stats.utilization_pct),
                breaker_open = stats.breaker_open,
                "Provider utilization"
            );
        }
    }

    fn finish(&self, result: &EvaluationResult) {
        info!(
            success = result.success,
            workers = result.total_workers,
            successful_workers = result.successful_workers,
            failed_workers = result.failed_workers,
            completed_prompts = result.completed_prompts,
            failed_prompts = result.failed_prompts,
            duration_secs = %format!("{:.1}", result.duration.as_secs_f64()),
            speedup = %format!("{:.2}", result.throughput.speedup),
            "Evaluation finished"
        );
    }
}

/// Hand a snapshot to a reporter, containing any panic.
pub fn report_guarded(reporter: &dyn ProgressReporter, snapshot: &ProgressSnapshot) {
    if catch_unwind(AssertUnwindSafe(|| reporter.report(snapshot))).is_err() {
        warn!("Progress reporter panicked; snapshot dropped");
    }
}

/// Hand the final result to a reporter, containing any panic.
pub fn finish_guarded(reporter: &dyn ProgressReporter, result: &EvaluationResult) {
    if catch_unwind(AssertUnwindSafe(|| reporter.finish(result))).is_err() {
        warn!("Progress reporter panicked on finish");
    }
}

/// Handle to the background reporting task.
pub struct ReporterHandle {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ReporterHandle {
    /// Stop the task and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Progress reporter task ended abnormally");
        }
    }
}

/// Spawn the periodic reporter. The first report is emitted after one interval.
pub fn spawn_progress_reporter(
    tracker: Arc<ProgressTracker>,
    limiter: Arc<RateLimitManager>,
    reporter: Arc<dyn ProgressReporter>,
    interval: Duration,
) -> ReporterHandle {
    let (stop_tx, mut stop_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip immediate first tick
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = tracker.snapshot(limiter.all_provider_stats().await);
                    report_guarded(reporter.as_ref(), &snapshot);
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
    });

    ReporterHandle { stop_tx, handle }
}
