//! Parallel evaluation runner.
//!
//! Models are evaluated one after another. Within a model every sequence gets
//! its own [`SequenceWorker`], all spawned at once and gated by a per-model
//! semaphore; provider-level limits are enforced by the shared
//! [`RateLimitManager`].

mod summary;

pub use summary::{EvaluationResult, ModelSummary, ThroughputMetrics};

use std::any::Any;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::EvalConfig;
use crate::error::{ConfigError, RunnerError, WorkerError};
use crate::llm::{BackendFactory, ModelConfig};
use crate::progress::{
    LogReporter, ProgressReporter, ProgressTracker, finish_guarded, report_guarded,
    spawn_progress_reporter,
};
use crate::prompts::PromptSequence;
use crate::ratelimit::RateLimitManager;
use crate::store::ResponseSink;
use crate::worker::{SequenceWorker, WorkResult, WorkerDeps, WorkerInfo};

/// Runs every (model, sequence) pair for a number of runs.
pub struct ParallelSequenceEvaluationRunner {
    config: EvalConfig,
    limiter: Arc<RateLimitManager>,
    sink: Arc<dyn ResponseSink>,
    reporter: Arc<dyn ProgressReporter>,
}

impl ParallelSequenceEvaluationRunner {
    /// Runner sharing an existing rate limit manager. Rejects an invalid config.
    pub fn new(
        config: EvalConfig,
        limiter: Arc<RateLimitManager>,
        sink: Arc<dyn ResponseSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            limiter,
            sink,
            reporter: Arc::new(LogReporter),
        })
    }

    /// Runner with a manager built from the config's limits and breaker policy.
    pub fn from_config(config: EvalConfig, sink: Arc<dyn ResponseSink>) -> Result<Self, ConfigError> {
        let limiter = Arc::new(RateLimitManager::new(
            config.limits.clone(),
            config.breaker.clone(),
        )?);
        Self::new(config, limiter, sink)
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn limiter(&self) -> &Arc<RateLimitManager> {
        &self.limiter
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Evaluate every model against every sequence.
    ///
    /// Never fails: setup problems come back as `success == false` with a
    /// cause, worker problems as failed workers inside the result.
    pub async fn start(
        &self,
        models: &[ModelConfig],
        sequences: &[PromptSequence],
        num_runs: u32,
        factory: &dyn BackendFactory,
    ) -> EvaluationResult {
        let started = Instant::now();
        let started_at = Utc::now();

        let sequences = match prepare(models, sequences, num_runs) {
            Ok(sequences) => sequences,
            Err(e) => {
                error!(error = %e, "Evaluation setup failed");
                let result =
                    EvaluationResult::setup_failure(started_at, started.elapsed(), num_runs, e);
                finish_guarded(self.reporter.as_ref(), &result);
                return result;
            }
        };

        let total_workers = models.len() * sequences.len();
        let prompts_per_model: usize = sequences.iter().map(|s| s.len()).sum();
        let total_prompts = models.len() * prompts_per_model * num_runs as usize;
        let tracker = Arc::new(ProgressTracker::new(total_workers, total_prompts));

        info!(
            models = models.len(),
            sequences = sequences.len(),
            runs = num_runs,
            workers = total_workers,
            prompts = total_prompts,
            max_concurrent_sequences = self.config.max_concurrent_sequences,
            "Evaluation starting"
        );

        let reporter_task = spawn_progress_reporter(
            Arc::clone(&tracker),
            Arc::clone(&self.limiter),
            Arc::clone(&self.reporter),
            self.config.progress_interval,
        );

        let mut summaries = Vec::with_capacity(models.len());
        for model in models {
            let summary = self
                .evaluate_model(model, &sequences, num_runs, factory, &tracker)
                .await;
            info!(
                model = %summary.model,
                successful_workers = summary.successful_workers,
                failed_workers = summary.failed_workers,
                completed_prompts = summary.completed_prompts,
                failed_prompts = summary.failed_prompts,
                "Model finished"
            );
            summaries.push(summary);
            report_guarded(
                self.reporter.as_ref(),
                &tracker.snapshot(self.limiter.all_provider_stats().await),
            );
        }

        reporter_task.stop().await;

        let used: BTreeSet<_> = models.iter().map(|m| m.provider()).collect();
        let utilization = self
            .limiter
            .all_provider_stats()
            .await
            .into_iter()
            .filter(|s| used.contains(&s.provider))
            .collect();

        let setup_errors: Vec<String> = summaries
            .iter()
            .filter_map(|s| s.setup_error.as_ref().map(|e| format!("{}: {e}", s.model)))
            .collect();
        let every_setup_failed = setup_errors.len() == summaries.len();

        let mut result = EvaluationResult::from_models(
            started_at,
            started.elapsed(),
            num_runs,
            summaries,
            utilization,
        );
        if every_setup_failed {
            let e = RunnerError::NoWorkers {
                reason: setup_errors.join("; "),
            };
            error!(error = %e, "Evaluation setup failed");
            result.fail(e);
        }

        finish_guarded(self.reporter.as_ref(), &result);
        result
    }

    /// Fan out one worker per sequence for a model and fold the results.
    async fn evaluate_model(
        &self,
        model: &ModelConfig,
        sequences: &[Arc<PromptSequence>],
        num_runs: u32,
        factory: &dyn BackendFactory,
        tracker: &Arc<ProgressTracker>,
    ) -> ModelSummary {
        let started = Instant::now();

        let backend = match factory.create(model) {
            Ok(backend) => backend,
            Err(e) => {
                warn!(model = %model.id, error = %e, "Backend setup failed; skipping model");
                let planned: Vec<WorkerInfo> = sequences
                    .iter()
                    .map(|seq| planned_worker(model, seq, num_runs))
                    .collect();
                tracker.workers_skipped(planned.len());
                tracker.prompts_abandoned(planned.iter().map(|info| info.total_prompts).sum());
                return ModelSummary::setup_failed(model, e.to_string(), &planned);
            }
        };

        let deps = WorkerDeps {
            limiter: Arc::clone(&self.limiter),
            backend,
            sink: Arc::clone(&self.sink),
            progress: Arc::clone(tracker),
        };
        let gate = Arc::new(Semaphore::new(self.config.max_concurrent_sequences));

        let (infos, handles): (Vec<_>, Vec<_>) = sequences
            .iter()
            .map(|seq| {
                let worker = SequenceWorker::new(model.clone(), Arc::clone(seq), num_runs, deps.clone());
                let info = (worker.info(), worker.attempt_counter());
                let gate = Arc::clone(&gate);
                let worker_id = info.0.worker_id.clone();
                let handle = tokio::spawn(async move {
                    match gate.acquire_owned().await {
                        Ok(_permit) => worker.run().await,
                        Err(_) => WorkResult::aborted(&worker.info(), WorkerError::Cancelled { worker_id }),
                    }
                });
                (info, handle)
            })
            .unzip();

        let workers = join_all(handles)
            .await
            .into_iter()
            .zip(infos)
            .map(|(joined, (info, attempted))| match joined {
                Ok(result) => result,
                Err(e) => {
                    let e = join_failure(&info, e);
                    let unattempted = info
                        .total_prompts
                        .saturating_sub(attempted.load(Ordering::SeqCst));
                    error!(
                        worker = %info.worker_id,
                        unattempted,
                        error = %e,
                        "Worker aborted"
                    );
                    tracker.worker_aborted();
                    tracker.prompts_abandoned(unattempted);
                    WorkResult::aborted(&info, e)
                }
            })
            .collect();

        ModelSummary::from_workers(model, workers, started.elapsed())
    }
}

/// Validate inputs and drop empty sequences.
fn prepare(
    models: &[ModelConfig],
    sequences: &[PromptSequence],
    num_runs: u32,
) -> Result<Vec<Arc<PromptSequence>>, RunnerError> {
    if models.is_empty() {
        return Err(RunnerError::NoModels);
    }
    if sequences.is_empty() {
        return Err(RunnerError::NoSequences);
    }
    if num_runs == 0 {
        return Err(RunnerError::NoRuns);
    }

    let mut usable = Vec::with_capacity(sequences.len());
    for seq in sequences {
        if seq.is_empty() {
            warn!(sequence = %seq.name, "Skipping empty sequence");
        } else {
            usable.push(Arc::new(seq.clone()));
        }
    }
    if usable.is_empty() {
        return Err(RunnerError::NoWorkers {
            reason: "every sequence is empty".to_string(),
        });
    }
    Ok(usable)
}

fn planned_worker(model: &ModelConfig, seq: &PromptSequence, num_runs: u32) -> WorkerInfo {
    WorkerInfo {
        worker_id: SequenceWorker::worker_id(&model.id, &seq.name),
        model: model.id.clone(),
        provider: model.provider(),
        sequence: seq.name.clone(),
        total_runs: num_runs,
        total_prompts: seq.len() * num_runs as usize,
    }
}

fn join_failure(info: &WorkerInfo, e: JoinError) -> WorkerError {
    let worker_id = info.worker_id.clone();
    if e.is_panic() {
        WorkerError::Panicked {
            worker_id,
            reason: panic_message(e.into_panic()),
        }
    } else {
        WorkerError::Cancelled { worker_id }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
