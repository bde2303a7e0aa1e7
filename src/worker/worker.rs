//! Sequence worker: runs one prompt sequence against one model.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::WorkerError;
use crate::llm::{GenerationBackend, ModelConfig, Provider};
use crate::progress::ProgressTracker;
use crate::prompts::{Prompt, PromptSequence};
use crate::ratelimit::RateLimitManager;
use crate::store::{ResponseRecord, ResponseSink};
use crate::worker::result::{FailureStage, PromptFailure, RunResult, WorkResult, WorkerInfo};
use crate::worker::state::{RunState, RunStatus};

/// Shared dependencies for worker execution.
#[derive(Clone)]
pub struct WorkerDeps {
    pub limiter: Arc<RateLimitManager>,
    pub backend: Arc<dyn GenerationBackend>,
    pub sink: Arc<dyn ResponseSink>,
    pub progress: Arc<ProgressTracker>,
}

/// Worker that executes every run of a single (model, sequence) pair.
///
/// Runs are strictly sequential and each starts from an empty context.
/// Within a run, prompts are attempted in order and a failed prompt never
/// stops the ones after it.
pub struct SequenceWorker {
    model: ModelConfig,
    provider: Provider,
    sequence: Arc<PromptSequence>,
    num_runs: u32,
    deps: WorkerDeps,
    attempted: Arc<AtomicUsize>,
}

impl SequenceWorker {
    pub fn new(
        model: ModelConfig,
        sequence: Arc<PromptSequence>,
        num_runs: u32,
        deps: WorkerDeps,
    ) -> Self {
        let provider = model.provider();
        Self {
            model,
            provider,
            sequence,
            num_runs,
            deps,
            attempted: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Prompts attempted so far, across all runs. Readable after the worker
    /// has been moved into its task, so a worker that dies can be accounted for.
    pub fn attempt_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.attempted)
    }

    /// Identifier of the worker for a (model, sequence) pair.
    pub fn worker_id(model: &str, sequence: &str) -> String {
        format!("{model}:{sequence}")
    }

    pub fn info(&self) -> WorkerInfo {
        WorkerInfo {
            worker_id: Self::worker_id(&self.model.id, &self.sequence.name),
            model: self.model.id.clone(),
            provider: self.provider,
            sequence: self.sequence.name.clone(),
            total_runs: self.num_runs,
            total_prompts: self.sequence.len() * self.num_runs as usize,
        }
    }

    /// Run every configured run and report the outcome.
    pub async fn run(self) -> WorkResult {
        let info = self.info();
        let started = Instant::now();
        self.deps.progress.worker_started();
        tracing::info!(
            worker = %info.worker_id,
            provider = %self.provider,
            runs = self.num_runs,
            prompts = self.sequence.len(),
            "Worker starting"
        );

        let mut result = WorkResult::new(&info);
        for run_number in 1..=self.num_runs {
            match self.execute_run(run_number).await {
                Ok(run) => result.push_run(run),
                Err(e) => {
                    tracing::error!(worker = %info.worker_id, run = run_number, error = %e, "Run aborted");
                    result.errors.push(e.to_string());
                }
            }
        }
        result.duration = started.elapsed();

        let success = result.success();
        self.deps.progress.worker_finished(success);
        if success {
            tracing::info!(
                worker = %info.worker_id,
                completed_runs = result.completed_runs,
                completed_prompts = result.completed_prompts,
                failed_prompts = result.failed_prompts,
                "Worker completed"
            );
        } else {
            tracing::warn!(
                worker = %info.worker_id,
                errors = result.errors.len(),
                "Worker completed no runs"
            );
        }
        result
    }

    async fn execute_run(&self, run_number: u32) -> Result<RunResult, WorkerError> {
        let started = Instant::now();
        let mut state = RunState::new(&self.sequence.name, &self.model.id, run_number);
        state.transition_to(RunStatus::Running)?;

        let mut failures = Vec::new();
        let mut generation_time = Duration::ZERO;

        for (index, prompt) in self.sequence.prompts.iter().enumerate() {
            state.prompt_index = index;
            let outcome = self.execute_prompt(&mut state, prompt).await;
            self.attempted.fetch_add(1, Ordering::SeqCst);
            match outcome {
                Ok(elapsed) => {
                    state.completed_prompts += 1;
                    generation_time += elapsed;
                    self.deps.progress.prompt_completed();
                }
                Err(failure) => {
                    state.error_count += 1;
                    tracing::warn!(
                        model = %state.model,
                        sequence = %state.sequence,
                        run = state.run_number,
                        prompt = state.prompt_index,
                        stage = %failure.stage,
                        error = %failure.message,
                        "Prompt failed"
                    );
                    failures.push(failure);
                    self.deps.progress.prompt_failed();
                }
            }
        }

        let status = state.finish()?;
        tracing::debug!(
            model = %state.model,
            sequence = %state.sequence,
            run = state.run_number,
            status = %status,
            completed = state.completed_prompts,
            errors = state.error_count,
            context_exchanges = state.context.len(),
            "Run closed"
        );
        Ok(RunResult {
            run_number,
            status,
            total_prompts: self.sequence.len(),
            completed_prompts: state.completed_prompts,
            failures,
            duration: started.elapsed(),
            generation_time,
        })
    }

    /// Admit, generate, extend the context and persist one prompt.
    ///
    /// The slot is held until the response is saved and is returned on every
    /// exit path, including unwinding.
    async fn execute_prompt(
        &self,
        state: &mut RunState,
        prompt: &Prompt,
    ) -> Result<Duration, PromptFailure> {
        let index = state.prompt_index;
        let input = state.context.render(&prompt.text);

        let slot = self
            .deps
            .limiter
            .acquire(self.provider)
            .await
            .map_err(|e| PromptFailure::new(index, &prompt.name, FailureStage::Admission, e))?;

        let generation = match self.deps.backend.generate(&input).await {
            Ok(generation) => {
                self.deps.limiter.record_success(self.provider).await;
                generation
            }
            Err(e) => {
                self.deps.limiter.record_error(self.provider).await;
                return Err(PromptFailure::new(
                    index,
                    &prompt.name,
                    FailureStage::Generation,
                    e,
                ));
            }
        };

        state
            .context
            .push(prompt.text.as_str(), generation.text.as_str());

        let record = ResponseRecord {
            model: self.model.id.clone(),
            provider: self.provider,
            sequence: self.sequence.name.clone(),
            run: state.run_number,
            prompt_index: index,
            prompt_name: prompt.name.clone(),
            prompt_text: prompt.text.clone(),
            response_text: generation.text,
            elapsed: generation.elapsed,
        };
        let saved = self.deps.sink.save_response(&record).await;
        slot.release();

        saved.map_err(|e| PromptFailure::new(index, &prompt.name, FailureStage::Persistence, e))?;
        Ok(generation.elapsed)
    }
}
