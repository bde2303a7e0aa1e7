//! Outcomes reported by a sequence worker.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::WorkerError;
use crate::llm::Provider;
use crate::worker::state::RunStatus;

/// Where in the per-prompt pipeline a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// The rate limiter refused the call.
    Admission,
    /// The backend call failed.
    Generation,
    /// The response was generated but could not be saved.
    Persistence,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Admission => "admission",
            Self::Generation => "generation",
            Self::Persistence => "persistence",
        };
        write!(f, "{s}")
    }
}

/// One prompt that did not complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptFailure {
    pub prompt_index: usize,
    pub prompt_name: String,
    pub stage: FailureStage,
    pub message: String,
}

impl PromptFailure {
    pub fn new(
        prompt_index: usize,
        prompt_name: impl Into<String>,
        stage: FailureStage,
        message: impl std::fmt::Display,
    ) -> Self {
        Self {
            prompt_index,
            prompt_name: prompt_name.into(),
            stage,
            message: message.to_string(),
        }
    }
}

/// Outcome of one run over a sequence.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_number: u32,
    pub status: RunStatus,
    pub total_prompts: usize,
    pub completed_prompts: usize,
    pub failures: Vec<PromptFailure>,
    /// Wall time of the run, including waits on the rate limiter.
    pub duration: Duration,
    /// Time spent inside successful generation calls.
    pub generation_time: Duration,
}

impl RunResult {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// What a worker was asked to do. Known before it starts, so a worker that
/// dies can still be accounted for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerInfo {
    pub worker_id: String,
    pub model: String,
    pub provider: Provider,
    pub sequence: String,
    pub total_runs: u32,
    /// Prompts across all runs.
    pub total_prompts: usize,
}

/// Outcome of one (model, sequence) worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkResult {
    pub worker_id: String,
    pub model: String,
    pub provider: Provider,
    pub sequence: String,
    pub total_runs: u32,
    pub completed_runs: u32,
    pub total_prompts: usize,
    pub completed_prompts: usize,
    pub failed_prompts: usize,
    pub runs: Vec<RunResult>,
    /// Human-readable description of every failure, in order.
    pub errors: Vec<String>,
    pub duration: Duration,
    pub generation_time: Duration,
}

impl WorkResult {
    /// Empty result for a worker about to start.
    pub fn new(info: &WorkerInfo) -> Self {
        Self {
            worker_id: info.worker_id.clone(),
            model: info.model.clone(),
            provider: info.provider,
            sequence: info.sequence.clone(),
            total_runs: info.total_runs,
            completed_runs: 0,
            total_prompts: info.total_prompts,
            completed_prompts: 0,
            failed_prompts: 0,
            runs: Vec::new(),
            errors: Vec::new(),
            duration: Duration::ZERO,
            generation_time: Duration::ZERO,
        }
    }

    /// Result for a worker that never returned (panic or cancellation).
    pub fn aborted(info: &WorkerInfo, error: WorkerError) -> Self {
        let mut result = Self::new(info);
        result.errors.push(error.to_string());
        result
    }

    /// Fold a finished run into the totals.
    pub fn push_run(&mut self, run: RunResult) {
        if run.succeeded() {
            self.completed_runs += 1;
        }
        self.completed_prompts += run.completed_prompts;
        self.failed_prompts += run.failures.len();
        self.generation_time += run.generation_time;
        for failure in &run.failures {
            self.errors.push(format!(
                "run {} prompt {} ({}) {} failed: {}",
                run.run_number,
                failure.prompt_index,
                failure.prompt_name,
                failure.stage,
                failure.message
            ));
        }
        self.runs.push(run);
    }

    /// A worker succeeds when at least one of its runs completed.
    pub fn success(&self) -> bool {
        self.completed_runs > 0
    }
}
