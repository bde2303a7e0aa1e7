//! Aggregated evaluation outcomes.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::llm::{ModelConfig, Provider};
use crate::ratelimit::ProviderStats;
use crate::worker::{WorkResult, WorkerInfo};

/// Totals for one model across all of its sequences.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub model: String,
    pub provider: Provider,
    /// Set when no backend could be built for the model.
    pub setup_error: Option<String>,
    pub total_workers: usize,
    pub successful_workers: usize,
    pub failed_workers: usize,
    pub total_runs: u32,
    pub completed_runs: u32,
    pub total_prompts: usize,
    pub completed_prompts: usize,
    pub failed_prompts: usize,
    pub duration: Duration,
    pub generation_time: Duration,
    pub workers: Vec<WorkResult>,
}

impl ModelSummary {
    pub fn from_workers(model: &ModelConfig, workers: Vec<WorkResult>, duration: Duration) -> Self {
        let successful_workers = workers.iter().filter(|w| w.success()).count();
        Self {
            model: model.id.clone(),
            provider: model.provider(),
            setup_error: None,
            total_workers: workers.len(),
            successful_workers,
            failed_workers: workers.len() - successful_workers,
            total_runs: workers.iter().map(|w| w.total_runs).sum(),
            completed_runs: workers.iter().map(|w| w.completed_runs).sum(),
            total_prompts: workers.iter().map(|w| w.total_prompts).sum(),
            completed_prompts: workers.iter().map(|w| w.completed_prompts).sum(),
            failed_prompts: workers.iter().map(|w| w.failed_prompts).sum(),
            duration,
            generation_time: workers.iter().map(|w| w.generation_time).sum(),
            workers,
        }
    }

    /// Every planned worker of the model failed before starting.
    pub fn setup_failed(model: &ModelConfig, error: impl Into<String>, planned: &[WorkerInfo]) -> Self {
        let error = error.into();
        let workers = planned
            .iter()
            .map(|info| {
                let mut result = WorkResult::new(info);
                result.errors.push(format!("backend setup failed: {error}"));
                result
            })
            .collect();
        let mut summary = Self::from_workers(model, workers, Duration::ZERO);
        summary.setup_error = Some(error);
        summary
    }

    pub fn success(&self) -> bool {
        self.successful_workers > 0
    }
}

/// Throughput over the whole evaluation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ThroughputMetrics {
    /// Completed prompts per minute of wall time.
    pub prompts_per_minute: f64,
    /// Summed time spent inside successful generation calls.
    pub generation_time: Duration,
    /// `generation_time / wall time`: how much parallelism bought.
    pub speedup: f64,
}

impl ThroughputMetrics {
    pub fn compute(completed_prompts: usize, generation_time: Duration, wall: Duration) -> Self {
        let wall_secs = wall.as_secs_f64();
        if wall_secs <= 0.0 {
            return Self {
                generation_time,
                ..Self::default()
            };
        }
        Self {
            prompts_per_minute: completed_prompts as f64 / (wall_secs / 60.0),
            generation_time,
            speedup: generation_time.as_secs_f64() / wall_secs,
        }
    }
}

/// Final result of an evaluation.
///
/// `success` is false only when the evaluation could not be set up; partial
/// failures are visible in the counts.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationResult {
    pub success: bool,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub num_runs: u32,
    pub models: Vec<ModelSummary>,
    pub total_workers: usize,
    pub successful_workers: usize,
    pub failed_workers: usize,
    pub total_prompts: usize,
    pub completed_prompts: usize,
    pub failed_prompts: usize,
    pub provider_utilization: Vec<ProviderStats>,
    pub throughput: ThroughputMetrics,
}

impl EvaluationResult {
    pub fn from_models(
        started_at: DateTime<Utc>,
        duration: Duration,
        num_runs: u32,
        models: Vec<ModelSummary>,
        provider_utilization: Vec<ProviderStats>,
    ) -> Self {
        let completed_prompts = models.iter().map(|m| m.completed_prompts).sum();
        let generation_time = models.iter().map(|m| m.generation_time).sum();
        Self {
            success: true,
            error: None,
            started_at,
            duration,
            num_runs,
            total_workers: models.iter().map(|m| m.total_workers).sum(),
            successful_workers: models.iter().map(|m| m.successful_workers).sum(),
            failed_workers: models.iter().map(|m| m.failed_workers).sum(),
            total_prompts: models.iter().map(|m| m.total_prompts).sum(),
            completed_prompts,
            failed_prompts: models.iter().map(|m| m.failed_prompts).sum(),
            throughput: ThroughputMetrics::compute(completed_prompts, generation_time, duration),
            models,
            provider_utilization,
        }
    }

    /// Evaluation that could not be set up.
    pub fn setup_failure(
        started_at: DateTime<Utc>,
        duration: Duration,
        num_runs: u32,
        error: impl std::fmt::Display,
    ) -> Self {
        let mut result = Self::from_models(started_at, duration, num_runs, Vec::new(), Vec::new());
        result.fail(error);
        result
    }

    pub fn fail(&mut self, error: impl std::fmt::Display) {
        self.success = false;
        self.error = Some(error.to_string());
    }

    /// Every worker and every prompt succeeded.
    pub fn is_complete(&self) -> bool {
        self.success && self.failed_workers == 0 && self.failed_prompts == 0
    }

    pub fn model(&self, id: &str) -> Option<&ModelSummary> {
        self.models.iter().find(|m| m.model == id)
    }
}
