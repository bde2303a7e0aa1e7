//! Integration tests for the parallel evaluation runner.
//!
//! Each test drives the real runner, rate limit manager and worker against
//! stub backends and an in-memory sink.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use sequence_eval::config::EvalConfig;
use sequence_eval::error::{ConfigError, LlmError};
use sequence_eval::llm::{BackendFactory, Generation, GenerationBackend, ModelConfig, Provider};
use sequence_eval::progress::{ProgressReporter, ProgressSnapshot};
use sequence_eval::prompts::{Prompt, PromptSequence};
use sequence_eval::ratelimit::{BreakerPolicy, LimitTable, ProviderLimit, RateLimitManager};
use sequence_eval::runner::{EvaluationResult, ParallelSequenceEvaluationRunner};
use sequence_eval::store::MemorySink;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared call log and concurrency gauge across every stub backend.
#[derive(Default)]
struct CallLog {
    calls: Mutex<Vec<(String, String)>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl CallLog {
    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Stub backend: answers `R(<last line>)`, fails on prompts ending in a
/// listed suffix and panics on prompts containing `BOOM`.
struct StubBackend {
    model: String,
    log: Arc<CallLog>,
    fail_suffixes: Vec<String>,
    latency: Duration,
}

#[async_trait]
impl GenerationBackend for StubBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<Generation, LlmError> {
        self.log
            .calls
            .lock()
            .unwrap()
            .push((self.model.clone(), prompt.to_string()));

        let now = self.log.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.peak.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.log.in_flight.fetch_sub(1, Ordering::SeqCst);

        if prompt.contains("BOOM") {
            panic!("stub backend blew up");
        }
        if self.fail_suffixes.iter().any(|s| prompt.ends_with(s.as_str())) {
            return Err(LlmError::RequestFailed {
                provider: "stub".into(),
                reason: "scripted failure".into(),
            });
        }
        let last = prompt.rsplit("\n\n").next().unwrap_or_default();
        Ok(Generation {
            text: format!("R({last})"),
            elapsed: self.latency.max(Duration::from_millis(1)),
        })
    }
}

#[derive(Default)]
struct StubFactory {
    log: Arc<CallLog>,
    fail_suffixes: Vec<String>,
    broken_models: Vec<String>,
    latency: Duration,
}

impl BackendFactory for StubFactory {
    fn create(&self, model: &ModelConfig) -> Result<Arc<dyn GenerationBackend>, LlmError> {
        if self.broken_models.contains(&model.id) {
            return Err(LlmError::MissingApiKey {
                provider: model.provider().to_string(),
                env_var: "STUB_API_KEY".into(),
            });
        }
        Ok(Arc::new(StubBackend {
            model: model.id.clone(),
            log: Arc::clone(&self.log),
            fail_suffixes: self.fail_suffixes.clone(),
            latency: self.latency,
        }))
    }
}

/// Collects every snapshot's completion percentage.
#[derive(Default)]
struct RecordingReporter {
    completion: Mutex<Vec<f64>>,
    last: Mutex<Option<ProgressSnapshot>>,
    finished: AtomicUsize,
}

impl ProgressReporter for RecordingReporter {
    fn report(&self, snapshot: &ProgressSnapshot) {
        self.completion.lock().unwrap().push(snapshot.completion_pct);
        *self.last.lock().unwrap() = Some(snapshot.clone());
    }

    fn finish(&self, _result: &EvaluationResult) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

fn sequence(name: &str, prompts: usize) -> PromptSequence {
    PromptSequence::new(
        name,
        (0..prompts)
            .map(|i| Prompt::new(format!("p{}", i + 1), format!("{name}-P{i}")))
            .collect(),
    )
}

fn config(max_concurrent_sequences: usize) -> EvalConfig {
    EvalConfig {
        max_concurrent_sequences,
        limits: LimitTable::new(ProviderLimit::new(10, 10_000)),
        ..EvalConfig::default()
    }
}

fn runner(config: EvalConfig, sink: Arc<MemorySink>) -> ParallelSequenceEvaluationRunner {
    ParallelSequenceEvaluationRunner::from_config(config, sink).unwrap()
}

#[tokio::test]
async fn full_matrix_makes_every_call_exactly_once() {
    timeout(TEST_TIMEOUT, async {
        let sink = Arc::new(MemorySink::new());
        let factory = StubFactory::default();
        let models = vec![ModelConfig::new("gpt-4o"), ModelConfig::new("claude-3-5-haiku")];
        let sequences = vec![sequence("a", 2), sequence("b", 2), sequence("c", 2)];

        let result = runner(config(5), Arc::clone(&sink))
            .start(&models, &sequences, 2, &factory)
            .await;

        assert!(result.success, "{:?}", result.error);
        assert!(result.is_complete());
        assert_eq!(factory.log.calls().len(), 24);
        assert_eq!(result.total_workers, 6);
        assert_eq!(result.successful_workers, 6);
        assert_eq!(result.completed_prompts, 24);
        for model in &models {
            let summary = result.model(&model.id).unwrap();
            assert_eq!(summary.successful_workers, 3);
            assert_eq!(summary.completed_runs, 6);
        }

        let records = sink.records().await;
        assert_eq!(records.len(), 24);
        let keys: HashSet<_> = records
            .iter()
            .map(|r| (r.model.clone(), r.sequence.clone(), r.run, r.prompt_index))
            .collect();
        assert_eq!(keys.len(), 24);

        let providers: Vec<_> = result.provider_utilization.iter().map(|s| s.provider).collect();
        assert_eq!(providers, vec![Provider::Anthropic, Provider::OpenAi]);
        assert!(result.throughput.speedup > 0.0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn every_run_starts_with_empty_context() {
    timeout(TEST_TIMEOUT, async {
        let factory = StubFactory::default();
        let result = runner(config(5), Arc::new(MemorySink::new()))
            .start(&[ModelConfig::new("gpt-4o")], &[sequence("a", 3)], 3, &factory)
            .await;
        assert!(result.is_complete());

        let prompts: Vec<String> = factory.log.calls().into_iter().map(|(_, p)| p).collect();
        assert_eq!(prompts.len(), 9);
        for run in prompts.chunks(3) {
            assert_eq!(run[0], "a-P0");
            assert_eq!(run[1], "a-P0\n\nR(a-P0)\n\na-P1");
            assert_eq!(run[2], "a-P0\n\nR(a-P0)\n\na-P1\n\nR(a-P1)\n\na-P2");
        }
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn failed_prompts_do_not_stop_later_prompts() {
    timeout(TEST_TIMEOUT, async {
        let sink = Arc::new(MemorySink::new());
        let factory = StubFactory {
            fail_suffixes: vec!["a-P1".into(), "a-P3".into()],
            ..StubFactory::default()
        };
        let result = runner(config(5), Arc::clone(&sink))
            .start(&[ModelConfig::new("deepseek-chat")], &[sequence("a", 5)], 1, &factory)
            .await;

        assert!(result.success);
        assert_eq!(factory.log.calls().len(), 5);
        assert_eq!(result.completed_prompts, 3);
        assert_eq!(result.failed_prompts, 2);
        assert_eq!(result.successful_workers, 1);

        let saved: Vec<usize> = sink.records().await.iter().map(|r| r.prompt_index).collect();
        assert_eq!(saved, vec![0, 2, 4]);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn panicking_worker_is_isolated() {
    timeout(TEST_TIMEOUT, async {
        let factory = StubFactory::default();
        let bad = PromptSequence::new("bad", vec![Prompt::new("p1", "BOOM")]);
        let runner = runner(config(5), Arc::new(MemorySink::new()));

        let result = runner
            .start(
                &[ModelConfig::new("claude-3-opus")],
                &[sequence("a", 2), bad, sequence("c", 2)],
                1,
                &factory,
            )
            .await;

        assert!(result.success);
        assert_eq!(result.successful_workers, 2);
        assert_eq!(result.failed_workers, 1);

        let summary = result.model("claude-3-opus").unwrap();
        let failed = summary.workers.iter().find(|w| !w.success()).unwrap();
        assert_eq!(failed.sequence, "bad");
        assert!(failed.errors[0].contains("panicked"), "{:?}", failed.errors);

        // The slot held by the panicking call was returned.
        let stats = runner.limiter().provider_stats(Provider::Anthropic).await;
        assert_eq!(stats.current_concurrency, 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn setup_failures_abort_the_evaluation() {
    timeout(TEST_TIMEOUT, async {
        let factory = StubFactory::default();
        let runner = runner(config(5), Arc::new(MemorySink::new()));

        let result = runner.start(&[], &[sequence("a", 1)], 1, &factory).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("No models configured"));

        let result = runner
            .start(&[ModelConfig::new("gpt-4o")], &[], 1, &factory)
            .await;
        assert!(!result.success);

        let result = runner
            .start(&[ModelConfig::new("gpt-4o")], &[sequence("a", 1)], 0, &factory)
            .await;
        assert!(!result.success);

        let broken = StubFactory {
            broken_models: vec!["gpt-4o".into()],
            ..StubFactory::default()
        };
        let result = runner
            .start(&[ModelConfig::new("gpt-4o")], &[sequence("a", 1)], 1, &broken)
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("STUB_API_KEY"));
        assert!(broken.log.calls().is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn one_broken_model_does_not_stop_the_others() {
    timeout(TEST_TIMEOUT, async {
        let factory = StubFactory {
            broken_models: vec!["gemini-1.5-pro".into()],
            ..StubFactory::default()
        };
        let models = vec![ModelConfig::new("gemini-1.5-pro"), ModelConfig::new("gpt-4o")];
        let result = runner(config(5), Arc::new(MemorySink::new()))
            .start(&models, &[sequence("a", 2), sequence("b", 2)], 1, &factory)
            .await;

        assert!(result.success);
        assert_eq!(result.failed_workers, 2);
        assert_eq!(result.successful_workers, 2);
        assert!(result.model("gemini-1.5-pro").unwrap().setup_error.is_some());
        assert!(factory.log.calls().iter().all(|(model, _)| model == "gpt-4o"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn eta_reaches_zero_when_a_model_cannot_start() {
    timeout(TEST_TIMEOUT, async {
        let factory = StubFactory {
            broken_models: vec!["gemini-1.5-pro".into()],
            ..StubFactory::default()
        };
        let reporter = Arc::new(RecordingReporter::default());
        let models = vec![ModelConfig::new("gemini-1.5-pro"), ModelConfig::new("gpt-4o")];

        runner(config(5), Arc::new(MemorySink::new()))
            .with_reporter(reporter.clone())
            .start(&models, &[sequence("a", 2), sequence("b", 3)], 2, &factory)
            .await;

        let last = reporter.last.lock().unwrap().clone().expect("no snapshot reported");
        assert_eq!(last.total_prompts, 20);
        assert_eq!(last.completed_prompts, 10);
        assert_eq!(last.abandoned_prompts, 10);
        assert_eq!(last.eta, Some(Duration::ZERO));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn eta_reaches_zero_after_a_worker_panics() {
    timeout(TEST_TIMEOUT, async {
        let factory = StubFactory::default();
        let reporter = Arc::new(RecordingReporter::default());
        // Panics on the second prompt, so only the first one was attempted.
        let bad = PromptSequence::new(
            "bad",
            vec![Prompt::new("p1", "fine"), Prompt::new("p2", "BOOM"), Prompt::new("p3", "never")],
        );

        let result = runner(config(5), Arc::new(MemorySink::new()))
            .with_reporter(reporter.clone())
            .start(&[ModelConfig::new("gpt-4o")], &[sequence("a", 2), bad], 1, &factory)
            .await;
        assert_eq!(result.failed_workers, 1);

        let last = reporter.last.lock().unwrap().clone().expect("no snapshot reported");
        assert_eq!(last.total_prompts, 5);
        assert_eq!(last.completed_prompts, 3);
        assert_eq!(last.abandoned_prompts, 2);
        assert_eq!(last.eta, Some(Duration::ZERO));
    })
    .await
    .expect("test timed out");
}

#[test]
fn zero_sequence_concurrency_is_rejected_up_front() {
    let cfg = EvalConfig {
        max_concurrent_sequences: 0,
        ..config(5)
    };
    let err = ParallelSequenceEvaluationRunner::from_config(cfg, Arc::new(MemorySink::new()))
        .err()
        .expect("zero concurrency accepted");
    assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "max_concurrent_sequences"));

    let cfg = EvalConfig {
        limits: LimitTable::new(ProviderLimit::new(10, 0)),
        ..config(5)
    };
    assert!(ParallelSequenceEvaluationRunner::from_config(cfg, Arc::new(MemorySink::new())).is_err());
}

#[tokio::test(start_paused = true)]
async fn sequence_gate_limits_parallel_workers() {
    timeout(TEST_TIMEOUT, async {
        let factory = StubFactory {
            latency: Duration::from_millis(100),
            ..StubFactory::default()
        };
        let sequences: Vec<_> = ["a", "b", "c", "d"].iter().map(|n| sequence(n, 2)).collect();

        let result = runner(config(1), Arc::new(MemorySink::new()))
            .start(&[ModelConfig::new("gpt-4o")], &sequences, 1, &factory)
            .await;

        assert!(result.is_complete());
        assert_eq!(factory.log.peak(), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test(start_paused = true)]
async fn provider_limit_is_shared_across_workers() {
    timeout(TEST_TIMEOUT, async {
        let factory = StubFactory {
            latency: Duration::from_millis(100),
            ..StubFactory::default()
        };
        let limiter = Arc::new(RateLimitManager::new(
            LimitTable::new(ProviderLimit::new(10, 10_000))
                .with_limit(Provider::Anthropic, ProviderLimit::new(2, 10_000)),
            BreakerPolicy::default(),
        )
        .unwrap());
        let sequences: Vec<_> = ["a", "b", "c", "d", "e"].iter().map(|n| sequence(n, 2)).collect();

        let result = ParallelSequenceEvaluationRunner::new(config(5), limiter, Arc::new(MemorySink::new()))
            .unwrap()
            .start(&[ModelConfig::new("claude-3-5-sonnet")], &sequences, 1, &factory)
            .await;

        assert!(result.is_complete());
        assert_eq!(factory.log.peak(), 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test(start_paused = true)]
async fn reported_completion_never_decreases() {
    timeout(TEST_TIMEOUT, async {
        let factory = StubFactory {
            latency: Duration::from_millis(250),
            ..StubFactory::default()
        };
        let reporter = Arc::new(RecordingReporter::default());
        let cfg = EvalConfig {
            progress_interval: Duration::from_millis(200),
            ..config(2)
        };
        let models = vec![ModelConfig::new("gpt-4o"), ModelConfig::new("deepseek-chat")];
        let sequences = vec![sequence("a", 3), sequence("b", 3), sequence("c", 3)];

        let result = runner(cfg, Arc::new(MemorySink::new()))
            .with_reporter(reporter.clone())
            .start(&models, &sequences, 2, &factory)
            .await;
        assert!(result.is_complete());

        let seen = reporter.completion.lock().unwrap().clone();
        assert!(seen.len() > 2, "expected periodic reports, got {seen:?}");
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
        assert!((seen.last().copied().unwrap() - 100.0).abs() < 1e-9);
        assert_eq!(reporter.finished.load(Ordering::SeqCst), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn worker_ids_are_unique_per_model_and_sequence() {
    timeout(TEST_TIMEOUT, async {
        let factory = StubFactory::default();
        let models = vec![ModelConfig::new("gpt-4o"), ModelConfig::new("o3-mini")];
        let result = runner(config(5), Arc::new(MemorySink::new()))
            .start(&models, &[sequence("a", 1), sequence("b", 1)], 1, &factory)
            .await;

        let mut per_model: HashMap<String, usize> = HashMap::new();
        let mut ids = HashSet::new();
        for summary in &result.models {
            for worker in &summary.workers {
                assert!(ids.insert(worker.worker_id.clone()));
                *per_model.entry(worker.model.clone()).or_default() += 1;
            }
        }
        assert_eq!(per_model["gpt-4o"], 2);
        assert_eq!(per_model["o3-mini"], 2);
    })
    .await
    .expect("test timed out");
}
