use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use sequence_eval::config::EvalConfig;
use sequence_eval::llm::{BackendFactory, EchoBackendFactory, HttpBackendFactory, ModelConfig, Provider};
use sequence_eval::prompts::{JsonPromptSource, PromptSequence, PromptSource};
use sequence_eval::runner::ParallelSequenceEvaluationRunner;
use sequence_eval::store::{LibSqlSink, ResponseSink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_tracing();

    let config = EvalConfig::from_env().context("invalid evaluation config")?;

    let models = parse_models(&env_or("SEQ_EVAL_MODELS", ""))?;
    if models.is_empty() {
        bail!("SEQ_EVAL_MODELS is empty; expected e.g. gpt-4o,claude-3-5-haiku,my-model@openrouter");
    }

    let prompts_path = PathBuf::from(env_or("SEQ_EVAL_SEQUENCES", "./prompts.json"));
    let (names, sequences) = load_sequences(&prompts_path)
        .with_context(|| format!("failed to load prompts from {}", prompts_path.display()))?;

    let dry_run = matches!(
        env_or("SEQ_EVAL_DRY_RUN", "false").to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    );

    let sink = open_sink(dry_run).await.context("failed to open database")?;
    let factory = build_factory(dry_run)?;

    eprintln!("sequence-eval v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Models: {}", models.iter().map(|m| m.id.as_str()).collect::<Vec<_>>().join(", "));
    eprintln!("   Sequences: {}", names.join(", "));
    eprintln!("   Runs: {}", config.num_runs);
    if dry_run {
        eprintln!("   Dry run: echo backend, in-memory database");
    }

    let num_runs = config.num_runs;
    let runner = ParallelSequenceEvaluationRunner::from_config(config, sink)?;
    let result = runner
        .start(&models, &sequences, num_runs, factory.as_ref())
        .await;

    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.success {
        bail!(
            "evaluation failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

/// Console logging, plus a daily rolling file when `SEQ_EVAL_LOG_DIR` is set.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match std::env::var("SEQ_EVAL_LOG_DIR") {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "sequence-eval.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .init();
            None
        }
    }
}

fn load_sequences(path: &Path) -> sequence_eval::Result<(Vec<String>, Vec<PromptSequence>)> {
    let source = JsonPromptSource::from_path(path)?;
    let names = match std::env::var("SEQ_EVAL_SEQUENCE_NAMES") {
        Ok(raw) if !raw.trim().is_empty() => split_list(&raw),
        _ => source.sequence_names(),
    };
    let sequences = source.load_all(&names)?;
    Ok((names, sequences))
}

/// In-memory for dry runs, otherwise the file at `SEQ_EVAL_DB_PATH`.
async fn open_sink(dry_run: bool) -> sequence_eval::Result<Arc<dyn ResponseSink>> {
    if dry_run {
        return Ok(Arc::new(LibSqlSink::new_memory().await?));
    }
    let db_path = env_or("SEQ_EVAL_DB_PATH", "./data/sequence-eval.db");
    tracing::info!(path = %db_path, "Opening response database");
    Ok(Arc::new(LibSqlSink::new_local(Path::new(&db_path)).await?))
}

fn build_factory(dry_run: bool) -> sequence_eval::Result<Box<dyn BackendFactory>> {
    if dry_run {
        Ok(Box::new(EchoBackendFactory::default()))
    } else {
        Ok(Box::new(HttpBackendFactory::new()?))
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// `model` or `model@provider`, comma separated.
fn parse_models(raw: &str) -> anyhow::Result<Vec<ModelConfig>> {
    split_list(raw)
        .into_iter()
        .map(|entry| match entry.split_once('@') {
            Some((id, provider)) => {
                let provider: Provider = provider
                    .parse()
                    .map_err(|e| anyhow::anyhow!("{e} in model entry {entry:?}"))?;
                Ok(ModelConfig::new(id).with_provider(provider))
            }
            None => Ok(ModelConfig::new(entry)),
        })
        .collect()
}
