//! Worker system: one worker per (model, sequence) pair.
//!
//! Core components:
//! - `context` — Accumulated prompt/response history for one run
//! - `state` — Run state machine (Initialized → Running → Completed/Failed)
//! - `result` — Per-run and per-worker outcomes
//! - `worker` — Sequential run executor behind the shared rate limiter

pub mod context;
pub mod result;
pub mod state;
pub mod worker;

pub use context::{CONTEXT_SEPARATOR, ContextHistory, Exchange};
pub use result::{FailureStage, PromptFailure, RunResult, WorkResult, WorkerInfo};
pub use state::{RunState, RunStatus};
pub use worker::{SequenceWorker, WorkerDeps};
