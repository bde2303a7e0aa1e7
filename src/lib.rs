//! Sequence Eval — parallel multi-turn evaluation of LLMs under shared
//! per-provider rate limits.

pub mod config;
pub mod error;
pub mod llm;
pub mod progress;
pub mod prompts;
pub mod ratelimit;
pub mod runner;
pub mod store;
pub mod worker;

pub use config::EvalConfig;
pub use error::{Error, Result};
pub use runner::{EvaluationResult, ParallelSequenceEvaluationRunner};
