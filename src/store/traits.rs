//! The `ResponseSink` trait — where generated responses are persisted.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::llm::Provider;

/// One generated response and everything needed to locate it later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub model: String,
    pub provider: Provider,
    pub sequence: String,
    /// 1-based run number.
    pub run: u32,
    /// 0-based position of the prompt in its sequence.
    pub prompt_index: usize,
    pub prompt_name: String,
    /// The prompt as written in the sequence, without accumulated context.
    pub prompt_text: String,
    pub response_text: String,
    pub elapsed: Duration,
}

/// Persistence sink for generated responses.
///
/// A failed save counts as a failure of the prompt that produced the response.
#[async_trait]
pub trait ResponseSink: Send + Sync {
    /// Store a response, returning its id.
    async fn save_response(&self, record: &ResponseRecord) -> Result<Uuid, DatabaseError>;
}
