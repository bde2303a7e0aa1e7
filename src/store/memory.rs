//! In-memory response sink.

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::traits::{ResponseRecord, ResponseSink};

/// Keeps every saved response in memory, in save order.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: RwLock<Vec<(Uuid, ResponseRecord)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All saved records, in save order.
    pub async fn records(&self) -> Vec<ResponseRecord> {
        self.records
            .read()
            .await
            .iter()
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ResponseSink for MemorySink {
    async fn save_response(&self, record: &ResponseRecord) -> Result<Uuid, DatabaseError> {
        let id = Uuid::new_v4();
        self.records.write().await.push((id, record.clone()));
        Ok(id)
    }
}
