//! libSQL response sink.
//!
//! Supports local file and in-memory databases. The schema is created by
//! [`migrations::run_migrations`] on open.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::llm::Provider;
use crate::store::migrations;
use crate::store::traits::{ResponseRecord, ResponseSink};

/// libSQL-backed sink.
///
/// Stores a single connection that is reused for all writes.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlSink {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlSink {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let sink = Self::from_database(db).await?;
        info!(path = %path.display(), "Response database opened");
        Ok(sink)
    }

    /// Create an in-memory database (for tests and dry runs).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Responses for one (model, sequence, run), ordered by prompt index.
    pub async fn responses_for_run(
        &self,
        model: &str,
        sequence: &str,
        run: u32,
    ) -> Result<Vec<ResponseRecord>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT model, provider, sequence_name, run_number, prompt_index, prompt_name,
                        prompt_text, response_text, elapsed_seconds
                 FROM responses
                 WHERE model = ?1 AND sequence_name = ?2 AND run_number = ?3
                 ORDER BY prompt_index ASC",
                params![model, sequence, run as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("responses_for_run: {e}")))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("responses_for_run next: {e}")))?
        {
            let record = row_to_record(&row)
                .map_err(|e| DatabaseError::Query(format!("responses_for_run row parse: {e}")))?;
            records.push(record);
        }
        Ok(records)
    }

    /// Total number of stored responses.
    pub async fn count(&self) -> Result<u64, DatabaseError> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM responses", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("count: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("count next: {e}")))?
        {
            Some(row) => row
                .get::<i64>(0)
                .map(|n| n.max(0) as u64)
                .map_err(|e| DatabaseError::Query(format!("count parse: {e}"))),
            None => Ok(0),
        }
    }
}

/// Map a libsql Row to a ResponseRecord.
///
/// Column order: 0:model, 1:provider, 2:sequence_name, 3:run_number,
/// 4:prompt_index, 5:prompt_name, 6:prompt_text, 7:response_text, 8:elapsed_seconds
fn row_to_record(row: &libsql::Row) -> Result<ResponseRecord, libsql::Error> {
    let provider: String = row.get(1)?;
    let run: i64 = row.get(3)?;
    let prompt_index: i64 = row.get(4)?;
    let elapsed: f64 = row.get(8)?;

    Ok(ResponseRecord {
        model: row.get(0)?,
        provider: provider.parse().unwrap_or(Provider::Unknown),
        sequence: row.get(2)?,
        run: run.max(0) as u32,
        prompt_index: prompt_index.max(0) as usize,
        prompt_name: row.get(5)?,
        prompt_text: row.get(6)?,
        response_text: row.get(7)?,
        elapsed: Duration::from_secs_f64(elapsed.max(0.0)),
    })
}

#[async_trait]
impl ResponseSink for LibSqlSink {
    async fn save_response(&self, record: &ResponseRecord) -> Result<Uuid, DatabaseError> {
        let id = Uuid::new_v4();
        self.conn
            .execute(
                "INSERT INTO responses (id, model, provider, sequence_name, run_number, prompt_index,
                                        prompt_name, prompt_text, response_text, elapsed_seconds, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    id.to_string(),
                    record.model.as_str(),
                    record.provider.as_str(),
                    record.sequence.as_str(),
                    record.run as i64,
                    record.prompt_index as i64,
                    record.prompt_name.as_str(),
                    record.prompt_text.as_str(),
                    record.response_text.as_str(),
                    record.elapsed.as_secs_f64(),
                    Utc::now().to_rfc3339()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_response: {e}")))?;

        debug!(
            id = %id,
            model = %record.model,
            sequence = %record.sequence,
            run = record.run,
            prompt = record.prompt_index,
            "Response saved"
        );
        Ok(id)
    }
}
