//! SQLite implementation of `HealthRepository`.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{parse_datetime, parse_json};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{HealthRecord, QueueDepths};
use crate::domain::ports::HealthRepository;

#[derive(Clone)]
pub struct SqliteHealthRepository {
    pool: SqlitePool,
}

impl SqliteHealthRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HealthRepository for SqliteHealthRepository {
    async fn record(&self, record: &HealthRecord) -> DomainResult<()> {
        let depths_json = serde_json::to_string(&record.queue_depths)?;

        sqlx::query(
            r#"INSERT INTO health_records
               (id, service, worker_id, uptime_secs, memory_bytes, queue_depths, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(record.id.to_string())
        .bind(&record.service)
        .bind(&record.worker_id)
        .bind(record.uptime_secs as i64)
        .bind(record.memory_bytes.map(|b| b as i64))
        .bind(&depths_json)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn latest(&self, service: &str) -> DomainResult<Option<HealthRecord>> {
        let row: Option<HealthRecordRow> = sqlx::query_as(
            "SELECT * FROM health_records WHERE service = ? ORDER BY created_at DESC LIMIT 1",
        )
        .bind(service)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }
}

#[derive(sqlx::FromRow)]
struct HealthRecordRow {
    id: String,
    service: String,
    worker_id: String,
    uptime_secs: i64,
    memory_bytes: Option<i64>,
    queue_depths: String,
    created_at: String,
}

impl TryFrom<HealthRecordRow> for HealthRecord {
    type Error = DomainError;

    fn try_from(row: HealthRecordRow) -> Result<Self, Self::Error> {
        Ok(HealthRecord {
            id: Uuid::parse_str(&row.id).map_err(|e| DomainError::SerializationError(e.to_string()))?,
            service: row.service,
            worker_id: row.worker_id,
            uptime_secs: row.uptime_secs as u64,
            memory_bytes: row.memory_bytes.map(|b| b as u64),
            queue_depths: parse_json::<QueueDepths>(&row.queue_depths)?,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}
