//! SQLite implementation of `EventRepository`.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{parse_datetime, parse_optional_json};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Event, EventLevel, EventPhase};
use crate::domain::ports::EventRepository;

#[derive(Clone)]
pub struct SqliteEventRepository {
    pool: SqlitePool,
}

impl SqliteEventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventRepository for SqliteEventRepository {
    async fn append(&self, event: &Event) -> DomainResult<()> {
        let payload_json = event.payload.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"INSERT INTO events
               (id, orchestration_id, level, step_key, step_phase, message, payload, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(event.id.to_string())
        .bind(event.orchestration_id.to_string())
        .bind(event.level.as_str())
        .bind(&event.step_key)
        .bind(event.step_phase.map(|p| p.as_str()))
        .bind(&event.message)
        .bind(&payload_json)
        .bind(event.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_orchestration(&self, orchestration_id: Uuid) -> DomainResult<Vec<Event>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT * FROM events WHERE orchestration_id = ? ORDER BY created_at ASC",
        )
        .bind(orchestration_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    orchestration_id: String,
    level: String,
    step_key: String,
    step_phase: Option<String>,
    message: String,
    payload: Option<String>,
    created_at: String,
}

impl TryFrom<EventRow> for Event {
    type Error = DomainError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(Event {
            id: Uuid::parse_str(&row.id).map_err(|e| DomainError::SerializationError(e.to_string()))?,
            orchestration_id: Uuid::parse_str(&row.orchestration_id)
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            level: EventLevel::from_str(&row.level)
                .ok_or_else(|| DomainError::SerializationError(format!("unknown event level: {}", row.level)))?,
            step_key: row.step_key,
            step_phase: row.step_phase.as_deref().and_then(EventPhase::from_str),
            message: row.message,
            payload: parse_optional_json(row.payload)?,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}
