//! SQLite implementation of `OutboxRepository` — the durable queue's
//! optimistic-locking claim lives here (§4.2).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{parse_datetime, parse_json};
use crate::domain::errors::DomainResult;
use crate::domain::models::{OutboxJob, OutboxJobPayload, OutboxJobStatus};
use crate::domain::ports::OutboxRepository;

#[derive(Clone)]
pub struct SqliteOutboxRepository {
    pool: SqlitePool,
}

impl SqliteOutboxRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxRepository for SqliteOutboxRepository {
    async fn create(&self, job: &OutboxJob) -> DomainResult<()> {
        let payload_json = serde_json::to_string(&job.payload)?;

        sqlx::query(
            r#"INSERT INTO outbox_jobs
               (id, orchestration_id, payload, status, attempts, max_attempts,
                next_run_at, last_error, worker_id, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(job.id.to_string())
        .bind(job.orchestration_id.to_string())
        .bind(&payload_json)
        .bind(job.status.as_str())
        .bind(job.attempts as i64)
        .bind(job.max_attempts as i64)
        .bind(job.next_run_at.to_rfc3339())
        .bind(&job.last_error)
        .bind(&job.worker_id)
        .bind(job.created_at.to_rfc3339())
        .bind(job.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<OutboxJob>> {
        let row: Option<OutboxJobRow> = sqlx::query_as("SELECT * FROM outbox_jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn select_due(&self, limit: u32) -> DomainResult<Vec<OutboxJob>> {
        let now = Utc::now().to_rfc3339();
        let rows: Vec<OutboxJobRow> = sqlx::query_as(
            r#"SELECT * FROM outbox_jobs
               WHERE status = 'pending' AND next_run_at <= ?
               ORDER BY created_at ASC
               LIMIT ?"#,
        )
        .bind(&now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn claim(&self, id: Uuid, worker_id: &str) -> DomainResult<Option<OutboxJob>> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"UPDATE outbox_jobs
               SET status = 'processing', worker_id = ?, updated_at = ?
               WHERE id = ? AND status = 'pending'"#,
        )
        .bind(worker_id)
        .bind(&now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.get(id).await
    }

    async fn mark_completed(&self, id: Uuid) -> DomainResult<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE outbox_jobs SET status = 'completed', worker_id = NULL, updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn requeue(&self, id: Uuid, next_run_at: DateTime<Utc>, last_error: &str) -> DomainResult<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"UPDATE outbox_jobs
               SET status = 'pending', attempts = attempts + 1, next_run_at = ?,
                   last_error = ?, worker_id = NULL, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(next_run_at.to_rfc3339())
        .bind(last_error)
        .bind(&now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, last_error: &str) -> DomainResult<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"UPDATE outbox_jobs
               SET status = 'failed', attempts = attempts + 1, last_error = ?,
                   worker_id = NULL, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(last_error)
        .bind(&now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reclaim_stuck(&self, older_than: DateTime<Utc>) -> DomainResult<u64> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"UPDATE outbox_jobs
               SET status = 'pending', worker_id = NULL, updated_at = ?
               WHERE status = 'processing' AND updated_at < ?"#,
        )
        .bind(&now)
        .bind(older_than.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn queue_counts(&self) -> DomainResult<(u64, u64)> {
        let pending: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM outbox_jobs WHERE status = 'pending'")
            .fetch_one(&self.pool)
            .await?;
        let processing: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM outbox_jobs WHERE status = 'processing'")
            .fetch_one(&self.pool)
            .await?;
        Ok((pending.0 as u64, processing.0 as u64))
    }
}

#[derive(sqlx::FromRow)]
struct OutboxJobRow {
    id: String,
    orchestration_id: String,
    payload: String,
    status: String,
    attempts: i64,
    max_attempts: i64,
    next_run_at: String,
    last_error: Option<String>,
    worker_id: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<OutboxJobRow> for OutboxJob {
    type Error = crate::domain::errors::DomainError;

    fn try_from(row: OutboxJobRow) -> Result<Self, Self::Error> {
        use crate::domain::errors::DomainError;

        Ok(OutboxJob {
            id: Uuid::parse_str(&row.id).map_err(|e| DomainError::SerializationError(e.to_string()))?,
            orchestration_id: Uuid::parse_str(&row.orchestration_id)
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            payload: parse_json::<OutboxJobPayload>(&row.payload)?,
            status: OutboxJobStatus::from_str(&row.status)
                .ok_or_else(|| DomainError::SerializationError(format!("unknown outbox status: {}", row.status)))?,
            attempts: row.attempts as u32,
            max_attempts: row.max_attempts as u32,
            next_run_at: parse_datetime(&row.next_run_at)?,
            last_error: row.last_error,
            worker_id: row.worker_id,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Orchestration, OrchestrationOptions};
    use crate::domain::ports::OrchestrationRepository;
    use crate::infrastructure::database::{create_migrated_test_pool, SqliteOrchestrationRepository};
    use sqlx::SqlitePool;

    async fn seed_orchestration(pool: &SqlitePool) -> Uuid {
        let orchestration =
            Orchestration::new_queued("x".into(), "owner/repo".into(), "main".into(), None, OrchestrationOptions::default());
        SqliteOrchestrationRepository::new(pool.clone()).create(&orchestration).await.unwrap();
        orchestration.id
    }

    fn sample_job(orchestration_id: Uuid) -> OutboxJob {
        OutboxJob::new(
            orchestration_id,
            OutboxJobPayload::StartOrchestration {
                prompt: "x".into(),
                repository: "owner/repo".into(),
                ref_name: "main".into(),
                api_key: "key-0123456789".into(),
                model: None,
            },
            3,
        )
    }

    async fn repo_with_job() -> (SqliteOutboxRepository, OutboxJob) {
        let pool = create_migrated_test_pool().await.unwrap();
        let orchestration_id = seed_orchestration(&pool).await;
        (SqliteOutboxRepository::new(pool), sample_job(orchestration_id))
    }

    #[tokio::test]
    async fn claim_succeeds_exactly_once() {
        let (repo, job) = repo_with_job().await;
        repo.create(&job).await.unwrap();

        let claimed = repo.claim(job.id, "worker-1").await.unwrap();
        assert!(claimed.is_some());
        assert_eq!(claimed.unwrap().status, OutboxJobStatus::Processing);

        let second = repo.claim(job.id, "worker-2").await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn requeue_increments_attempts_and_resets_to_pending() {
        let (repo, job) = repo_with_job().await;
        repo.create(&job).await.unwrap();
        repo.claim(job.id, "worker-1").await.unwrap();

        let next_run = Utc::now() + chrono::Duration::seconds(60);
        repo.requeue(job.id, next_run, "network timeout").await.unwrap();

        let reloaded = repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, OutboxJobStatus::Pending);
        assert_eq!(reloaded.attempts, 1);
        assert_eq!(reloaded.last_error.as_deref(), Some("network timeout"));
        assert!(reloaded.worker_id.is_none());
    }

    #[tokio::test]
    async fn reclaim_stuck_resets_old_processing_jobs_only() {
        let (repo, job) = repo_with_job().await;
        repo.create(&job).await.unwrap();
        repo.claim(job.id, "worker-1").await.unwrap();

        // Not yet stuck: cutoff is in the past relative to the claim.
        let reclaimed = repo.reclaim_stuck(Utc::now() - chrono::Duration::seconds(3600)).await.unwrap();
        assert_eq!(reclaimed, 0);

        // Cutoff in the future relative to the claim: now it's stuck.
        let reclaimed = repo.reclaim_stuck(Utc::now() + chrono::Duration::seconds(1)).await.unwrap();
        assert_eq!(reclaimed, 1);

        let reloaded = repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, OutboxJobStatus::Pending);
        assert!(reloaded.worker_id.is_none());
    }

    #[tokio::test]
    async fn queue_counts_splits_pending_and_processing() {
        let pool = create_migrated_test_pool().await.unwrap();
        let orchestration_id = seed_orchestration(&pool).await;
        let repo = SqliteOutboxRepository::new(pool);

        let pending_job = sample_job(orchestration_id);
        let processing_job = sample_job(orchestration_id);
        repo.create(&pending_job).await.unwrap();
        repo.create(&processing_job).await.unwrap();
        repo.claim(processing_job.id, "worker-1").await.unwrap();

        assert_eq!(repo.queue_counts().await.unwrap(), (1, 1));
    }
}
