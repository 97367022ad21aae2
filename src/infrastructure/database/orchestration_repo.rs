//! SQLite implementation of `OrchestrationRepository`.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{parse_datetime, parse_json, parse_optional_datetime};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Orchestration, OrchestrationMode, OrchestrationOptions, OrchestrationStatus};
use crate::domain::ports::OrchestrationRepository;

#[derive(Clone)]
pub struct SqliteOrchestrationRepository {
    pool: SqlitePool,
}

impl SqliteOrchestrationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrchestrationRepository for SqliteOrchestrationRepository {
    async fn create(&self, orchestration: &Orchestration) -> DomainResult<()> {
        let options_json = serde_json::to_string(&orchestration.options)?;
        let metadata_json = orchestration
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"INSERT INTO orchestrations
               (id, master_agent_id, repository_url, prompt, prompt_length, ref_name, model,
                mode, status, tasks_total, tasks_completed, active_agents, options, metadata,
                error_code, error_message, error_summary, created_at, started_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(orchestration.id.to_string())
        .bind(&orchestration.master_agent_id)
        .bind(&orchestration.repository_url)
        .bind(&orchestration.prompt)
        .bind(orchestration.prompt_length as i64)
        .bind(&orchestration.ref_name)
        .bind(&orchestration.model)
        .bind(orchestration.mode.as_str())
        .bind(orchestration.status.as_str())
        .bind(orchestration.tasks_total as i64)
        .bind(orchestration.tasks_completed as i64)
        .bind(orchestration.active_agents as i64)
        .bind(&options_json)
        .bind(&metadata_json)
        .bind(&orchestration.error_code)
        .bind(&orchestration.error_message)
        .bind(&orchestration.error_summary)
        .bind(orchestration.created_at.to_rfc3339())
        .bind(orchestration.started_at.map(|t| t.to_rfc3339()))
        .bind(orchestration.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Orchestration>> {
        let row: Option<OrchestrationRow> = sqlx::query_as("SELECT * FROM orchestrations WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn update(&self, orchestration: &Orchestration) -> DomainResult<()> {
        let options_json = serde_json::to_string(&orchestration.options)?;
        let metadata_json = orchestration
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"UPDATE orchestrations SET
                 master_agent_id = ?, status = ?, tasks_total = ?, tasks_completed = ?,
                 active_agents = ?, options = ?, metadata = ?, error_code = ?, error_message = ?,
                 error_summary = ?, started_at = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&orchestration.master_agent_id)
        .bind(orchestration.status.as_str())
        .bind(orchestration.tasks_total as i64)
        .bind(orchestration.tasks_completed as i64)
        .bind(orchestration.active_agents as i64)
        .bind(&options_json)
        .bind(&metadata_json)
        .bind(&orchestration.error_code)
        .bind(&orchestration.error_message)
        .bind(&orchestration.error_summary)
        .bind(orchestration.started_at.map(|t| t.to_rfc3339()))
        .bind(orchestration.updated_at.to_rfc3339())
        .bind(orchestration.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::OrchestrationNotFound(orchestration.id.to_string()));
        }
        Ok(())
    }

    async fn list_by_status(&self, status: OrchestrationStatus) -> DomainResult<Vec<Orchestration>> {
        let rows: Vec<OrchestrationRow> =
            sqlx::query_as("SELECT * FROM orchestrations WHERE status = ? ORDER BY created_at ASC")
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn find_by_master_agent_id(&self, master_agent_id: &str) -> DomainResult<Option<Orchestration>> {
        let row: Option<OrchestrationRow> =
            sqlx::query_as("SELECT * FROM orchestrations WHERE master_agent_id = ? LIMIT 1")
                .bind(master_agent_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(TryInto::try_into).transpose()
    }
}

#[derive(sqlx::FromRow)]
struct OrchestrationRow {
    id: String,
    master_agent_id: Option<String>,
    repository_url: String,
    prompt: String,
    prompt_length: i64,
    ref_name: String,
    model: Option<String>,
    mode: String,
    status: String,
    tasks_total: i64,
    tasks_completed: i64,
    active_agents: i64,
    options: String,
    metadata: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
    error_summary: Option<String>,
    created_at: String,
    started_at: Option<String>,
    updated_at: String,
}

impl TryFrom<OrchestrationRow> for Orchestration {
    type Error = DomainError;

    fn try_from(row: OrchestrationRow) -> Result<Self, Self::Error> {
        Ok(Orchestration {
            id: Uuid::parse_str(&row.id).map_err(|e| DomainError::SerializationError(e.to_string()))?,
            master_agent_id: row.master_agent_id,
            repository_url: row.repository_url,
            prompt: row.prompt,
            prompt_length: row.prompt_length as usize,
            ref_name: row.ref_name,
            model: row.model,
            mode: OrchestrationMode::from_str(&row.mode)
                .ok_or_else(|| DomainError::SerializationError(format!("unknown mode: {}", row.mode)))?,
            status: OrchestrationStatus::from_str(&row.status)
                .ok_or_else(|| DomainError::SerializationError(format!("unknown status: {}", row.status)))?,
            tasks_total: row.tasks_total as u32,
            tasks_completed: row.tasks_completed as u32,
            active_agents: row.active_agents as u32,
            options: parse_json::<OrchestrationOptions>(&row.options)?,
            metadata: row.metadata.map(|m| parse_json(&m)).transpose()?,
            error_code: row.error_code,
            error_message: row.error_message,
            error_summary: row.error_summary,
            created_at: parse_datetime(&row.created_at)?,
            started_at: parse_optional_datetime(row.started_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::OrchestrationOptions;
    use crate::infrastructure::database::create_migrated_test_pool;

    async fn repo() -> SqliteOrchestrationRepository {
        let pool = create_migrated_test_pool().await.unwrap();
        SqliteOrchestrationRepository::new(pool)
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let repo = repo().await;
        let orchestration = Orchestration::new_queued(
            "do the thing".into(),
            "owner/repo".into(),
            "main".into(),
            None,
            OrchestrationOptions::default(),
        );
        repo.create(&orchestration).await.unwrap();

        let fetched = repo.get(orchestration.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, orchestration.id);
        assert_eq!(fetched.status, orchestration.status);
        assert_eq!(fetched.prompt_length, orchestration.prompt_length);
    }

    #[tokio::test]
    async fn update_nonexistent_returns_not_found() {
        let repo = repo().await;
        let orchestration = Orchestration::new_queued(
            "x".into(),
            "owner/repo".into(),
            "main".into(),
            None,
            OrchestrationOptions::default(),
        );
        let err = repo.update(&orchestration).await.unwrap_err();
        assert!(matches!(err, DomainError::OrchestrationNotFound(_)));
    }

    #[tokio::test]
    async fn list_by_status_filters_correctly() {
        let repo = repo().await;
        let mut running = Orchestration::new_queued(
            "a".into(),
            "owner/repo".into(),
            "main".into(),
            None,
            OrchestrationOptions::default(),
        );
        running.mark_running("agent-1".into());
        repo.create(&running).await.unwrap();
        repo.update(&running).await.unwrap();

        let queued = Orchestration::new_queued(
            "b".into(),
            "owner/repo".into(),
            "main".into(),
            None,
            OrchestrationOptions::default(),
        );
        repo.create(&queued).await.unwrap();

        let results = repo
            .list_by_status(crate::domain::models::OrchestrationStatus::Running)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, running.id);
    }

    #[tokio::test]
    async fn find_by_master_agent_id_matches_running_orchestration() {
        let repo = repo().await;
        let mut orchestration = Orchestration::new_queued(
            "x".into(),
            "owner/repo".into(),
            "main".into(),
            None,
            OrchestrationOptions::default(),
        );
        repo.create(&orchestration).await.unwrap();
        orchestration.mark_running("agent-42".into());
        repo.update(&orchestration).await.unwrap();

        let found = repo.find_by_master_agent_id("agent-42").await.unwrap().unwrap();
        assert_eq!(found.id, orchestration.id);
        assert!(repo.find_by_master_agent_id("no-such-agent").await.unwrap().is_none());
    }
}
