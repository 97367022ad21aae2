//! SQLite implementation of `AgentStateRepository`.

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::{parse_datetime, parse_json};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AgentRunStatus, AgentState, LastAnalysis};
use crate::domain::ports::AgentStateRepository;

#[derive(Clone)]
pub struct SqliteAgentStateRepository {
    pool: SqlitePool,
}

impl SqliteAgentStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AgentStateRepository for SqliteAgentStateRepository {
    async fn create(&self, state: &AgentState) -> DomainResult<()> {
        let tasks_completed_json = serde_json::to_string(&state.tasks_completed)?;
        let tasks_remaining_json = serde_json::to_string(&state.tasks_remaining)?;
        let last_analysis_json = serde_json::to_string(&state.last_analysis)?;

        sqlx::query(
            r#"INSERT INTO agent_states
               (agent_id, task_description, repository, branch_name, iterations, status,
                tasks_completed, tasks_remaining, last_analysis, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&state.agent_id)
        .bind(&state.task_description)
        .bind(&state.repository)
        .bind(&state.branch_name)
        .bind(state.iterations as i64)
        .bind(state.status.as_str())
        .bind(&tasks_completed_json)
        .bind(&tasks_remaining_json)
        .bind(&last_analysis_json)
        .bind(state.created_at.to_rfc3339())
        .bind(state.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, agent_id: &str) -> DomainResult<Option<AgentState>> {
        let row: Option<AgentStateRow> = sqlx::query_as("SELECT * FROM agent_states WHERE agent_id = ?")
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn update(&self, state: &AgentState) -> DomainResult<()> {
        let tasks_completed_json = serde_json::to_string(&state.tasks_completed)?;
        let tasks_remaining_json = serde_json::to_string(&state.tasks_remaining)?;
        let last_analysis_json = serde_json::to_string(&state.last_analysis)?;

        let result = sqlx::query(
            r#"UPDATE agent_states SET
                 task_description = ?, repository = ?, branch_name = ?, iterations = ?,
                 status = ?, tasks_completed = ?, tasks_remaining = ?, last_analysis = ?,
                 updated_at = ?
               WHERE agent_id = ?"#,
        )
        .bind(&state.task_description)
        .bind(&state.repository)
        .bind(&state.branch_name)
        .bind(state.iterations as i64)
        .bind(state.status.as_str())
        .bind(&tasks_completed_json)
        .bind(&tasks_remaining_json)
        .bind(&last_analysis_json)
        .bind(state.updated_at.to_rfc3339())
        .bind(&state.agent_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::AgentStateNotFound(state.agent_id.clone()));
        }
        Ok(())
    }

    async fn find_master_by_subagent(&self, subagent_id: &str) -> DomainResult<Option<AgentState>> {
        // `last_analysis.current_agent_id` is a JSON map of task_id -> agent_id;
        // scanning it in SQL would require the json1 extension, so the small
        // set of active masters is scanned in process instead.
        let active = self.list_active().await?;
        Ok(active
            .into_iter()
            .find(|master| master.last_analysis.current_agent_id.values().any(|v| v == subagent_id)))
    }

    async fn list_active(&self) -> DomainResult<Vec<AgentState>> {
        self.list_by_status(AgentRunStatus::Active).await
    }

    async fn list_by_status(&self, status: AgentRunStatus) -> DomainResult<Vec<AgentState>> {
        let rows: Vec<AgentStateRow> =
            sqlx::query_as("SELECT * FROM agent_states WHERE status = ? ORDER BY created_at ASC")
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(sqlx::FromRow)]
struct AgentStateRow {
    agent_id: String,
    task_description: String,
    repository: String,
    branch_name: Option<String>,
    iterations: i64,
    status: String,
    tasks_completed: String,
    tasks_remaining: String,
    last_analysis: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<AgentStateRow> for AgentState {
    type Error = DomainError;

    fn try_from(row: AgentStateRow) -> Result<Self, Self::Error> {
        Ok(AgentState {
            agent_id: row.agent_id,
            task_description: row.task_description,
            repository: row.repository,
            branch_name: row.branch_name,
            iterations: row.iterations as u32,
            status: AgentRunStatus::from_str(&row.status)
                .ok_or_else(|| DomainError::SerializationError(format!("unknown agent run status: {}", row.status)))?,
            tasks_completed: parse_json(&row.tasks_completed)?,
            tasks_remaining: parse_json(&row.tasks_remaining)?,
            last_analysis: parse_json::<LastAnalysis>(&row.last_analysis)?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}
