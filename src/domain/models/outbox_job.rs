//! OutboxJob domain model — a durable instruction processed under optimistic
//! locking by the Outbox Processor (see `services::outbox_processor`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a durable outbox job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxJobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl OutboxJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// The payload carried by a job, tagged by job type.
///
/// Unknown/forward-incompatible payloads are not representable here by
/// construction — callers that read raw JSON from a legacy or external
/// producer and fail to match a known variant should route to a
/// dead-letter path rather than panicking (see `OutboxRepository::list_dead_letter`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboxJobPayload {
    StartOrchestration {
        prompt: String,
        repository: String,
        #[serde(rename = "ref")]
        ref_name: String,
        #[serde(rename = "apiKey")]
        api_key: String,
        model: Option<String>,
    },
    ProcessWebhook {
        agent_id: String,
        status: String,
        repository: Option<String>,
        ref_name: Option<String>,
        branch_name: Option<String>,
        pr_url: Option<String>,
        summary: Option<String>,
    },
}

impl OutboxJobPayload {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::StartOrchestration { .. } => "start-orchestration",
            Self::ProcessWebhook { .. } => "process-webhook",
        }
    }
}

/// A durable instruction recorded in the outbox table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxJob {
    pub id: Uuid,
    pub orchestration_id: Uuid,
    pub payload: OutboxJobPayload,
    pub status: OutboxJobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_run_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxJob {
    pub fn new(orchestration_id: Uuid, payload: OutboxJobPayload, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            orchestration_id,
            payload,
            status: OutboxJobStatus::Pending,
            attempts: 0,
            max_attempts,
            next_run_at: now,
            last_error: None,
            worker_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Exponential backoff: `base_delay * 2^(attempts - 1)`, applied after
    /// `attempts` has already been incremented for the failed try.
    pub fn backoff_delay(base_delay: std::time::Duration, attempts: u32) -> std::time::Duration {
        let exp = attempts.saturating_sub(1).min(20);
        base_delay.saturating_mul(2u32.saturating_pow(exp))
    }

    pub fn invariants_hold(&self) -> bool {
        let attempts_ok = self.attempts <= self.max_attempts;
        let worker_ok = (self.status == OutboxJobStatus::Processing) == self.worker_id.is_some();
        attempts_ok && worker_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_each_attempt() {
        let base = std::time::Duration::from_secs(60);
        assert_eq!(OutboxJob::backoff_delay(base, 1), std::time::Duration::from_secs(60));
        assert_eq!(OutboxJob::backoff_delay(base, 2), std::time::Duration::from_secs(120));
        assert_eq!(OutboxJob::backoff_delay(base, 3), std::time::Duration::from_secs(240));
    }

    #[test]
    fn new_job_is_pending_with_no_worker() {
        let job = OutboxJob::new(
            Uuid::new_v4(),
            OutboxJobPayload::StartOrchestration {
                prompt: "x".into(),
                repository: "owner/repo".into(),
                ref_name: "main".into(),
                api_key: "sk-0123456789".into(),
                model: None,
            },
            3,
        );
        assert_eq!(job.status, OutboxJobStatus::Pending);
        assert!(job.invariants_hold());
        assert_eq!(job.payload.type_name(), "start-orchestration");
    }
}
