//! Outbox Processor (§4.2, §4.2.1) — polls the durable outbox table,
//! claims due jobs under optimistic locking, and drives each job's payload
//! to completion via the Orchestrator. Also runs the stuck-job reaper that
//! reclaims jobs abandoned by a presumed-dead worker.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use super::orchestrator::Orchestrator;
use crate::domain::classification::ClassifiedError;
use crate::domain::models::{Event, EventLevel, OutboxJob, OutboxJobPayload};
use crate::domain::ports::{EventRepository, OrchestrationRepository, OutboxRepository};

pub struct OutboxProcessor {
    outbox: Arc<dyn OutboxRepository>,
    orchestrations: Arc<dyn OrchestrationRepository>,
    events: Arc<dyn EventRepository>,
    orchestrator: Arc<Orchestrator>,
    worker_id: String,
    poll_interval: Duration,
    batch_size: u32,
    base_delay: Duration,
    stuck_job_timeout: Duration,
    reaper_interval: Duration,
}

impl OutboxProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        outbox: Arc<dyn OutboxRepository>,
        orchestrations: Arc<dyn OrchestrationRepository>,
        events: Arc<dyn EventRepository>,
        orchestrator: Arc<Orchestrator>,
        worker_id: String,
        poll_interval: Duration,
        batch_size: u32,
        base_delay: Duration,
        stuck_job_timeout: Duration,
        reaper_interval: Duration,
    ) -> Self {
        Self {
            outbox,
            orchestrations,
            events,
            orchestrator,
            worker_id,
            poll_interval,
            batch_size,
            base_delay,
            stuck_job_timeout,
            reaper_interval,
        }
    }

    /// Runs the poll loop and the stuck-job reaper loop concurrently until
    /// the process is killed. Intended for the `serve` CLI subcommand.
    pub async fn run(self: Arc<Self>) {
        let poller = self.clone();
        let poll_task = tokio::spawn(async move { poller.poll_loop().await });
        let reaper = self.clone();
        let reaper_task = tokio::spawn(async move { reaper.reaper_loop().await });

        let _ = tokio::join!(poll_task, reaper_task);
    }

    async fn poll_loop(&self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            ticker.tick().await;
            if let Err(err) = self.sweep_once().await {
                tracing::warn!(error = %err, "outbox sweep failed");
            }
        }
    }

    async fn reaper_loop(&self) {
        let mut ticker = tokio::time::interval(self.reaper_interval);
        loop {
            ticker.tick().await;
            let cutoff = Utc::now() - chrono::Duration::from_std(self.stuck_job_timeout).unwrap_or(chrono::Duration::zero());
            match self.outbox.reclaim_stuck(cutoff).await {
                Ok(0) => {}
                Ok(count) => tracing::info!(count, "reclaimed stuck outbox jobs back to pending"),
                Err(err) => tracing::warn!(error = %err, "stuck-job reclaim sweep failed"),
            }
        }
    }

    /// Selects up to `batch_size` due jobs, claims, and processes each.
    /// Returns the number of jobs actually claimed and processed. This is
    /// the entry point the `sweep` CLI subcommand calls for a one-shot run.
    pub async fn sweep_once(&self) -> anyhow::Result<u32> {
        let due = self.outbox.select_due(self.batch_size).await?;
        let mut processed = 0;
        for job in due {
            if let Some(claimed) = self.outbox.claim(job.id, &self.worker_id).await? {
                self.process_job(claimed).await;
                processed += 1;
            }
        }
        Ok(processed)
    }

    async fn process_job(&self, job: OutboxJob) {
        let result = match &job.payload {
            OutboxJobPayload::StartOrchestration { prompt, repository, ref_name, api_key, model } => {
                self.process_start(&job, prompt, repository, ref_name, api_key, model.as_deref()).await
            }
            OutboxJobPayload::ProcessWebhook { agent_id, status, repository, ref_name, branch_name, pr_url, summary } => {
                self.process_webhook(&job, agent_id, status, repository.as_deref(), ref_name.as_deref(), branch_name.as_deref(), pr_url.as_deref(), summary.as_deref())
                    .await
            }
        };

        if let Err(err) = result {
            tracing::warn!(job_id = %job.id, error = %err, "outbox job processing raised an unexpected error");
        }
    }

    async fn process_start(
        &self,
        job: &OutboxJob,
        prompt: &str,
        repository: &str,
        ref_name: &str,
        api_key: &str,
        model: Option<&str>,
    ) -> anyhow::Result<()> {
        let ref_name = default_ref_name(ref_name);
        if let Err(reason) = validate_start_payload(prompt, repository, &ref_name, api_key) {
            self.terminal_fail(job, "VALIDATION_ERROR", &reason).await;
            return Ok(());
        }

        self.mark_running(job.orchestration_id).await;
        self.emit(job.orchestration_id, EventLevel::Info, "worker_received", format!("worker {} picked up start-orchestration job", self.worker_id)).await;

        let orchestration = self.orchestrations.get(job.orchestration_id).await?;
        let options = orchestration.map(|o| o.options).unwrap_or_default();

        match self.orchestrator.start(prompt, repository, &ref_name, api_key, model, &options).await {
            Ok(outcome) => {
                if let Ok(Some(mut orchestration)) = self.orchestrations.get(job.orchestration_id).await {
                    orchestration.master_agent_id = Some(outcome.master_agent_id.clone());
                    orchestration.metadata = outcome.task_plan;
                    orchestration.tasks_total = outcome.tasks_total;
                    self.orchestrations.update(&orchestration).await.ok();
                }
                self.emit(job.orchestration_id, EventLevel::Info, "orchestration_started", format!("master agent {} started with {} task(s)", outcome.master_agent_id, outcome.tasks_total)).await;
                self.outbox.mark_completed(job.id).await?;
            }
            Err(err) => self.retry_or_fail(job, &err).await?,
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_webhook(
        &self,
        job: &OutboxJob,
        agent_id: &str,
        status: &str,
        repository: Option<&str>,
        ref_name: Option<&str>,
        branch_name: Option<&str>,
        pr_url: Option<&str>,
        summary: Option<&str>,
    ) -> anyhow::Result<()> {
        match self.orchestrator.process_event(agent_id, status, repository, ref_name, branch_name, pr_url, summary).await {
            Ok(()) => {
                self.outbox.mark_completed(job.id).await?;
            }
            Err(err) => self.retry_or_fail(job, &err).await?,
        }
        Ok(())
    }

    /// §7: the retry/terminal decision is a pure function over the
    /// classified outcome, not over free-text matching. Retries only while
    /// the error's `ErrorCode` says it's worth retrying *and* the job still
    /// has attempts left; anything else is terminal with the real code
    /// attached, not the hardcoded `CURSOR_API_ERROR` this used to collapse to.
    async fn retry_or_fail(&self, job: &OutboxJob, err: &ClassifiedError) -> anyhow::Result<()> {
        let attempts = job.attempts + 1;
        if should_retry(err.code, attempts, job.max_attempts) {
            let next_run_at = Utc::now() + chrono::Duration::from_std(OutboxJob::backoff_delay(self.base_delay, attempts)).unwrap_or(chrono::Duration::zero());
            self.outbox.requeue(job.id, next_run_at, &err.message).await?;
        } else {
            self.terminal_fail(job, err.code.as_str(), &err.message).await;
        }
        Ok(())
    }

    async fn terminal_fail(&self, job: &OutboxJob, code: &str, message: &str) {
        if let Err(err) = self.outbox.mark_failed(job.id, message).await {
            tracing::warn!(job_id = %job.id, error = %err, "failed to mark outbox job failed");
        }
        if let Ok(Some(mut orchestration)) = self.orchestrations.get(job.orchestration_id).await {
            let summary = format!("Job failed after {} attempts: {message}", job.attempts + 1);
            orchestration.mark_error(code, message, summary);
            self.orchestrations.update(&orchestration).await.ok();
        }
        self.emit(job.orchestration_id, EventLevel::Error, "worker_error", message.to_string()).await;
    }

    async fn mark_running(&self, orchestration_id: Uuid) {
        if let Ok(Some(mut orchestration)) = self.orchestrations.get(orchestration_id).await {
            if orchestration.master_agent_id.is_none() {
                // master_agent_id is assigned once the orchestrator actually
                // starts; record only the running transition here.
                orchestration.status = crate::domain::models::OrchestrationStatus::Running;
                orchestration.started_at = Some(Utc::now());
                orchestration.updated_at = Utc::now();
                self.orchestrations.update(&orchestration).await.ok();
            }
        }
    }

    async fn emit(&self, orchestration_id: Uuid, level: EventLevel, step_key: &str, message: impl Into<String>) {
        let event = Event::new(orchestration_id, level, step_key, None, message, None);
        if let Err(err) = self.events.append(&event).await {
            tracing::warn!(error = %err, "failed to append event");
        }
    }
}

/// Pure retry-vs-terminal decision: retryable per the error's own
/// classification, and attempts remain within budget.
fn should_retry(code: crate::domain::classification::ErrorCode, attempts: u32, max_attempts: u32) -> bool {
    code.is_retryable() && attempts < max_attempts
}

const MAX_PROMPT_CHARS: usize = 100_000;
const MIN_API_KEY_CHARS: usize = 10;
const MAX_REF_CHARS: usize = 255;

/// §4.2 payload validation: a failure here is terminal and non-retryable.
fn validate_start_payload(prompt: &str, repository: &str, ref_name: &str, api_key: &str) -> Result<(), String> {
    if prompt.trim().is_empty() {
        return Err("prompt must not be empty".to_string());
    }
    if prompt.chars().count() > MAX_PROMPT_CHARS {
        return Err(format!("prompt exceeds the {MAX_PROMPT_CHARS}-character limit"));
    }
    if repository.trim().is_empty() {
        return Err("repository must not be empty".to_string());
    }
    if ref_name.is_empty() || ref_name.chars().count() > MAX_REF_CHARS {
        return Err(format!("ref must be between 1 and {MAX_REF_CHARS} characters"));
    }
    if api_key.trim().chars().count() < MIN_API_KEY_CHARS {
        return Err(format!("api key must be at least {MIN_API_KEY_CHARS} characters"));
    }
    Ok(())
}

fn default_ref_name(ref_name: &str) -> String {
    if ref_name.trim().is_empty() {
        "main".to_string()
    } else {
        ref_name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_prompt() {
        assert!(validate_start_payload("", "owner/repo", "main", "sk-0123456789").is_err());
    }

    #[test]
    fn rejects_oversized_prompt() {
        let prompt = "x".repeat(MAX_PROMPT_CHARS + 1);
        assert!(validate_start_payload(&prompt, "owner/repo", "main", "sk-0123456789").is_err());
    }

    #[test]
    fn rejects_empty_repository() {
        assert!(validate_start_payload("do the thing", "", "main", "sk-0123456789").is_err());
    }

    #[test]
    fn rejects_short_api_key() {
        assert!(validate_start_payload("do the thing", "owner/repo", "main", "short").is_err());
    }

    #[test]
    fn accepts_well_formed_payload() {
        assert!(validate_start_payload("do the thing", "owner/repo", "main", "sk-0123456789").is_ok());
    }

    #[test]
    fn default_ref_name_falls_back_to_main() {
        assert_eq!(default_ref_name(""), "main");
        assert_eq!(default_ref_name("develop"), "develop");
    }

    #[test]
    fn validation_error_is_terminal_even_on_first_attempt() {
        use crate::domain::classification::ErrorCode;
        assert!(!should_retry(ErrorCode::ValidationError, 1, 3));
    }

    #[test]
    fn auth_failed_retries_until_attempts_exhausted() {
        use crate::domain::classification::ErrorCode;
        assert!(should_retry(ErrorCode::AuthFailed, 1, 3));
        assert!(should_retry(ErrorCode::AuthFailed, 2, 3));
        assert!(!should_retry(ErrorCode::AuthFailed, 3, 3));
    }

    #[test]
    fn rate_limit_is_always_retryable_within_budget() {
        use crate::domain::classification::ErrorCode;
        assert!(should_retry(ErrorCode::RateLimit, 1, 3));
    }
}
