//! Outbox repository port — the durable queue underlying the Outbox Processor.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::OutboxJob;

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    async fn create(&self, job: &OutboxJob) -> DomainResult<()>;
    async fn get(&self, id: Uuid) -> DomainResult<Option<OutboxJob>>;

    /// Select up to `limit` pending jobs whose `next_run_at` has elapsed,
    /// ordered by `created_at` ascending. Does not claim them.
    async fn select_due(&self, limit: u32) -> DomainResult<Vec<OutboxJob>>;

    /// Atomically transition a single job from `pending` to `processing`
    /// bound to `worker_id`. Returns `None` if another worker won the race
    /// or the row's status had already moved on.
    async fn claim(&self, id: Uuid, worker_id: &str) -> DomainResult<Option<OutboxJob>>;

    async fn mark_completed(&self, id: Uuid) -> DomainResult<()>;

    /// Requeue for retry: increments attempts, sets `next_run_at`, records `last_error`.
    async fn requeue(&self, id: Uuid, next_run_at: DateTime<Utc>, last_error: &str) -> DomainResult<()>;

    /// Terminal failure: sets status=failed and records the final error.
    async fn mark_failed(&self, id: Uuid, last_error: &str) -> DomainResult<()>;

    /// Reclaim jobs stuck in `processing` owned by a presumed-dead worker
    /// (§4.2.1): resets them to `pending` without incrementing attempts.
    /// Returns the number of jobs reclaimed.
    async fn reclaim_stuck(&self, older_than: DateTime<Utc>) -> DomainResult<u64>;

    /// `(pending, processing)` row counts, for heartbeat reporting (§4.9).
    async fn queue_counts(&self) -> DomainResult<(u64, u64)>;
}
