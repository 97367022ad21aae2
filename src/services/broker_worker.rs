//! Broker Worker (§4.3) — drains the in-memory broker's queue with a small
//! pool of concurrent consumers and feeds each job straight to the
//! Orchestrator, bypassing the outbox poll interval entirely. Only runs when
//! `config.broker.enabled` is set; the Webhook Gateway already falls back to
//! the outbox on its own when the broker is absent or its channel is full.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;

use super::orchestrator::Orchestrator;
use crate::domain::models::OutboxJobPayload;
use crate::infrastructure::broker::{BrokerReceiver, QueuedJob};

pub struct BrokerWorker {
    receiver: AsyncMutex<BrokerReceiver>,
    orchestrator: Arc<Orchestrator>,
    concurrency: u32,
    max_attempts: u32,
    initial_backoff: Duration,
}

impl BrokerWorker {
    pub fn new(
        receiver: BrokerReceiver,
        orchestrator: Arc<Orchestrator>,
        concurrency: u32,
        max_attempts: u32,
        initial_backoff: Duration,
    ) -> Self {
        Self { receiver: AsyncMutex::new(receiver), orchestrator, concurrency, max_attempts, initial_backoff }
    }

    /// Spawns `concurrency` consumer loops sharing the single receiver end,
    /// and waits for all of them (they only exit once every broker sender is
    /// dropped, i.e. process shutdown).
    pub async fn run(self: Arc<Self>) {
        let mut handles = Vec::new();
        for _ in 0..self.concurrency.max(1) {
            let worker = self.clone();
            handles.push(tokio::spawn(async move { worker.consume_loop().await }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn consume_loop(&self) {
        loop {
            let job = {
                let mut receiver = self.receiver.lock().await;
                receiver.recv().await
            };
            let Some(job) = job else { break };

            self.process_with_retry(job).await;
            self.receiver.lock().await.mark_done();
        }
    }

    async fn process_with_retry(&self, job: QueuedJob) {
        let OutboxJobPayload::ProcessWebhook { agent_id, status, repository, ref_name, branch_name, pr_url, summary } =
            job.payload
        else {
            tracing::warn!("broker worker received a non-webhook payload, dropping");
            return;
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = self
                .orchestrator
                .process_event(
                    &agent_id,
                    &status,
                    repository.as_deref(),
                    ref_name.as_deref(),
                    branch_name.as_deref(),
                    pr_url.as_deref(),
                    summary.as_deref(),
                )
                .await;

            match result {
                Ok(()) => return,
                Err(err) if attempt >= self.max_attempts => {
                    tracing::error!(agent_id, attempt, error = %err, "broker job exhausted retries, dropping");
                    return;
                }
                Err(err) => {
                    let backoff = self.initial_backoff.saturating_mul(1u32 << (attempt - 1).min(16));
                    tracing::warn!(agent_id, attempt, error = %err, ?backoff, "broker job failed, retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}
