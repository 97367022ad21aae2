//! Broker port (§4.1, §6.4) — optional low-latency job queue.
//!
//! Presence is detected at startup (`Option<Arc<dyn Broker>>` wiring in
//! `main`); its absence is not an error, it's the degrade path the Webhook
//! Gateway falls back from onto the outbox.

use async_trait::async_trait;

use crate::domain::models::OutboxJobPayload;

#[derive(Debug, Clone)]
pub struct BrokerJobOptions {
    pub attempts: u32,
    pub initial_backoff: std::time::Duration,
    pub remove_on_complete: u32,
    pub remove_on_fail: u32,
}

impl Default for BrokerJobOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: std::time::Duration::from_secs(5),
            remove_on_complete: 100,
            remove_on_fail: 1000,
        }
    }
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Enqueue a job for best-effort, low-latency delivery. Returns an
    /// error only if the broker itself cannot accept the job (e.g. full);
    /// callers must fall back to the outbox on error, never fail the
    /// caller's own HTTP response (§4.1 step 6).
    async fn enqueue(&self, payload: OutboxJobPayload, options: BrokerJobOptions) -> anyhow::Result<()>;

    /// Current waiting/active counts, for heartbeat reporting (§4.9).
    async fn depths(&self) -> (u64, u64);
}
