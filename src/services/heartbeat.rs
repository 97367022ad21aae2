//! Heartbeat (§4.9) — periodically records this worker process's liveness
//! and queue depths, so an operator (or a future `status` subcommand) can
//! tell a wedged worker from one that's merely idle.

use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::domain::models::{HealthRecord, QueueDepths};
use crate::domain::ports::{Broker, HealthRepository, OutboxRepository};

pub struct Heartbeat {
    health: Arc<dyn HealthRepository>,
    outbox: Arc<dyn OutboxRepository>,
    broker: Option<Arc<dyn Broker>>,
    service: String,
    worker_id: String,
    interval: Duration,
    started_at: Instant,
}

impl Heartbeat {
    pub fn new(
        health: Arc<dyn HealthRepository>,
        outbox: Arc<dyn OutboxRepository>,
        broker: Option<Arc<dyn Broker>>,
        service: String,
        worker_id: String,
        interval: Duration,
    ) -> Self {
        Self { health, outbox, broker, service, worker_id, interval, started_at: Instant::now() }
    }

    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            if let Err(err) = self.beat().await {
                tracing::warn!(error = %err, "failed to record heartbeat");
            }
        }
    }

    pub async fn beat(&self) -> anyhow::Result<()> {
        let (outbox_pending, outbox_processing) = self.outbox.queue_counts().await?;
        let (broker_waiting, broker_active) = match &self.broker {
            Some(broker) => {
                let (waiting, active) = broker.depths().await;
                (Some(waiting), Some(active))
            }
            None => (None, None),
        };

        let record = HealthRecord::new(
            self.service.clone(),
            self.worker_id.clone(),
            self.started_at.elapsed().as_secs(),
            read_resident_memory_bytes(),
            QueueDepths { outbox_pending, outbox_processing, broker_waiting, broker_active },
        );

        self.health.record(&record).await?;
        Ok(())
    }
}

/// Best-effort RSS reading from `/proc/self/status`. `None` off Linux or if
/// the line is ever absent — this is diagnostic, never load-bearing.
fn read_resident_memory_bytes() -> Option<u64> {
    let status = fs::read_to_string("/proc/self/status").ok()?;
    status.lines().find_map(|line| {
        let rest = line.strip_prefix("VmRSS:")?;
        let kb: u64 = rest.trim().split_whitespace().next()?.parse().ok()?;
        Some(kb * 1024)
    })
}
