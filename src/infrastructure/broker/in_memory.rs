//! In-process broker: a bounded mpsc channel standing in for the low-latency
//! dispatch path (§6.4). No external Redis/AMQP dependency — when enabled,
//! the Webhook Gateway hands jobs straight to a worker task instead of
//! waiting for the next outbox poll tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::models::OutboxJobPayload;
use crate::domain::ports::{Broker, BrokerJobOptions};

pub struct QueuedJob {
    pub payload: OutboxJobPayload,
    pub options: BrokerJobOptions,
}

#[derive(Clone)]
struct Depths {
    waiting: Arc<AtomicU64>,
    active: Arc<AtomicU64>,
}

pub struct InMemoryBroker {
    sender: mpsc::Sender<QueuedJob>,
    depths: Depths,
}

/// Consuming half, owned by `services::broker_worker`.
pub struct BrokerReceiver {
    receiver: mpsc::Receiver<QueuedJob>,
    depths: Depths,
}

impl InMemoryBroker {
    /// Builds a connected sender/receiver pair bounded at `capacity` jobs.
    pub fn channel(capacity: usize) -> (Self, BrokerReceiver) {
        let (sender, receiver) = mpsc::channel(capacity);
        let depths = Depths { waiting: Arc::new(AtomicU64::new(0)), active: Arc::new(AtomicU64::new(0)) };
        (
            Self { sender, depths: depths.clone() },
            BrokerReceiver { receiver, depths },
        )
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn enqueue(&self, payload: OutboxJobPayload, options: BrokerJobOptions) -> anyhow::Result<()> {
        self.depths.waiting.fetch_add(1, Ordering::SeqCst);
        if let Err(err) = self.sender.send(QueuedJob { payload, options }).await {
            self.depths.waiting.fetch_sub(1, Ordering::SeqCst);
            anyhow::bail!("broker channel closed: {err}");
        }
        Ok(())
    }

    async fn depths(&self) -> (u64, u64) {
        (self.depths.waiting.load(Ordering::SeqCst), self.depths.active.load(Ordering::SeqCst))
    }
}

impl BrokerReceiver {
    /// Waits for the next job, moving its accounting from waiting to active.
    /// Returns `None` once every `InMemoryBroker` sender has been dropped.
    pub async fn recv(&mut self) -> Option<QueuedJob> {
        let job = self.receiver.recv().await?;
        self.depths.waiting.fetch_sub(1, Ordering::SeqCst);
        self.depths.active.fetch_add(1, Ordering::SeqCst);
        Some(job)
    }

    /// Marks the most recently received job as finished (completed or failed).
    pub fn mark_done(&self) {
        self.depths.active.fetch_sub(1, Ordering::SeqCst);
    }
}
