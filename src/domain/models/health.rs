//! HealthRecord — append-only heartbeat for liveness/diagnostics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueDepths {
    pub outbox_pending: u64,
    pub outbox_processing: u64,
    pub broker_waiting: Option<u64>,
    pub broker_active: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub id: Uuid,
    pub service: String,
    pub worker_id: String,
    pub uptime_secs: u64,
    pub memory_bytes: Option<u64>,
    pub queue_depths: QueueDepths,
    pub created_at: DateTime<Utc>,
}

impl HealthRecord {
    pub fn new(service: impl Into<String>, worker_id: impl Into<String>, uptime_secs: u64, memory_bytes: Option<u64>, queue_depths: QueueDepths) -> Self {
        Self {
            id: Uuid::new_v4(),
            service: service.into(),
            worker_id: worker_id.into(),
            uptime_secs,
            memory_bytes,
            queue_depths,
            created_at: Utc::now(),
        }
    }
}
