//! Health repository port — append-only heartbeat log.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::HealthRecord;

#[async_trait]
pub trait HealthRepository: Send + Sync {
    async fn record(&self, record: &HealthRecord) -> DomainResult<()>;
    async fn latest(&self, service: &str) -> DomainResult<Option<HealthRecord>>;
}
