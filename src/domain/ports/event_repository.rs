//! Event repository port — append-only audit log.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::Event;

#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn append(&self, event: &Event) -> DomainResult<()>;
    async fn list_for_orchestration(&self, orchestration_id: Uuid) -> DomainResult<Vec<Event>>;
}
