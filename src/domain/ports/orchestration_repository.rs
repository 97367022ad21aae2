//! Orchestration repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::Orchestration;

#[async_trait]
pub trait OrchestrationRepository: Send + Sync {
    async fn create(&self, orchestration: &Orchestration) -> DomainResult<()>;
    async fn get(&self, id: Uuid) -> DomainResult<Option<Orchestration>>;
    async fn update(&self, orchestration: &Orchestration) -> DomainResult<()>;
    async fn list_by_status(&self, status: crate::domain::models::OrchestrationStatus) -> DomainResult<Vec<Orchestration>>;

    /// Looks up the orchestration whose master agent is `master_agent_id`.
    /// Used by the Webhook Gateway to resolve an inbound event's bare
    /// `agent_id` back to its owning orchestration.
    async fn find_by_master_agent_id(&self, master_agent_id: &str) -> DomainResult<Option<Orchestration>>;
}
