//! AgentState repository port — per-agent coordination state with a
//! reverse master-by-subagent lookup.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AgentRunStatus, AgentState};

#[async_trait]
pub trait AgentStateRepository: Send + Sync {
    async fn create(&self, state: &AgentState) -> DomainResult<()>;
    async fn get(&self, agent_id: &str) -> DomainResult<Option<AgentState>>;
    async fn update(&self, state: &AgentState) -> DomainResult<()>;

    /// Find the master AgentState (if any) whose `last_analysis.current_agent_id`
    /// map contains `subagent_id` as a value. Used by the Orchestrator to route
    /// incoming webhook events (§4.4 step 2).
    async fn find_master_by_subagent(&self, subagent_id: &str) -> DomainResult<Option<AgentState>>;

    /// All agent states currently ACTIVE, used by the Stuck-Agent Reaper (§4.8)
    /// and by the startup reconciliation sweep (§9 REDESIGN FLAGS).
    async fn list_active(&self) -> DomainResult<Vec<AgentState>>;

    async fn list_by_status(&self, status: AgentRunStatus) -> DomainResult<Vec<AgentState>>;
}
