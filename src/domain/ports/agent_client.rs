//! External Agent Client port (§6.2) — typed calls to the Cloud Agent service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::classification::ClassifiedOutcome;

#[derive(Debug, Clone, Serialize)]
pub struct CreateAgentRequest {
    pub prompt: String,
    pub repository: String,
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub auto_create_pr: bool,
    /// `None` means "Auto mode" — the `model` field is omitted from the
    /// outbound JSON entirely, never sent as an empty string (§8 boundary).
    pub model: Option<String>,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedAgent {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentTarget {
    #[serde(rename = "branchName")]
    pub branch_name: Option<String>,
    #[serde(rename = "prUrl")]
    pub pr_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentStatusResponse {
    pub id: String,
    pub status: String,
    pub target: Option<AgentTarget>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConversationMessage {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub role: String,
    pub text: String,
    #[serde(rename = "createdAt")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Conversation {
    pub messages: Vec<ConversationMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryInfo {
    pub owner: String,
    pub name: String,
    pub repository: String,
}

/// Typed, credential-parameterized facade over the Cloud Agent service.
/// Never a process-wide singleton: every call takes the API key it should
/// authenticate with explicitly (§9 REDESIGN FLAGS — no mutated globals).
#[async_trait]
pub trait ExternalAgentClient: Send + Sync {
    async fn create_agent(&self, api_key: &str, request: CreateAgentRequest) -> ClassifiedOutcome<CreatedAgent>;
    async fn get_agent(&self, api_key: &str, agent_id: &str) -> ClassifiedOutcome<AgentStatusResponse>;
    async fn get_conversation(&self, api_key: &str, agent_id: &str) -> ClassifiedOutcome<Conversation>;
    async fn send_followup(&self, api_key: &str, agent_id: &str, text: &str) -> ClassifiedOutcome<()>;
    async fn stop_agent(&self, api_key: &str, agent_id: &str) -> ClassifiedOutcome<()>;
    async fn delete_agent(&self, api_key: &str, agent_id: &str) -> ClassifiedOutcome<()>;
    async fn list_models(&self, api_key: &str) -> ClassifiedOutcome<Vec<String>>;
    async fn list_repositories(&self, api_key: &str) -> ClassifiedOutcome<Vec<RepositoryInfo>>;
}
