//! Wire types for the inbound webhook body (§6.1).

use serde::{Deserialize, Serialize};

/// Status values carried on an inbound status-change webhook. Anything
/// beyond `Finished`/`Error` is accepted and logged, never acted on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RemoteAgentStatus {
    Finished,
    Error,
    Expired,
    #[serde(other)]
    Other,
}

impl RemoteAgentStatus {
    pub fn is_actionable(&self) -> bool {
        matches!(self, Self::Finished | Self::Error)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WebhookSource {
    pub repository: Option<String>,
    #[serde(rename = "ref")]
    pub ref_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WebhookTarget {
    pub url: Option<String>,
    #[serde(rename = "branchName")]
    pub branch_name: Option<String>,
    #[serde(rename = "prUrl")]
    pub pr_url: Option<String>,
}

/// Body of an inbound status-change webhook.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatusChangeEvent {
    pub event: Option<String>,
    pub id: String,
    pub status: RemoteAgentStatus,
    #[serde(default)]
    pub source: WebhookSource,
    #[serde(default)]
    pub target: WebhookTarget,
    pub summary: Option<String>,
}

/// Response body acknowledging receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookReceipt {
    pub ok: bool,
    pub received: ReceivedSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceivedSummary {
    pub event: Option<String>,
    #[serde(rename = "webhookEvent")]
    pub webhook_event: Option<String>,
    #[serde(rename = "agentId")]
    pub agent_id: String,
    pub status: String,
    pub processed: bool,
}
