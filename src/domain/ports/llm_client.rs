//! LLM client port (§6.5) — used only by the Analyzer.

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub json_object_response: bool,
}

/// A failed call is never a retryable job error; the Analyzer catches it
/// and falls back to rule-based decisions (§4.6, §7).
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> anyhow::Result<String>;
}
