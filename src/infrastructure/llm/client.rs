//! Chat-completion client for the Analyzer (§6.5). A failed call is never a
//! retryable job error — callers (the Analyzer) catch it and fall back to
//! rule-based decisions, so this client carries no retry policy of its own,
//! unlike `infrastructure::agent_client`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};

use crate::domain::models::LlmConfig;
use crate::domain::ports::llm_client::{ChatRequest, LlmClient};

pub struct HttpLlmClient {
    http: ReqwestClient,
    base_url: String,
    api_key: String,
}

impl HttpLlmClient {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let http = ReqwestClient::builder().timeout(Duration::from_secs(config.timeout_secs)).build()?;

        Ok(Self { http, base_url: config.base_url.clone(), api_key: config.api_key.clone() })
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Serialize)]
struct ChatCompletionWire<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat<'a>>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, request: ChatRequest) -> anyhow::Result<String> {
        let wire = ChatCompletionWire {
            model: &request.model,
            messages: request.messages.iter().map(|m| WireMessage { role: &m.role, content: &m.content }).collect(),
            temperature: request.temperature,
            response_format: request.json_object_response.then_some(ResponseFormat { kind: "json_object" }),
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&wire)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("llm request failed with status {status}: {body}");
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("llm response contained no choices"))
    }
}
