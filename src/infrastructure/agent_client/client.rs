//! HTTP implementation of `ExternalAgentClient` against the Cloud Agent
//! service (`https://api.cursor.com/v0` by default), §6.2.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Client as ReqwestClient, StatusCode};
use serde::{Deserialize, Serialize};

use super::rate_limiter::TokenBucketRateLimiter;
use super::retry::RetryPolicy;
use crate::domain::classification::{ClassifiedError, ClassifiedOutcome};
use crate::domain::models::AgentClientConfig;
use crate::domain::ports::agent_client::{
    AgentStatusResponse, Conversation, CreateAgentRequest, CreatedAgent, ExternalAgentClient, RepositoryInfo,
};

pub struct HttpAgentClient {
    http: ReqwestClient,
    base_url: String,
    rate_limiter: TokenBucketRateLimiter,
    retry_policy: RetryPolicy,
}

impl HttpAgentClient {
    pub fn new(config: &AgentClientConfig) -> anyhow::Result<Self> {
        let http = ReqwestClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(10)
            .tcp_nodelay(true)
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            rate_limiter: TokenBucketRateLimiter::new(config.rate_limit_rps),
            retry_policy: RetryPolicy::new(config.max_retries, config.initial_backoff_ms, config.max_backoff_ms),
        })
    }

    fn basic_auth_header(api_key: &str) -> String {
        format!("Basic {}", BASE64.encode(format!("{api_key}:")))
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        api_key: &str,
        build: impl Fn(&ReqwestClient) -> reqwest::RequestBuilder,
    ) -> ClassifiedOutcome<T> {
        self.retry_policy
            .execute(|| async {
                self.rate_limiter.acquire().await;

                let response = build(&self.http)
                    .header("Authorization", Self::basic_auth_header(api_key))
                    .send()
                    .await
                    .map_err(|e| ClassifiedError::network(e.to_string()))?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(ClassifiedError::from_http_status(status.as_u16(), body));
                }

                response
                    .json::<T>()
                    .await
                    .map_err(|e| ClassifiedError::new(crate::domain::classification::ErrorCode::CursorApiError, e.to_string()))
            })
            .await
    }

    async fn send_no_body(
        &self,
        api_key: &str,
        build: impl Fn(&ReqwestClient) -> reqwest::RequestBuilder,
    ) -> ClassifiedOutcome<()> {
        self.retry_policy
            .execute(|| async {
                self.rate_limiter.acquire().await;

                let response = build(&self.http)
                    .header("Authorization", Self::basic_auth_header(api_key))
                    .send()
                    .await
                    .map_err(|e| ClassifiedError::network(e.to_string()))?;

                let status = response.status();
                if status == StatusCode::NO_CONTENT || status.is_success() {
                    return Ok(());
                }

                let body = response.text().await.unwrap_or_default();
                Err(ClassifiedError::from_http_status(status.as_u16(), body))
            })
            .await
    }
}

#[derive(Serialize)]
struct CreateAgentWire<'a> {
    prompt: WirePrompt<'a>,
    source: WireSource<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<WireTarget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    webhook: Option<WireWebhook<'a>>,
}

#[derive(Serialize)]
struct WirePrompt<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct WireSource<'a> {
    repository: &'a str,
    #[serde(rename = "ref")]
    ref_name: &'a str,
}

#[derive(Serialize)]
struct WireTarget {
    #[serde(rename = "autoCreatePr")]
    auto_create_pr: bool,
}

#[derive(Serialize)]
struct WireWebhook<'a> {
    url: &'a str,
    secret: &'a str,
}

#[derive(Serialize)]
struct FollowupWire<'a> {
    prompt: WirePrompt<'a>,
}

#[derive(Deserialize)]
struct ModelsWire {
    models: Vec<String>,
}

#[derive(Deserialize)]
struct RepositoriesWire {
    repositories: Vec<RepositoryInfo>,
}

#[async_trait]
impl ExternalAgentClient for HttpAgentClient {
    async fn create_agent(&self, api_key: &str, request: CreateAgentRequest) -> ClassifiedOutcome<CreatedAgent> {
        let wire = CreateAgentWire {
            prompt: WirePrompt { text: &request.prompt },
            source: WireSource { repository: &request.repository, ref_name: &request.ref_name },
            target: Some(WireTarget { auto_create_pr: request.auto_create_pr }),
            model: request.model.as_deref(),
            webhook: match (&request.webhook_url, &request.webhook_secret) {
                (Some(url), Some(secret)) => Some(WireWebhook { url, secret }),
                _ => None,
            },
        };

        self.send(api_key, |http| http.post(format!("{}/agents", self.base_url)).json(&wire)).await
    }

    async fn get_agent(&self, api_key: &str, agent_id: &str) -> ClassifiedOutcome<AgentStatusResponse> {
        self.send(api_key, |http| http.get(format!("{}/agents/{agent_id}", self.base_url))).await
    }

    async fn get_conversation(&self, api_key: &str, agent_id: &str) -> ClassifiedOutcome<Conversation> {
        self.send(api_key, |http| http.get(format!("{}/agents/{agent_id}/conversation", self.base_url))).await
    }

    async fn send_followup(&self, api_key: &str, agent_id: &str, text: &str) -> ClassifiedOutcome<()> {
        let wire = FollowupWire { prompt: WirePrompt { text } };
        self.send_no_body(api_key, |http| http.post(format!("{}/agents/{agent_id}/followup", self.base_url)).json(&wire))
            .await
    }

    async fn stop_agent(&self, api_key: &str, agent_id: &str) -> ClassifiedOutcome<()> {
        self.send_no_body(api_key, |http| http.post(format!("{}/agents/{agent_id}/stop", self.base_url))).await
    }

    async fn delete_agent(&self, api_key: &str, agent_id: &str) -> ClassifiedOutcome<()> {
        self.send_no_body(api_key, |http| http.delete(format!("{}/agents/{agent_id}", self.base_url))).await
    }

    async fn list_models(&self, api_key: &str) -> ClassifiedOutcome<Vec<String>> {
        let wire: ModelsWire = self.send(api_key, |http| http.get(format!("{}/models", self.base_url))).await?;
        Ok(wire.models)
    }

    async fn list_repositories(&self, api_key: &str) -> ClassifiedOutcome<Vec<RepositoryInfo>> {
        let wire: RepositoriesWire = self.send(api_key, |http| http.get(format!("{}/repositories", self.base_url))).await?;
        Ok(wire.repositories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_auth_header_encodes_api_key_with_trailing_colon() {
        let header = HttpAgentClient::basic_auth_header("my-secret-key");
        assert!(header.starts_with("Basic "));
        let encoded = header.strip_prefix("Basic ").unwrap();
        let decoded = BASE64.decode(encoded).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), "my-secret-key:");
    }

    #[tokio::test]
    async fn create_agent_request_omits_model_when_none() {
        let wire = CreateAgentWire {
            prompt: WirePrompt { text: "do the thing" },
            source: WireSource { repository: "owner/repo", ref_name: "main" },
            target: Some(WireTarget { auto_create_pr: true }),
            model: None,
            webhook: None,
        };
        let json = serde_json::to_string(&wire).unwrap();
        assert!(!json.contains("\"model\""));
    }
}
