//! Process-wide configuration structure, merged by `infrastructure::config::ConfigLoader`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Main configuration structure for the orchestration core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub agent_client: AgentClientConfig,
    #[serde(default)]
    pub orchestration: OrchestrationLimits,
    #[serde(default)]
    pub outbox: OutboxConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub tester: TesterConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            webhook: WebhookConfig::default(),
            agent_client: AgentClientConfig::default(),
            orchestration: OrchestrationLimits::default(),
            outbox: OutboxConfig::default(),
            broker: BrokerConfig::default(),
            llm: LlmConfig::default(),
            tester: TesterConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> String {
    "orchestrator.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default)]
    pub log_dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogFormat {
    fn default() -> Self {
        Self::Pretty
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WebhookConfig {
    /// HMAC key; empty disables signature verification.
    #[serde(default)]
    pub secret: String,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Publicly reachable base URL for this service, registered with the
    /// external agent service on agent creation so it can deliver
    /// status-change webhooks back (§6.2 `webhook: {url, secret}`). `None`
    /// when this deployment isn't reachable from the external service.
    #[serde(default)]
    pub public_url: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            bind_addr: default_bind_addr(),
            public_url: None,
        }
    }
}

impl WebhookConfig {
    /// The full inbound webhook endpoint, if this deployment is reachable.
    pub fn public_endpoint(&self) -> Option<String> {
        self.public_url.as_ref().map(|base| format!("{}/webhooks/agent-status", base.trim_end_matches('/')))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentClientConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_agent_base_url")]
    pub base_url: String,
    #[serde(default = "default_rate_limit_rps")]
    pub rate_limit_rps: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_agent_base_url() -> String {
    "https://api.cursor.com/v0".to_string()
}
fn default_rate_limit_rps() -> f64 {
    10.0
}
fn default_max_retries() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    10_000
}
fn default_max_backoff_ms() -> u64 {
    300_000
}
fn default_timeout_secs() -> u64 {
    300
}

impl Default for AgentClientConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_agent_base_url(),
            rate_limit_rps: default_rate_limit_rps(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Process-wide orchestration limits (§6.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OrchestrationLimits {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_parallel_agents")]
    pub max_parallel_agents: u32,
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: u32,
    #[serde(default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

fn default_max_iterations() -> u32 {
    20
}
fn default_max_parallel_agents() -> u32 {
    3
}
fn default_quality_threshold() -> u32 {
    70
}
fn default_agent_timeout_secs() -> u64 {
    4 * 3600
}
fn default_heartbeat_interval_secs() -> u64 {
    30
}

impl Default for OrchestrationLimits {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_parallel_agents: default_max_parallel_agents(),
            quality_threshold: default_quality_threshold(),
            agent_timeout_secs: default_agent_timeout_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
        }
    }
}

impl OrchestrationLimits {
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OutboxConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: u32,
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_stuck_job_timeout_secs")]
    pub stuck_job_timeout_secs: u64,
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    5
}
fn default_batch_size() -> u32 {
    10
}
fn default_max_concurrent_jobs() -> u32 {
    10
}
fn default_base_delay_secs() -> u64 {
    60
}
fn default_max_attempts() -> u32 {
    3
}
fn default_stuck_job_timeout_secs() -> u64 {
    30 * 60
}
fn default_reaper_interval_secs() -> u64 {
    10 * 60
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            batch_size: default_batch_size(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            base_delay_secs: default_base_delay_secs(),
            max_attempts: default_max_attempts(),
            stuck_job_timeout_secs: default_stuck_job_timeout_secs(),
            reaper_interval_secs: default_reaper_interval_secs(),
        }
    }
}

impl OutboxConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
    pub fn base_delay(&self) -> Duration {
        Duration::from_secs(self.base_delay_secs)
    }
    pub fn stuck_job_timeout(&self) -> Duration {
        Duration::from_secs(self.stuck_job_timeout_secs)
    }
    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BrokerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_broker_concurrency")]
    pub concurrency: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_broker_initial_backoff_secs")]
    pub initial_backoff_secs: u64,
    #[serde(default = "default_broker_retain_completed")]
    pub retain_completed: u32,
    #[serde(default = "default_broker_retain_failed")]
    pub retain_failed: u32,
}

fn default_broker_concurrency() -> u32 {
    5
}
fn default_broker_initial_backoff_secs() -> u64 {
    5
}
fn default_broker_retain_completed() -> u32 {
    100
}
fn default_broker_retain_failed() -> u32 {
    1000
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            concurrency: default_broker_concurrency(),
            max_attempts: default_max_attempts(),
            initial_backoff_secs: default_broker_initial_backoff_secs(),
            retain_completed: default_broker_retain_completed(),
            retain_failed: default_broker_retain_failed(),
        }
    }
}

/// Chat-completion LLM used only by the Analyzer (§6.5). A failed call is
/// never a retryable job error — the Analyzer falls back to rule-based logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_temperature")]
    pub temperature: f64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_temperature() -> f64 {
    0.2
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            temperature: default_llm_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Tester subprocess config (§6.6): install/lint/test/build steps run
/// sequentially via a configurable shell script, each under its own timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TesterConfig {
    #[serde(default = "default_tester_script_path")]
    pub script_path: String,
    #[serde(default = "default_install_timeout_secs")]
    pub install_timeout_secs: u64,
    #[serde(default = "default_lint_timeout_secs")]
    pub lint_timeout_secs: u64,
    #[serde(default = "default_test_timeout_secs")]
    pub test_timeout_secs: u64,
    #[serde(default = "default_build_timeout_secs")]
    pub build_timeout_secs: u64,
}

fn default_tester_script_path() -> String {
    "./scripts/run-tests.sh".to_string()
}
fn default_install_timeout_secs() -> u64 {
    5 * 60
}
fn default_lint_timeout_secs() -> u64 {
    2 * 60
}
fn default_test_timeout_secs() -> u64 {
    5 * 60
}
fn default_build_timeout_secs() -> u64 {
    5 * 60
}

impl Default for TesterConfig {
    fn default() -> Self {
        Self {
            script_path: default_tester_script_path(),
            install_timeout_secs: default_install_timeout_secs(),
            lint_timeout_secs: default_lint_timeout_secs(),
            test_timeout_secs: default_test_timeout_secs(),
            build_timeout_secs: default_build_timeout_secs(),
        }
    }
}

impl TesterConfig {
    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }
    pub fn lint_timeout(&self) -> Duration {
        Duration::from_secs(self.lint_timeout_secs)
    }
    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }
    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }
}
