//! Domain models for the orchestration core.

pub mod agent_state;
pub mod config;
pub mod event;
pub mod health;
pub mod orchestration;
pub mod outbox_job;
pub mod quality;
pub mod task_plan;
pub mod webhook;

pub use agent_state::{ActiveSubagent, AgentId, AgentRunStatus, AgentState, LastAnalysis, MasterId, TaskId};
pub use config::{
    AgentClientConfig, BrokerConfig, Config, DatabaseConfig, LlmConfig, LogFormat, LoggingConfig,
    OrchestrationLimits, OutboxConfig, TesterConfig, WebhookConfig,
};
pub use event::{Event, EventLevel, EventPhase};
pub use health::{HealthRecord, QueueDepths};
pub use orchestration::{Orchestration, OrchestrationMode, OrchestrationOptions, OrchestrationStatus, TaskSizeHint, TaskSizePriority};
pub use outbox_job::{OutboxJob, OutboxJobPayload, OutboxJobStatus};
pub use quality::{Grade, QualityBreakdown, QualityInputs};
pub use task_plan::{PlanPriority, PlanTask, TaskPlan, TaskPlanError};
pub use webhook::{ReceivedSummary, RemoteAgentStatus, StatusChangeEvent, WebhookReceipt, WebhookSource, WebhookTarget};
