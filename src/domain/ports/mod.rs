//! Domain ports — traits implemented by `infrastructure` adapters and
//! consumed by `services`. Nothing in `domain` depends on `infrastructure`.

pub mod agent_client;
pub mod agent_state_repository;
pub mod broker;
pub mod event_repository;
pub mod health_repository;
pub mod llm_client;
pub mod orchestration_repository;
pub mod outbox_repository;
pub mod tester;

pub use agent_client::{AgentStatusResponse, AgentTarget, ConversationMessage, Conversation, CreateAgentRequest, CreatedAgent, ExternalAgentClient, RepositoryInfo};
pub use agent_state_repository::AgentStateRepository;
pub use broker::{Broker, BrokerJobOptions};
pub use event_repository::EventRepository;
pub use health_repository::HealthRepository;
pub use llm_client::{ChatMessage, ChatRequest, LlmClient};
pub use orchestration_repository::OrchestrationRepository;
pub use outbox_repository::OutboxRepository;
pub use tester::{TestCounts, TestRunResult, Tester};
