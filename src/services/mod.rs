//! Business logic layer — depends on `domain` (types, ports) and is in turn
//! consumed by `main`'s wiring. Nothing here depends on a concrete
//! `infrastructure` adapter except `broker_worker`, which is necessarily
//! tied to the in-memory broker's consumer handle (see its module doc).

pub mod analyzer;
pub mod broker_worker;
pub mod heartbeat;
pub mod model_validator;
pub mod orchestrator;
pub mod outbox_processor;
pub mod quality_scorer;
pub mod repository_normalizer;
pub mod state_store;
pub mod stuck_agent_reaper;
pub mod task_dispatcher;
pub mod task_planner;

pub use analyzer::Analyzer;
pub use broker_worker::BrokerWorker;
pub use heartbeat::Heartbeat;
pub use model_validator::ModelValidator;
pub use orchestrator::Orchestrator;
pub use outbox_processor::OutboxProcessor;
pub use state_store::StateStore;
pub use stuck_agent_reaper::StuckAgentReaper;
pub use task_dispatcher::TaskDispatcher;
