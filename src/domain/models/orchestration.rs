//! Orchestration domain model.
//!
//! An orchestration is the top-level unit of work initiated by a user
//! prompt. It tracks the frozen task plan, the master agent coordinating
//! execution, and terminal status/error information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task_plan::TaskPlan;

/// Execution mode governing how subtasks are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestrationMode {
    /// Single Cloud Agent handles the entire prompt end to end.
    SingleAgent,
    /// Tasks are planned and dispatched one at a time in dependency order.
    Pipeline,
    /// Independent tasks are dispatched concurrently up to a parallelism cap.
    Batch,
    /// Same dispatch rules as Batch; reserved for future heuristic routing.
    Auto,
}

impl Default for OrchestrationMode {
    fn default() -> Self {
        Self::Auto
    }
}

impl OrchestrationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleAgent => "SINGLE_AGENT",
            Self::Pipeline => "PIPELINE",
            Self::Batch => "BATCH",
            Self::Auto => "AUTO",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "SINGLE_AGENT" => Some(Self::SingleAgent),
            "PIPELINE" => Some(Self::Pipeline),
            "BATCH" => Some(Self::Batch),
            "AUTO" => Some(Self::Auto),
            _ => None,
        }
    }

    /// Whether this mode dispatches multiple subagents in parallel.
    pub fn is_parallel(&self) -> bool {
        matches!(self, Self::Batch | Self::Auto)
    }
}

/// User-tunable knobs stored alongside an orchestration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestrationOptions {
    #[serde(default)]
    pub mode: OrchestrationMode,
    #[serde(default, rename = "maxParallelAgents")]
    pub max_parallel_agents: Option<u32>,
    #[serde(default, rename = "enableAutoFix")]
    pub enable_auto_fix: bool,
    #[serde(default, rename = "enableTesting")]
    pub enable_testing: bool,
    #[serde(default, rename = "enableValidation")]
    pub enable_validation: bool,
    #[serde(default)]
    pub priority: Option<TaskSizePriority>,
    #[serde(default, rename = "taskSize")]
    pub task_size: Option<TaskSizeHint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSizePriority {
    Speed,
    Quality,
    Balanced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSizeHint {
    Small,
    Medium,
    Large,
    Auto,
}

/// Lifecycle status of an orchestration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationStatus {
    Queued,
    Running,
    Completed,
    Error,
    Timeout,
    Stopped,
}

impl OrchestrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::Stopped => "stopped",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "error" => Some(Self::Error),
            "timeout" => Some(Self::Timeout),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Timeout | Self::Stopped)
    }
}

/// A top-level unit of work initiated by a user prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Orchestration {
    pub id: Uuid,
    pub master_agent_id: Option<String>,
    pub repository_url: String,
    pub prompt: String,
    pub prompt_length: usize,
    pub ref_name: String,
    pub model: Option<String>,
    pub mode: OrchestrationMode,
    pub status: OrchestrationStatus,
    pub tasks_total: u32,
    pub tasks_completed: u32,
    pub active_agents: u32,
    pub options: OrchestrationOptions,
    /// Frozen task plan, set once on successful start.
    pub metadata: Option<TaskPlan>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub error_summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Orchestration {
    /// Build a freshly queued orchestration from collaborator-supplied input.
    pub fn new_queued(
        prompt: String,
        repository_url: String,
        ref_name: String,
        model: Option<String>,
        options: OrchestrationOptions,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            master_agent_id: None,
            prompt_length: prompt.chars().count(),
            prompt,
            repository_url,
            ref_name,
            model,
            mode: options.mode,
            status: OrchestrationStatus::Queued,
            tasks_total: 0,
            tasks_completed: 0,
            active_agents: 0,
            options,
            metadata: None,
            error_code: None,
            error_message: None,
            error_summary: None,
            created_at: now,
            started_at: None,
            updated_at: now,
        }
    }

    /// Invariant: tasks_completed must never exceed tasks_total.
    pub fn invariants_hold(&self) -> bool {
        let counters_ok = self.tasks_completed <= self.tasks_total;
        let master_ok = self.master_agent_id.is_some()
            == matches!(
                self.status,
                OrchestrationStatus::Running
                    | OrchestrationStatus::Completed
                    | OrchestrationStatus::Error
                    | OrchestrationStatus::Timeout
            );
        let error_ok = (self.error_code.is_some()) == (self.status == OrchestrationStatus::Error);
        counters_ok && master_ok && error_ok
    }

    pub fn mark_running(&mut self, master_agent_id: String) {
        self.master_agent_id = Some(master_agent_id);
        self.status = OrchestrationStatus::Running;
        self.started_at = Some(Utc::now());
        self.updated_at = Utc::now();
    }

    pub fn mark_completed(&mut self) {
        self.status = OrchestrationStatus::Completed;
        self.updated_at = Utc::now();
    }

    pub fn mark_error(&mut self, code: impl Into<String>, message: impl Into<String>, summary: impl Into<String>) {
        self.status = OrchestrationStatus::Error;
        self.error_code = Some(code.into());
        self.error_message = Some(message.into());
        self.error_summary = Some(summary.into());
        self.updated_at = Utc::now();
    }

    /// Administrative fix-and-retry path: reset a terminal error orchestration
    /// back to queued, clearing error fields, so a fresh outbox job can run.
    pub fn reset_for_retry(&mut self) {
        self.status = OrchestrationStatus::Queued;
        self.error_code = None;
        self.error_message = None;
        self.error_summary = None;
        self.updated_at = Utc::now();
    }
}
