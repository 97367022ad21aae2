//! AgentState — per-Cloud-Agent coordination state, for both master agents
//! (coordinating a plan) and single agents (§4.4 SINGLE_AGENT mode).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use super::orchestration::{OrchestrationMode, OrchestrationOptions};
use super::task_plan::TaskPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentRunStatus {
    Active,
    Completed,
    Error,
    MaxIterationsReached,
    Timeout,
}

impl AgentRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Error => "ERROR",
            Self::MaxIterationsReached => "MAX_ITERATIONS_REACHED",
            Self::Timeout => "TIMEOUT",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(Self::Active),
            "COMPLETED" => Some(Self::Completed),
            "ERROR" => Some(Self::Error),
            "MAX_ITERATIONS_REACHED" => Some(Self::MaxIterationsReached),
            "TIMEOUT" => Some(Self::Timeout),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// The most recent analyzer decision plus the bookkeeping needed to resume
/// the loop (frozen plan, current task/subagent pointers, quality score).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LastAnalysis {
    pub plan: Option<TaskPlan>,
    /// Maps each dispatched task id to the remote agent id executing it.
    /// This is the reverse-lookup table the Orchestrator uses to decide
    /// whether an incoming webhook's `agent_id` is a subagent of this master.
    #[serde(default)]
    pub current_agent_id: HashMap<String, String>,
    pub mode: OrchestrationMode,
    pub options: OrchestrationOptions,
    pub quality_score: Option<u32>,
    pub needs_refinement: bool,
    pub action: Option<String>,
    pub reasoning: Option<String>,
    pub confidence: Option<f64>,
    /// Ref/model captured at dispatch time so the Task Dispatcher can
    /// redispatch follow-on tasks later without re-deriving them; never the
    /// api key, which stays process-config-only (§5).
    #[serde(default)]
    pub ref_name: String,
    #[serde(default)]
    pub model: Option<String>,
}

/// Per-Cloud-Agent coordination state, keyed by `agent_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub agent_id: String,
    pub task_description: String,
    pub repository: String,
    pub branch_name: Option<String>,
    pub iterations: u32,
    pub status: AgentRunStatus,
    pub tasks_completed: Vec<String>,
    pub tasks_remaining: Vec<String>,
    pub last_analysis: LastAnalysis,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentState {
    pub fn new_master(agent_id: String, task_description: String, repository: String, mode: OrchestrationMode, options: OrchestrationOptions) -> Self {
        let now = Utc::now();
        Self {
            agent_id,
            task_description,
            repository,
            branch_name: None,
            iterations: 0,
            status: AgentRunStatus::Active,
            tasks_completed: Vec::new(),
            tasks_remaining: Vec::new(),
            last_analysis: LastAnalysis {
                mode,
                options,
                ..Default::default()
            },
            created_at: now,
            updated_at: now,
        }
    }

    /// Invariant: COMPLETED implies no remaining tasks.
    pub fn invariants_hold(&self, active_subagent_count: usize) -> bool {
        if self.status == AgentRunStatus::Completed {
            self.tasks_remaining.is_empty() && active_subagent_count == 0
        } else {
            true
        }
    }

    pub fn is_subagent_of_master(&self, candidate_agent_id: &str) -> Option<String> {
        self.last_analysis
            .current_agent_id
            .iter()
            .find(|(_, v)| v.as_str() == candidate_agent_id)
            .map(|(task_id, _)| task_id.clone())
    }
}

/// In-memory-only record of a dispatched subagent. Rebuilt on restart from
/// `AgentState::last_analysis.current_agent_id` rather than persisted
/// directly (see REDESIGN FLAGS in SPEC_FULL.md §9).
#[derive(Debug, Clone)]
pub struct ActiveSubagent {
    pub task_id: String,
    pub agent_id: String,
    pub started_at: DateTime<Utc>,
}

impl ActiveSubagent {
    pub fn new(task_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            started_at: Utc::now(),
        }
    }
}

pub type MasterId = String;
pub type AgentId = String;
pub type TaskId = String;
