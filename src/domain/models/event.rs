//! Append-only audit trail attached to an orchestration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
    Debug,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Debug => "debug",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Self::Info),
            "warn" => Some(Self::Warn),
            "error" => Some(Self::Error),
            "debug" => Some(Self::Debug),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPhase {
    Start,
    Progress,
    End,
}

impl EventPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Progress => "progress",
            Self::End => "end",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "start" => Some(Self::Start),
            "progress" => Some(Self::Progress),
            "end" => Some(Self::End),
            _ => None,
        }
    }
}

/// A single append-only entry in an orchestration's event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub orchestration_id: Uuid,
    pub level: EventLevel,
    pub step_key: String,
    pub step_phase: Option<EventPhase>,
    pub message: String,
    pub payload: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn new(
        orchestration_id: Uuid,
        level: EventLevel,
        step_key: impl Into<String>,
        step_phase: Option<EventPhase>,
        message: impl Into<String>,
        payload: Option<Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            orchestration_id,
            level,
            step_key: step_key.into(),
            step_phase,
            message: message.into(),
            payload,
            created_at: Utc::now(),
        }
    }

    pub fn info(orchestration_id: Uuid, step_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(orchestration_id, EventLevel::Info, step_key, None, message, None)
    }

    pub fn warn(orchestration_id: Uuid, step_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(orchestration_id, EventLevel::Warn, step_key, None, message, None)
    }

    pub fn error(orchestration_id: Uuid, step_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(orchestration_id, EventLevel::Error, step_key, None, message, None)
    }
}
