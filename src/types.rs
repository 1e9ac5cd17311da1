//! Common types used across the collective.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Identifier grouping the traces of one logical run (e.g. "build_api").
pub type TaskId = String;

/// String tag identifying a kind of data (e.g. "goal", "analysis").
pub type TraceType = String;

/// Name of a registered agent.
pub type AgentName = String;

/// Round index. Rounds are counted per task and keep increasing across runs.
pub type Round = u64;

/// Opaque key/value payload carried by a trace.
pub type TraceData = serde_json::Map<String, serde_json::Value>;

/// Shared, immutable payload handed to agents and callers.
pub type SharedData = Arc<TraceData>;

/// Producer name used for traces seeded from a run's initial data.
pub const USER_PRODUCER: &str = "user";

/// A failed agent invocation, recorded instead of a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentError {
    /// Task the agent was running for
    pub task: TaskId,

    /// Name of the agent that failed
    pub agent: AgentName,

    /// Rendered error message
    pub message: String,

    /// Round (task clock) of the failed invocation
    pub round: Round,
}

impl AgentError {
    pub fn new(
        task: impl Into<TaskId>,
        agent: impl Into<AgentName>,
        message: impl Into<String>,
        round: Round,
    ) -> Self {
        Self {
            task: task.into(),
            agent: agent.into(),
            message: message.into(),
            round,
        }
    }
}

/// Error types for collective operations.
///
/// Agent failures are not represented here: they are recorded as
/// [`AgentError`] values and never fail a run.
#[derive(Debug, thiserror::Error)]
pub enum CollectiveError {
    #[error("Agent already registered: {0}")]
    RegistrationConflict(AgentName),

    #[error("Invalid agent definition: {0}")]
    InvalidAgent(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CollectiveError>;
