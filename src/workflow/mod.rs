//! Workflow engine: runs, their lifecycle, and the orchestrator that drives them.
//!
//! # Run Lifecycle
//! ```text
//! Pending ─► Running(root) ─┬─► Running(same)   (Continue)
//!                           ├─► Running(other)  (HandOff)
//!                           └─► Completed | Failed | Cancelled
//! ```
//!
//! # Invariants
//! - Turns of a run are numbered 1, 2, 3, ... and never overlap.
//! - A terminal run carries exactly one of `result` / `error` and never changes again.
//! - A cancellation accepted before the terminal transition always wins.

mod orchestrator;
mod run;

pub use orchestrator::Orchestrator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::agents::FinalAnswer;
use crate::config::WorkflowOverrides;
use crate::state::StateConflict;

/// Identifier of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunPhase {
    Pending,
    Running { agent: String },
    Completed,
    Failed,
    Cancelled,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::Failed | RunPhase::Cancelled)
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunPhase::Pending => "pending",
            RunPhase::Running { .. } => "running",
            RunPhase::Completed => "completed",
            RunPhase::Failed => "failed",
            RunPhase::Cancelled => "cancelled",
        }
    }
}

/// Why a run did not complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunError {
    #[error("turn budget exhausted after {turns} turns ({elapsed_ms} ms)")]
    BudgetExceeded { turns: u32, elapsed_ms: u64 },

    #[error("turn {turn} of agent {agent} timed out after {elapsed_ms} ms")]
    TurnTimeout {
        turn: u32,
        agent: String,
        elapsed_ms: u64,
    },

    #[error(transparent)]
    StateConflict(StateConflict),

    #[error("agent {agent} failed: {message}")]
    AgentFailed { agent: String, message: String },

    #[error("agent {from} may not hand off to {to}")]
    InvalidHandoff { from: String, to: String },

    #[error("agent {agent} is not terminal and cannot complete the run")]
    IllegalCompletion { agent: String },

    #[error("run was cancelled")]
    Cancelled,
}

impl RunError {
    /// Budget and timeout failures.
    pub fn is_limit(&self) -> bool {
        matches!(self, RunError::BudgetExceeded { .. } | RunError::TurnTimeout { .. })
    }
}

/// One finished turn, as shown in run status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn: u32,
    pub agent: String,
    /// `continue`, `handoff`, `complete` or `fail`
    pub outcome: String,
    pub tool_calls: u32,
    pub duration_ms: u64,
}

/// Point-in-time view of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub id: RunId,
    pub query: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub phase: RunPhase,
    /// Turns started so far
    pub turns: u32,
    pub cancel_requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<FinalAnswer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
    pub turn_log: Vec<TurnRecord>,
}

impl RunStatus {
    pub fn new(id: RunId, query: &str) -> Self {
        Self {
            id,
            query: query.to_string(),
            created_at: Utc::now(),
            finished_at: None,
            phase: RunPhase::Pending,
            turns: 0,
            cancel_requested: false,
            result: None,
            error: None,
            turn_log: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Agents that took at least one turn, in first-turn order.
    pub fn contributing_agents(&self) -> Vec<String> {
        let mut agents: Vec<String> = Vec::new();
        for record in &self.turn_log {
            if !agents.contains(&record.agent) {
                agents.push(record.agent.clone());
            }
        }
        agents
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.finished_at
            .map(|end| (end - self.created_at).num_milliseconds().max(0) as u64)
    }
}

/// A query plus its optional hints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequest {
    pub query: String,
    #[serde(flatten)]
    pub overrides: WorkflowOverrides,
    /// Initial values for state slots
    #[serde(default)]
    pub initial_state: serde_json::Map<String, serde_json::Value>,
}

impl RunRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// Submission was refused; no run exists.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubmitError {
    #[error("too many runs in flight (limit {limit})")]
    Backpressure { limit: usize },

    #[error("invalid workflow configuration: {0}")]
    InvalidConfiguration(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
