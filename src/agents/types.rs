//! Core types for the agent system.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::{SlotDecl, StateDelta};
use crate::tools::ToolError;

/// Static description of an agent, validated when a graph is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Unique within a graph
    pub name: String,
    pub description: String,
    /// Tools the agent may call, in preference order
    pub tools: Vec<String>,
    /// Agents control may be handed to
    pub can_handoff_to: Vec<String>,
    /// Slots this agent alone may write
    pub owned_slots: Vec<SlotDecl>,
    /// Whether the agent may finish the run
    pub terminal: bool,
}

impl AgentDescriptor {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            tools: Vec::new(),
            can_handoff_to: Vec::new(),
            owned_slots: Vec::new(),
            terminal: false,
        }
    }

    pub fn with_tools(mut self, tools: &[&str]) -> Self {
        self.tools = tools.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_handoffs(mut self, targets: &[&str]) -> Self {
        self.can_handoff_to = targets.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_slots(mut self, slots: Vec<SlotDecl>) -> Self {
        self.owned_slots = slots;
        self
    }

    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }

    pub fn can_handoff_to(&self, target: &str) -> bool {
        self.can_handoff_to.iter().any(|t| t == target)
    }

    pub fn is_bound_to(&self, tool: &str) -> bool {
        self.tools.iter().any(|t| t == tool)
    }
}

/// The synthesized answer of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub content: String,
    pub confidence: f64,
    #[serde(default)]
    pub key_insights: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub sources_analyzed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

impl FinalAnswer {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
}

/// Error an agent reports for its turn.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AgentError {
    #[error("tool {tool} failed: {error}")]
    Tool { tool: String, error: ToolError },

    /// Shared state did not have the expected shape.
    #[error("unexpected state in slot {slot}: {message}")]
    InvalidState { slot: String, message: String },

    #[error("{0}")]
    Other(String),
}

/// What an agent wants to happen after its turn.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Apply the delta and give the same agent another turn.
    Continue(StateDelta),
    /// Apply the delta and pass control to `target`.
    HandOff {
        target: String,
        delta: StateDelta,
        note: Option<String>,
    },
    /// Apply the delta and finish the run. Terminal agents only.
    Complete { delta: StateDelta, result: FinalAnswer },
    /// Give up; the run fails and the delta-less turn leaves no trace in state.
    Fail(AgentError),
}

impl TurnOutcome {
    pub fn handoff(target: &str, delta: StateDelta) -> Self {
        TurnOutcome::HandOff {
            target: target.to_string(),
            delta,
            note: None,
        }
    }

    pub fn complete(delta: StateDelta, result: FinalAnswer) -> Self {
        TurnOutcome::Complete { delta, result }
    }

    /// Short label for logs and turn history.
    pub fn label(&self) -> &'static str {
        match self {
            TurnOutcome::Continue(_) => "continue",
            TurnOutcome::HandOff { .. } => "handoff",
            TurnOutcome::Complete { .. } => "complete",
            TurnOutcome::Fail(_) => "fail",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_builder() {
        let descriptor = AgentDescriptor::new("synthesis", "writes the answer")
            .with_tools(&["synthesize"])
            .with_slots(vec![SlotDecl::scalar("synthesis_complete")])
            .terminal();

        assert!(descriptor.terminal);
        assert!(descriptor.is_bound_to("synthesize"));
        assert!(!descriptor.is_bound_to("web_search"));
        assert!(!descriptor.can_handoff_to("research"));
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(TurnOutcome::Continue(StateDelta::new()).label(), "continue");
        assert_eq!(TurnOutcome::handoff("b", StateDelta::new()).label(), "handoff");
        assert_eq!(
            TurnOutcome::complete(StateDelta::new(), FinalAnswer::new("done")).label(),
            "complete"
        );
    }
}
