//! Agents module - the cooperating units of a workflow.
//!
//! # Agent Types
//! - **ResearchAgent**: gathers findings from the research tools (root by default)
//! - **WebSearchAgent**: collects scored web results, may hand back to research once
//! - **SynthesisAgent**: terminal; turns everything into the final answer
//!
//! # Turn Protocol
//! An agent never touches shared state. Each turn it reads a snapshot, calls
//! tools through its [`TurnContext`], and returns a [`TurnOutcome`] carrying a
//! [`StateDelta`](crate::state::StateDelta). The orchestrator validates and
//! applies the delta and decides what runs next.

mod context;
mod factory;
mod graph;
mod research;
mod synthesis;
mod types;
mod web_search;

pub use context::TurnContext;
pub use factory::{ConciergeWorkflow, FixedWorkflow, WorkflowBuildError, WorkflowFactory};
pub use graph::{AgentGraph, AgentRef, GraphError};
pub use research::ResearchAgent;
pub use synthesis::SynthesisAgent;
pub use types::{AgentDescriptor, AgentError, FinalAnswer, TurnOutcome};
pub use web_search::WebSearchAgent;

use async_trait::async_trait;

/// Agent names of the default workflow.
pub const RESEARCH_AGENT: &str = "research";
pub const WEB_SEARCH_AGENT: &str = "web_search";
pub const SYNTHESIS_AGENT: &str = "synthesis";

/// Slots of the default workflow.
pub mod slots {
    pub const RESEARCH_RESULTS: &str = "research_results";
    pub const RESEARCH_PASSES: &str = "research_passes";
    pub const SEARCH_RESULTS: &str = "search_results";
    pub const SEARCH_PASSES: &str = "search_passes";
    pub const SEARCH_BACKTRACKED: &str = "search_backtracked";
    pub const SYNTHESIS_RESULT: &str = "synthesis_result";
    pub const SYNTHESIS_COMPLETE: &str = "synthesis_complete";
}

/// Base trait for all agents.
///
/// # Invariants
/// - `take_turn()` never panics; failures are returned as `TurnOutcome::Fail`
/// - `take_turn()` only changes state through the returned delta
/// - Only agents whose descriptor is terminal return `TurnOutcome::Complete`
#[async_trait]
pub trait Agent: Send + Sync {
    /// Name, bound tools, handoff targets and owned slots.
    fn descriptor(&self) -> &AgentDescriptor;

    /// Run one turn.
    ///
    /// # Preconditions
    /// - `ctx.state` is the latest committed state of the run
    ///
    /// # Postconditions
    /// - A `HandOff` target is one of `descriptor().can_handoff_to`
    async fn take_turn(&self, ctx: &TurnContext) -> TurnOutcome;
}
