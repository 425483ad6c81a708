//! Per-turn execution context handed to an agent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::events::{EventKind, RunEmitter};
use crate::state::StateSnapshot;
use crate::tools::{ToolAdapter, ToolError, ToolInvocation};
use crate::workflow::RunId;

/// Everything an agent may look at or call during one turn.
///
/// # Invariants
/// - `state` is the snapshot taken right before the turn began.
/// - Only tools bound to the agent are reachable through [`invoke`](Self::invoke).
/// - Once the run is cancelled no new tool call starts and no event is emitted.
pub struct TurnContext {
    pub run_id: RunId,
    pub query: String,
    /// 1-based turn number within the run
    pub turn: u32,
    pub agent: String,
    pub state: StateSnapshot,
    tools: HashMap<String, ToolAdapter>,
    /// Cancels in-flight tool calls
    cancel: CancellationToken,
    /// Cancelled when the run is
    run_cancel: CancellationToken,
    emitter: RunEmitter,
    tool_calls: AtomicU32,
}

impl TurnContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_id: RunId,
        query: String,
        turn: u32,
        agent: String,
        state: StateSnapshot,
        tools: HashMap<String, ToolAdapter>,
        cancel: CancellationToken,
        run_cancel: CancellationToken,
        emitter: RunEmitter,
    ) -> Self {
        Self {
            run_id,
            query,
            turn,
            agent,
            state,
            tools,
            cancel,
            run_cancel,
            emitter,
            tool_calls: AtomicU32::new(0),
        }
    }

    /// Call a bound tool and report the call as a `tool_called` event.
    ///
    /// Unbound tool names fail with `InvalidArguments` without reaching any tool.
    /// After the run is cancelled every call fails with `Cancelled` right away.
    pub async fn invoke(&self, tool: &str, args: Value) -> ToolInvocation {
        if self.run_cancel.is_cancelled() {
            return ToolInvocation {
                tool: tool.to_string(),
                arguments: args,
                outcome: Err(ToolError::Cancelled),
                attempts: 0,
                latency: std::time::Duration::ZERO,
            };
        }
        self.tool_calls.fetch_add(1, Ordering::SeqCst);

        let invocation = match self.tools.get(tool) {
            Some(adapter) => adapter.invoke(args, &self.cancel).await,
            None => ToolInvocation {
                tool: tool.to_string(),
                arguments: args,
                outcome: Err(ToolError::InvalidArguments(format!(
                    "tool {} is not bound to agent {}",
                    tool, self.agent
                ))),
                attempts: 0,
                latency: std::time::Duration::ZERO,
            },
        };

        // A cancelled run reports nothing more.
        let cancelled =
            self.run_cancel.is_cancelled() || matches!(invocation.outcome, Err(ToolError::Cancelled));
        if !cancelled {
            self.emitter.emit(EventKind::ToolCalled {
                turn: self.turn,
                agent: self.agent.clone(),
                tool: invocation.tool.clone(),
                attempts: invocation.attempts,
                latency_ms: invocation.latency.as_millis() as u64,
                ok: invocation.is_ok(),
                error: invocation.outcome.as_ref().err().map(|e| e.to_string()),
            });
        }

        invocation
    }

    /// Tool calls made so far in this turn.
    pub fn tool_calls(&self) -> u32 {
        self.tool_calls.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.run_cancel.is_cancelled() || self.cancel.is_cancelled()
    }
}

#[cfg(test)]
impl TurnContext {
    /// Context for driving a single agent of `graph` by hand.
    pub(crate) fn for_test(
        graph: &crate::agents::AgentGraph,
        agent: &str,
        query: &str,
        turn: u32,
        state: StateSnapshot,
    ) -> Self {
        let run_id = RunId::new();
        Self::new(
            run_id,
            query.to_string(),
            turn,
            agent.to_string(),
            state,
            graph.bind_tools(agent, &crate::tools::ToolPolicy::default()),
            CancellationToken::new(),
            CancellationToken::new(),
            RunEmitter::detached(run_id, 64),
        )
    }
}
