//! The per-run driver task.
//!
//! # Invariants
//! - The driver is the only writer of the run's state and the only producer
//!   of its events.
//! - A delta is applied only after its turn finished in time and the run was
//!   not cancelled meanwhile.
//! - Nothing is emitted after the terminal event.
//! - A panicking agent fails the run; the driver always reaches `finish`.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::{RunError, RunPhase, TurnRecord};
use crate::agents::{AgentGraph, FinalAnswer, TurnContext, TurnOutcome};
use crate::config::CancelMode;
use crate::events::{EventKind, RunEmitter};
use crate::session::{RunHandle, RunRegistry};
use crate::state::{SharedRunState, StateDelta};
use crate::tools::ToolPolicy;

/// Limits a run is driven under.
#[derive(Debug, Clone)]
pub(crate) struct RunLimits {
    pub max_turns: u32,
    pub turn_timeout: Duration,
    pub cancel_mode: CancelMode,
    pub tool_policy: ToolPolicy,
}

pub(crate) struct RunDriver {
    pub handle: Arc<RunHandle>,
    pub graph: Arc<AgentGraph>,
    pub emitter: RunEmitter,
    pub registry: Arc<RunRegistry>,
    pub limits: RunLimits,
    pub query: String,
    pub initial_state: Map<String, Value>,
}

impl RunDriver {
    /// Drive the run to a terminal state and publish it.
    pub async fn run(self) {
        let started = Instant::now();
        let run_id = self.handle.id();
        tracing::info!("Run {} started: {:?}", run_id, self.query);

        let outcome = self.drive(started).await;
        let status = self.handle.finish(outcome);
        let turns = status.turns;

        match (&status.result, &status.error) {
            (Some(result), _) => {
                tracing::info!("Run {} completed after {} turn(s)", run_id, turns);
                self.emitter.emit(EventKind::RunCompleted {
                    turns,
                    result: result.clone(),
                });
            }
            (None, Some(RunError::Cancelled)) => {
                tracing::info!("Run {} cancelled after {} turn(s)", run_id, turns);
                self.emitter.emit(EventKind::RunCancelled { turns });
            }
            (None, Some(error)) => {
                tracing::warn!("Run {} failed after {} turn(s): {}", run_id, turns, error);
                self.emitter.emit(EventKind::RunFailed {
                    turns,
                    error: error.clone(),
                });
            }
            (None, None) => {
                tracing::error!("Run {} ended without a result or an error", run_id);
            }
        }

        self.registry.record_finished(&status, started.elapsed());
    }

    async fn drive(&self, started: Instant) -> Result<FinalAnswer, RunError> {
        let run_cancel = self.handle.cancel_token().clone();
        let mut agent_name = self.graph.root().to_string();

        self.handle.set_phase(RunPhase::Running {
            agent: agent_name.clone(),
        });
        self.emitter.emit(EventKind::RunStarted {
            query: self.query.clone(),
            root: agent_name.clone(),
        });

        let mut state = SharedRunState::new(self.graph.schema().clone());
        state.seed(&self.initial_state).map_err(RunError::StateConflict)?;

        let mut turn: u32 = 0;
        loop {
            if run_cancel.is_cancelled() {
                return Err(RunError::Cancelled);
            }
            if turn >= self.limits.max_turns {
                return Err(RunError::BudgetExceeded {
                    turns: turn,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
            }
            turn += 1;

            let Some(agent) = self.graph.agent(&agent_name).cloned() else {
                return Err(RunError::AgentFailed {
                    agent: agent_name,
                    message: "agent is not part of the workflow".to_string(),
                });
            };

            self.handle.begin_turn(turn);
            self.emitter.emit(EventKind::TurnStarted {
                turn,
                agent: agent_name.clone(),
            });
            tracing::debug!("Run {} turn {} -> {}", self.handle.id(), turn, agent_name);

            // In wait mode tool calls run to completion even after a cancel.
            let tool_cancel = match self.limits.cancel_mode {
                CancelMode::Abandon => run_cancel.child_token(),
                CancelMode::Wait => CancellationToken::new(),
            };
            let ctx = TurnContext::new(
                self.handle.id(),
                self.query.clone(),
                turn,
                agent_name.clone(),
                state.snapshot(),
                self.graph.bind_tools(&agent_name, &self.limits.tool_policy),
                tool_cancel,
                run_cancel.clone(),
                self.emitter.clone(),
            );

            let turn_started = Instant::now();
            let guarded = AssertUnwindSafe(agent.take_turn(&ctx)).catch_unwind();
            let timed = match self.limits.cancel_mode {
                CancelMode::Abandon => {
                    tokio::select! {
                        biased;
                        _ = run_cancel.cancelled() => return Err(RunError::Cancelled),
                        timed = tokio::time::timeout(self.limits.turn_timeout, guarded) => timed,
                    }
                }
                CancelMode::Wait => tokio::time::timeout(self.limits.turn_timeout, guarded).await,
            };
            let duration = turn_started.elapsed();

            let outcome = match timed {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(panic)) => {
                    tracing::error!(
                        "Run {} agent {} panicked on turn {}: {}",
                        self.handle.id(),
                        agent_name,
                        turn,
                        panic_message(panic.as_ref())
                    );
                    return Err(RunError::AgentFailed {
                        agent: agent_name,
                        message: "agent panicked".to_string(),
                    });
                }
                Err(_) => {
                    return Err(RunError::TurnTimeout {
                        turn,
                        agent: agent_name,
                        elapsed_ms: duration.as_millis() as u64,
                    })
                }
            };
            if run_cancel.is_cancelled() {
                tracing::debug!("Run {} discarding turn {} after cancel", self.handle.id(), turn);
                return Err(RunError::Cancelled);
            }

            self.handle.record_turn(TurnRecord {
                turn,
                agent: agent_name.clone(),
                outcome: outcome.label().to_string(),
                tool_calls: ctx.tool_calls(),
                duration_ms: duration.as_millis() as u64,
            });

            let descriptor = agent.descriptor();
            match outcome {
                TurnOutcome::Continue(delta) => {
                    apply(&mut state, turn, &agent_name, delta)?;
                }
                TurnOutcome::HandOff { target, delta, note } => {
                    if !descriptor.can_handoff_to(&target) || !self.graph.contains(&target) {
                        return Err(RunError::InvalidHandoff {
                            from: agent_name,
                            to: target,
                        });
                    }
                    apply(&mut state, turn, &agent_name, delta)?;
                    self.emitter.emit(EventKind::Handoff {
                        turn,
                        from: agent_name.clone(),
                        to: target.clone(),
                        note,
                    });
                    self.handle.set_phase(RunPhase::Running {
                        agent: target.clone(),
                    });
                    agent_name = target;
                }
                TurnOutcome::Complete { delta, result } => {
                    if !descriptor.terminal {
                        return Err(RunError::IllegalCompletion { agent: agent_name });
                    }
                    apply(&mut state, turn, &agent_name, delta)?;
                    return Ok(result);
                }
                TurnOutcome::Fail(error) => {
                    return Err(RunError::AgentFailed {
                        agent: agent_name,
                        message: error.to_string(),
                    });
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

fn apply(state: &mut SharedRunState, turn: u32, agent: &str, delta: StateDelta) -> Result<(), RunError> {
    state
        .apply_delta(turn, agent, delta)
        .map_err(RunError::StateConflict)
}
