//! Entry point for running workflows.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::run::{RunDriver, RunLimits};
use super::{RunId, RunRequest, RunStatus, SubmitError};
use crate::agents::WorkflowFactory;
use crate::config::Config;
use crate::events::{EventSink, RunEvent};
use crate::session::{CancelOutcome, RunHandle, RunRegistry};
use crate::tools::ToolPolicy;

/// Accepts queries, starts one driver task per run, and answers status,
/// cancellation and eviction requests.
///
/// Holds no global state; create one per service and share it behind an `Arc`.
pub struct Orchestrator {
    config: Config,
    factory: Arc<dyn WorkflowFactory>,
    registry: Arc<RunRegistry>,
    sink: Arc<EventSink>,
}

impl Orchestrator {
    pub fn new(config: Config, factory: Arc<dyn WorkflowFactory>) -> Self {
        let registry = Arc::new(RunRegistry::new(config.max_concurrent_runs, config.run_retention));
        let sink = Arc::new(EventSink::new(config.event_buffer));
        Self {
            config,
            factory,
            registry,
            sink,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn factory(&self) -> &Arc<dyn WorkflowFactory> {
        &self.factory
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    pub fn sink(&self) -> &Arc<EventSink> {
        &self.sink
    }

    /// Start a run and return immediately.
    pub async fn submit(&self, request: RunRequest) -> Result<Arc<RunHandle>, SubmitError> {
        self.start(request).await.map(|(handle, _)| handle)
    }

    /// Start a run with a subscription that sees every one of its events.
    pub async fn submit_watched(
        &self,
        request: RunRequest,
    ) -> Result<(Arc<RunHandle>, broadcast::Receiver<RunEvent>), SubmitError> {
        self.start(request).await
    }

    /// Start a run and wait for its terminal status.
    pub async fn submit_and_wait(&self, request: RunRequest) -> Result<RunStatus, SubmitError> {
        let handle = self.submit(request).await?;
        Ok(handle.wait().await)
    }

    pub async fn status(&self, id: RunId) -> Option<RunStatus> {
        self.registry.status(id).await
    }

    pub async fn cancel(&self, id: RunId) -> CancelOutcome {
        let outcome = self.registry.cancel(id).await;
        tracing::info!("Cancel requested for run {}: {:?}", id, outcome);
        outcome
    }

    /// Cancel everything still running, e.g. on shutdown.
    pub async fn cancel_all(&self) -> usize {
        let cancelled = self.registry.cancel_all().await;
        if cancelled > 0 {
            tracing::info!("Cancelled {} in-flight run(s)", cancelled);
        }
        cancelled
    }

    /// Evict expired runs and close their event channels.
    pub async fn evict_expired(&self) -> usize {
        let evicted = self.registry.evict_expired().await;
        for id in &evicted {
            self.sink.close(*id).await;
        }
        evicted.len()
    }

    /// Periodically evict expired runs.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                orchestrator.evict_expired().await;
            }
        })
    }

    async fn start(
        &self,
        request: RunRequest,
    ) -> Result<(Arc<RunHandle>, broadcast::Receiver<RunEvent>), SubmitError> {
        let query = request.query.trim().to_string();
        if query.is_empty() {
            return Err(SubmitError::InvalidRequest("query must not be empty".to_string()));
        }

        let graph = self
            .factory
            .build(&request.overrides)
            .map_err(|e| SubmitError::InvalidConfiguration(e.to_string()))?;

        let handle = self.registry.admit(&query).await?;
        let emitter = self.sink.open(handle.id()).await;
        let events = emitter.subscribe();

        let driver = RunDriver {
            handle: Arc::clone(&handle),
            graph,
            emitter,
            registry: Arc::clone(&self.registry),
            limits: RunLimits {
                max_turns: self.config.max_turns_per_run,
                turn_timeout: self.config.turn_timeout,
                cancel_mode: self.config.cancel_mode,
                tool_policy: ToolPolicy::from_config(&self.config),
            },
            query,
            initial_state: request.initial_state,
        };
        tokio::spawn(driver.run());

        Ok((handle, events))
    }
}
