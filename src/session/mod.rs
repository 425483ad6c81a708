//! Run session registry: in-flight runs, admission control, cancellation, metrics.
//!
//! # Invariants
//! - Admission and insertion happen under one write lock, so the number of
//!   non-terminal runs never exceeds `max_concurrent_runs`.
//! - A rejected submission leaves no trace besides the `rejected` counter.
//! - Terminal runs stay queryable for the retention window, then are evicted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;

use crate::agents::FinalAnswer;
use crate::util::round3;
use crate::workflow::{RunError, RunId, RunPhase, RunStatus, SubmitError, TurnRecord};

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    Accepted,
    AlreadyTerminal,
    NotFound,
}

/// Live handle on one run.
///
/// The status lives in a watch channel: the driver writes it, everyone else
/// reads or waits on it. Cancellation and the terminal transition both go
/// through the channel's lock, which orders them.
pub struct RunHandle {
    id: RunId,
    status: watch::Sender<RunStatus>,
    cancel: CancellationToken,
    started: Instant,
    finished: OnceLock<Instant>,
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.status.borrow();
        f.debug_struct("RunHandle")
            .field("id", &self.id)
            .field("phase", &status.phase)
            .field("turns", &status.turns)
            .field("cancel_requested", &status.cancel_requested)
            .finish()
    }
}

impl RunHandle {
    pub fn new(id: RunId, query: &str) -> Self {
        let (status, _) = watch::channel(RunStatus::new(id, query));
        Self {
            id,
            status,
            cancel: CancellationToken::new(),
            started: Instant::now(),
            finished: OnceLock::new(),
        }
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn status(&self) -> RunStatus {
        self.status.borrow().clone()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.borrow().is_terminal()
    }

    pub fn watch(&self) -> watch::Receiver<RunStatus> {
        self.status.subscribe()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Wait until the run is terminal.
    pub async fn wait(&self) -> RunStatus {
        let mut rx = self.status.subscribe();
        let result = rx.wait_for(|s| s.is_terminal()).await.map(|s| s.clone());
        // The sender lives in `self`, so the channel cannot close under us.
        result.unwrap_or_else(|_| self.status())
    }

    /// Ask the run to stop. Idempotent while the run is live.
    pub fn request_cancel(&self) -> CancelOutcome {
        let mut outcome = CancelOutcome::AlreadyTerminal;
        self.status.send_if_modified(|s| {
            if s.is_terminal() {
                return false;
            }
            outcome = CancelOutcome::Accepted;
            if s.cancel_requested {
                return false;
            }
            s.cancel_requested = true;
            true
        });
        if outcome == CancelOutcome::Accepted {
            self.cancel.cancel();
        }
        outcome
    }

    pub(crate) fn set_phase(&self, phase: RunPhase) {
        self.status.send_if_modified(|s| {
            if s.is_terminal() || s.phase == phase {
                return false;
            }
            s.phase = phase;
            true
        });
    }

    pub(crate) fn begin_turn(&self, turn: u32) {
        self.status.send_modify(|s| s.turns = turn);
    }

    pub(crate) fn record_turn(&self, record: TurnRecord) {
        self.status.send_modify(|s| s.turn_log.push(record));
    }

    /// Move to the terminal phase. A pending cancellation overrides `outcome`.
    pub(crate) fn finish(&self, outcome: Result<FinalAnswer, RunError>) -> RunStatus {
        self.status.send_if_modified(move |s| {
            if s.is_terminal() {
                return false;
            }
            let outcome = if s.cancel_requested {
                Err(RunError::Cancelled)
            } else {
                outcome
            };
            match outcome {
                Ok(result) => {
                    s.phase = RunPhase::Completed;
                    s.result = Some(result);
                }
                Err(RunError::Cancelled) => {
                    s.phase = RunPhase::Cancelled;
                    s.error = Some(RunError::Cancelled);
                }
                Err(error) => {
                    s.phase = RunPhase::Failed;
                    s.error = Some(error);
                }
            }
            s.finished_at = Some(Utc::now());
            true
        });
        let _ = self.finished.set(Instant::now());
        self.status()
    }

    /// Time since submission, frozen once terminal.
    pub fn elapsed(&self) -> Duration {
        match self.finished.get() {
            Some(end) => end.duration_since(self.started),
            None => self.started.elapsed(),
        }
    }

    fn expired(&self, retention: Duration) -> bool {
        self.finished
            .get()
            .map(|end| end.elapsed() >= retention)
            .unwrap_or(false)
    }
}

/// Aggregated run metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub submitted: u64,
    pub rejected: u64,
    pub active: usize,
    pub retained: usize,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Completed share of finished runs, 0.0 to 1.0
    pub success_rate: f64,
    pub average_duration_ms: f64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    total_duration_ms: AtomicU64,
}

/// Tracks runs by id.
pub struct RunRegistry {
    runs: RwLock<HashMap<RunId, Arc<RunHandle>>>,
    max_concurrent_runs: usize,
    retention: Duration,
    counters: Counters,
}

impl RunRegistry {
    pub fn new(max_concurrent_runs: usize, retention: Duration) -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            max_concurrent_runs,
            retention,
            counters: Counters::default(),
        }
    }

    /// Create and register a run, or refuse when the cap is reached.
    pub async fn admit(&self, query: &str) -> Result<Arc<RunHandle>, SubmitError> {
        let mut runs = self.runs.write().await;
        let active = runs.values().filter(|h| !h.is_terminal()).count();
        if active >= self.max_concurrent_runs {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                "Rejecting run: {} runs in flight (limit {})",
                active,
                self.max_concurrent_runs
            );
            return Err(SubmitError::Backpressure {
                limit: self.max_concurrent_runs,
            });
        }

        let handle = Arc::new(RunHandle::new(RunId::new(), query));
        runs.insert(handle.id(), Arc::clone(&handle));
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(handle)
    }

    pub async fn get(&self, id: RunId) -> Option<Arc<RunHandle>> {
        self.runs.read().await.get(&id).cloned()
    }

    pub async fn status(&self, id: RunId) -> Option<RunStatus> {
        self.get(id).await.map(|h| h.status())
    }

    /// All known runs, newest first.
    pub async fn list(&self) -> Vec<RunStatus> {
        let mut statuses: Vec<RunStatus> = self.runs.read().await.values().map(|h| h.status()).collect();
        statuses.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        statuses
    }

    pub async fn cancel(&self, id: RunId) -> CancelOutcome {
        match self.get(id).await {
            Some(handle) => handle.request_cancel(),
            None => CancelOutcome::NotFound,
        }
    }

    /// Cancel every live run. Returns how many accepted.
    pub async fn cancel_all(&self) -> usize {
        let handles: Vec<Arc<RunHandle>> = self.runs.read().await.values().cloned().collect();
        handles
            .iter()
            .filter(|h| h.request_cancel() == CancelOutcome::Accepted)
            .count()
    }

    /// Count a finished run in the metrics.
    pub(crate) fn record_finished(&self, status: &RunStatus, duration: Duration) {
        let counter = match status.phase {
            RunPhase::Completed => &self.counters.completed,
            RunPhase::Failed => &self.counters.failed,
            RunPhase::Cancelled => &self.counters.cancelled,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.counters
            .total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    /// Drop terminal runs older than the retention window.
    pub async fn evict_expired(&self) -> Vec<RunId> {
        let mut runs = self.runs.write().await;
        let expired: Vec<RunId> = runs
            .iter()
            .filter(|(_, h)| h.expired(self.retention))
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            runs.remove(id);
        }
        if !expired.is_empty() {
            tracing::debug!("Evicted {} expired run(s)", expired.len());
        }
        expired
    }

    pub async fn stats(&self) -> RegistryStats {
        let (active, retained) = {
            let runs = self.runs.read().await;
            let active = runs.values().filter(|h| !h.is_terminal()).count();
            (active, runs.len() - active)
        };
        let completed = self.counters.completed.load(Ordering::Relaxed);
        let failed = self.counters.failed.load(Ordering::Relaxed);
        let cancelled = self.counters.cancelled.load(Ordering::Relaxed);
        let finished = completed + failed + cancelled;
        let (success_rate, average_duration_ms) = if finished == 0 {
            (0.0, 0.0)
        } else {
            let total = self.counters.total_duration_ms.load(Ordering::Relaxed) as f64;
            (
                round3(completed as f64 / finished as f64),
                round3(total / finished as f64),
            )
        };
        RegistryStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            active,
            retained,
            completed,
            failed,
            cancelled,
            success_rate,
            average_duration_ms,
        }
    }

    pub fn max_concurrent_runs(&self) -> usize {
        self.max_concurrent_runs
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_admission_cap() {
        let registry = RunRegistry::new(2, Duration::from_secs(60));
        let a = registry.admit("a").await.unwrap();
        let _b = registry.admit("b").await.unwrap();

        let err = registry.admit("c").await.unwrap_err();
        assert_eq!(err, SubmitError::Backpressure { limit: 2 });
        assert_eq!(registry.list().await.len(), 2);

        a.finish(Ok(FinalAnswer::new("done")));
        assert!(registry.admit("c").await.is_ok());

        let stats = registry.stats().await;
        assert_eq!(stats.submitted, 3);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.active, 2);
    }

    #[tokio::test]
    async fn test_handle_debug_shows_id_and_phase() {
        let registry = RunRegistry::new(1, Duration::from_secs(60));
        let handle = registry.admit("q").await.unwrap();
        let rendered = format!("{:?}", handle);
        assert!(rendered.contains(&handle.id().to_string()));
        assert!(rendered.contains("Pending"));

        let rejected = registry.admit("r").await;
        assert!(matches!(rejected, Err(SubmitError::Backpressure { limit: 1 })));
    }

    #[tokio::test]
    async fn test_cancel_outcomes() {
        let registry = RunRegistry::new(4, Duration::from_secs(60));
        let handle = registry.admit("q").await.unwrap();

        assert_eq!(registry.cancel(handle.id()).await, CancelOutcome::Accepted);
        assert!(handle.cancel_token().is_cancelled());
        assert!(handle.status().cancel_requested);
        // Still live until the driver notices.
        assert_eq!(registry.cancel(handle.id()).await, CancelOutcome::Accepted);

        let status = handle.finish(Ok(FinalAnswer::new("too late")));
        assert_eq!(status.phase, RunPhase::Cancelled);
        assert_eq!(status.error, Some(RunError::Cancelled));
        assert!(status.result.is_none());

        assert_eq!(registry.cancel(handle.id()).await, CancelOutcome::AlreadyTerminal);
        assert_eq!(registry.cancel(RunId::new()).await, CancelOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_terminal_status_is_immutable() {
        let handle = RunHandle::new(RunId::new(), "q");
        let first = handle.finish(Err(RunError::IllegalCompletion {
            agent: "a".to_string(),
        }));
        let second = handle.finish(Ok(FinalAnswer::new("late")));
        assert_eq!(first, second);
        assert_eq!(second.phase, RunPhase::Failed);
        assert_eq!(handle.request_cancel(), CancelOutcome::AlreadyTerminal);
        handle.set_phase(RunPhase::Running {
            agent: "b".to_string(),
        });
        assert_eq!(handle.status().phase, RunPhase::Failed);
    }

    #[tokio::test]
    async fn test_wait_returns_terminal_status() {
        let handle = Arc::new(RunHandle::new(RunId::new(), "q"));
        let waiter = {
            let handle = Arc::clone(&handle);
            tokio::spawn(async move { handle.wait().await })
        };
        tokio::task::yield_now().await;
        handle.finish(Ok(FinalAnswer::new("R1")));

        let status = waiter.await.unwrap();
        assert_eq!(status.result.unwrap().content, "R1");
    }

    #[tokio::test]
    async fn test_eviction_and_stats() {
        let registry = RunRegistry::new(4, Duration::ZERO);
        let done = registry.admit("done").await.unwrap();
        let live = registry.admit("live").await.unwrap();

        let status = done.finish(Ok(FinalAnswer::new("ok")));
        registry.record_finished(&status, Duration::from_millis(40));

        let evicted = registry.evict_expired().await;
        assert_eq!(evicted, vec![done.id()]);
        assert!(registry.status(done.id()).await.is_none());
        assert!(registry.status(live.id()).await.is_some());

        let stats = registry.stats().await;
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.success_rate, 1.0);
        assert_eq!(stats.average_duration_ms, 40.0);
        assert_eq!(stats.active, 1);
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let registry = RunRegistry::new(4, Duration::from_secs(60));
        let a = registry.admit("a").await.unwrap();
        let b = registry.admit("b").await.unwrap();
        b.finish(Err(RunError::Cancelled));

        assert_eq!(registry.cancel_all().await, 1);
        assert!(a.cancel_token().is_cancelled());
    }
}
