//! Run events and their delivery.
//!
//! Every run gets its own bounded broadcast channel. The run's driver task
//! is the only producer, so events of one run are totally ordered by their
//! `seq`. Emission never waits for subscribers: a subscriber that falls
//! behind loses the oldest events and sees `RecvError::Lagged`.
//!
//! Subscribers only see events emitted after they subscribed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};

use crate::agents::FinalAnswer;
use crate::workflow::{RunError, RunId};

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    RunStarted {
        query: String,
        root: String,
    },
    TurnStarted {
        turn: u32,
        agent: String,
    },
    ToolCalled {
        turn: u32,
        agent: String,
        tool: String,
        attempts: u32,
        latency_ms: u64,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Handoff {
        turn: u32,
        from: String,
        to: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    RunCompleted {
        turns: u32,
        result: FinalAnswer,
    },
    RunFailed {
        turns: u32,
        error: RunError,
    },
    RunCancelled {
        turns: u32,
    },
}

impl EventKind {
    /// SSE event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            EventKind::RunStarted { .. } => "run_started",
            EventKind::TurnStarted { .. } => "turn_started",
            EventKind::ToolCalled { .. } => "tool_called",
            EventKind::Handoff { .. } => "handoff",
            EventKind::RunCompleted { .. } => "run_completed",
            EventKind::RunFailed { .. } => "run_failed",
            EventKind::RunCancelled { .. } => "run_cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::RunCompleted { .. } | EventKind::RunFailed { .. } | EventKind::RunCancelled { .. }
        )
    }
}

/// An event as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: RunId,
    /// Per-run sequence number, starting at 1
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Producer handle for one run.
#[derive(Clone)]
pub struct RunEmitter {
    run_id: RunId,
    tx: broadcast::Sender<RunEvent>,
    seq: Arc<AtomicU64>,
}

impl RunEmitter {
    /// Emitter with no sink behind it; events only go to direct subscribers.
    pub fn detached(run_id: RunId, buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self {
            run_id,
            tx,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Stamp and broadcast an event. Never blocks.
    pub fn emit(&self, kind: EventKind) -> RunEvent {
        let event = RunEvent {
            run_id: self.run_id,
            seq: self.seq.fetch_add(1, Ordering::SeqCst) + 1,
            timestamp: Utc::now(),
            kind,
        };
        tracing::trace!("run {} event #{} {}", self.run_id, event.seq, event.kind.event_name());
        // No receivers is fine; nobody is watching this run.
        let _ = self.tx.send(event.clone());
        event
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }

    /// Number of events emitted so far.
    pub fn emitted(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }
}

/// Routes run events to external subscribers.
pub struct EventSink {
    channels: RwLock<HashMap<RunId, RunEmitter>>,
    buffer: usize,
}

impl EventSink {
    pub fn new(buffer: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// Create the channel for a new run.
    pub async fn open(&self, run_id: RunId) -> RunEmitter {
        let emitter = RunEmitter::detached(run_id, self.buffer);
        self.channels.write().await.insert(run_id, emitter.clone());
        emitter
    }

    /// Subscribe to a run's future events. `None` once the run is evicted.
    pub async fn subscribe(&self, run_id: RunId) -> Option<broadcast::Receiver<RunEvent>> {
        self.channels.read().await.get(&run_id).map(RunEmitter::subscribe)
    }

    /// Drop the channel. Subscribers drain what they have, then see `Closed`
    /// once the driver's emitter is gone too.
    pub async fn close(&self, run_id: RunId) {
        self.channels.write().await.remove(&run_id);
    }

    pub async fn open_channels(&self) -> usize {
        self.channels.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    fn turn(n: u32) -> EventKind {
        EventKind::TurnStarted {
            turn: n,
            agent: "research".to_string(),
        }
    }

    #[tokio::test]
    async fn test_sequence_numbers_are_gapless() {
        let sink = EventSink::new(16);
        let run_id = RunId::new();
        let emitter = sink.open(run_id).await;
        let mut rx = sink.subscribe(run_id).await.unwrap();

        for n in 1..=3 {
            emitter.emit(turn(n));
        }

        for expected in 1..=3u64 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.seq, expected);
            assert_eq!(event.run_id, run_id);
        }
        assert_eq!(emitter.emitted(), 3);
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_only_later_events() {
        let sink = EventSink::new(16);
        let run_id = RunId::new();
        let emitter = sink.open(run_id).await;

        emitter.emit(turn(1));
        let mut late = sink.subscribe(run_id).await.unwrap();
        emitter.emit(turn(2));

        let event = late.recv().await.unwrap();
        assert_eq!(event.kind, turn(2));
        assert_eq!(event.seq, 2);
        assert!(matches!(late.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags_instead_of_blocking() {
        let sink = EventSink::new(2);
        let run_id = RunId::new();
        let emitter = sink.open(run_id).await;
        let mut rx = sink.subscribe(run_id).await.unwrap();

        for n in 1..=5 {
            emitter.emit(turn(n));
        }

        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(3))));
        assert_eq!(rx.recv().await.unwrap().seq, 4);
        assert_eq!(rx.recv().await.unwrap().seq, 5);
    }

    #[tokio::test]
    async fn test_close_removes_channel() {
        let sink = EventSink::new(4);
        let run_id = RunId::new();
        let _emitter = sink.open(run_id).await;
        assert_eq!(sink.open_channels().await, 1);

        sink.close(run_id).await;
        assert!(sink.subscribe(run_id).await.is_none());
        assert_eq!(sink.open_channels().await, 0);
    }

    #[test]
    fn test_event_serialization_shape() {
        let event = RunEvent {
            run_id: RunId::new(),
            seq: 7,
            timestamp: Utc::now(),
            kind: EventKind::Handoff {
                turn: 2,
                from: "research".to_string(),
                to: "web_search".to_string(),
                note: None,
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "handoff");
        assert_eq!(value["seq"], 7);
        assert_eq!(value["from"], "research");
        assert!(value.get("note").is_none());
        assert!(EventKind::RunCancelled { turns: 1 }.is_terminal());
        assert!(!turn(1).is_terminal());
    }
}
