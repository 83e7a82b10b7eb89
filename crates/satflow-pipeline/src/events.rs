//! Run event system for observability.
//!
//! Emits [`EngineEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! observers (progress printers, tests) can follow a run without coupling to
//! the executor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Events emitted during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    RunStarted {
        task_count: usize,
        started_at: DateTime<Utc>,
    },
    TaskStarted {
        task: String,
        rule: String,
    },
    TaskSucceeded {
        task: String,
        duration_ms: u64,
    },
    TaskFailed {
        task: String,
        error: String,
    },
    TaskSkipped {
        task: String,
    },
    CheckpointReplanned {
        task: String,
        discovered: usize,
        new_tasks: usize,
    },
    TempRemoved {
        task: String,
        path: String,
    },
    RunFinished {
        succeeded: usize,
        failed: usize,
        skipped: usize,
        duration_ms: u64,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<EngineEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitter_sends_and_receives() {
        let emitter = EventEmitter::new(16);
        let mut rx = emitter.subscribe();

        emitter.emit(EngineEvent::TaskStarted {
            task: "srf[sample=S1]".into(),
            rule: "srf".into(),
        });

        match rx.recv().await.unwrap() {
            EngineEvent::TaskStarted { task, rule } => {
                assert_eq!(task, "srf[sample=S1]");
                assert_eq!(rule, "srf");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn emit_with_no_subscribers_does_not_panic() {
        let emitter = EventEmitter::new(16);
        emitter.emit(EngineEvent::TaskSkipped { task: "x".into() });
    }

    #[test]
    fn events_serialize_with_tag() {
        let event = EngineEvent::CheckpointReplanned {
            task: "split[sample=S1]".into(),
            discovered: 2,
            new_tasks: 6,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "checkpoint_replanned");
        assert_eq!(json["new_tasks"], 6);
    }
}
