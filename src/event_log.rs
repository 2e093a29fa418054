//! Execution event log
//!
//! Append-only audit trail of a run, separate from the results so results
//! stay deterministic.
//! - Event: envelope with id + timestamp + kind
//! - EventKind: workflow, job and step level variants
//! - EventLog: thread-safe, shared by every job instance of a run

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Single event in the run log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence ID
    pub id: u64,
    /// Time since the log was created (ms)
    pub timestamp_ms: u64,
    pub kind: EventKind,
}

/// Uses Arc<str> for instance ids so every step event clones cheaply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // ═══════════════════════════════════════════
    // WORKFLOW LEVEL
    // ═══════════════════════════════════════════
    WorkflowStarted {
        event: String,
        job_count: usize,
    },
    WorkflowNotTriggered {
        event: String,
    },
    WorkflowCompleted {
        instances: usize,
        failed: usize,
        total_duration_ms: u64,
    },

    // ═══════════════════════════════════════════
    // JOB LEVEL
    // ═══════════════════════════════════════════
    JobStarted {
        instance: Arc<str>,
        runner: String,
        steps: usize,
    },
    JobSkipped {
        instance: Arc<str>,
        reason: String,
    },
    JobCompleted {
        instance: Arc<str>,
        success: bool,
        duration_ms: u64,
    },

    // ═══════════════════════════════════════════
    // STEP LEVEL
    // ═══════════════════════════════════════════
    StepStarted {
        instance: Arc<str>,
        index: usize,
        label: String,
    },
    StepSucceeded {
        instance: Arc<str>,
        index: usize,
        duration_ms: u64,
    },
    StepFailed {
        instance: Arc<str>,
        index: usize,
        error: String,
        duration_ms: u64,
    },
    StepSkipped {
        instance: Arc<str>,
        index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
}

impl EventKind {
    /// Extract the job instance if the event belongs to one
    pub fn instance(&self) -> Option<&str> {
        match self {
            Self::JobStarted { instance, .. }
            | Self::JobSkipped { instance, .. }
            | Self::JobCompleted { instance, .. }
            | Self::StepStarted { instance, .. }
            | Self::StepSucceeded { instance, .. }
            | Self::StepFailed { instance, .. }
            | Self::StepSkipped { instance, .. } => Some(instance),
            Self::WorkflowStarted { .. }
            | Self::WorkflowNotTriggered { .. }
            | Self::WorkflowCompleted { .. } => None,
        }
    }

    pub fn is_workflow_event(&self) -> bool {
        self.instance().is_none()
    }
}

/// Thread-safe, append-only event log
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    start_time: Instant,
    next_id: Arc<AtomicU64>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event (returns event ID)
    pub fn emit(&self, kind: EventKind) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id,
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
            kind,
        };

        self.events.write().push(event);
        id
    }

    /// Get all events (cloned)
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Events of one job instance, in emission order
    pub fn filter_instance(&self, instance: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.instance() == Some(instance))
            .collect()
    }

    pub fn workflow_events(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.is_workflow_event())
            .collect()
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self.events()).unwrap_or(Value::Null)
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn instance_extraction() {
        let started = EventKind::StepStarted {
            instance: "test (python-version=3.9)".into(),
            index: 1,
            label: "Checkout".into(),
        };
        assert_eq!(started.instance(), Some("test (python-version=3.9)"));

        let workflow = EventKind::WorkflowStarted {
            event: "push".into(),
            job_count: 2,
        };
        assert_eq!(workflow.instance(), None);
        assert!(workflow.is_workflow_event());
    }

    #[test]
    fn serializes_with_type_tag() {
        let kind = EventKind::StepFailed {
            instance: "lint".into(),
            index: 3,
            error: "exit status 1".into(),
            duration_ms: 12,
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], "step_failed");
        assert_eq!(json["instance"], "lint");
        assert_eq!(json["index"], 3);
    }

    #[test]
    fn deserializes_from_tagged_json() {
        let kind: EventKind = serde_json::from_value(json!({
            "type": "step_skipped",
            "instance": "test",
            "index": 4
        }))
        .unwrap();
        assert_eq!(
            kind,
            EventKind::StepSkipped {
                instance: "test".into(),
                index: 4,
                note: None,
            }
        );
    }

    #[test]
    fn emit_returns_monotonic_ids() {
        let log = EventLog::new();
        let a = log.emit(EventKind::WorkflowNotTriggered {
            event: "schedule".into(),
        });
        let b = log.emit(EventKind::JobSkipped {
            instance: "deploy".into(),
            reason: "guard".into(),
        });
        assert_eq!((a, b), (0, 1));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn filter_instance_returns_only_matching() {
        let log = EventLog::new();
        log.emit(EventKind::WorkflowStarted {
            event: "push".into(),
            job_count: 1,
        });
        for instance in ["a", "b", "a"] {
            log.emit(EventKind::StepStarted {
                instance: instance.into(),
                index: 1,
                label: "x".into(),
            });
        }
        assert_eq!(log.filter_instance("a").len(), 2);
        assert_eq!(log.filter_instance("b").len(), 1);
        assert_eq!(log.workflow_events().len(), 1);
    }

    #[test]
    fn clones_share_storage() {
        let log = EventLog::new();
        let cloned = log.clone();
        log.emit(EventKind::WorkflowStarted {
            event: "push".into(),
            job_count: 1,
        });
        assert_eq!(cloned.len(), 1);
        assert!(cloned.to_json().is_array());
    }

    #[test]
    fn concurrent_emits_get_unique_ids() {
        let log = EventLog::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let log = log.clone();
                std::thread::spawn(move || {
                    log.emit(EventKind::JobStarted {
                        instance: Arc::from(format!("job{}", i)),
                        runner: "ubuntu-latest".into(),
                        steps: 1,
                    })
                })
            })
            .collect();
        let mut ids: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 8);
    }
}
