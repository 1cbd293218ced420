//! Observer that records every lifecycle call

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use diagcontext::{label, masking, mdc};
use eyre::Report;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{AbortReply, LifecycleObserver, Payload};

/// What happened to a handoff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ObserverEventKind {
    Announced {
        owner: String,
        correlation_id: Option<String>,
    },
    Cancelled,
    Created {
        /// Masked with the child's patterns
        input: String,
        /// Diagnostic map of the child thread at the moment it started
        context: Vec<(String, String)>,
    },
    Ended {
        result: String,
    },
    Aborted {
        error: String,
    },
}

impl ObserverEventKind {
    /// Name of the observer call that produced this event
    pub fn call_name(&self) -> &'static str {
        match self {
            ObserverEventKind::Announced { .. } => "announce_child_thread",
            ObserverEventKind::Cancelled => "cancel_child_thread",
            ObserverEventKind::Created { .. } => "thread_created",
            ObserverEventKind::Ended { .. } => "thread_ended",
            ObserverEventKind::Aborted { .. } => "thread_aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ObserverEventKind::Cancelled | ObserverEventKind::Ended { .. } | ObserverEventKind::Aborted { .. }
        )
    }
}

/// One recorded observer call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserverEvent {
    /// Handoff number, assigned at announce
    pub handoff: u64,
    /// Label of the thread the call was made on
    pub thread: String,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: ObserverEventKind,
}

/// Observer that keeps a log of every call it receives
///
/// Payloads are recorded by their `Debug` rendering and passed through
/// unchanged.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObserverEvent>>,
    next_handoff: AtomicU64,
    swallow_aborts: bool,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observer that gives no answer to aborts
    pub fn swallowing_aborts() -> Self {
        Self {
            swallow_aborts: true,
            ..Self::default()
        }
    }

    fn record(&self, handoff: u64, kind: ObserverEventKind) {
        debug!(handoff, call = kind.call_name(), "RecordingObserver::record: called");
        let event = ObserverEvent {
            handoff,
            thread: label::current(),
            at: Utc::now(),
            kind,
        };
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }

    /// Every recorded event, oldest first
    pub fn events(&self) -> Vec<ObserverEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Events of one handoff, oldest first
    pub fn events_for(&self, handoff: u64) -> Vec<ObserverEvent> {
        self.events().into_iter().filter(|e| e.handoff == handoff).collect()
    }

    /// Names of the calls received, oldest first
    pub fn calls(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.kind.call_name()).collect()
    }

    /// Number of terminal events (cancel, end, abort) recorded for a handoff
    pub fn terminal_count(&self, handoff: u64) -> usize {
        self.events_for(handoff).iter().filter(|e| e.kind.is_terminal()).count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl LifecycleObserver for RecordingObserver {
    type Token = u64;

    fn announce_child_thread(&self, owner: &str, correlation_id: Option<&str>) -> Self::Token {
        let handoff = self.next_handoff.fetch_add(1, Ordering::SeqCst) + 1;
        self.record(
            handoff,
            ObserverEventKind::Announced {
                owner: owner.to_string(),
                correlation_id: correlation_id.map(str::to_string),
            },
        );
        handoff
    }

    fn cancel_child_thread(&self, token: Self::Token) {
        self.record(token, ObserverEventKind::Cancelled);
    }

    fn thread_created<I: Payload>(&self, token: &Self::Token, input: I) -> I {
        self.record(
            *token,
            ObserverEventKind::Created {
                input: masking::mask(&format!("{input:?}")),
                context: mdc::entries(),
            },
        );
        input
    }

    fn thread_ended<R: Payload>(&self, token: &Self::Token, result: R) -> R {
        self.record(
            *token,
            ObserverEventKind::Ended {
                result: format!("{result:?}"),
            },
        );
        result
    }

    fn thread_aborted(&self, token: &Self::Token, error: &Report) -> Option<AbortReply> {
        self.record(
            *token,
            ObserverEventKind::Aborted {
                error: format!("{error:#}"),
            },
        );
        if self.swallow_aborts { None } else { Some(AbortReply::Propagate) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_calls_in_order() {
        let observer = RecordingObserver::new();
        let token = observer.announce_child_thread("sender", Some("corr-1"));
        assert_eq!(observer.thread_created(&token, 42), 42);
        assert_eq!(observer.thread_ended(&token, 100), 100);

        assert_eq!(
            observer.calls(),
            vec!["announce_child_thread", "thread_created", "thread_ended"]
        );
        assert_eq!(observer.terminal_count(token), 1);

        let events = observer.events();
        assert_eq!(
            events[1].kind,
            ObserverEventKind::Created {
                input: "42".to_string(),
                context: mdc::entries(),
            }
        );
    }

    #[test]
    fn test_tokens_are_distinct() {
        let observer = RecordingObserver::new();
        let first = observer.announce_child_thread("a", None);
        let second = observer.announce_child_thread("b", None);
        assert_ne!(first, second);
        observer.cancel_child_thread(second);
        assert_eq!(observer.events_for(second).len(), 2);
        assert_eq!(observer.terminal_count(first), 0);
    }

    #[test]
    fn test_swallowing_aborts() {
        let observer = RecordingObserver::swallowing_aborts();
        let token = observer.announce_child_thread("a", None);
        assert!(observer.thread_aborted(&token, &eyre::eyre!("boom")).is_none());

        let passing = RecordingObserver::new();
        let token = passing.announce_child_thread("a", None);
        assert!(matches!(
            passing.thread_aborted(&token, &eyre::eyre!("boom")),
            Some(AbortReply::Propagate)
        ));
    }

    #[test]
    fn test_event_serialization() {
        let event = ObserverEvent {
            handoff: 3,
            thread: "main".to_string(),
            at: Utc::now(),
            kind: ObserverEventKind::Ended {
                result: "Some(1)".to_string(),
            },
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"ended\""));
        let back: ObserverEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
