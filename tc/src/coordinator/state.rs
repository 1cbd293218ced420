//! Handoff lifecycle state

use std::fmt;
use std::thread::ThreadId;

/// Where a handoff is in its lifecycle
///
/// Only moves forward: `Announced -> Created -> Finished`, or straight from
/// `Announced` to `Finished` when the child never runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffState {
    /// Constructed on the parent; no child has started
    Announced,
    /// Running on a child thread
    Created { child: ThreadId },
    /// A terminal event has been delivered
    Finished,
}

impl HandoffState {
    pub fn is_finished(&self) -> bool {
        matches!(self, HandoffState::Finished)
    }
}

impl fmt::Display for HandoffState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandoffState::Announced => write!(f, "announced"),
            HandoffState::Created { .. } => write!(f, "created"),
            HandoffState::Finished => write!(f, "finished"),
        }
    }
}
