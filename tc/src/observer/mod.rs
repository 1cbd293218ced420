//! Lifecycle observers
//!
//! An observer is told when a handoff is announced, when the child thread
//! actually starts, and how it finishes. Tracing and debugging tools hook in
//! here; the coordinator works the same with or without one.
//!
//! - [`NoopObserver`] - passes everything through
//! - [`RecordingObserver`] - keeps every call as an [`ObserverEvent`]
//! - [`DebugObserver`] - numbered child threads, logged through `tracing`

mod debugger;
mod recording;

use std::fmt::Debug;

use eyre::Report;

pub use debugger::{DebugObserver, ThreadDebugInfo};
pub use recording::{ObserverEvent, ObserverEventKind, RecordingObserver};

/// Values an observer can see (and replace) on their way through a handoff
pub trait Payload: Debug + Send + 'static {}

impl<T: Debug + Send + 'static> Payload for T {}

/// Receives the lifecycle of every handoff it is attached to
///
/// The token returned by [`announce_child_thread`](Self::announce_child_thread)
/// is handed back on every later call for the same handoff. Exactly one of
/// `cancel_child_thread`, `thread_ended` or `thread_aborted` follows each announce.
pub trait LifecycleObserver: Send + Sync {
    type Token: Send;

    /// A handoff is about to be dispatched (parent thread)
    fn announce_child_thread(&self, owner: &str, correlation_id: Option<&str>) -> Self::Token;

    /// The announced child never ran
    fn cancel_child_thread(&self, token: Self::Token);

    /// The child thread started; the returned value is what the child works on
    fn thread_created<I: Payload>(&self, token: &Self::Token, input: I) -> I;

    /// The child thread finished normally; the returned value replaces the result
    fn thread_ended<R: Payload>(&self, token: &Self::Token, result: R) -> R;

    /// The child thread failed
    ///
    /// `None` means the observer gave no answer at all; the coordinator logs
    /// that and surfaces the original error wrapped in
    /// [`HandoffError::ObserverIgnoredAbort`](crate::HandoffError::ObserverIgnoredAbort).
    fn thread_aborted(&self, token: &Self::Token, error: &Report) -> Option<AbortReply>;
}

/// What an observer wants the caller of `abort_thread` to see
#[derive(Debug)]
pub enum AbortReply {
    /// The original error, unchanged
    Propagate,
    /// A replacement error
    Replace(Report),
}

/// Observer that sees nothing and changes nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl LifecycleObserver for NoopObserver {
    type Token = ();

    fn announce_child_thread(&self, _owner: &str, _correlation_id: Option<&str>) -> Self::Token {}

    fn cancel_child_thread(&self, _token: Self::Token) {}

    fn thread_created<I: Payload>(&self, _token: &Self::Token, input: I) -> I {
        input
    }

    fn thread_ended<R: Payload>(&self, _token: &Self::Token, result: R) -> R {
        result
    }

    fn thread_aborted(&self, _token: &Self::Token, _error: &Report) -> Option<AbortReply> {
        Some(AbortReply::Propagate)
    }
}
