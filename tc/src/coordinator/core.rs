//! HandoffCoordinator - moves one unit of work from a parent thread to a child

use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use diagcontext::label::{self, LabelSlot};
use diagcontext::masking::{self, MaskingSlot};
use diagcontext::{MaskingPatterns, mdc};
use eyre::Report;
use tracing::{debug, warn};

use super::config::HandoffConfig;
use super::state::HandoffState;
use crate::context::ContextSnapshot;
use crate::error::HandoffError;
use crate::observer::{AbortReply, LifecycleObserver, NoopObserver, Payload};
use crate::transaction::{TransactionError, TransactionHandoff, TransactionManager};

/// An attached observer and the token it issued for this handoff
struct ObserverHandle<O: LifecycleObserver> {
    observer: Arc<O>,
    token: O::Token,
}

/// The child's masking set and label, with what they held before the handoff
///
/// Slot handles work from any thread, so the parent can put things back when
/// the child never made its terminal call.
struct ChildSlots {
    masking: MaskingSlot,
    previous_masking: MaskingPatterns,
    label: LabelSlot,
    previous_label: Option<Option<String>>,
}

impl ChildSlots {
    fn restore(self) {
        self.masking.replace(self.previous_masking);
        if let Some(previous) = self.previous_label {
            self.label.set(previous);
        }
    }
}

/// Carries diagnostic context, masking state and an in-flight transaction
/// from the thread that creates it to the thread that does the work
///
/// Protocol:
///
/// 1. Parent: [`new`](Self::new) announces the handoff and snapshots context.
/// 2. Child: [`start_thread`](Self::start_thread), at most once.
/// 3. Child: [`end_thread`](Self::end_thread) or [`abort_thread`](Self::abort_thread).
/// 4. Parent: [`close`](Self::close), also run on drop.
///
/// Exactly one terminal event reaches the observer whatever path is taken.
/// There is no locking; the parent hands the coordinator to one child at a
/// time and child-side calls are checked against the starting thread.
pub struct HandoffCoordinator<O: LifecycleObserver = NoopObserver> {
    owner: String,
    description: String,
    parent_thread: ThreadId,
    parent_label: String,
    child_thread: Option<ThreadId>,
    /// Context of whichever thread acted last
    saved_context: ContextSnapshot,
    masking_patterns: MaskingPatterns,
    state: HandoffState,
    observer: Option<ObserverHandle<O>>,
    transaction: Option<Box<dyn TransactionHandoff>>,
    config: HandoffConfig,
    /// Installed on a real thread switch, taken on release
    child_slots: Option<ChildSlots>,
    closed: bool,
}

impl HandoffCoordinator<NoopObserver> {
    /// Coordinator without a lifecycle observer
    pub fn detached(
        owner: impl Into<String>,
        description: impl Into<String>,
        transaction_manager: Option<&dyn TransactionManager>,
    ) -> Self {
        Self::new(owner, description, None, transaction_manager, None)
    }
}

impl<O: LifecycleObserver> HandoffCoordinator<O> {
    /// Announce a handoff from the calling (parent) thread
    ///
    /// Calls the observer's announce, captures the masking patterns, suspends
    /// the transaction (if the manager has one in flight) and snapshots the
    /// diagnostic map, in that order.
    pub fn new(
        owner: impl Into<String>,
        description: impl Into<String>,
        observer: Option<Arc<O>>,
        transaction_manager: Option<&dyn TransactionManager>,
        correlation_id: Option<&str>,
    ) -> Self {
        let owner = owner.into();
        let description = description.into();
        let parent_thread = thread::current().id();
        debug!(%owner, %description, ?parent_thread, ?correlation_id, "HandoffCoordinator::new: called");

        let observer = observer.map(|observer| {
            let token = observer.announce_child_thread(&owner, correlation_id);
            ObserverHandle { observer, token }
        });
        let masking_patterns = masking::current();
        let transaction = transaction_manager.and_then(|manager| manager.connect(&owner, &description));
        let saved_context = ContextSnapshot::capture();

        Self {
            owner,
            description,
            parent_thread,
            parent_label: label::current(),
            child_thread: None,
            saved_context,
            masking_patterns,
            state: HandoffState::Announced,
            observer,
            transaction,
            config: HandoffConfig::default(),
            child_slots: None,
            closed: false,
        }
    }

    /// Replace the default configuration
    pub fn with_config(mut self, config: HandoffConfig) -> Self {
        debug!(?config, "HandoffCoordinator::with_config: called");
        self.config = config;
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn state(&self) -> HandoffState {
        self.state
    }

    pub fn parent_thread(&self) -> ThreadId {
        self.parent_thread
    }

    pub fn child_thread(&self) -> Option<ThreadId> {
        self.child_thread
    }

    pub fn has_observer(&self) -> bool {
        self.observer.is_some()
    }

    pub fn has_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    pub fn saved_context(&self) -> &ContextSnapshot {
        &self.saved_context
    }

    pub fn masking_patterns(&self) -> &MaskingPatterns {
        &self.masking_patterns
    }

    /// Take over the handoff on the calling (child) thread
    ///
    /// On a real thread switch the parent's context, masking patterns and
    /// transaction are installed here before the observer sees `input`. On the
    /// parent thread itself nothing moved: the observer is told the child was
    /// cancelled and detached, and `input` is returned as is.
    ///
    /// If the transaction cannot be attached, this thread's diagnostic map is
    /// put back and the handoff stays unstarted.
    pub fn start_thread<I: Payload>(&mut self, input: I) -> Result<I, HandoffError> {
        let current = thread::current().id();
        debug!(owner = %self.owner, ?current, state = %self.state, "HandoffCoordinator::start_thread: called");

        if self.child_thread.is_some() {
            return Err(HandoffError::AlreadyStarted {
                owner: self.owner.clone(),
            });
        }
        if self.state.is_finished() {
            return Err(HandoffError::AlreadyFinished {
                owner: self.owner.clone(),
            });
        }

        if current == self.parent_thread {
            debug!(owner = %self.owner, "HandoffCoordinator::start_thread: no thread switch, cancelling child");
            self.child_thread = Some(current);
            if let Some(handle) = self.observer.take() {
                handle.observer.cancel_child_thread(handle.token);
            }
            return Ok(input);
        }

        let child_context = ContextSnapshot::capture();
        self.saved_context.restore()?;
        if let Some(transaction) = &self.transaction
            && let Err(e) = transaction.begin_child_thread()
        {
            warn!(owner = %self.owner, error = %e, "Failed to attach transaction, handoff not started");
            mdc::clear();
            child_context.restore()?;
            return Err(e.into());
        }
        self.child_thread = Some(current);

        let masking = masking::slot();
        let previous_masking = masking.replace(self.masking_patterns.clone());
        let label = label::slot();
        let previous_label = self
            .config
            .label_threads
            .then(|| label.set(Some(self.config.child_label(&self.parent_label, &self.description))));
        self.child_slots = Some(ChildSlots {
            masking,
            previous_masking,
            label,
            previous_label,
        });

        self.state = HandoffState::Created { child: current };
        Ok(match &self.observer {
            Some(handle) => handle.observer.thread_created(&handle.token, input),
            None => input,
        })
    }

    /// Finish the handoff normally on the child thread
    ///
    /// Fails when called from any thread other than the one that started it.
    /// The transaction is detached even when this returns an error, and its
    /// failure is reported after the observer has been told.
    pub fn end_thread<R: Payload>(&mut self, response: R) -> Result<R, HandoffError> {
        let current = thread::current().id();
        debug!(owner = %self.owner, ?current, state = %self.state, "HandoffCoordinator::end_thread: called");

        self.check_child("end_thread", current)?;
        if self.state.is_finished() {
            return Err(HandoffError::AlreadyFinished {
                owner: self.owner.clone(),
            });
        }

        self.saved_context = ContextSnapshot::capture();
        let released = self.release_child();
        self.state = HandoffState::Finished;

        let response = match self.observer.take() {
            Some(handle) => handle.observer.thread_ended(&handle.token, response),
            None => response,
        };
        released?;
        Ok(response)
    }

    /// Finish the handoff with a failure on the child thread
    ///
    /// Never fails itself. From the wrong thread the original error comes back
    /// wrapped in [`HandoffError::WrongThreadOnAbort`]; otherwise the observer's
    /// replacement, or the original error when there is no observer.
    pub fn abort_thread(&mut self, error: impl Into<Report>) -> Report {
        let error = error.into();
        let current = thread::current().id();
        debug!(owner = %self.owner, ?current, state = %self.state, "HandoffCoordinator::abort_thread: called");

        if self.child_thread != Some(current) {
            warn!(owner = %self.owner, expected = ?self.child_thread, actual = ?current, "abort_thread called from the wrong thread");
            return error.wrap_err(HandoffError::WrongThreadOnAbort {
                owner: self.owner.clone(),
                expected: self.child_thread,
                actual: current,
            });
        }
        if self.state.is_finished() {
            warn!(owner = %self.owner, "abort_thread called after the handoff finished");
            return error.wrap_err(HandoffError::AlreadyFinished {
                owner: self.owner.clone(),
            });
        }

        self.saved_context = ContextSnapshot::capture();
        if let Err(e) = self.release_child() {
            warn!(owner = %self.owner, error = %e, "Failed to detach transaction while aborting handoff");
        }
        self.state = HandoffState::Finished;

        let Some(handle) = self.observer.take() else {
            return error;
        };
        match handle.observer.thread_aborted(&handle.token, &error) {
            Some(AbortReply::Propagate) => error,
            Some(AbortReply::Replace(replacement)) => replacement,
            None => {
                warn!(owner = %self.owner, error = %format!("{error:#}"), "Lifecycle observer ignored abort, surfacing original error");
                error.wrap_err(HandoffError::ObserverIgnoredAbort {
                    owner: self.owner.clone(),
                })
            }
        }
    }

    /// Release the handoff on the calling (parent) thread
    ///
    /// Restores the saved context, closes the transaction handoff and makes
    /// sure the observer received a terminal event. Never fails: release
    /// problems are logged. Calling it again does nothing.
    pub fn close(&mut self) {
        if self.closed {
            debug!(owner = %self.owner, "HandoffCoordinator::close: already closed");
            return;
        }
        self.closed = true;
        debug!(owner = %self.owner, state = %self.state, "HandoffCoordinator::close: called");

        if let Err(e) = self.saved_context.restore() {
            warn!(owner = %self.owner, error = %e, "Failed to restore diagnostic context while closing handoff");
        }
        if let Some(transaction) = self.transaction.take() {
            if let Err(e) = transaction.close() {
                warn!(owner = %self.owner, error = %e, "Failed to close transaction handoff");
            }
        }

        match std::mem::replace(&mut self.state, HandoffState::Finished) {
            HandoffState::Announced => {
                if let Some(handle) = self.observer.take() {
                    debug!(owner = %self.owner, "HandoffCoordinator::close: child never started, cancelling");
                    handle.observer.cancel_child_thread(handle.token);
                }
            }
            HandoffState::Created { child } => {
                warn!(
                    owner = %self.owner,
                    description = %self.description,
                    ?child,
                    "Handoff closed without end_thread or abort_thread, reporting it as ended"
                );
                if let Some(slots) = self.child_slots.take() {
                    slots.restore();
                }
                if let Some(handle) = self.observer.take() {
                    handle.observer.thread_ended(&handle.token, None::<()>);
                }
            }
            HandoffState::Finished => {}
        }
    }

    fn check_child(&self, operation: &'static str, current: ThreadId) -> Result<(), HandoffError> {
        if self.child_thread == Some(current) {
            return Ok(());
        }
        Err(HandoffError::ProtocolViolation {
            owner: self.owner.clone(),
            operation,
            expected: self.child_thread,
            actual: current,
        })
    }

    /// Undo what `start_thread` installed on the child
    fn release_child(&mut self) -> Result<(), TransactionError> {
        let detached = match &self.transaction {
            Some(transaction) => transaction.end_child_thread(),
            None => Ok(()),
        };
        if let Some(slots) = self.child_slots.take() {
            slots.restore();
        }
        detached
    }
}

impl<O: LifecycleObserver> Drop for HandoffCoordinator<O> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<O: LifecycleObserver> fmt::Debug for HandoffCoordinator<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandoffCoordinator")
            .field("owner", &self.owner)
            .field("description", &self.description)
            .field("parent_thread", &self.parent_thread)
            .field("child_thread", &self.child_thread)
            .field("state", &self.state)
            .field("has_observer", &self.observer.is_some())
            .field("has_transaction", &self.transaction.is_some())
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::RecordingObserver;
    use diagcontext::mdc;

    fn recorder() -> Arc<RecordingObserver> {
        Arc::new(RecordingObserver::new())
    }

    #[test]
    fn test_new_announces_once() {
        let observer = recorder();
        let coordinator = HandoffCoordinator::new("owner", "desc", Some(observer.clone()), None, Some("c1"));

        assert_eq!(observer.calls(), vec!["announce_child_thread"]);
        assert_eq!(coordinator.state(), HandoffState::Announced);
        assert!(coordinator.has_observer());
        assert!(!coordinator.has_transaction());
    }

    #[test]
    fn test_new_captures_context_and_masking() {
        mdc::clear();
        mdc::put("request_id", "r1");
        masking::install(&MaskingPatterns::compile(["\\d+"]).unwrap());

        let coordinator = HandoffCoordinator::detached("owner", "desc", None);
        assert_eq!(coordinator.saved_context().get("request_id"), Some("r1"));
        assert_eq!(coordinator.masking_patterns().len(), 1);

        masking::clear();
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let mut coordinator = HandoffCoordinator::detached("owner", "desc", None);
        thread::scope(|s| {
            s.spawn(|| {
                coordinator.start_thread(1).unwrap();
                let err = coordinator.start_thread(2).unwrap_err();
                assert!(matches!(err, HandoffError::AlreadyStarted { .. }));
                coordinator.end_thread(()).unwrap();
            });
        });
    }

    #[test]
    fn test_end_before_start_is_protocol_violation() {
        let mut coordinator = HandoffCoordinator::detached("owner", "desc", None);
        let err = coordinator.end_thread(1).unwrap_err();
        assert!(matches!(err, HandoffError::ProtocolViolation { operation: "end_thread", expected: None, .. }));
    }

    #[test]
    fn test_end_twice_is_rejected() {
        let observer = recorder();
        let mut coordinator = HandoffCoordinator::new("owner", "desc", Some(observer.clone()), None, None);
        thread::scope(|s| {
            s.spawn(|| {
                coordinator.start_thread(1).unwrap();
                coordinator.end_thread(2).unwrap();
                let err = coordinator.end_thread(3).unwrap_err();
                assert!(matches!(err, HandoffError::AlreadyFinished { .. }));
            });
        });
        coordinator.close();
        assert_eq!(
            observer.calls(),
            vec!["announce_child_thread", "thread_created", "thread_ended"]
        );
    }

    #[test]
    fn test_start_after_close_is_rejected() {
        let mut coordinator = HandoffCoordinator::detached("owner", "desc", None);
        coordinator.close();
        let err = coordinator.start_thread(()).unwrap_err();
        assert!(matches!(err, HandoffError::AlreadyFinished { .. }));
    }

    #[test]
    fn test_child_label_set_and_restored() {
        label::set(Some("parent".to_string()));
        let mut coordinator = HandoffCoordinator::detached("owner", "branch-1", None);
        label::set(None);

        let (during, after) = thread::scope(|s| {
            s.spawn(|| {
                label::set(Some("pool-worker".to_string()));
                coordinator.start_thread(()).unwrap();
                let during = label::current();
                coordinator.end_thread(()).unwrap();
                (during, label::current())
            })
            .join()
            .unwrap()
        });

        assert_eq!(during, "parent/branch-1");
        assert_eq!(after, "pool-worker");
    }

    #[test]
    fn test_labels_disabled() {
        let mut coordinator = HandoffCoordinator::detached("owner", "branch-1", None).with_config(HandoffConfig {
            label_threads: false,
            ..Default::default()
        });

        let during = thread::scope(|s| {
            s.spawn(|| {
                coordinator.start_thread(()).unwrap();
                let during = label::get();
                coordinator.end_thread(()).unwrap();
                during
            })
            .join()
            .unwrap()
        });
        assert_eq!(during, None);
    }

    #[test]
    fn test_debug_format() {
        let coordinator = HandoffCoordinator::detached("owner", "desc", None);
        let rendered = format!("{coordinator:?}");
        assert!(rendered.contains("owner"));
        assert!(rendered.contains("Announced"));
    }
}
