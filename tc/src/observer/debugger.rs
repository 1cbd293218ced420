//! Debugger-style observer that numbers child threads and logs their lifecycle

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use diagcontext::label;
use eyre::Report;
use tracing::debug;

use super::{AbortReply, LifecycleObserver, Payload};

/// What the debugger remembers about one announced child thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadDebugInfo {
    pub owner: String,
    pub correlation_id: Option<String>,
    /// Sequence number of the child thread, as a string
    pub thread_id: String,
}

/// Observer that logs every lifecycle call at debug level
///
/// While disabled, announces yield no info and every later call passes its
/// payload through untouched.
#[derive(Debug)]
pub struct DebugObserver {
    enabled: AtomicBool,
    thread_counter: AtomicU64,
}

impl DebugObserver {
    pub fn new(enabled: bool) -> Self {
        debug!(enabled, "DebugObserver::new: called");
        Self {
            enabled: AtomicBool::new(enabled),
            thread_counter: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        debug!(enabled, "DebugObserver::set_enabled: called");
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Number of child threads announced while enabled
    pub fn threads_announced(&self) -> u64 {
        self.thread_counter.load(Ordering::SeqCst)
    }

    fn log(call: &str, info: &ThreadDebugInfo) {
        debug!(
            os_thread = ?thread::current().id(),
            thread = %label::current(),
            owner = %info.owner,
            thread_id = %info.thread_id,
            correlation_id = ?info.correlation_id,
            "{call}"
        );
    }
}

impl Default for DebugObserver {
    fn default() -> Self {
        Self::new(true)
    }
}

impl LifecycleObserver for DebugObserver {
    type Token = Option<ThreadDebugInfo>;

    fn announce_child_thread(&self, owner: &str, correlation_id: Option<&str>) -> Self::Token {
        if !self.is_enabled() {
            return None;
        }
        let info = ThreadDebugInfo {
            owner: owner.to_string(),
            correlation_id: correlation_id.map(str::to_string),
            thread_id: (self.thread_counter.fetch_add(1, Ordering::SeqCst) + 1).to_string(),
        };
        Self::log("announceChildThread", &info);
        Some(info)
    }

    fn cancel_child_thread(&self, token: Self::Token) {
        if let Some(info) = token {
            Self::log("cancelChildThread", &info);
        }
    }

    fn thread_created<I: Payload>(&self, token: &Self::Token, input: I) -> I {
        if let Some(info) = token {
            Self::log("threadCreated", info);
        }
        input
    }

    fn thread_ended<R: Payload>(&self, token: &Self::Token, result: R) -> R {
        if let Some(info) = token {
            Self::log("threadEnded", info);
        }
        result
    }

    fn thread_aborted(&self, token: &Self::Token, _error: &Report) -> Option<AbortReply> {
        if let Some(info) = token {
            Self::log("threadAborted", info);
        }
        Some(AbortReply::Propagate)
    }
}
