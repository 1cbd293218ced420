//! Handoff error types

use std::thread::ThreadId;

use diagcontext::DiagError;
use thiserror::Error;

use crate::transaction::TransactionError;

/// Errors raised by the handoff protocol
#[derive(Debug, Error)]
pub enum HandoffError {
    /// A child-side call came from a thread other than the one that started the handoff
    #[error("{operation} for '{owner}' called on thread {actual:?}, but the handoff was started on {expected:?}")]
    ProtocolViolation {
        owner: String,
        operation: &'static str,
        expected: Option<ThreadId>,
        actual: ThreadId,
    },

    #[error("Handoff for '{owner}' was already started")]
    AlreadyStarted { owner: String },

    #[error("Handoff for '{owner}' has already finished")]
    AlreadyFinished { owner: String },

    /// Attached around the original error when `abort_thread` is called from the wrong thread
    #[error("abort for '{owner}' called on thread {actual:?}, but the handoff was started on {expected:?}")]
    WrongThreadOnAbort {
        owner: String,
        expected: Option<ThreadId>,
        actual: ThreadId,
    },

    /// Attached around the original error when the observer gave no answer to an abort
    #[error("Lifecycle observer ignored the abort of '{owner}'")]
    ObserverIgnoredAbort { owner: String },

    #[error("Transaction handoff failed: {0}")]
    Transaction(#[from] TransactionError),

    #[error("Diagnostic context unavailable: {0}")]
    Context(#[from] DiagError),
}

impl HandoffError {
    /// True for errors caused by calling the protocol out of order or from the wrong thread
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            HandoffError::ProtocolViolation { .. }
                | HandoffError::AlreadyStarted { .. }
                | HandoffError::AlreadyFinished { .. }
                | HandoffError::WrongThreadOnAbort { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_violation_message() {
        let err = HandoffError::ProtocolViolation {
            owner: "sender".to_string(),
            operation: "end_thread",
            expected: None,
            actual: std::thread::current().id(),
        };

        let msg = err.to_string();
        assert!(msg.contains("end_thread"));
        assert!(msg.contains("'sender'"));
        assert!(err.is_protocol_error());
    }

    #[test]
    fn test_transaction_error_is_not_protocol_error() {
        let err = HandoffError::from(TransactionError::Closed {
            id: "tx-1".to_string(),
        });
        assert!(!err.is_protocol_error());
        assert!(err.to_string().contains("tx-1"));
    }

    #[test]
    fn test_ignored_abort_names_owner() {
        let err = HandoffError::ObserverIgnoredAbort {
            owner: "branch".to_string(),
        };
        assert!(err.to_string().contains("'branch'"));
        assert!(!err.is_protocol_error());
    }
}
