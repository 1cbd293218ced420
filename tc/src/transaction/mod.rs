//! Transaction handoff between threads
//!
//! A transaction manager that supports handoffs suspends the in-flight
//! transaction on the parent thread when asked to [`connect`](TransactionManager::connect),
//! and returns a [`TransactionHandoff`] that moves it onto the child and back.

mod local;

use std::thread::ThreadId;

use thiserror::Error;

pub use local::{LocalTransactionManager, TransactionId};

/// Errors raised while moving a transaction between threads
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Transaction {id} is already bound to this thread")]
    AlreadyBound { id: TransactionId },

    #[error("No transaction is bound to this thread")]
    NoTransaction,

    #[error("Cannot attach transaction {id}: thread already holds transaction {occupant}")]
    ThreadOccupied { id: TransactionId, occupant: TransactionId },

    #[error("Transaction {id} is attached to thread {attached:?}, not the calling thread")]
    NotAttachedHere { id: TransactionId, attached: ThreadId },

    #[error("Transaction handoff for {id} is already closed")]
    Closed { id: TransactionId },
}

/// Moves one suspended transaction onto a child thread and back
///
/// All methods take `&self`; implementations keep their own state. The
/// coordinator guarantees `close` is called exactly once, on every exit path.
pub trait TransactionHandoff: Send {
    /// Attach the suspended transaction to the calling (child) thread
    ///
    /// May block while the transaction manager waits for the resource.
    fn begin_child_thread(&self) -> Result<(), TransactionError>;

    /// Detach the transaction from the calling (child) thread
    fn end_child_thread(&self) -> Result<(), TransactionError>;

    /// Release the handoff, resuming the transaction wherever the manager decides
    ///
    /// Runs on the parent. A transaction still attached to a child (the child
    /// never called `end_child_thread`) must be detached from it here.
    fn close(&self) -> Result<(), TransactionError>;
}

/// Factory for transaction handoffs
pub trait TransactionManager: Send + Sync {
    /// Suspend the calling thread's transaction for a handoff
    ///
    /// Returns `None` when no transaction is in flight.
    fn connect(&self, owner: &str, description: &str) -> Option<Box<dyn TransactionHandoff>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_occupied_message() {
        let err = TransactionError::ThreadOccupied {
            id: "tx-a".to_string(),
            occupant: "tx-b".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("tx-a"));
        assert!(msg.contains("tx-b"));
    }
}
