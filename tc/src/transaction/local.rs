//! Thread-bound, in-process transaction manager

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{TransactionError, TransactionHandoff, TransactionManager};

/// Unique identifier for a transaction
pub type TransactionId = String;

/// Which thread each transaction is bound to
///
/// Shared by a manager and its handoffs so a binding can be released from a
/// thread other than the one holding it.
#[derive(Debug, Clone, Default)]
struct Bindings {
    threads: Arc<Mutex<HashMap<ThreadId, TransactionId>>>,
}

impl Bindings {
    fn lock(&self) -> MutexGuard<'_, HashMap<ThreadId, TransactionId>> {
        self.threads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bound(&self, thread: ThreadId) -> Option<TransactionId> {
        self.lock().get(&thread).cloned()
    }

    fn bind(&self, thread: ThreadId, id: TransactionId) -> Result<(), TransactionError> {
        let mut threads = self.lock();
        if let Some(occupant) = threads.get(&thread) {
            return Err(TransactionError::ThreadOccupied {
                id,
                occupant: occupant.clone(),
            });
        }
        threads.insert(thread, id);
        Ok(())
    }

    fn unbind(&self, thread: ThreadId) -> Option<TransactionId> {
        self.lock().remove(&thread)
    }

    /// Unbind `id` from `thread`, leaving any other transaction there alone
    fn release(&self, thread: ThreadId, id: &str) -> bool {
        let mut threads = self.lock();
        if threads.get(&thread).is_some_and(|bound| bound == id) {
            threads.remove(&thread);
            return true;
        }
        false
    }
}

/// Transaction manager that binds at most one transaction to each thread
///
/// Handoffs suspend the parent's transaction in [`connect`](TransactionManager::connect),
/// attach it to the child for the duration of the child's work, and resume it
/// on the thread that closes the handoff. Clones share their bindings.
#[derive(Debug, Clone)]
pub struct LocalTransactionManager {
    name: String,
    bindings: Bindings,
}

impl LocalTransactionManager {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        debug!(%name, "LocalTransactionManager::new: called");
        Self {
            name,
            bindings: Bindings::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start a transaction on the calling thread
    pub fn begin(&self) -> Result<TransactionId, TransactionError> {
        let current = thread::current().id();
        if let Some(id) = self.bindings.bound(current) {
            return Err(TransactionError::AlreadyBound { id });
        }
        let id = Uuid::now_v7().to_string();
        self.bindings.bind(current, id.clone())?;
        info!(manager = %self.name, transaction = %id, "Transaction started");
        Ok(id)
    }

    /// The transaction bound to the calling thread
    pub fn current(&self) -> Option<TransactionId> {
        self.bindings.bound(thread::current().id())
    }

    /// Commit and unbind the calling thread's transaction
    pub fn commit(&self) -> Result<TransactionId, TransactionError> {
        let id = self
            .bindings
            .unbind(thread::current().id())
            .ok_or(TransactionError::NoTransaction)?;
        info!(manager = %self.name, transaction = %id, "Transaction committed");
        Ok(id)
    }

    /// Roll back and unbind the calling thread's transaction
    pub fn rollback(&self) -> Result<TransactionId, TransactionError> {
        let id = self
            .bindings
            .unbind(thread::current().id())
            .ok_or(TransactionError::NoTransaction)?;
        info!(manager = %self.name, transaction = %id, "Transaction rolled back");
        Ok(id)
    }
}

impl TransactionManager for LocalTransactionManager {
    fn connect(&self, owner: &str, description: &str) -> Option<Box<dyn TransactionHandoff>> {
        let id = self.bindings.unbind(thread::current().id())?;
        debug!(manager = %self.name, transaction = %id, %owner, %description, "LocalTransactionManager::connect: suspended");
        Some(Box::new(LocalTransactionHandoff {
            id,
            bindings: self.bindings.clone(),
            slot: RefCell::new(Slot::Suspended),
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Suspended,
    Attached(ThreadId),
    Closed,
}

struct LocalTransactionHandoff {
    id: TransactionId,
    bindings: Bindings,
    slot: RefCell<Slot>,
}

impl TransactionHandoff for LocalTransactionHandoff {
    fn begin_child_thread(&self) -> Result<(), TransactionError> {
        let current = thread::current().id();
        let mut slot = self.slot.borrow_mut();
        match *slot {
            Slot::Suspended => {
                self.bindings.bind(current, self.id.clone())?;
                *slot = Slot::Attached(current);
                debug!(transaction = %self.id, ?current, "LocalTransactionHandoff::begin_child_thread: attached");
                Ok(())
            }
            Slot::Attached(attached) => Err(TransactionError::NotAttachedHere {
                id: self.id.clone(),
                attached,
            }),
            Slot::Closed => Err(TransactionError::Closed { id: self.id.clone() }),
        }
    }

    fn end_child_thread(&self) -> Result<(), TransactionError> {
        let current = thread::current().id();
        let mut slot = self.slot.borrow_mut();
        match *slot {
            Slot::Attached(attached) if attached == current => {
                self.bindings.release(current, &self.id);
                *slot = Slot::Suspended;
                debug!(transaction = %self.id, ?current, "LocalTransactionHandoff::end_child_thread: detached");
                Ok(())
            }
            Slot::Attached(attached) => Err(TransactionError::NotAttachedHere {
                id: self.id.clone(),
                attached,
            }),
            // never attached, nothing to detach
            Slot::Suspended => Ok(()),
            Slot::Closed => Err(TransactionError::Closed { id: self.id.clone() }),
        }
    }

    fn close(&self) -> Result<(), TransactionError> {
        let current = thread::current().id();
        let mut slot = self.slot.borrow_mut();
        match *slot {
            Slot::Suspended => {
                self.bindings.bind(current, self.id.clone())?;
                *slot = Slot::Closed;
                debug!(transaction = %self.id, "LocalTransactionHandoff::close: resumed");
                Ok(())
            }
            Slot::Attached(child) => {
                let detached = self.bindings.release(child, &self.id);
                warn!(transaction = %self.id, ?child, detached, "Transaction still attached to child at close, detaching it");
                *slot = Slot::Suspended;
                self.bindings.bind(current, self.id.clone())?;
                *slot = Slot::Closed;
                debug!(transaction = %self.id, "LocalTransactionHandoff::close: resumed");
                Ok(())
            }
            Slot::Closed => Ok(()),
        }
    }
}
