//! threadconnect - cross-thread execution handoff
//!
//! When work is dispatched from one thread to another, the thread that runs
//! it loses everything that lived in the dispatching thread's locals. A
//! [`HandoffCoordinator`] carries that state across and reports the handoff
//! to a [`LifecycleObserver`].
//!
//! # Modules
//!
//! - [`context`] - Snapshots of the diagnostic map
//! - [`transaction`] - Suspending a transaction and resuming it elsewhere
//! - [`observer`] - Lifecycle callbacks and the stock observers
//! - [`coordinator`] - The handoff protocol itself
//! - [`dispatch`] - Running work under a coordinator
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod demo;
pub mod dispatch;
mod error;
pub mod observer;
pub mod transaction;

// Re-export commonly used types
pub use config::{Config, MaskingConfig, ObserverConfig, ObserverKind};
pub use context::ContextSnapshot;
pub use coordinator::{HandoffConfig, HandoffCoordinator, HandoffState};
pub use dispatch::{dispatch, run_handoff};
pub use error::HandoffError;
pub use observer::{
    AbortReply, DebugObserver, LifecycleObserver, NoopObserver, ObserverEvent, ObserverEventKind, Payload, RecordingObserver,
};
pub use transaction::{
    LocalTransactionManager, TransactionError, TransactionHandoff, TransactionId, TransactionManager,
};
