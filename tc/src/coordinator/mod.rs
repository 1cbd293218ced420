//! Coordinator for cross-thread handoffs
//!
//! A [`HandoffCoordinator`] is created on the parent thread for every piece of
//! work dispatched to another thread. It carries:
//! - **Diagnostic context:** the parent's MDC entries
//! - **Masking:** the parent's sensitive-data patterns
//! - **Transaction:** the parent's in-flight transaction, if any

mod config;
mod core;
mod state;

pub use config::HandoffConfig;
pub use core::HandoffCoordinator;
pub use state::HandoffState;
