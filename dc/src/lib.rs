//! DiagContext - thread-local diagnostic context
//!
//! Holds the per-thread state that log lines are correlated and sanitised with.
//! Each store lives in a `thread_local!` slot, so a value put on one thread is
//! invisible on every other thread until something copies it across.
//!
//! # Stores
//!
//! - [`mdc`] - ordered key/value map (mapped diagnostic context)
//! - [`masking`] - regex patterns whose matches are hidden in log output
//! - [`label`] - cosmetic thread label shown in log lines
//!
//! [`DiagnosticFormat`] puts all three into `tracing` output.
//!
//! # Example
//!
//! ```ignore
//! use diagcontext::{masking, mdc};
//!
//! mdc::put("request_id", "r1");
//! masking::add("password=\\S+")?;
//! assert_eq!(masking::mask("password=hunter2"), "****************");
//! ```

mod error;
pub mod format;
pub mod label;
pub mod masking;
pub mod mdc;

pub use error::DiagError;
pub use format::DiagnosticFormat;
pub use masking::{MaskingGuard, MaskingPatterns};
pub use mdc::MdcGuard;
