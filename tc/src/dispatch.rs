//! Running work under a handoff coordinator
//!
//! [`run_handoff`] wraps one unit of work in the child-side protocol; callers
//! that own a thread pool call it from their worker. [`dispatch`] spawns a
//! dedicated thread for it and closes the coordinator afterwards.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use eyre::{Report, Result, eyre};
use tracing::debug;

use crate::coordinator::HandoffCoordinator;
use crate::observer::{LifecycleObserver, Payload};

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Run `work` as the child side of a handoff, on the calling thread
///
/// Starts the handoff, runs the work and ends or aborts it depending on the
/// outcome. A panic inside `work` is reported as an abort and then resumed.
pub fn run_handoff<O, I, R, F>(coordinator: &mut HandoffCoordinator<O>, input: I, work: F) -> Result<R>
where
    O: LifecycleObserver,
    I: Payload,
    R: Payload,
    F: FnOnce(I) -> Result<R>,
{
    debug!(owner = %coordinator.owner(), "run_handoff: called");
    let input = coordinator.start_thread(input)?;

    match panic::catch_unwind(AssertUnwindSafe(|| work(input))) {
        Ok(Ok(reply)) => Ok(coordinator.end_thread(reply)?),
        Ok(Err(error)) => Err(coordinator.abort_thread(error)),
        Err(payload) => {
            let error = eyre!("{} panicked: {}", coordinator.description(), panic_message(payload.as_ref()));
            drop(coordinator.abort_thread(error));
            panic::resume_unwind(payload)
        }
    }
}

/// Run `work` on a new thread and close the coordinator on this one
///
/// The thread is named after the handoff description. If it cannot be
/// spawned, the coordinator is closed without starting, which cancels the
/// announced child.
pub fn dispatch<O, I, R, F>(mut coordinator: HandoffCoordinator<O>, input: I, work: F) -> Result<R>
where
    O: LifecycleObserver,
    I: Payload,
    R: Payload,
    F: FnOnce(I) -> Result<R> + Send,
{
    let name = coordinator.description().to_string();
    debug!(owner = %coordinator.owner(), %name, "dispatch: called");

    let joined = thread::scope(|scope| {
        let spawned = thread::Builder::new()
            .name(name)
            .spawn_scoped(scope, || run_handoff(&mut coordinator, input, work));
        match spawned {
            Ok(handle) => handle.join(),
            Err(e) => Ok(Err(Report::new(e).wrap_err("Failed to spawn handoff thread"))),
        }
    });

    coordinator.close();
    match joined {
        Ok(result) => result,
        Err(payload) => panic::resume_unwind(payload),
    }
}
