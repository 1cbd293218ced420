//! Thread labels
//!
//! A running std thread cannot be renamed, so handoffs tag the thread with a
//! label that log lines print instead of the OS thread name.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

thread_local! {
    static LABEL: LabelSlot = LabelSlot::default();
}

/// Handle to one thread's label, usable from other threads
#[derive(Debug, Clone, Default)]
pub struct LabelSlot {
    label: Arc<Mutex<Option<String>>>,
}

impl LabelSlot {
    fn lock(&self) -> MutexGuard<'_, Option<String>> {
        self.label.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self) -> Option<String> {
        self.lock().clone()
    }

    /// Set (or clear) the label, returning the previous one
    pub fn set(&self, label: Option<String>) -> Option<String> {
        std::mem::replace(&mut *self.lock(), label)
    }
}

/// Handle to this thread's label
pub fn slot() -> LabelSlot {
    LABEL.with(LabelSlot::clone)
}

/// Set (or clear) this thread's label, returning the previous one
pub fn set(label: Option<String>) -> Option<String> {
    LABEL.with(|slot| slot.set(label))
}

/// This thread's label, if one is set
pub fn get() -> Option<String> {
    LABEL.try_with(LabelSlot::get).ok().flatten()
}

/// Label, else the std thread name, else "unnamed"
pub fn current() -> String {
    get().unwrap_or_else(|| {
        std::thread::current()
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| "unnamed".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_falls_back_to_thread_name() {
        let name = std::thread::Builder::new()
            .name("worker-7".to_string())
            .spawn(current)
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(name, "worker-7");
    }

    #[test]
    fn test_set_returns_previous() {
        assert_eq!(set(Some("main/branch-1".to_string())), None);
        assert_eq!(current(), "main/branch-1");
        assert_eq!(set(None).as_deref(), Some("main/branch-1"));
        assert_eq!(get(), None);
    }

    #[test]
    fn test_slot_set_from_other_thread() {
        set(None);
        let handle = slot();
        std::thread::spawn(move || handle.set(Some("relabelled".to_string())))
            .join()
            .unwrap();
        assert_eq!(get().as_deref(), Some("relabelled"));
        set(None);
    }
}
