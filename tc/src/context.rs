//! ContextSnapshot - portable copy of a thread's diagnostic map

use diagcontext::{DiagError, mdc};
use tracing::debug;

/// Owned, ordered copy of the diagnostic map taken on one thread
///
/// Restoring never consumes the snapshot, so the same snapshot can be replayed
/// onto several threads or several times onto one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextSnapshot {
    entries: Vec<(String, String)>,
}

impl ContextSnapshot {
    /// Copy the calling thread's diagnostic map
    pub fn capture() -> Self {
        let entries = mdc::entries();
        debug!(keys = entries.len(), "ContextSnapshot::capture: called");
        Self { entries }
    }

    /// Merge the captured entries into the calling thread's diagnostic map
    ///
    /// Colliding keys take the captured value; keys only the target thread has
    /// are left alone.
    pub fn restore(&self) -> Result<(), DiagError> {
        debug!(keys = self.entries.len(), "ContextSnapshot::restore: called");
        mdc::put_all(self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ContextSnapshot {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut entries: Vec<(String, String)> = Vec::new();
        for (key, value) in iter {
            let key = key.into();
            let value = value.into();
            match entries.iter_mut().find(|(k, _)| *k == key) {
                Some((_, existing)) => *existing = value,
                None => entries.push((key, value)),
            }
        }
        Self { entries }
    }
}
