//! Mapped diagnostic context
//!
//! An insertion-ordered `String -> String` map per thread. Keys are unique;
//! overwriting a key keeps its original position.

use std::cell::RefCell;

use tracing::debug;

use crate::DiagError;

thread_local! {
    static ENTRIES: RefCell<Vec<(String, String)>> = const { RefCell::new(Vec::new()) };
}

fn upsert(entries: &mut Vec<(String, String)>, key: String, value: String) -> Option<String> {
    match entries.iter_mut().find(|(k, _)| *k == key) {
        Some((_, existing)) => Some(std::mem::replace(existing, value)),
        None => {
            entries.push((key, value));
            None
        }
    }
}

/// Put a value, returning the value it replaced
pub fn put(key: impl Into<String>, value: impl Into<String>) -> Option<String> {
    let key = key.into();
    let value = value.into();
    debug!(%key, "mdc::put: called");
    ENTRIES.with(|entries| upsert(&mut entries.borrow_mut(), key, value))
}

/// Get a copy of the value stored under `key`
pub fn get(key: &str) -> Option<String> {
    ENTRIES.with(|entries| {
        entries
            .borrow()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    })
}

/// Remove a key, returning its value
pub fn remove(key: &str) -> Option<String> {
    debug!(%key, "mdc::remove: called");
    ENTRIES.with(|entries| {
        let mut entries = entries.borrow_mut();
        let index = entries.iter().position(|(k, _)| k == key)?;
        Some(entries.remove(index).1)
    })
}

/// Remove every key on this thread
pub fn clear() {
    debug!("mdc::clear: called");
    ENTRIES.with(|entries| entries.borrow_mut().clear());
}

/// Owned, ordered copy of this thread's entries
pub fn entries() -> Vec<(String, String)> {
    ENTRIES.with(|entries| entries.borrow().clone())
}

/// Entries rendered as `key=value` pairs separated by spaces
///
/// Empty while the map is being modified or the thread is tearing down.
pub fn render() -> String {
    ENTRIES
        .try_with(|entries| {
            let Ok(entries) = entries.try_borrow() else {
                return String::new();
            };
            entries
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default()
}

/// Number of keys on this thread
pub fn len() -> usize {
    ENTRIES.with(|entries| entries.borrow().len())
}

/// Merge entries into this thread's map
///
/// Colliding keys are overwritten in place, other keys already present are
/// kept, and new keys are appended in the order given. Fails only while the
/// thread is tearing down its thread-locals.
pub fn put_all<I, K, V>(items: I) -> Result<(), DiagError>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let (merged, total) = ENTRIES
        .try_with(|entries| {
            let mut entries = entries.borrow_mut();
            let mut merged = 0usize;
            for (key, value) in items {
                upsert(&mut entries, key.into(), value.into());
                merged += 1;
            }
            (merged, entries.len())
        })
        .map_err(|_| DiagError::Unavailable { store: "mdc" })?;
    // logged after the borrow ends: the log formatter reads this map
    debug!(merged, total, "mdc::put_all: merged");
    Ok(())
}

/// Put a value for the lifetime of the returned guard
///
/// Dropping the guard restores the previous value, or removes the key if it
/// was absent.
pub fn scoped(key: impl Into<String>, value: impl Into<String>) -> MdcGuard {
    let key = key.into();
    let previous = put(key.clone(), value);
    MdcGuard { key, previous }
}

/// Restores an MDC key on drop
#[must_use = "the value is removed again as soon as the guard is dropped"]
pub struct MdcGuard {
    key: String,
    previous: Option<String>,
}

impl Drop for MdcGuard {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(value) => {
                put(self.key.clone(), value);
            }
            None => {
                remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_put_get_remove() {
        clear();
        assert_eq!(put("request_id", "r1"), None);
        assert_eq!(get("request_id").as_deref(), Some("r1"));
        assert_eq!(put("request_id", "r2").as_deref(), Some("r1"));
        assert_eq!(remove("request_id").as_deref(), Some("r2"));
        assert_eq!(get("request_id"), None);
        assert_eq!(len(), 0);
    }

    #[test]
    fn test_overwrite_keeps_position() {
        clear();
        put("a", "1");
        put("b", "2");
        put("a", "3");

        let keys: Vec<_> = entries().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(get("a").as_deref(), Some("3"));
    }

    #[test]
    fn test_put_all_merges() {
        clear();
        put("local", "kept");
        put("shared", "old");

        put_all([("shared", "new"), ("added", "x")]).unwrap();

        assert_eq!(
            entries(),
            vec![
                ("local".to_string(), "kept".to_string()),
                ("shared".to_string(), "new".to_string()),
                ("added".to_string(), "x".to_string()),
            ]
        );
    }

    #[test]
    fn test_render() {
        clear();
        assert_eq!(render(), "");
        put("request_id", "r1");
        put("user", "alice");
        assert_eq!(render(), "request_id=r1 user=alice");
    }

    #[test]
    fn test_values_do_not_cross_threads() {
        clear();
        put("request_id", "r1");

        let seen = std::thread::spawn(|| get("request_id")).join().unwrap();
        assert_eq!(seen, None);
    }

    #[test]
    fn test_scoped_restores_previous() {
        clear();
        put("step", "outer");
        {
            let _guard = scoped("step", "inner");
            assert_eq!(get("step").as_deref(), Some("inner"));
        }
        assert_eq!(get("step").as_deref(), Some("outer"));

        {
            let _guard = scoped("temp", "1");
        }
        assert_eq!(get("temp"), None);
    }

    proptest! {
        #[test]
        fn prop_put_all_is_idempotent(items in proptest::collection::vec(("[a-d]", "[a-z]{0,4}"), 0..12)) {
            clear();
            put_all(items.clone()).unwrap();
            let once = entries();
            put_all(items).unwrap();
            prop_assert_eq!(entries(), once);
        }

        #[test]
        fn prop_keys_stay_unique(items in proptest::collection::vec(("[a-c]", "[0-9]"), 0..20)) {
            clear();
            for (k, v) in &items {
                put(k.as_str(), v.as_str());
            }
            let mut keys: Vec<_> = entries().into_iter().map(|(k, _)| k).collect();
            let total = keys.len();
            keys.sort();
            keys.dedup();
            prop_assert_eq!(keys.len(), total);
        }
    }
}
