//! Sensitive-data masking patterns
//!
//! A thread carries a set of regular expressions; any text logged on behalf of
//! that thread has every match replaced by asterisks, one per character.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use regex::Regex;
use tracing::debug;

use crate::DiagError;

thread_local! {
    static CURRENT: MaskingSlot = MaskingSlot::default();
}

/// Immutable, de-duplicated set of compiled masking patterns
///
/// Cloning is cheap; clones share the compiled expressions.
#[derive(Clone, Default)]
pub struct MaskingPatterns {
    patterns: Arc<[Regex]>,
}

impl MaskingPatterns {
    /// Compile a set of patterns, dropping duplicates by source text
    pub fn compile<I, S>(patterns: I) -> Result<Self, DiagError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut compiled: Vec<Regex> = Vec::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            if compiled.iter().any(|r| r.as_str() == pattern) {
                continue;
            }
            let regex = Regex::new(pattern).map_err(|source| DiagError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;
            compiled.push(regex);
        }
        Ok(Self {
            patterns: compiled.into(),
        })
    }

    /// Copy of this set with one more pattern
    pub fn with(&self, pattern: &str) -> Result<Self, DiagError> {
        Self::compile(self.sources().chain(std::iter::once(pattern)))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Source text of each pattern, in insertion order
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(Regex::as_str)
    }

    /// Hide every match of every pattern
    pub fn mask(&self, text: &str) -> String {
        let mut masked = text.to_string();
        for regex in self.patterns.iter() {
            masked = regex
                .replace_all(&masked, |caps: &regex::Captures<'_>| "*".repeat(caps[0].chars().count()))
                .into_owned();
        }
        masked
    }
}

impl fmt::Debug for MaskingPatterns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.sources()).finish()
    }
}

impl PartialEq for MaskingPatterns {
    fn eq(&self, other: &Self) -> bool {
        self.sources().eq(other.sources())
    }
}

/// Handle to one thread's masking set
///
/// Obtained on the owning thread with [`slot`]; the set can then be read or
/// replaced from any thread.
#[derive(Clone, Default)]
pub struct MaskingSlot {
    patterns: Arc<Mutex<MaskingPatterns>>,
}

impl MaskingSlot {
    fn lock(&self) -> MutexGuard<'_, MaskingPatterns> {
        self.patterns.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self) -> MaskingPatterns {
        self.lock().clone()
    }

    /// Replace the set, returning the one it replaced
    pub fn replace(&self, patterns: MaskingPatterns) -> MaskingPatterns {
        std::mem::replace(&mut *self.lock(), patterns)
    }
}

impl fmt::Debug for MaskingSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MaskingSlot").field(&*self.lock()).finish()
    }
}

/// Handle to this thread's masking set
pub fn slot() -> MaskingSlot {
    CURRENT.with(MaskingSlot::clone)
}

/// The set active on this thread
pub fn current() -> MaskingPatterns {
    CURRENT.with(MaskingSlot::get)
}

/// Replace the set active on this thread
pub fn install(patterns: &MaskingPatterns) {
    debug!(count = patterns.len(), "masking::install: called");
    CURRENT.with(|slot| slot.replace(patterns.clone()));
}

/// Add one pattern to the set active on this thread
pub fn add(pattern: &str) -> Result<(), DiagError> {
    debug!(%pattern, "masking::add: called");
    let extended = current().with(pattern)?;
    install(&extended);
    Ok(())
}

/// Drop every pattern active on this thread
pub fn clear() {
    debug!("masking::clear: called");
    CURRENT.with(|slot| slot.replace(MaskingPatterns::default()));
}

/// Mask text with the set active on this thread
///
/// Returns the text unchanged while the thread is tearing down its
/// thread-locals.
pub fn mask(text: &str) -> String {
    CURRENT
        .try_with(|slot| slot.lock().mask(text))
        .unwrap_or_else(|_| text.to_string())
}

/// Install a set for the lifetime of the returned guard
///
/// Dropping the guard puts back the set that was active before.
pub fn scoped(patterns: &MaskingPatterns) -> MaskingGuard {
    debug!(count = patterns.len(), "masking::scoped: called");
    let previous = CURRENT.with(|slot| slot.replace(patterns.clone()));
    MaskingGuard {
        slot: slot(),
        previous: Some(previous),
    }
}

/// Restores a thread's masking set on drop
#[must_use = "the previous set is restored as soon as the guard is dropped"]
pub struct MaskingGuard {
    slot: MaskingSlot,
    previous: Option<MaskingPatterns>,
}

impl Drop for MaskingGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.slot.replace(previous);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_mask_replaces_matches() {
        let patterns = MaskingPatterns::compile(["secret-\\d+"]).unwrap();
        assert_eq!(patterns.mask("token secret-42 ok"), "token ********* ok");
    }

    #[test]
    fn test_mask_counts_characters_not_bytes() {
        let patterns = MaskingPatterns::compile(["pässwörd"]).unwrap();
        assert_eq!(patterns.mask("my pässwörd"), "my ********");
    }

    #[test]
    fn test_compile_drops_duplicates() {
        let patterns = MaskingPatterns::compile(["a+", "b+", "a+"]).unwrap();
        assert_eq!(patterns.len(), 2);
        assert_eq!(patterns.sources().collect::<Vec<_>>(), vec!["a+", "b+"]);
    }

    #[test]
    fn test_compile_rejects_invalid_regex() {
        let err = MaskingPatterns::compile(["ok", "("]).unwrap_err();
        assert!(matches!(err, DiagError::InvalidPattern { ref pattern, .. } if pattern == "("));
    }

    #[test]
    fn test_thread_local_install_and_clear() {
        clear();
        assert_eq!(mask("pin=1234"), "pin=1234");

        add("\\d{4}").unwrap();
        assert_eq!(mask("pin=1234"), "pin=****");
        assert_eq!(current().len(), 1);

        let other_thread = std::thread::spawn(|| mask("pin=1234")).join().unwrap();
        assert_eq!(other_thread, "pin=1234");

        clear();
        assert!(current().is_empty());
    }

    #[test]
    fn test_install_shares_compiled_set() {
        let patterns = MaskingPatterns::compile(["x"]).unwrap();
        install(&patterns);
        assert_eq!(current(), patterns);
        clear();
    }

    #[test]
    fn test_slot_replaced_from_other_thread() {
        install(&MaskingPatterns::compile(["\\d+"]).unwrap());
        let handle = slot();

        let previous = std::thread::spawn(move || handle.replace(MaskingPatterns::default()))
            .join()
            .unwrap();

        assert_eq!(previous.len(), 1);
        assert!(current().is_empty());
    }

    #[test]
    fn test_scoped_restores_previous_set() {
        let outer = MaskingPatterns::compile(["outer"]).unwrap();
        install(&outer);
        {
            let _guard = scoped(&MaskingPatterns::compile(["inner"]).unwrap());
            assert_eq!(mask("inner outer"), "***** outer");
        }
        assert_eq!(current(), outer);
        clear();
    }

    proptest! {
        #[test]
        fn prop_mask_preserves_char_count(text in "\\PC{0,40}") {
            let patterns = MaskingPatterns::compile(["[a-f]+", "\\d"]).unwrap();
            prop_assert_eq!(patterns.mask(&text).chars().count(), text.chars().count());
        }
    }
}
