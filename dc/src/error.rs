//! Diagnostic context error types

use thiserror::Error;

/// Errors raised by the thread-local diagnostic stores
#[derive(Debug, Error)]
pub enum DiagError {
    #[error("Invalid masking pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Thread-local {store} store is no longer available on this thread")]
    Unavailable { store: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_pattern_message() {
        let source = regex::Regex::new("(").unwrap_err();
        let err = DiagError::InvalidPattern {
            pattern: "(".to_string(),
            source,
        };

        let msg = err.to_string();
        assert!(msg.contains("'('"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_unavailable_message() {
        let err = DiagError::Unavailable { store: "mdc" };
        assert!(err.to_string().contains("mdc"));
    }
}
