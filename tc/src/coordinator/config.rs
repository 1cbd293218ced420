//! Handoff coordinator configuration

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Handoff coordinator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffConfig {
    /// Tag the child thread with `<parent label><separator><description>` while it works
    #[serde(rename = "label-threads", default = "default_label_threads")]
    pub label_threads: bool,

    /// Separator between the parent label and the handoff description
    #[serde(rename = "label-separator", default = "default_label_separator")]
    pub label_separator: String,
}

fn default_label_threads() -> bool {
    debug!("default_label_threads: called");
    true
}

fn default_label_separator() -> String {
    debug!("default_label_separator: called");
    "/".to_string()
}

impl Default for HandoffConfig {
    fn default() -> Self {
        debug!("HandoffConfig::default: called");
        Self {
            label_threads: default_label_threads(),
            label_separator: default_label_separator(),
        }
    }
}

impl HandoffConfig {
    /// Label for a child thread working on behalf of `parent_label`
    pub fn child_label(&self, parent_label: &str, description: &str) -> String {
        debug!(%parent_label, %description, "HandoffConfig::child_label: called");
        format!("{}{}{}", parent_label, self.label_separator, description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HandoffConfig::default();
        assert!(config.label_threads);
        assert_eq!(config.label_separator, "/");
    }

    #[test]
    fn test_child_label() {
        let config = HandoffConfig {
            label_separator: "::".to_string(),
            ..Default::default()
        };
        assert_eq!(config.child_label("main", "branch-2"), "main::branch-2");
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: HandoffConfig = serde_yaml::from_str("label-threads: false").unwrap();
        assert!(!config.label_threads);
        assert_eq!(config.label_separator, "/");
    }
}
