//! threadconnect configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use diagcontext::MaskingPatterns;

use crate::coordinator::HandoffConfig;

/// Main threadconnect configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Coordinator behaviour
    pub handoff: HandoffConfig,

    /// Sensitive-data masking
    pub masking: MaskingConfig,

    /// Lifecycle observer selection
    pub observer: ObserverConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .threadconnect.yml
        let local_config = PathBuf::from(".threadconnect.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/threadconnect/threadconnect.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("threadconnect").join("threadconnect.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read just the log level, before logging is set up
    ///
    /// Errors are swallowed; the full load reports them once logging works.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|config| config.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.masking.compile().context("Invalid masking configuration")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// Sensitive-data masking configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskingConfig {
    /// Regular expressions whose matches are hidden in log output
    pub patterns: Vec<String>,
}

impl MaskingConfig {
    /// Compile the configured patterns
    pub fn compile(&self) -> Result<MaskingPatterns> {
        Ok(MaskingPatterns::compile(&self.patterns)?)
    }
}

/// Which lifecycle observer the demo attaches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObserverKind {
    None,
    #[default]
    Recording,
    Debug,
}

/// Lifecycle observer configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    pub kind: ObserverKind,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, None);
        assert!(config.handoff.label_threads);
        assert!(config.masking.patterns.is_empty());
        assert_eq!(config.observer.kind, ObserverKind::Recording);
    }

    #[test]
    fn test_load_from_explicit_path() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("tc.yml");
        fs::write(
            &path,
            r#"
log-level: debug
handoff:
  label-separator: "::"
masking:
  patterns:
    - "password=\\S+"
observer:
  kind: debug
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.handoff.label_separator, "::");
        assert!(config.handoff.label_threads);
        assert_eq!(config.masking.patterns, vec!["password=\\S+".to_string()]);
        assert_eq!(config.observer.kind, ObserverKind::Debug);
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("debug"));
    }

    #[test]
    fn test_invalid_masking_pattern_rejected() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("tc.yml");
        fs::write(&path, "masking:\n  patterns: [\"(\"]\n").unwrap();

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("Invalid masking"));
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("saved.yml");
        let config = Config {
            log_level: Some("warn".to_string()),
            masking: MaskingConfig {
                patterns: vec!["\\d{16}".to_string()],
            },
            ..Default::default()
        };

        config.save(&path).unwrap();
        assert_eq!(Config::load(Some(&path)).unwrap(), config);
    }

    #[test]
    #[serial]
    fn test_load_project_local_config() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        fs::write(temp_dir.path().join(".threadconnect.yml"), "observer:\n  kind: none\n").unwrap();

        let original = std::env::current_dir().unwrap();
        std::env::set_current_dir(temp_dir.path()).unwrap();
        let loaded = Config::load(None);
        std::env::set_current_dir(original).unwrap();

        assert_eq!(loaded.unwrap().observer.kind, ObserverKind::None);
    }
}
