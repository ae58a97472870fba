//! Configuration for the whitelist middleware and its HTTP adapter.

use crate::error::WhitelistError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config format versions this crate understands.
pub const SUPPORTED_VERSIONS: &[&str] = &["1"];

/// Top-level configuration, usually loaded from YAML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhitelistConfig {
    /// Decision and adapter settings
    pub settings: SettingsConfig,
    /// Where whitelist entries live
    pub store: StoreConfig,
    /// Config format version; empty means the current one
    pub version: String,
}

impl WhitelistConfig {
    /// Parse a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self, WhitelistError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that parse but cannot work.
    pub fn validate(&self) -> Result<(), WhitelistError> {
        if !self.version.is_empty() && !SUPPORTED_VERSIONS.contains(&self.version.as_str()) {
            return Err(WhitelistError::Config(format!(
                "unsupported config version '{}' (supported: {})",
                self.version,
                SUPPORTED_VERSIONS.join(", ")
            )));
        }
        if self.settings.max_body_size == 0 {
            return Err(WhitelistError::Config(
                "settings.max_body_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Load from `path`, falling back to defaults when the file does not exist.
    pub async fn load(path: &Path) -> Result<Self, WhitelistError> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Self::from_yaml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Settings that shape each request's decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// Report validation failures but let the request through
    pub dry_run: bool,
    /// What to do when the validation error hook itself fails
    pub hook_failure: HookFailurePolicy,
    /// Whether the HTTP adapter parses request bodies
    pub parse_body: bool,
    /// Largest request body the HTTP adapter will buffer
    pub max_body_size: usize,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            hook_failure: HookFailurePolicy::FailOpen,
            parse_body: true,
            max_body_size: 1_048_576,
        }
    }
}

/// Policy for errors returned by the validation error hook.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookFailurePolicy {
    /// Log the error and decide as if the hook had succeeded
    #[default]
    FailOpen,
    /// Abort the request with a server error
    FailClosed,
}

/// Whitelist storage settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// YAML file backing a durable whitelist
    pub whitelist_file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WhitelistConfig::default();
        assert!(!config.settings.dry_run);
        assert!(config.settings.parse_body);
        assert_eq!(config.settings.hook_failure, HookFailurePolicy::FailOpen);
        assert_eq!(config.settings.max_body_size, 1_048_576);
        assert_eq!(config.store.whitelist_file, None);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
version: "1"
settings:
  dry_run: true
  hook_failure: fail_closed
store:
  whitelist_file: /etc/graphql/whitelist.yaml
"#;
        let config = WhitelistConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.version, "1");
        assert!(config.settings.dry_run);
        assert_eq!(config.settings.hook_failure, HookFailurePolicy::FailClosed);
        // Unspecified fields keep their defaults
        assert!(config.settings.parse_body);
        assert_eq!(
            config.store.whitelist_file,
            Some(PathBuf::from("/etc/graphql/whitelist.yaml"))
        );
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        let yaml = "settings:\n  hook_failure: sometimes\n";
        assert!(matches!(
            WhitelistConfig::from_yaml(yaml),
            Err(WhitelistError::Yaml(_))
        ));
    }

    #[test]
    fn test_unsupported_version_is_rejected() {
        let result = WhitelistConfig::from_yaml("version: \"2\"\n");
        match result {
            Err(WhitelistError::Config(message)) => assert!(message.contains("'2'")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_zero_body_size_is_rejected() {
        let yaml = "settings:\n  max_body_size: 0\n";
        assert!(matches!(
            WhitelistConfig::from_yaml(yaml),
            Err(WhitelistError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = WhitelistConfig::load(&dir.path().join("absent.yaml"))
            .await
            .unwrap();
        assert_eq!(config, WhitelistConfig::default());
    }
}
