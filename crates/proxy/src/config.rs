//! Proxy configuration
//!
//! Loaded from TOML:
//!
//! ```toml
//! [storage]
//! path = "/var/lib/acmeproxy/state.redb"
//! file_mode = 0o600
//!
//! [agent]
//! retry_after_secs = 5
//! key_type = "ec256"
//! bundle = true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use acmeproxy_storage::{Store, StorageError, StoreOptions};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::acme::KeyType;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    /// Database location and permissions
    pub storage: StoreOptions,

    /// Certificate agent settings
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Certificate agent settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// Hint returned with `RetryLater` while a certificate is pending
    pub retry_after_secs: u64,

    /// Key algorithm requested for new certificates
    pub key_type: KeyType,

    /// Request the issuer chain bundled with the certificate
    pub bundle: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            retry_after_secs: 5,
            key_type: KeyType::default(),
            bundle: true,
        }
    }
}

impl AgentConfig {
    pub fn retry_after(&self) -> Duration {
        Duration::from_secs(self.retry_after_secs)
    }
}

impl ProxyConfig {
    /// Load and validate a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading configuration");

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;

        info!(
            path = %path.display(),
            storage = %config.storage.path.display(),
            key_type = %config.agent.key_type,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("storage.path must not be empty".into()));
        }
        if self.storage.file_mode & !0o777 != 0 {
            return Err(ConfigError::Invalid(format!(
                "storage.file_mode {:o} has bits outside 0o777",
                self.storage.file_mode
            )));
        }
        if self.agent.retry_after_secs == 0 {
            return Err(ConfigError::Invalid(
                "agent.retry_after_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Open the configured store
    pub fn open_store(&self) -> Result<Store, StorageError> {
        let store = Store::new(self.storage.clone());
        store.open()?;
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = ProxyConfig::from_toml_str(
            r#"
            [storage]
            path = "/tmp/acmeproxy.redb"
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.path, PathBuf::from("/tmp/acmeproxy.redb"));
        assert_eq!(config.storage.file_mode, 0o600);
        assert_eq!(config.agent, AgentConfig::default());
        assert_eq!(config.agent.retry_after(), Duration::from_secs(5));
    }

    #[test]
    fn test_full_config() {
        let config = ProxyConfig::from_toml_str(
            r#"
            [storage]
            path = "state.redb"
            file_mode = 0o640

            [agent]
            retry_after_secs = 30
            key_type = "rsa2048"
            bundle = false
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.file_mode, 0o640);
        assert_eq!(config.agent.retry_after_secs, 30);
        assert_eq!(config.agent.key_type, KeyType::Rsa2048);
        assert!(!config.agent.bundle);
    }

    #[test]
    fn test_missing_storage_section() {
        let err = ProxyConfig::from_toml_str("[agent]\nbundle = true\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = ProxyConfig::from_toml_str(
            r#"
            [storage]
            path = "state.redb"

            [agent]
            retry_after = 5
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation_errors() {
        let cases = [
            "[storage]\npath = \"\"\n",
            "[storage]\npath = \"s.redb\"\nfile_mode = 0o4755\n",
            "[storage]\npath = \"s.redb\"\n[agent]\nretry_after_secs = 0\n",
        ];

        for case in cases {
            let err = ProxyConfig::from_toml_str(case).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "accepted: {case}");
        }
    }

    #[test]
    fn test_from_file_and_open_store() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("data").join("state.redb");
        let config_path = temp_dir.path().join("acmeproxy.toml");
        std::fs::write(
            &config_path,
            format!("[storage]\npath = {:?}\n", db_path.display().to_string()),
        )
        .unwrap();

        let config = ProxyConfig::from_file(&config_path).unwrap();
        let store = config.open_store().unwrap();

        assert_eq!(store.path(), db_path.as_path());
        assert!(db_path.exists());
    }

    #[test]
    fn test_from_file_missing() {
        let err = ProxyConfig::from_file("/nonexistent/acmeproxy.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
