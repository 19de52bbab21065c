//! Operator configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via --config or PERMFSM_CONFIG)
//! 3. Environment variables

use permfsm_core::Account;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    /// Default tracing filter when RUST_LOG is unset.
    pub log_level: String,
    /// Account calls are made as when `--as` is not given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<Account>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            log_level: "warn".to_string(),
            account: None,
        }
    }
}

impl Config {
    /// Loads configuration from `path` (or PERMFSM_CONFIG), then applies
    /// environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match std::env::var("PERMFSM_CONFIG") {
                Ok(path) => Self::from_file(&path)?,
                Err(_) => Self::default(),
            },
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.storage.apply_env_overrides();

        if let Ok(level) = std::env::var("PERMFSM_LOG") {
            self.log_level = level;
        }

        if let Ok(account) = std::env::var("PERMFSM_ACCOUNT") {
            let parsed = account.parse().map_err(|e| {
                ConfigError::Validation(format!("PERMFSM_ACCOUNT: {}", e))
            })?;
            self.account = Some(parsed);
        }

        Ok(())
    }
}

/// Where and how the journal is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the machine journal.
    pub data_dir: PathBuf,
    pub fsync_policy: FsyncPolicy,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_policy: FsyncPolicy::EveryWrite,
        }
    }
}

impl StorageConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("PERMFSM_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }

        if let Ok(policy) = std::env::var("PERMFSM_FSYNC") {
            self.fsync_policy = FsyncPolicy::parse(&policy);
        }
    }
}

/// Fsync policy for journal writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsyncPolicy {
    EveryWrite,
    EveryN(u32),
    Never,
}

impl FsyncPolicy {
    /// Parses `every_write`, `never` or `every_n:<count>`. Anything else is
    /// treated as `every_write`.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "never" => FsyncPolicy::Never,
            s if s.starts_with("every_n:") => FsyncPolicy::EveryN(s[8..].parse().unwrap_or(100)),
            _ => FsyncPolicy::EveryWrite,
        }
    }
}

impl From<FsyncPolicy> for permfsm_journal::FsyncPolicy {
    fn from(policy: FsyncPolicy) -> Self {
        match policy {
            FsyncPolicy::EveryWrite => permfsm_journal::FsyncPolicy::EveryWrite,
            FsyncPolicy::EveryN(n) => permfsm_journal::FsyncPolicy::EveryN(n),
            FsyncPolicy::Never => permfsm_journal::FsyncPolicy::Never,
        }
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{}': {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("configuration validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.storage.data_dir, PathBuf::from("./data"));
        assert_eq!(config.storage.fsync_policy, FsyncPolicy::EveryWrite);
        assert_eq!(config.log_level, "warn");
        assert!(config.account.is_none());
    }

    #[test]
    fn test_fsync_policy_parse() {
        assert_eq!(FsyncPolicy::parse("never"), FsyncPolicy::Never);
        assert_eq!(FsyncPolicy::parse("EVERY_N:8"), FsyncPolicy::EveryN(8));
        assert_eq!(FsyncPolicy::parse("every_n:x"), FsyncPolicy::EveryN(100));
        assert_eq!(FsyncPolicy::parse("whatever"), FsyncPolicy::EveryWrite);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "storage:\n  data_dir: /var/lib/permfsm\n  fsync_policy: never\naccount: \"0x00000000000000000000000000000000000000aa\""
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/permfsm"));
        assert_eq!(config.storage.fsync_policy, FsyncPolicy::Never);
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.account.unwrap().as_bytes()[19], 0xaa);
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/nonexistent/permfsm.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.storage.data_dir, config.storage.data_dir);
    }
}
