//! Sync layer configuration.
//!
//! Loaded from a RON file; every field has a default so a missing file or a
//! partial file both work.
//!
//! ```ron
//! (
//!     identity_timeout_ms: 5000,
//!     skip_remote_when_offline: false,
//!     retry: (max_attempts: 3, attempt_timeout_ms: Some(8000)),
//! )
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{APP_DIR, DEFAULT_IDENTITY_TIMEOUT, DEFAULT_STATE_EVENT_CAPACITY};
use crate::remote::RetryPolicy;

/// Error type for config loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// SQLite file for the local store. `None` uses the platform data dir.
    pub database_path: Option<PathBuf>,
    /// How long `load_user_data` waits for identity resolution.
    pub identity_timeout_ms: u64,
    /// Skip remote attempts while the connectivity monitor reports offline.
    pub skip_remote_when_offline: bool,
    /// Applied by wrapping the adapter in `RetryingRemote`.
    pub retry: RetryPolicy,
    pub state_event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            identity_timeout_ms: DEFAULT_IDENTITY_TIMEOUT.as_millis() as u64,
            skip_remote_when_offline: true,
            retry: RetryPolicy::default(),
            state_event_capacity: DEFAULT_STATE_EVENT_CAPACITY,
        }
    }
}

impl SyncConfig {
    /// `<config dir>/chiron/sync.ron`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR).join("sync.ron"))
    }

    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron(&text)
    }

    /// Load `path`, or defaults if it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn identity_timeout(&self) -> Duration {
        Duration::from_millis(self.identity_timeout_ms)
    }

    /// The configured database path, or `<data dir>/chiron/local.db`.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.database_path
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join(APP_DIR).join("local.db")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_fills_defaults() {
        let config = SyncConfig::from_ron("(identity_timeout_ms: 2500)").unwrap();
        assert_eq!(config.identity_timeout(), Duration::from_millis(2500));
        assert!(config.skip_remote_when_offline);
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.state_event_capacity, DEFAULT_STATE_EVENT_CAPACITY);
    }

    #[test]
    fn test_nested_retry_policy() {
        let config = SyncConfig::from_ron(
            "(retry: (max_attempts: 3, attempt_timeout_ms: Some(8000)), skip_remote_when_offline: false)",
        )
        .unwrap();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.attempt_timeout_ms, Some(8000));
        assert_eq!(config.retry.initial_backoff_ms, 200);
        assert!(!config.skip_remote_when_offline);
    }

    #[test]
    fn test_bad_ron_is_an_error() {
        assert!(matches!(
            SyncConfig::from_ron("(identity_timeout_ms: \"soon\")"),
            Err(ConfigError::Ron(_))
        ));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig::load_or_default(&dir.path().join("sync.ron")).unwrap();
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.ron");
        std::fs::write(&path, "(database_path: Some(\"/tmp/chiron.db\"))").unwrap();
        let config = SyncConfig::load_or_default(&path).unwrap();
        assert_eq!(config.database_path(), Some(PathBuf::from("/tmp/chiron.db")));
    }
}
