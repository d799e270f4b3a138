//! Player configuration
//!
//! Handles:
//! - Content authority endpoint and API key
//! - Poll / heartbeat cadence, offline threshold, timeouts and backoff
//! - Local storage location and cache capacity
//!
//! Read from `$SIGNAGE_PLAYER_CONFIG` when set, otherwise from the OS config
//! directory. A missing file means first boot and yields the defaults.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::cache::DEFAULT_MAX_CACHE_BYTES;

pub const CONFIG_ENV_VAR: &str = "SIGNAGE_PLAYER_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub server: ServerConfig,
    pub device: DeviceConfig,
    pub sync: SyncConfig,
    pub storage: StorageConfig,
    pub heartbeat: HeartbeatConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Derived from the primary MAC when unset
    pub device_id: Option<String>,
    pub player_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub poll_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub offline_threshold: u32,
    pub resolve_timeout_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: Option<PathBuf>,
    pub max_cache_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub include_health: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: None,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            player_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 30_000,
            heartbeat_interval_ms: 30_000,
            offline_threshold: 3,
            resolve_timeout_ms: 10_000,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            max_cache_bytes: DEFAULT_MAX_CACHE_BYTES,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            include_health: true,
        }
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.backoff_base_ms, self.backoff_max_ms)
    }
}

impl PlayerConfig {
    /// Load from the environment-selected path or the OS default location
    pub async fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        Self::load_from(&path).await
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("no config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config {:?}", path))?;
        let config: PlayerConfig = toml::from_str(&content)
            .with_context(|| format!("Invalid config {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self) -> Result<()> {
        let path = Self::config_file_path()?;
        self.save_to(&path).await
    }

    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    pub fn config_file_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Ok(PathBuf::from(path));
        }

        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        path.push("signage-player");
        path.push("config.toml");
        Ok(path)
    }

    /// Directory holding the content cache and credential hashes
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.storage.data_dir {
            return Ok(dir.clone());
        }
        let mut path = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        path.push("signage-player");
        Ok(path)
    }

    pub fn validate(&self) -> Result<()> {
        let sync = &self.sync;
        if sync.poll_interval_ms == 0 || sync.heartbeat_interval_ms == 0 {
            bail!("poll and heartbeat intervals must be greater than zero");
        }
        if sync.resolve_timeout_ms == 0 {
            bail!("resolve_timeout_ms must be greater than zero");
        }
        if sync.offline_threshold == 0 {
            bail!("offline_threshold must be at least 1");
        }
        if sync.backoff_base_ms == 0 || sync.backoff_max_ms < sync.backoff_base_ms {
            bail!("backoff_base_ms must be > 0 and <= backoff_max_ms");
        }
        if self.server.base_url.trim().is_empty() {
            bail!("server.base_url must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = PlayerConfig::default();
        assert_eq!(config.sync.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.sync.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.sync.offline_threshold, 3);
        assert_eq!(config.sync.resolve_timeout(), Duration::from_secs(10));
        assert_eq!(config.sync.backoff(), BackoffPolicy::new(1_000, 30_000));
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(
            &path,
            "[server]\nbase_url = \"https://cms.example\"\n\n[sync]\noffline_threshold = 5\n",
        )
        .await
        .unwrap();

        let config = PlayerConfig::load_from(&path).await.unwrap();
        assert_eq!(config.server.base_url, "https://cms.example");
        assert_eq!(config.sync.offline_threshold, 5);
        assert_eq!(config.sync.poll_interval_ms, 30_000);
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = PlayerConfig::load_from(&dir.path().join("absent.toml"))
            .await
            .unwrap();
        assert_eq!(config, PlayerConfig::default());
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = PlayerConfig::default();
        config.device.device_id = Some("screen-42".into());
        config.save_to(&path).await.unwrap();

        let loaded = PlayerConfig::load_from(&path).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_validation() {
        let mut config = PlayerConfig::default();
        config.sync.backoff_max_ms = 10;
        assert!(config.validate().is_err());

        let mut config = PlayerConfig::default();
        config.sync.offline_threshold = 0;
        assert!(config.validate().is_err());
    }
}
