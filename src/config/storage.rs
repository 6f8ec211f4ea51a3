//! Configuration loading
//!
//! Config location: ~/.oxidexfer/config.json on macOS/Linux,
//! %APPDATA%\OxideXfer\config.json on Windows. The engine only reads it.

use std::path::PathBuf;

use tokio::fs;
use tracing::{info, warn};

use super::types::EngineConfig;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn config_dir() -> Result<PathBuf, StorageError> {
    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            return Ok(app_data.join("OxideXfer"));
        }
        dirs::home_dir()
            .map(|home| home.join(".oxidexfer"))
            .ok_or(StorageError::NoConfigDir)
    }

    #[cfg(not(windows))]
    {
        dirs::home_dir()
            .map(|home| home.join(".oxidexfer"))
            .ok_or(StorageError::NoConfigDir)
    }
}

pub fn config_file() -> Result<PathBuf, StorageError> {
    Ok(config_dir()?.join("config.json"))
}

pub struct ConfigStorage {
    path: PathBuf,
}

impl ConfigStorage {
    pub fn new() -> Result<Self, StorageError> {
        Ok(Self { path: config_file()? })
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Load the config.
    ///
    /// A missing file yields defaults. A corrupted file is logged and also
    /// yields defaults; it is left in place for the user to fix.
    pub async fn load(&self) -> Result<EngineConfig, StorageError> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => match EngineConfig::from_json_str(&contents) {
                Ok(config) => {
                    info!("Loaded engine config from {:?}", self.path);
                    Ok(config)
                }
                Err(e) => {
                    warn!("Config file {:?} corrupted, using defaults: {}", self.path, e);
                    Ok(EngineConfig::default())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(EngineConfig::default()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_load_nonexistent() {
        let temp = tempdir().unwrap();
        let storage = ConfigStorage::with_path(temp.path().join("config.json"));
        assert_eq!(storage.load().await.unwrap(), EngineConfig::default());
    }

    #[tokio::test]
    async fn test_load_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, r#"{ "cacheTtlMs": 2500 }"#).unwrap();

        let config = ConfigStorage::with_path(path).load().await.unwrap();
        assert_eq!(config.cache_ttl_ms, 2500);
        assert_eq!(config.reconnect_delay_ms, 2000);
    }

    #[tokio::test]
    async fn test_corrupted_file_falls_back_to_defaults() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let config = ConfigStorage::with_path(path.clone()).load().await.unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(path.exists());
    }
}
