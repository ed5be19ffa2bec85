//! Configuration Storage
//!
//! Reads engine settings from a JSON file.
//! Config location: ~/.sshgate/engine.json

use std::path::{Path, PathBuf};
use tokio::fs;

use super::types::EngineConfig;

/// Configuration storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Get the configuration directory (~/.sshgate)
pub fn config_dir() -> Result<PathBuf, StorageError> {
    dirs::home_dir()
        .map(|home| home.join(".sshgate"))
        .ok_or(StorageError::NoConfigDir)
}

/// Get the engine config file path
pub fn config_file() -> Result<PathBuf, StorageError> {
    Ok(config_dir()?.join("engine.json"))
}

impl EngineConfig {
    /// Load configuration from disk.
    ///
    /// A missing file yields defaults; a malformed one is an error.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        match fs::read_to_string(path).await {
            Ok(contents) => {
                let config = serde_json::from_str(&contents)?;
                tracing::debug!("Loaded engine config from {:?}", path);
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No engine config at {:?}, using defaults", path);
                Ok(Self::default())
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Load from the default location
    pub async fn load_default() -> Result<Self, StorageError> {
        Self::load(config_file()?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::GoverningPolicy;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_load_nonexistent() {
        let temp = tempdir().unwrap();
        let config = EngineConfig::load(temp.path().join("engine.json"))
            .await
            .unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn test_load_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("engine.json");
        std::fs::write(
            &path,
            r#"{"connection_idle_secs": 120, "governing": {"policy": "first_found"}}"#,
        )
        .unwrap();

        let config = EngineConfig::load(&path).await.unwrap();
        assert_eq!(config.connection_idle_secs, 120);
        assert_eq!(config.governing, GoverningPolicy::FirstFound);
    }

    #[tokio::test]
    async fn test_corrupted_config_is_an_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("engine.json");
        std::fs::write(&path, "{ nope").unwrap();

        assert!(matches!(
            EngineConfig::load(&path).await,
            Err(StorageError::Json(_))
        ));
    }
}
