pub mod connection_config;
pub mod stream_config;

use std::path::Path;

use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

pub use connection_config::{ConnectionConfig, ReconnectPolicy};
pub use stream_config::StreamConfig;

use crate::utils::ensure_directory_exists;

pub const CONFIG_FILE_NAME: &str = "bioband_config.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub connection: ConnectionConfig,
    pub stream: StreamConfig,
}

impl AppConfig {
    /// Loads the config from `file_path`, or the defaults if it does not exist.
    pub async fn load_config<P: AsRef<Path>>(file_path: P) -> Result<Self> {
        let file_path = file_path.as_ref();

        if !fs::try_exists(file_path).await? {
            warn!("Config file not found at {:?}, using default.", file_path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(file_path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!("Config loaded from {:?}", file_path);
        Ok(config)
    }

    /// Saves the current config to `file_path`, creating its directory.
    pub async fn save_config<P: AsRef<Path>>(&self, file_path: P) -> Result<()> {
        let file_path = file_path.as_ref();
        if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_directory_exists(parent).await?;
        }

        let config_json = match serde_json::to_string_pretty(&self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(file_path, config_json).await?;
        info!("Config saved to {:?}", file_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("bioband-config-{}-{}", name, std::process::id()))
    }

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let path = scratch_dir("missing").join(CONFIG_FILE_NAME);
        let config = AppConfig::load_config(&path).await.unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[tokio::test]
    async fn saved_config_loads_back() {
        let dir = scratch_dir("saved");
        let path = dir.join("nested").join(CONFIG_FILE_NAME);
        let mut config = AppConfig::default();
        config.connection = ConnectionConfig::adc_dongle();
        config.stream.batch_threshold = 4;

        config.save_config(&path).await.unwrap();
        let loaded = AppConfig::load_config(&path).await.unwrap();
        assert_eq!(loaded, config);

        let _ = fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = scratch_dir("malformed");
        ensure_directory_exists(&dir).await.unwrap();
        let path = dir.join(CONFIG_FILE_NAME);
        fs::write(&path, "{ not json").await.unwrap();

        assert!(AppConfig::load_config(&path).await.is_err());

        let _ = fs::remove_dir_all(&dir).await;
    }
}
