//! Configuration loading functionality

use std::path::{Path, PathBuf};
use tracing::{debug, info};
use viewra_core::{PlaybackConfig, PlaybackError, Result};

/// Environment override for the transcoding root directory
pub const ENV_TRANSCODING_DIR: &str = "VIEWRA_TRANSCODING_DIR";
/// Environment override for the durable data directory
pub const ENV_DATA_DIR: &str = "VIEWRA_DATA_DIR";

/// Configuration loader for TOML files and environment variables
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader;

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self
    }

    /// Load configuration from file, then apply environment overrides
    pub fn load_config(&self, config_path: &str) -> Result<PlaybackConfig> {
        info!("Loading configuration from: {}", config_path);

        let mut config = if Path::new(config_path).exists() {
            let content = std::fs::read_to_string(config_path)
                .map_err(|e| PlaybackError::config(format!("Failed to read config file: {}", e)))?;

            toml::from_str(&content)
                .map_err(|e| PlaybackError::config(format!("Failed to parse TOML: {}", e)))?
        } else {
            info!("Config file not found, using default configuration");
            PlaybackConfig::default()
        };

        self.apply_env_overrides(&mut config);

        debug!("Configuration loaded successfully");
        Ok(config)
    }

    /// Apply recognised environment variable overrides
    fn apply_env_overrides(&self, config: &mut PlaybackConfig) {
        if let Ok(dir) = std::env::var(ENV_TRANSCODING_DIR) {
            if !dir.is_empty() {
                debug!("{} override: {}", ENV_TRANSCODING_DIR, dir);
                config.transcoding.transcoding_root = PathBuf::from(dir);
            }
        }
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            if !dir.is_empty() {
                debug!("{} override: {}", ENV_DATA_DIR, dir);
                config.transcoding.data_dir = PathBuf::from(dir);
            }
        }
    }
}
