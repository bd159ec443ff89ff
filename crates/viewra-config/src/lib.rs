//! # Viewra Configuration
//!
//! Configuration management for the Viewra playback stack: TOML file
//! loading, environment overrides, and validation.

pub mod loader;
pub mod validator;

// Re-export commonly used types
pub use loader::ConfigLoader;
pub use validator::ConfigValidator;

use viewra_core::{PlaybackConfig, Result};

/// Configuration service for managing application settings
#[derive(Debug, Clone)]
pub struct ConfigService {
    loader: ConfigLoader,
    validator: ConfigValidator,
    config: PlaybackConfig,
}

impl ConfigService {
    /// Create a new configuration service
    pub fn new(config_path: &str) -> Result<Self> {
        let loader = ConfigLoader::new();
        let validator = ConfigValidator::new();
        let config = loader.load_config(config_path)?;

        validator.validate(&config)?;

        Ok(Self {
            loader,
            validator,
            config,
        })
    }

    /// Get current configuration
    pub fn get_config(&self) -> &PlaybackConfig {
        &self.config
    }

    /// Reload configuration from the given path
    pub fn reload_config(&mut self, config_path: &str) -> Result<()> {
        let new_config = self.loader.load_config(config_path)?;
        self.validator.validate(&new_config)?;
        self.config = new_config;
        Ok(())
    }
}
