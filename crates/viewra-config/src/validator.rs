//! Configuration validation functionality

use tracing::{debug, info, warn};
use viewra_core::config::{RetentionConfig, ServerConfig, TranscodingConfig};
use viewra_core::{PlaybackConfig, PlaybackError, Result};

/// Configuration validator for ensuring valid settings
#[derive(Debug, Clone, Default)]
pub struct ConfigValidator;

impl ConfigValidator {
    /// Create a new configuration validator
    pub fn new() -> Self {
        Self
    }

    /// Validate configuration
    pub fn validate(&self, config: &PlaybackConfig) -> Result<()> {
        info!("Validating configuration");

        self.validate_server_config(&config.server)?;
        self.validate_transcoding_config(&config.transcoding)?;
        self.validate_retention_config(&config.retention)?;

        debug!("Configuration validation completed successfully");
        Ok(())
    }

    fn validate_server_config(&self, server: &ServerConfig) -> Result<()> {
        if server.port == 0 {
            return Err(PlaybackError::config("Invalid server port: 0"));
        }
        Ok(())
    }

    fn validate_transcoding_config(&self, transcoding: &TranscodingConfig) -> Result<()> {
        if transcoding.max_concurrent == 0 {
            return Err(PlaybackError::config(
                "max_concurrent must be greater than 0",
            ));
        }
        if transcoding.provider.is_empty() {
            return Err(PlaybackError::config("provider cannot be empty"));
        }
        if transcoding.session_soft_deadline_hours > transcoding.session_hard_deadline_hours {
            return Err(PlaybackError::config(
                "session_soft_deadline_hours must not exceed session_hard_deadline_hours",
            ));
        }
        if transcoding.transcoding_root.as_os_str().is_empty() {
            return Err(PlaybackError::config("transcoding_root cannot be empty"));
        }
        Ok(())
    }

    fn validate_retention_config(&self, retention: &RetentionConfig) -> Result<()> {
        if retention.cleanup_interval_minutes == 0 {
            return Err(PlaybackError::config(
                "cleanup_interval_minutes must be greater than 0",
            ));
        }
        if retention.file_retention_hours > retention.extended_retention_hours {
            warn!(
                "file_retention_hours ({}) exceeds extended_retention_hours ({})",
                retention.file_retention_hours, retention.extended_retention_hours
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let validator = ConfigValidator::new();
        let config = PlaybackConfig::default();
        assert!(validator.validate(&config).is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let validator = ConfigValidator::new();
        let mut config = PlaybackConfig::default();
        config.transcoding.max_concurrent = 0;
        assert!(validator.validate(&config).is_err());
    }

    #[test]
    fn test_incoherent_deadlines_rejected() {
        let validator = ConfigValidator::new();
        let mut config = PlaybackConfig::default();
        config.transcoding.session_soft_deadline_hours = 3;
        config.transcoding.session_hard_deadline_hours = 2;
        assert!(validator.validate(&config).is_err());
    }
}
