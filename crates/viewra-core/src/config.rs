//! Configuration types and utilities

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main playback stack configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub server: ServerConfig,
    pub transcoding: TranscodingConfig,
    pub retention: RetentionConfig,
    pub streaming: StreamingConfig,
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Transcoding and encoder supervision configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodingConfig {
    /// Root under which every session work directory lives
    pub transcoding_root: PathBuf,
    /// Directory for the session database and other durable state
    pub data_dir: PathBuf,
    /// External encoder binary
    pub encoder_path: PathBuf,
    /// Encoder backend tag recorded on sessions
    pub provider: String,
    /// Global concurrent-session cap
    pub max_concurrent: u32,
    /// Emit an automatic hardware acceleration hint to the encoder
    pub hardware_acceleration: bool,
    /// Warn when a session has run this long
    pub session_soft_deadline_hours: u64,
    /// Stop the session (TimedOut) when it has run this long
    pub session_hard_deadline_hours: u64,
    /// Grace between interrupt and kill when stopping
    pub graceful_stop_seconds: u64,
    /// Minimum interval between progress events per session
    pub progress_event_interval_ms: u64,
    /// Interval between orphan-process sweeps
    pub orphan_sweep_interval_seconds: u64,
}

/// Retention and cleanup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// How long finished session output is kept
    pub file_retention_hours: u64,
    /// Retention for outputs larger than `large_file_mb`
    pub extended_retention_hours: u64,
    /// Total transcoding root size cap in GB
    pub max_size_gb: u64,
    /// Threshold above which extended retention applies
    pub large_file_mb: u64,
    /// Janitor pass interval
    pub cleanup_interval_minutes: u64,
    /// Cancel a session with no streaming reads for this long
    pub reader_idle_minutes: u64,
    /// Keep a completed session's directory at least this long
    pub post_complete_grace_seconds: u64,
    /// Defer directory deletion after close/cancel this long
    pub post_close_dir_delete_seconds: u64,
}

/// Streaming server tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// How long a manifest request waits for the file to appear
    pub manifest_wait_seconds: u64,
    /// Tail-read poll backoff floor
    pub progressive_poll_min_ms: u64,
    /// Tail-read poll backoff ceiling
    pub progressive_poll_max_ms: u64,
    /// Silent polling cap before yielding an empty chunk to HTTP
    pub progressive_poll_silent_cap_seconds: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
        }
    }
}

impl Default for TranscodingConfig {
    fn default() -> Self {
        Self {
            transcoding_root: PathBuf::from("data/transcoding"),
            data_dir: PathBuf::from("data"),
            encoder_path: PathBuf::from("ffmpeg"),
            provider: "ffmpeg".to_string(),
            max_concurrent: 4,
            hardware_acceleration: true,
            session_soft_deadline_hours: 1,
            session_hard_deadline_hours: 2,
            graceful_stop_seconds: 2,
            progress_event_interval_ms: 500,
            orphan_sweep_interval_seconds: 60,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            file_retention_hours: 12,
            extended_retention_hours: 48,
            max_size_gb: 50,
            large_file_mb: 2048,
            cleanup_interval_minutes: 5,
            reader_idle_minutes: 10,
            post_complete_grace_seconds: 30,
            post_close_dir_delete_seconds: 120,
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            manifest_wait_seconds: 5,
            progressive_poll_min_ms: 10,
            progressive_poll_max_ms: 100,
            progressive_poll_silent_cap_seconds: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl TranscodingConfig {
    pub fn soft_deadline(&self) -> Duration {
        Duration::from_secs(self.session_soft_deadline_hours * 3600)
    }

    pub fn hard_deadline(&self) -> Duration {
        Duration::from_secs(self.session_hard_deadline_hours * 3600)
    }

    pub fn graceful_stop(&self) -> Duration {
        Duration::from_secs(self.graceful_stop_seconds)
    }

    pub fn progress_event_interval(&self) -> Duration {
        Duration::from_millis(self.progress_event_interval_ms)
    }

    pub fn orphan_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.orphan_sweep_interval_seconds)
    }
}

impl RetentionConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_minutes * 60)
    }

    pub fn reader_idle(&self) -> Duration {
        Duration::from_secs(self.reader_idle_minutes * 60)
    }

    pub fn post_complete_grace(&self) -> Duration {
        Duration::from_secs(self.post_complete_grace_seconds)
    }

    pub fn post_close_dir_delete(&self) -> Duration {
        Duration::from_secs(self.post_close_dir_delete_seconds)
    }
}

impl StreamingConfig {
    pub fn manifest_wait(&self) -> Duration {
        Duration::from_secs(self.manifest_wait_seconds)
    }

    pub fn poll_min(&self) -> Duration {
        Duration::from_millis(self.progressive_poll_min_ms)
    }

    pub fn poll_max(&self) -> Duration {
        Duration::from_millis(self.progressive_poll_max_ms)
    }

    pub fn poll_silent_cap(&self) -> Duration {
        Duration::from_secs(self.progressive_poll_silent_cap_seconds)
    }
}
