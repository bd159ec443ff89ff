//! # Viewra Core
//!
//! Core types, traits, and utilities shared across all Viewra playback
//! components. This crate provides the foundational building blocks for the
//! transcoding session orchestrator.

pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod media;
pub mod params;
pub mod session;

// Re-export commonly used types
pub use config::PlaybackConfig;
pub use device::{BrowserFamily, DeviceProfile};
pub use error::{PlaybackError, Result};
pub use media::{MediaKind, MediaProbe, SourceQuality};
pub use params::{
    AudioCodec, Container, HdrHandling, Preset, Resolution, TranscodeParams, VideoCodec,
};
pub use session::{
    CreateOutcome, SessionState, TranscodeProgress, TranscodeRequest, TranscodeSession,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
