//! Media source analysis types

use crate::params::Resolution;
use serde::{Deserialize, Serialize};

/// Container quality tier of the source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceQuality {
    /// Untouched disc remux
    Remux,
    /// Web download
    #[serde(rename = "webdl")]
    WebDl,
    /// Blu-ray encode
    Bluray,
    Standard,
    Low,
}

/// Broad content classification used for quality adjustments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Episode,
    Other,
}

impl Default for MediaKind {
    fn default() -> Self {
        Self::Other
    }
}

impl Default for SourceQuality {
    fn default() -> Self {
        Self::Standard
    }
}

/// Structured result of analysing a media file's streams and format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaProbe {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub duration_seconds: f64,
    /// Video stream codec name; None when the file has no video stream
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    /// Source container format name (e.g. "mp4", "matroska")
    pub container: String,
    pub pixel_format: Option<String>,
    /// Colour transfer characteristic, when the probe reports one
    #[serde(default)]
    pub color_transfer: Option<String>,
    /// True when HDR indicators were found on the video stream
    #[serde(default)]
    pub is_hdr: bool,
    #[serde(default)]
    pub audio_channels: u8,
    /// Overall bitrate in bits per second
    #[serde(default)]
    pub bitrate_bps: u64,
    #[serde(default)]
    pub quality_tier: SourceQuality,
    #[serde(default)]
    pub kind: MediaKind,
}

impl MediaProbe {
    /// Whether the probe found a video stream
    pub fn has_video(&self) -> bool {
        self.video_codec.is_some() && self.width > 0 && self.height > 0
    }

    /// Source resolution bucketed to the nearest known tier
    pub fn resolution(&self) -> Resolution {
        Resolution::from_height(self.height)
    }

    /// Whether the source container is one a browser can play directly
    pub fn container_is_browser_playable(&self) -> bool {
        matches!(
            self.container.to_ascii_lowercase().as_str(),
            "mp4" | "m4v" | "mov" | "webm"
        )
    }
}
