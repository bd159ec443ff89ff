//! Encoder parameter types
//!
//! The closed set of options the orchestrator knows how to hand to the
//! encoder subprocess. Anything outside these enums is rejected at the edge.

use crate::error::{PlaybackError, Result};
use serde::{Deserialize, Serialize};

/// Video output codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    Hevc,
    Vp8,
    Vp9,
    Av1,
}

/// Audio output codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Aac,
    Opus,
    Mp3,
    Ac3,
}

/// Output container; dash/hls imply segmented output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Mp4,
    Webm,
    Mkv,
    Dash,
    Hls,
}

/// Target output resolution (height; width preserves aspect)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "1440p")]
    P1440,
    #[serde(rename = "2160p")]
    P2160,
}

/// Encoder speed/quality tradeoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Ultrafast,
    Superfast,
    Veryfast,
    Faster,
    Fast,
    Medium,
    Slow,
}

/// HDR handling policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HdrHandling {
    /// Pass HDR metadata through to the output
    Preserve,
    /// Tone-map down to SDR
    Tonemap,
    /// Source is SDR; nothing to do
    None,
}

impl VideoCodec {
    /// Name of the software encoder for this codec
    pub fn encoder_name(&self) -> &'static str {
        match self {
            Self::H264 => "libx264",
            Self::Hevc => "libx265",
            Self::Vp8 => "libvpx",
            Self::Vp9 => "libvpx-vp9",
            Self::Av1 => "libaom-av1",
        }
    }

    /// Codec name as probes report it
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::Hevc => "hevc",
            Self::Vp8 => "vp8",
            Self::Vp9 => "vp9",
            Self::Av1 => "av1",
        }
    }

    /// Base CRF for this codec before source-quality adjustments
    pub fn base_crf(&self) -> u8 {
        match self {
            Self::H264 => 23,
            Self::Hevc => 28,
            Self::Vp8 => 30,
            Self::Vp9 => 31,
            Self::Av1 => 32,
        }
    }

    /// Parse a probe codec name
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "h264" | "avc" | "avc1" => Some(Self::H264),
            "hevc" | "h265" | "hvc1" => Some(Self::Hevc),
            "vp8" => Some(Self::Vp8),
            "vp9" => Some(Self::Vp9),
            "av1" => Some(Self::Av1),
            _ => None,
        }
    }
}

impl AudioCodec {
    /// Name of the encoder for this codec
    pub fn encoder_name(&self) -> &'static str {
        match self {
            Self::Aac => "aac",
            Self::Opus => "libopus",
            Self::Mp3 => "libmp3lame",
            Self::Ac3 => "ac3",
        }
    }

    /// Codec name as probes report it
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aac => "aac",
            Self::Opus => "opus",
            Self::Mp3 => "mp3",
            Self::Ac3 => "ac3",
        }
    }
}

impl Container {
    /// Whether output is a manifest plus segments rather than a single file
    pub fn is_segmented(&self) -> bool {
        matches!(self, Self::Dash | Self::Hls)
    }

    /// File extension for progressive output
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
            Self::Mkv => "mkv",
            Self::Dash => "mpd",
            Self::Hls => "m3u8",
        }
    }

    /// Container tag used in session directory names
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
            Self::Mkv => "mkv",
            Self::Dash => "dash",
            Self::Hls => "hls",
        }
    }

    /// Name of the primary output artefact inside a session directory
    pub fn output_filename(&self, session_id: &str) -> String {
        match self {
            Self::Dash => "manifest.mpd".to_string(),
            Self::Hls => "playlist.m3u8".to_string(),
            _ => format!("{}.{}", session_id, self.extension()),
        }
    }
}

impl Resolution {
    /// Target height in pixels
    pub fn height(&self) -> u32 {
        match self {
            Self::P480 => 480,
            Self::P720 => 720,
            Self::P1080 => 1080,
            Self::P1440 => 1440,
            Self::P2160 => 2160,
        }
    }

    /// Display label
    pub fn label(&self) -> &'static str {
        match self {
            Self::P480 => "480p",
            Self::P720 => "720p",
            Self::P1080 => "1080p",
            Self::P1440 => "1440p",
            Self::P2160 => "2160p",
        }
    }

    /// Base bitrate ceiling for this resolution, in kbps
    pub fn base_bitrate_kbps(&self) -> u32 {
        match self {
            Self::P480 => 1_500,
            Self::P720 => 3_000,
            Self::P1080 => 6_000,
            Self::P1440 => 12_000,
            Self::P2160 => 25_000,
        }
    }

    /// Largest resolution whose height does not exceed `height`
    pub fn from_height(height: u32) -> Self {
        match height {
            h if h >= 2160 => Self::P2160,
            h if h >= 1440 => Self::P1440,
            h if h >= 1080 => Self::P1080,
            h if h >= 720 => Self::P720,
            _ => Self::P480,
        }
    }
}

impl Preset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ultrafast => "ultrafast",
            Self::Superfast => "superfast",
            Self::Veryfast => "veryfast",
            Self::Faster => "faster",
            Self::Fast => "fast",
            Self::Medium => "medium",
            Self::Slow => "slow",
        }
    }
}

/// Complete encoder parameter set for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeParams {
    pub video_codec: VideoCodec,
    pub audio_codec: AudioCodec,
    pub container: Container,
    pub resolution: Resolution,
    /// Video bitrate ceiling in kbps; 0 means CRF-driven
    #[serde(default)]
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
    #[serde(default = "default_audio_channels")]
    pub audio_channels: u8,
    /// Constant rate factor, 0-51 (lower = higher quality)
    pub quality: u8,
    pub preset: Preset,
    /// Seek-ahead into the source, in whole seconds
    #[serde(default)]
    pub start_offset_seconds: u32,
    pub hdr_handling: HdrHandling,
}

fn default_audio_channels() -> u8 {
    2
}

impl TranscodeParams {
    /// Validate the stated ranges
    pub fn validate(&self) -> Result<()> {
        if self.quality > 51 {
            return Err(PlaybackError::bad_request(format!(
                "quality (CRF) must be 0-51, got {}",
                self.quality
            )));
        }
        if self.audio_bitrate_kbps == 0 {
            return Err(PlaybackError::bad_request("audio_bitrate_kbps must be > 0"));
        }
        if self.audio_channels == 0 || self.audio_channels > 8 {
            return Err(PlaybackError::bad_request(format!(
                "audio_channels must be 1-8, got {}",
                self.audio_channels
            )));
        }
        Ok(())
    }
}

impl Default for TranscodeParams {
    fn default() -> Self {
        Self {
            video_codec: VideoCodec::H264,
            audio_codec: AudioCodec::Aac,
            container: Container::Mp4,
            resolution: Resolution::P1080,
            video_bitrate_kbps: 0,
            audio_bitrate_kbps: 128,
            audio_channels: 2,
            quality: VideoCodec::H264.base_crf(),
            preset: Preset::Fast,
            start_offset_seconds: 0,
            hdr_handling: HdrHandling::None,
        }
    }
}
