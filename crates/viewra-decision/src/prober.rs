//! Media source analysis via an external prober subprocess

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;
use viewra_core::media::{MediaKind, SourceQuality};
use viewra_core::{MediaProbe, PlaybackError, Result};

/// Colour transfer characteristics that indicate an HDR source
const HDR_TRANSFERS: &[&str] = &["smpte2084", "arib-std-b67"];

/// Probes media files with ffprobe
#[derive(Debug, Clone)]
pub struct MediaProber {
    prober_path: PathBuf,
}

impl MediaProber {
    /// Create a prober, deriving the ffprobe binary from the encoder path
    ///
    /// An encoder at `/usr/bin/ffmpeg` implies `/usr/bin/ffprobe`; anything
    /// else falls back to `ffprobe` on PATH.
    pub fn from_encoder_path(encoder_path: &Path) -> Self {
        let prober_path = encoder_path
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| name.contains("ffmpeg"))
            .map(|name| encoder_path.with_file_name(name.replace("ffmpeg", "ffprobe")))
            .unwrap_or_else(|| PathBuf::from("ffprobe"));
        Self { prober_path }
    }

    /// Analyse a media file
    pub async fn probe(&self, input_path: &Path) -> Result<MediaProbe> {
        if !input_path.exists() {
            return Err(PlaybackError::not_found(
                "media file",
                input_path.to_string_lossy().as_ref(),
            ));
        }

        debug!(input = %input_path.display(), "probing media file");

        let output = Command::new(&self.prober_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(input_path)
            .output()
            .await
            .map_err(|e| {
                PlaybackError::internal(format!(
                    "failed to run prober {}: {}",
                    self.prober_path.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            return Err(PlaybackError::unsupported_source(format!(
                "prober exited with {} for {}",
                output.status,
                input_path.display()
            )));
        }

        parse_probe_output(&output.stdout, input_path)
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
    r_frame_rate: Option<String>,
    pix_fmt: Option<String>,
    color_transfer: Option<String>,
    #[serde(default)]
    channels: u8,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
}

/// Parse prober JSON into a [`MediaProbe`]
pub fn parse_probe_output(stdout: &[u8], input_path: &Path) -> Result<MediaProbe> {
    let parsed: FfprobeOutput = serde_json::from_slice(stdout)
        .map_err(|e| PlaybackError::probe_incomplete(format!("unparseable probe output: {e}")))?;

    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let audio = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));

    let format = parsed.format.as_ref();
    let container = format
        .and_then(|f| f.format_name.as_deref())
        .map(primary_format_name)
        .unwrap_or_default();
    let duration_seconds = format
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);
    let bitrate_bps = format
        .and_then(|f| f.bit_rate.as_deref())
        .and_then(|b| b.parse::<u64>().ok())
        .unwrap_or(0);

    let color_transfer = video.and_then(|v| v.color_transfer.clone());
    let is_hdr = color_transfer
        .as_deref()
        .map(|t| HDR_TRANSFERS.contains(&t))
        .unwrap_or(false);

    let filename = input_path
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    Ok(MediaProbe {
        width: video.map(|v| v.width).unwrap_or(0),
        height: video.map(|v| v.height).unwrap_or(0),
        fps: video
            .and_then(|v| v.r_frame_rate.as_deref())
            .map(parse_frame_rate)
            .unwrap_or(0.0),
        duration_seconds,
        video_codec: video.and_then(|v| v.codec_name.clone()),
        audio_codec: audio.and_then(|a| a.codec_name.clone()),
        container,
        pixel_format: video.and_then(|v| v.pix_fmt.clone()),
        color_transfer,
        is_hdr,
        audio_channels: audio.map(|a| a.channels).unwrap_or(0),
        bitrate_bps,
        quality_tier: infer_quality_tier(&filename, bitrate_bps),
        kind: infer_media_kind(&filename),
    })
}

/// ffprobe reports compound names like "mov,mp4,m4a,3gp,3g2,mj2"
fn primary_format_name(format_name: &str) -> String {
    let name = format_name.split(',').next().unwrap_or(format_name).trim();
    match name {
        "mov" => "mp4".to_string(),
        "matroska" => "mkv".to_string(),
        other => other.to_string(),
    }
}

/// Parse "24000/1001"-style rational frame rates
fn parse_frame_rate(rate: &str) -> f64 {
    match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().unwrap_or(0.0);
            let den: f64 = den.parse().unwrap_or(1.0);
            if den > 0.0 {
                num / den
            } else {
                0.0
            }
        }
        None => rate.parse().unwrap_or(0.0),
    }
}

/// Infer the source quality tier from release markers and bitrate
fn infer_quality_tier(filename: &str, bitrate_bps: u64) -> SourceQuality {
    if filename.contains("remux") {
        return SourceQuality::Remux;
    }
    if filename.contains("web-dl") || filename.contains("webdl") || filename.contains("webrip") {
        return SourceQuality::WebDl;
    }
    if filename.contains("bluray") || filename.contains("blu-ray") || filename.contains("bdrip") {
        return SourceQuality::Bluray;
    }
    match bitrate_bps {
        0 => SourceQuality::Standard,
        b if b >= 40_000_000 => SourceQuality::Remux,
        b if b < 1_500_000 => SourceQuality::Low,
        _ => SourceQuality::Standard,
    }
}

/// Infer movie vs episode from an SxxEyy-style marker in the filename
fn infer_media_kind(filename: &str) -> MediaKind {
    if filename.is_empty() {
        return MediaKind::Other;
    }
    let bytes = filename.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b's' && i + 3 < bytes.len() {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j > i + 1 && j < bytes.len() && bytes[j] == b'e' {
                let mut k = j + 1;
                while k < bytes.len() && bytes[k].is_ascii_digit() {
                    k += 1;
                }
                if k > j + 1 {
                    return MediaKind::Episode;
                }
            }
        }
        i += 1;
    }
    MediaKind::Movie
}
