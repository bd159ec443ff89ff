//! Playback decision algorithm
//!
//! Deterministic: identical inputs always yield identical outputs. The
//! engine never blocks and never retries.

use viewra_core::media::{MediaKind, SourceQuality};
use viewra_core::{
    AudioCodec, BrowserFamily, Container, DeviceProfile, HdrHandling, MediaProbe, PlaybackError,
    Preset, Resolution, Result, TranscodeParams, VideoCodec,
};

/// Source containers the orchestrator can feed to the encoder
const READABLE_CONTAINERS: &[&str] = &[
    "mp4", "m4v", "mov", "mkv", "matroska", "webm", "avi", "ts", "mpegts", "mpeg", "flv", "wmv",
];

/// Outcome of a playback decision
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackDecision {
    /// Serve the source file unmodified
    DirectPlay { reason: String },
    /// Transcode with the computed parameters
    Transcode {
        params: TranscodeParams,
        reason: String,
    },
}

impl PlaybackDecision {
    pub fn should_transcode(&self) -> bool {
        matches!(self, Self::Transcode { .. })
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::DirectPlay { reason } => reason,
            Self::Transcode { reason, .. } => reason,
        }
    }

    pub fn params(&self) -> Option<&TranscodeParams> {
        match self {
            Self::Transcode { params, .. } => Some(params),
            Self::DirectPlay { .. } => None,
        }
    }
}

/// Decide whether to direct-play or transcode
///
/// `bandwidth_kbps` is the measured client bandwidth; zero or unknown is
/// treated as sufficient for the source's native tier.
pub fn decide(
    probe: &MediaProbe,
    device: &DeviceProfile,
    bandwidth_kbps: Option<u64>,
) -> Result<PlaybackDecision> {
    if !probe.has_video() {
        return Err(PlaybackError::probe_incomplete(
            "source has no video stream",
        ));
    }
    let container = probe.container.to_ascii_lowercase();
    if !READABLE_CONTAINERS
        .iter()
        .any(|c| container.split(',').any(|part| part.trim() == *c))
    {
        return Err(PlaybackError::unsupported_source(format!(
            "unrecognised source container: {}",
            probe.container
        )));
    }

    if let Some(reason) = direct_play_reason(probe, device) {
        return Ok(PlaybackDecision::DirectPlay { reason });
    }

    let params = compute_params(probe, device, bandwidth_kbps);
    let reason = format!(
        "transcoding to {} {} in {} (crf {}, preset {})",
        params.resolution.label(),
        params.video_codec.as_str(),
        params.container.as_str(),
        params.quality,
        params.preset.as_str(),
    );
    Ok(PlaybackDecision::Transcode { params, reason })
}

/// The direct-play predicate; Some(reason) when every condition holds
fn direct_play_reason(probe: &MediaProbe, device: &DeviceProfile) -> Option<String> {
    let video_codec = probe.video_codec.as_deref()?;
    if !device.supports_codec(video_codec) {
        return None;
    }
    if let Some(audio_codec) = probe.audio_codec.as_deref() {
        if !device.supports_codec(audio_codec) {
            return None;
        }
    }
    if !probe.container_is_browser_playable() {
        return None;
    }
    if probe.height > device.max_resolution.height() {
        return None;
    }
    if probe.bitrate_bps > device.max_bitrate_bps {
        return None;
    }
    if probe.is_hdr && !device.supports_hdr {
        return None;
    }
    Some(format!(
        "source ({} {} in {}) is directly playable by device",
        probe.resolution().label(),
        video_codec,
        probe.container,
    ))
}

/// Bandwidth → resolution step function
fn bandwidth_tier(bandwidth_kbps: u64) -> Resolution {
    match bandwidth_kbps {
        b if b >= 20_000 => Resolution::P2160,
        b if b >= 10_000 => Resolution::P1440,
        b if b >= 5_000 => Resolution::P1080,
        b if b >= 2_000 => Resolution::P720,
        _ => Resolution::P480,
    }
}

fn compute_params(
    probe: &MediaProbe,
    device: &DeviceProfile,
    bandwidth_kbps: Option<u64>,
) -> TranscodeParams {
    let source_resolution = probe.resolution();

    // Never upscale: target is the minimum of source, device, and bandwidth
    let mut resolution = source_resolution.min(device.max_resolution);
    match bandwidth_kbps {
        Some(kbps) if kbps > 0 => resolution = resolution.min(bandwidth_tier(kbps)),
        _ => {} // unknown bandwidth: sufficient for the native tier
    }

    let container = match device.browser_family() {
        BrowserFamily::Safari => Container::Hls,
        BrowserFamily::Modern => Container::Dash,
        BrowserFamily::Legacy => Container::Mp4,
    };

    let hdr_handling = if probe.is_hdr {
        if device.supports_hdr {
            HdrHandling::Preserve
        } else {
            HdrHandling::Tonemap
        }
    } else {
        HdrHandling::None
    };

    // Codec preference: HEVC when the device can take it and the source
    // warrants it (HDR or 4K); H.264 otherwise.
    let video_codec = if device.supports_codec("hevc")
        && (probe.is_hdr || source_resolution >= Resolution::P2160)
    {
        VideoCodec::Hevc
    } else {
        VideoCodec::H264
    };

    let quality = compute_crf(video_codec, probe);
    let preset = compute_preset(probe);
    let video_bitrate_kbps = compute_bitrate_ceiling(resolution, probe, hdr_handling);

    let audio_channels = match probe.audio_channels {
        0 => 2,
        n => n.min(6),
    };
    let audio_bitrate_kbps = match audio_channels {
        0..=2 => 128,
        3..=5 => 192,
        _ => 256,
    };

    TranscodeParams {
        video_codec,
        audio_codec: AudioCodec::Aac,
        container,
        resolution,
        video_bitrate_kbps,
        audio_bitrate_kbps,
        audio_channels,
        quality,
        preset,
        start_offset_seconds: 0,
        hdr_handling,
    }
}

/// CRF: base per codec, adjusted by source tier and content kind
fn compute_crf(codec: VideoCodec, probe: &MediaProbe) -> u8 {
    let mut crf = i16::from(codec.base_crf());
    match probe.quality_tier {
        SourceQuality::Remux => crf -= 2,
        SourceQuality::WebDl => crf -= 1,
        SourceQuality::Low => crf += 1,
        SourceQuality::Bluray | SourceQuality::Standard => {}
    }
    if probe.kind == MediaKind::Movie {
        crf -= 1;
    }
    crf.clamp(15, 35) as u8
}

fn compute_preset(probe: &MediaProbe) -> Preset {
    match (probe.kind, probe.quality_tier) {
        (MediaKind::Movie, SourceQuality::Remux) => Preset::Slow,
        (_, SourceQuality::Remux) | (_, SourceQuality::Bluray) => Preset::Medium,
        _ => Preset::Fast,
    }
}

/// Bitrate ceiling from the resolution base table, scaled by source quality
fn compute_bitrate_ceiling(
    resolution: Resolution,
    probe: &MediaProbe,
    hdr_handling: HdrHandling,
) -> u32 {
    let mut kbps = resolution.base_bitrate_kbps() as f64;
    if probe.quality_tier == SourceQuality::Remux {
        kbps *= 1.3;
    }
    if probe.kind == MediaKind::Movie {
        kbps *= 1.2;
    }
    if hdr_handling == HdrHandling::Preserve {
        kbps *= 1.2;
    }
    kbps.round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_1080p_h264() -> MediaProbe {
        MediaProbe {
            width: 1920,
            height: 1080,
            fps: 23.976,
            duration_seconds: 7200.0,
            video_codec: Some("h264".to_string()),
            audio_codec: Some("aac".to_string()),
            container: "mp4".to_string(),
            pixel_format: Some("yuv420p".to_string()),
            color_transfer: None,
            is_hdr: false,
            audio_channels: 2,
            bitrate_bps: 6_000_000,
            quality_tier: SourceQuality::Standard,
            kind: MediaKind::Movie,
        }
    }

    fn chrome() -> DeviceProfile {
        DeviceProfile {
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36".to_string(),
            supported_codecs: vec!["h264".into(), "aac".into()],
            max_resolution: Resolution::P1080,
            max_bitrate_bps: 10_000_000,
            supports_hdr: false,
            client_ip: None,
        }
    }

    fn safari() -> DeviceProfile {
        DeviceProfile {
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15".to_string(),
            ..chrome()
        }
    }

    #[test]
    fn test_chrome_compatible_source_direct_plays() {
        // 1080p H.264/AAC mp4 within device limits: direct play
        let decision = decide(&probe_1080p_h264(), &chrome(), Some(8_000)).unwrap();
        assert!(!decision.should_transcode());
    }

    #[test]
    fn test_safari_gets_hls() {
        // Safari cannot take the DASH path; same source transcodes to HLS
        let decision = decide(&probe_1080p_h264(), &safari(), Some(8_000)).unwrap();
        // mp4 + h264 + aac is still direct-playable by Safari
        assert!(!decision.should_transcode());

        // Force a transcode by exceeding the device bitrate
        let mut probe = probe_1080p_h264();
        probe.bitrate_bps = 50_000_000;
        let decision = decide(&probe, &safari(), Some(8_000)).unwrap();
        let params = decision.params().unwrap();
        assert_eq!(params.container, Container::Hls);
        assert_eq!(params.video_codec, VideoCodec::H264);
        assert_eq!(params.resolution, Resolution::P1080);
        assert_eq!(params.preset, Preset::Fast);
        assert_eq!(params.quality, 22); // h264 base 23, movie -1
    }

    #[test]
    fn test_chrome_gets_dash() {
        let mut probe = probe_1080p_h264();
        probe.container = "mkv".to_string(); // not browser playable
        let decision = decide(&probe, &chrome(), Some(8_000)).unwrap();
        assert_eq!(decision.params().unwrap().container, Container::Dash);
    }

    #[test]
    fn test_legacy_client_gets_progressive_mp4() {
        let mut probe = probe_1080p_h264();
        probe.container = "mkv".to_string();
        let mut device = chrome();
        device.user_agent = "SomeLegacyPlayer/1.0".to_string();
        let decision = decide(&probe, &device, None).unwrap();
        assert_eq!(decision.params().unwrap().container, Container::Mp4);
    }

    #[test]
    fn test_never_upscale() {
        let mut probe = probe_1080p_h264();
        probe.width = 1280;
        probe.height = 720;
        probe.container = "mkv".to_string();
        let mut device = chrome();
        device.max_resolution = Resolution::P2160;
        let decision = decide(&probe, &device, Some(50_000)).unwrap();
        assert_eq!(decision.params().unwrap().resolution, Resolution::P720);
    }

    #[test]
    fn test_bandwidth_tiers() {
        assert_eq!(bandwidth_tier(25_000), Resolution::P2160);
        assert_eq!(bandwidth_tier(12_000), Resolution::P1440);
        assert_eq!(bandwidth_tier(5_000), Resolution::P1080);
        assert_eq!(bandwidth_tier(2_000), Resolution::P720);
        assert_eq!(bandwidth_tier(500), Resolution::P480);
    }

    #[test]
    fn test_bandwidth_limits_resolution() {
        let mut probe = probe_1080p_h264();
        probe.container = "mkv".to_string();
        let decision = decide(&probe, &chrome(), Some(2_500)).unwrap();
        assert_eq!(decision.params().unwrap().resolution, Resolution::P720);
    }

    #[test]
    fn test_unknown_bandwidth_is_native_tier() {
        let mut probe = probe_1080p_h264();
        probe.container = "mkv".to_string();
        for bandwidth in [None, Some(0)] {
            let decision = decide(&probe, &chrome(), bandwidth).unwrap();
            assert_eq!(decision.params().unwrap().resolution, Resolution::P1080);
        }
    }

    #[test]
    fn test_hevc_for_hdr_capable_device() {
        let mut probe = probe_1080p_h264();
        probe.container = "mkv".to_string();
        probe.is_hdr = true;
        let mut device = chrome();
        device.supported_codecs.push("hevc".to_string());
        device.supports_hdr = true;

        let decision = decide(&probe, &device, None).unwrap();
        let params = decision.params().unwrap();
        assert_eq!(params.video_codec, VideoCodec::Hevc);
        assert_eq!(params.hdr_handling, HdrHandling::Preserve);
    }

    #[test]
    fn test_hdr_tonemapped_for_sdr_device() {
        let mut probe = probe_1080p_h264();
        probe.container = "mkv".to_string();
        probe.is_hdr = true;
        let decision = decide(&probe, &chrome(), None).unwrap();
        let params = decision.params().unwrap();
        assert_eq!(params.hdr_handling, HdrHandling::Tonemap);
        assert_eq!(params.video_codec, VideoCodec::H264);
    }

    #[test]
    fn test_crf_adjustments_and_clamp() {
        let mut probe = probe_1080p_h264();
        probe.container = "mkv".to_string();

        probe.quality_tier = SourceQuality::Remux;
        // h264 base 23, remux -2, movie -1 = 20; remux movie gets slow preset
        let decision = decide(&probe, &chrome(), None).unwrap();
        let params = decision.params().unwrap();
        assert_eq!(params.quality, 20);
        assert_eq!(params.preset, Preset::Slow);

        probe.quality_tier = SourceQuality::Low;
        probe.kind = MediaKind::Episode;
        let decision = decide(&probe, &chrome(), None).unwrap();
        let params = decision.params().unwrap();
        assert_eq!(params.quality, 24); // 23 + 1
        assert_eq!(params.preset, Preset::Fast);
    }

    #[test]
    fn test_bitrate_ceiling_multipliers() {
        let mut probe = probe_1080p_h264();
        probe.container = "mkv".to_string();
        probe.quality_tier = SourceQuality::Remux;
        let decision = decide(&probe, &chrome(), None).unwrap();
        // 1080p base 6000 * 1.3 (remux) * 1.2 (movie)
        assert_eq!(decision.params().unwrap().video_bitrate_kbps, 9_360);
    }

    #[test]
    fn test_audio_channel_mapping() {
        let mut probe = probe_1080p_h264();
        probe.container = "mkv".to_string();
        probe.audio_channels = 8;
        let decision = decide(&probe, &chrome(), None).unwrap();
        let params = decision.params().unwrap();
        assert_eq!(params.audio_channels, 6);
        assert_eq!(params.audio_bitrate_kbps, 256);
        assert_eq!(params.audio_codec, AudioCodec::Aac);
    }

    #[test]
    fn test_missing_video_stream() {
        let mut probe = probe_1080p_h264();
        probe.video_codec = None;
        let err = decide(&probe, &chrome(), None).unwrap_err();
        assert_eq!(err.kind(), "PROBE_INCOMPLETE");
    }

    #[test]
    fn test_unsupported_container() {
        let mut probe = probe_1080p_h264();
        probe.container = "realmedia".to_string();
        let err = decide(&probe, &chrome(), None).unwrap_err();
        assert_eq!(err.kind(), "UNSUPPORTED_SOURCE");
    }

    #[test]
    fn test_decision_is_deterministic() {
        let mut probe = probe_1080p_h264();
        probe.container = "mkv".to_string();
        let a = decide(&probe, &chrome(), Some(8_000)).unwrap();
        let b = decide(&probe, &chrome(), Some(8_000)).unwrap();
        assert_eq!(a, b);
    }
}
