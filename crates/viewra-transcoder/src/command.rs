//! Encoder command construction
//!
//! Translates a parameter set into the encoder's CLI argument list. The
//! session directory naming scheme built here is also the supervisor's
//! orphan-detection contract: an encoder process is recognised by an
//! output-path argument under the transcoding root whose directory component
//! is `{container}_{provider}_{session_id}`.

use std::path::{Path, PathBuf};
use viewra_core::{Container, HdrHandling, TranscodeParams, VideoCodec};

/// Directory name for a session: `{container}_{provider}_{id}`
pub fn session_dir_name(container: Container, provider: &str, session_id: &str) -> String {
    format!("{}_{}_{}", container.as_str(), provider, session_id)
}

/// Parse a session directory name back into its parts
pub fn parse_session_dir_name(name: &str) -> Option<(String, String, String)> {
    let mut parts = name.splitn(3, '_');
    let container = parts.next()?.to_string();
    let provider = parts.next()?.to_string();
    let id = parts.next()?.to_string();
    if container.is_empty() || provider.is_empty() || id.is_empty() {
        return None;
    }
    Some((container, provider, id))
}

/// Primary output path for a session
pub fn output_path(directory: &Path, container: Container, session_id: &str) -> PathBuf {
    directory.join(container.output_filename(session_id))
}

/// Build the full encoder argument list for one session
pub fn build_args(
    input_path: &Path,
    params: &TranscodeParams,
    directory: &Path,
    session_id: &str,
    hardware_acceleration: bool,
) -> Vec<String> {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-y".into()];

    if hardware_acceleration {
        args.extend(["-hwaccel".into(), "auto".into()]);
    }

    // Seek-ahead goes before the input for a fast keyframe seek
    if params.start_offset_seconds > 0 {
        args.extend(["-ss".into(), params.start_offset_seconds.to_string()]);
    }

    // Enlarged analysis windows tolerate complex sources
    args.extend([
        "-analyzeduration".into(),
        "20000000".into(),
        "-probesize".into(),
        "20000000".into(),
    ]);

    args.extend(["-i".into(), input_path.to_string_lossy().into_owned()]);

    // Progress key=value stream on its own pipe, diagnostics stay on stderr
    args.extend(["-progress".into(), "pipe:1".into(), "-nostats".into()]);

    args.extend(["-threads".into(), "4".into()]);

    // Video
    args.extend(["-c:v".into(), params.video_codec.encoder_name().into()]);
    if uses_preset(params.video_codec) {
        args.extend(["-preset".into(), params.preset.as_str().into()]);
    }
    args.extend(["-crf".into(), params.quality.to_string()]);
    if params.video_bitrate_kbps > 0 {
        args.extend([
            "-maxrate".into(),
            format!("{}k", params.video_bitrate_kbps),
            "-bufsize".into(),
            format!("{}k", params.video_bitrate_kbps * 2),
        ]);
    }

    args.extend(["-vf".into(), video_filter(params)]);

    // Audio
    args.extend([
        "-c:a".into(),
        params.audio_codec.encoder_name().into(),
        "-b:a".into(),
        format!("{}k", params.audio_bitrate_kbps),
        "-ac".into(),
        params.audio_channels.to_string(),
    ]);

    // Muxing queue sized for slow consumers, packets flushed eagerly
    args.extend([
        "-max_muxing_queue_size".into(),
        "1024".into(),
        "-flush_packets".into(),
        "1".into(),
    ]);

    let output = output_path(directory, params.container, session_id);
    match params.container {
        Container::Dash => {
            args.extend([
                "-f".into(),
                "dash".into(),
                "-seg_duration".into(),
                "4".into(),
                "-use_timeline".into(),
                "1".into(),
                "-use_template".into(),
                "1".into(),
                "-init_seg_name".into(),
                "init-stream$RepresentationID$.m4s".into(),
                "-media_seg_name".into(),
                "chunk-stream$RepresentationID$-$Number%05d$.m4s".into(),
                "-adaptation_sets".into(),
                "id=0,streams=v id=1,streams=a".into(),
            ]);
        }
        Container::Hls => {
            args.extend([
                "-f".into(),
                "hls".into(),
                "-hls_time".into(),
                "4".into(),
                "-hls_playlist_type".into(),
                "vod".into(),
                "-hls_segment_type".into(),
                "mpegts".into(),
                "-hls_segment_filename".into(),
                directory
                    .join("segment_%03d.ts")
                    .to_string_lossy()
                    .into_owned(),
            ]);
        }
        Container::Mp4 => {
            // Fragmented output so the file is playable while still growing
            args.extend([
                "-movflags".into(),
                "frag_keyframe+empty_moov".into(),
                "-f".into(),
                "mp4".into(),
            ]);
        }
        Container::Webm => {
            args.extend(["-f".into(), "webm".into()]);
        }
        Container::Mkv => {
            args.extend(["-f".into(), "matroska".into()]);
        }
    }

    args.push(output.to_string_lossy().into_owned());
    args
}

/// Whether the encoder for this codec takes an x264-style -preset
fn uses_preset(codec: VideoCodec) -> bool {
    matches!(codec, VideoCodec::H264 | VideoCodec::Hevc)
}

/// Scale filter, with a tone-mapping chain when HDR is being flattened
fn video_filter(params: &TranscodeParams) -> String {
    let scale = format!("scale=-2:{}", params.resolution.height());
    match params.hdr_handling {
        HdrHandling::Tonemap => format!(
            "zscale=t=linear:npl=100,tonemap=hable,zscale=p=bt709:t=bt709:m=bt709,format=yuv420p,{scale}"
        ),
        _ => scale,
    }
}
