//! Encoder progress stream parsing
//!
//! The encoder writes a `key=value` stream to its progress pipe, one pair
//! per line, with a `progress=continue|end` line terminating each block.

use viewra_core::session::TranscodeProgress;

/// Incremental parser for the encoder's progress stream
#[derive(Debug, Clone, Default)]
pub struct ProgressParser {
    pub frame: Option<u64>,
    pub fps: Option<f64>,
    pub bitrate_kbps: Option<f64>,
    pub total_size: Option<u64>,
    pub out_time_us: Option<u64>,
    pub dup_frames: Option<u64>,
    pub drop_frames: Option<u64>,
    pub speed: Option<f64>,
    /// True once a `progress=end` line was seen
    pub is_complete: bool,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one line of the progress stream
    ///
    /// Returns true when the line completed a block (a `progress=` line),
    /// which is the natural point to publish an update.
    pub fn parse_line(&mut self, line: &str) -> bool {
        let Some((key, value)) = line.trim().split_once('=') else {
            return false;
        };
        let value = value.trim();

        match key.trim() {
            "frame" => self.frame = value.parse().ok(),
            "fps" => self.fps = value.parse().ok(),
            "bitrate" => {
                // e.g. "1264.5kbits/s" or "N/A"
                self.bitrate_kbps = value.trim_end_matches("kbits/s").parse().ok();
            }
            "total_size" => self.total_size = value.parse().ok(),
            "out_time_us" | "out_time_ms" => self.out_time_us = value.parse().ok(),
            "dup_frames" => self.dup_frames = value.parse().ok(),
            "drop_frames" => self.drop_frames = value.parse().ok(),
            "speed" => {
                self.speed = value.trim_end_matches('x').trim().parse().ok();
            }
            "progress" => {
                if value == "end" {
                    self.is_complete = true;
                }
                return true;
            }
            _ => {}
        }
        false
    }

    /// Seconds of output produced so far
    pub fn out_time_seconds(&self) -> f64 {
        self.out_time_us.map(|us| us as f64 / 1_000_000.0).unwrap_or(0.0)
    }

    /// Snapshot as a session progress value
    ///
    /// `duration_seconds` is the expected output duration (source duration
    /// minus any seek-ahead); zero when unknown.
    pub fn to_progress(&self, duration_seconds: f64) -> TranscodeProgress {
        let out_time = self.out_time_seconds();
        let percent = if self.is_complete {
            100.0
        } else if duration_seconds > 0.0 {
            (out_time / duration_seconds * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };

        let speed = self.speed.unwrap_or(0.0);
        let eta_seconds = if speed > 0.0 && duration_seconds > out_time {
            Some(((duration_seconds - out_time) / speed).ceil() as u64)
        } else {
            None
        };

        TranscodeProgress {
            percent,
            frames: self.frame.unwrap_or(0),
            bytes_in: 0,
            bytes_out: self.total_size.unwrap_or(0),
            speed,
            eta_seconds,
        }
    }
}
