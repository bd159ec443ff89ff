//! Transcoding session model
//!
//! The session is the central entity of the orchestrator: one session owns
//! one encoder subprocess and one on-disk work directory.

use crate::device::DeviceProfile;
use crate::error::{PlaybackError, Result};
use crate::media::MediaProbe;
use crate::params::TranscodeParams;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    Starting,
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl SessionState {
    /// Whether this state is terminal (no transition out)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::TimedOut
        )
    }

    /// Whether the state machine admits `next` from this state
    ///
    /// Failed is reachable from every non-terminal state: spawn failures
    /// happen in Starting, and restart recovery fails sessions parked in
    /// any non-terminal state.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (Self::Pending, Self::Starting) => true,
            (Self::Starting, Self::Running) => true,
            (Self::Running, Self::Completed) => true,
            (Self::Running, Self::TimedOut) => true,
            (_, Self::Failed) => true,
            (_, Self::Cancelled) => true,
            _ => false,
        }
    }

    /// Stable lowercase name used in the database and on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        }
    }

    /// Parse a stable state name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "starting" => Some(Self::Starting),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            "timed_out" => Some(Self::TimedOut),
            _ => None,
        }
    }
}

/// Encoder progress snapshot
///
/// Monotone non-decreasing within a session; merge via [`merge_from`] so a
/// late or reordered update can never move counters backwards.
///
/// [`merge_from`]: TranscodeProgress::merge_from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscodeProgress {
    /// 0.0 - 100.0
    pub percent: f64,
    pub frames: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    /// Encode speed relative to realtime (1.0 = realtime)
    pub speed: f64,
    pub eta_seconds: Option<u64>,
}

impl TranscodeProgress {
    /// Merge a newer snapshot, keeping counters monotone
    pub fn merge_from(&mut self, other: &TranscodeProgress) {
        if other.percent > self.percent {
            self.percent = other.percent.min(100.0);
        }
        if other.frames > self.frames {
            self.frames = other.frames;
        }
        if other.bytes_in > self.bytes_in {
            self.bytes_in = other.bytes_in;
        }
        if other.bytes_out > self.bytes_out {
            self.bytes_out = other.bytes_out;
        }
        if other.speed > 0.0 {
            self.speed = other.speed;
        }
        if other.eta_seconds.is_some() {
            self.eta_seconds = other.eta_seconds;
        }
    }
}

/// Request body for starting a transcoding session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeRequest {
    pub input_path: PathBuf,
    /// Encoder backend tag; defaults to the configured provider
    #[serde(default)]
    pub provider: Option<String>,
    /// Explicit parameters; when absent the decision engine chooses them
    #[serde(default)]
    pub params: Option<TranscodeParams>,
    /// Inline probe; when absent the prober analyses the input
    #[serde(default)]
    pub probe: Option<MediaProbe>,
    #[serde(default)]
    pub device_profile: Option<DeviceProfile>,
    /// Measured client bandwidth in kbps, if known
    #[serde(default)]
    pub bandwidth_kbps: Option<u64>,
    /// Seek-ahead into the source, in whole seconds
    #[serde(default)]
    pub start_offset_seconds: u32,
}

/// An in-flight or finished transcoding session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeSession {
    pub id: String,
    pub provider: String,
    pub input_path: PathBuf,
    pub params: TranscodeParams,
    /// Session work directory; deleted with the session
    pub directory: PathBuf,
    pub state: SessionState,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_accessed: DateTime<Utc>,
    pub progress: TranscodeProgress,
    /// Terminal error; present iff state is Failed or TimedOut
    pub error: Option<String>,
    /// OS pid of the encoder; valid only while Running
    pub process_id: Option<u32>,
    /// The request that created the session, kept for diagnostics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<TranscodeRequest>,
}

impl TranscodeSession {
    /// Create a new session in Pending state
    pub fn new(
        id: String,
        provider: String,
        input_path: PathBuf,
        params: TranscodeParams,
        directory: PathBuf,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            provider,
            input_path,
            params,
            directory,
            state: SessionState::Pending,
            start_time: now,
            end_time: None,
            last_accessed: now,
            progress: TranscodeProgress::default(),
            error: None,
            process_id: None,
            request: None,
        }
    }

    /// Dedup identity: `(input_path, start_offset_seconds)`
    ///
    /// Offsets of 0 and "unset" are identical; positive offsets require an
    /// exact integer-second match.
    pub fn dedup_key(&self) -> (&std::path::Path, u32) {
        (&self.input_path, self.params.start_offset_seconds)
    }

    /// Apply a state transition, enforcing the state machine
    ///
    /// Sets `end_time` and drops `process_id` on entry to a terminal state.
    pub fn transition(&mut self, next: SessionState, error: Option<String>) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(PlaybackError::bad_state(
                self.state.as_str(),
                next.as_str(),
            ));
        }
        self.state = next;
        if next.is_terminal() {
            self.end_time = Some(Utc::now());
            self.process_id = None;
            if matches!(next, SessionState::Failed | SessionState::TimedOut) {
                self.error = error.or_else(|| Some("unknown error".to_string()));
            }
            if next == SessionState::Completed {
                self.progress.percent = 100.0;
            }
        }
        Ok(())
    }

    /// Record a streaming read
    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
    }

    /// Whether the session is past its idle cutoff
    pub fn is_idle_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_accessed < cutoff
    }
}

/// Result of `SessionManager::create`
///
/// Dedup is a first-class outcome, not an error: callers that hit an
/// existing active session for the same `(input, offset)` receive it here
/// and reuse it.
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    /// A new session was created and its encoder will be started
    Created(TranscodeSession),
    /// An active session already covers this input/offset
    Deduped(TranscodeSession),
}

impl CreateOutcome {
    /// The session regardless of outcome
    pub fn session(&self) -> &TranscodeSession {
        match self {
            Self::Created(s) | Self::Deduped(s) => s,
        }
    }

    pub fn is_deduped(&self) -> bool {
        matches!(self, Self::Deduped(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::TranscodeParams;

    fn session() -> TranscodeSession {
        TranscodeSession::new(
            "test-id".to_string(),
            "ffmpeg".to_string(),
            PathBuf::from("/media/movie.mkv"),
            TranscodeParams::default(),
            PathBuf::from("/tmp/transcoding/mp4_ffmpeg_test-id"),
        )
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut s = session();
        assert!(s.transition(SessionState::Starting, None).is_ok());
        assert!(s.transition(SessionState::Running, None).is_ok());
        assert!(s.transition(SessionState::Completed, None).is_ok());
        assert!(s.end_time.is_some());
        assert!(s.process_id.is_none());
        assert_eq!(s.progress.percent, 100.0);
    }

    #[test]
    fn test_no_exit_from_terminal() {
        let mut s = session();
        s.transition(SessionState::Cancelled, None).unwrap();
        let err = s.transition(SessionState::Running, None).unwrap_err();
        assert_eq!(err.kind(), "BAD_STATE");
    }

    #[test]
    fn test_failure_from_any_nonterminal() {
        for path in [
            vec![],
            vec![SessionState::Starting],
            vec![SessionState::Starting, SessionState::Running],
        ] {
            let mut s = session();
            for st in path {
                s.transition(st, None).unwrap();
            }
            s.transition(SessionState::Failed, Some("boom".to_string()))
                .unwrap();
            assert_eq!(s.state, SessionState::Failed);
            assert_eq!(s.error.as_deref(), Some("boom"));
            assert!(s.end_time.is_some());
        }
    }

    #[test]
    fn test_skipping_states_rejected() {
        let mut s = session();
        assert!(s.transition(SessionState::Running, None).is_err());
        assert!(s.transition(SessionState::Completed, None).is_err());
    }

    #[test]
    fn test_progress_monotone() {
        let mut p = TranscodeProgress::default();
        p.merge_from(&TranscodeProgress {
            percent: 40.0,
            frames: 1000,
            bytes_out: 5_000,
            ..Default::default()
        });
        // A stale update must not move anything backwards
        p.merge_from(&TranscodeProgress {
            percent: 35.0,
            frames: 900,
            bytes_out: 4_000,
            ..Default::default()
        });
        assert_eq!(p.percent, 40.0);
        assert_eq!(p.frames, 1000);
        assert_eq!(p.bytes_out, 5_000);
    }

    #[test]
    fn test_state_round_trip() {
        for state in [
            SessionState::Pending,
            SessionState::Starting,
            SessionState::Running,
            SessionState::Completed,
            SessionState::Failed,
            SessionState::Cancelled,
            SessionState::TimedOut,
        ] {
            assert_eq!(SessionState::parse(state.as_str()), Some(state));
        }
    }
}
