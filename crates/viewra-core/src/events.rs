//! Session event types for observer subscriptions
//!
//! Components that need to react to session lifecycle changes subscribe to
//! the session manager and receive these in delivery order per session.

use crate::session::{SessionState, TranscodeProgress};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A session lifecycle or progress notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: String,
    pub state: SessionState,
    /// Present on progress events only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<TranscodeProgress>,
    /// Present on Failed/TimedOut transitions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SessionEvent {
    /// A state-change event
    pub fn state_changed(session_id: &str, state: SessionState, error: Option<String>) -> Self {
        Self {
            session_id: session_id.to_string(),
            state,
            progress: None,
            error,
            timestamp: Utc::now(),
        }
    }

    /// A throttled progress event
    pub fn progress(session_id: &str, state: SessionState, progress: TranscodeProgress) -> Self {
        Self {
            session_id: session_id.to_string(),
            state,
            progress: Some(progress),
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Event kind name for filtering and logs
    pub fn type_name(&self) -> &'static str {
        if self.progress.is_some() {
            return "session_progress";
        }
        match self.state {
            SessionState::Pending => "session_created",
            SessionState::Starting => "session_starting",
            SessionState::Running => "session_running",
            SessionState::Completed => "session_completed",
            SessionState::Failed => "session_failed",
            SessionState::Cancelled => "session_cancelled",
            SessionState::TimedOut => "session_timed_out",
        }
    }
}
