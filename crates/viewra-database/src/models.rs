//! Database model definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::path::PathBuf;
use viewra_core::session::{SessionState, TranscodeProgress, TranscodeRequest, TranscodeSession};
use viewra_core::{PlaybackError, Result, TranscodeParams};

/// Opaque request blob stored per session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestBlob {
    pub params: TranscodeParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<TranscodeRequest>,
}

/// Opaque result blob stored on terminal sessions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultBlob {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Database row for a transcoding session
#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub id: String,
    pub provider: String,
    pub state: String,
    pub input_path: String,
    pub start_offset: i64,
    pub request_blob: String,
    pub progress_blob: String,
    pub result_blob: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_accessed: DateTime<Utc>,
    pub directory_path: String,
    pub process_id: Option<i64>,
}

impl SessionRow {
    /// Encode a session into its row representation
    pub fn from_session(session: &TranscodeSession) -> Result<Self> {
        let request_blob = serde_json::to_string(&RequestBlob {
            params: session.params.clone(),
            request: session.request.clone(),
        })?;
        let progress_blob = serde_json::to_string(&session.progress)?;
        let result_blob = if session.error.is_some() {
            Some(serde_json::to_string(&ResultBlob {
                error: session.error.clone(),
            })?)
        } else {
            None
        };

        Ok(Self {
            id: session.id.clone(),
            provider: session.provider.clone(),
            state: session.state.as_str().to_string(),
            input_path: session.input_path.to_string_lossy().into_owned(),
            start_offset: i64::from(session.params.start_offset_seconds),
            request_blob,
            progress_blob,
            result_blob,
            start_time: session.start_time,
            end_time: session.end_time,
            last_accessed: session.last_accessed,
            directory_path: session.directory.to_string_lossy().into_owned(),
            process_id: session.process_id.map(i64::from),
        })
    }

    /// Decode the row back into a session
    pub fn into_session(self) -> Result<TranscodeSession> {
        let state = SessionState::parse(&self.state).ok_or_else(|| {
            PlaybackError::internal(format!("unknown session state in store: {}", self.state))
        })?;
        let request: RequestBlob = serde_json::from_str(&self.request_blob)?;
        let progress: TranscodeProgress = serde_json::from_str(&self.progress_blob)?;
        let error = match &self.result_blob {
            Some(blob) => serde_json::from_str::<ResultBlob>(blob)?.error,
            None => None,
        };

        Ok(TranscodeSession {
            id: self.id,
            provider: self.provider,
            input_path: PathBuf::from(self.input_path),
            params: request.params,
            directory: PathBuf::from(self.directory_path),
            state,
            start_time: self.start_time,
            end_time: self.end_time,
            last_accessed: self.last_accessed,
            progress,
            error,
            process_id: self.process_id.and_then(|pid| u32::try_from(pid).ok()),
            request: request.request,
        })
    }
}
