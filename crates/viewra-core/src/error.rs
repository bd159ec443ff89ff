//! Error types and handling for the playback stack

use thiserror::Error;

/// Main error type for playback operations
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// Malformed request payload or path traversal attempt
    #[error("Bad request: {message}")]
    BadRequest { message: String },

    /// The source container/codec cannot be handled
    #[error("Unsupported source: {message}")]
    UnsupportedSource { message: String },

    /// The probe result is missing streams required for a decision
    #[error("Probe incomplete: {message}")]
    ProbeIncomplete { message: String },

    /// The concurrent-session limit has been reached
    #[error("At capacity: {limit} concurrent sessions")]
    AtCapacity { limit: u32 },

    /// An active session already exists for the same input and offset
    #[error("Duplicate session: {id}")]
    DuplicateSession { id: String },

    /// Resource not found
    #[error("Not found: {resource} {id}")]
    NotFound { resource: String, id: String },

    /// Illegal session state transition
    #[error("Bad state transition: {from} -> {to}")]
    BadState { from: String, to: String },

    /// The session work directory could not be created
    #[error("Failed to create session directory: {path}")]
    DirCreateFailed { path: String },

    /// The encoder subprocess could not be spawned
    #[error("Encoder failed to start: {message}")]
    EncoderStartFailed { message: String },

    /// The encoder exited nonzero without usable output
    #[error("Encoder failed (exit code {exit_code:?})")]
    EncoderFailed {
        exit_code: Option<i32>,
        stderr_tail: String,
    },

    /// A wall-clock deadline was exceeded
    #[error("Timed out after {after_seconds}s")]
    TimedOut { after_seconds: u64 },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database errors
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Generic internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl PlaybackError {
    /// Create a new bad request error
    pub fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Create a new unsupported source error
    pub fn unsupported_source<S: Into<String>>(message: S) -> Self {
        Self::UnsupportedSource {
            message: message.into(),
        }
    }

    /// Create a new probe incomplete error
    pub fn probe_incomplete<S: Into<String>>(message: S) -> Self {
        Self::ProbeIncomplete {
            message: message.into(),
        }
    }

    /// Create a new not found error
    pub fn not_found<S: Into<String>>(resource: S, id: S) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create a new bad state transition error
    pub fn bad_state<S: Into<String>>(from: S, to: S) -> Self {
        Self::BadState {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Create a new encoder start failure
    pub fn encoder_start_failed<S: Into<String>>(message: S) -> Self {
        Self::EncoderStartFailed {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable error kind for the HTTP edge and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => "BAD_REQUEST",
            Self::UnsupportedSource { .. } => "UNSUPPORTED_SOURCE",
            Self::ProbeIncomplete { .. } => "PROBE_INCOMPLETE",
            Self::AtCapacity { .. } => "AT_CAPACITY",
            Self::DuplicateSession { .. } => "DUPLICATE_SESSION",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::BadState { .. } => "BAD_STATE",
            Self::DirCreateFailed { .. } => "DIR_CREATE_FAILED",
            Self::EncoderStartFailed { .. } => "ENCODER_START_FAILED",
            Self::EncoderFailed { .. } => "ENCODER_FAILED",
            Self::TimedOut { .. } => "TIMED_OUT",
            Self::Io(_) => "IO_ERROR",
            #[cfg(feature = "sqlx")]
            Self::Database(_) => "INTERNAL",
            Self::Serialization(_) => "INTERNAL",
            Self::Config { .. } => "INTERNAL",
            Self::Internal { .. } => "INTERNAL",
        }
    }

    /// Check if this error is worth a single local retry
    pub fn is_retryable(&self) -> bool {
        #[cfg(feature = "sqlx")]
        if matches!(self, Self::Database(_)) {
            return true;
        }
        matches!(self, Self::Io(_))
    }
}

/// Result type alias for playback operations
pub type Result<T> = std::result::Result<T, PlaybackError>;
