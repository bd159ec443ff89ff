//! API request handlers

use crate::error::ApiError;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Json, Path, State};
use axum::http::header::{
    ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE,
};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Json as ResponseJson, Response};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::debug;
use viewra_core::session::{SessionState, TranscodeRequest, TranscodeSession};
use viewra_core::{DeviceProfile, MediaProbe, PlaybackError, TranscodeParams};
use viewra_decision::engine::PlaybackDecision;
use viewra_streaming::{
    content_type_for, parse_range_header, resolve_artifact, wait_for_manifest, RangeOutcome,
    TailReader,
};

/// Request body for `POST /playback/decide`
#[derive(Debug, Deserialize)]
pub struct DecideRequest {
    pub media_path: PathBuf,
    #[serde(default)]
    pub device_profile: Option<DeviceProfile>,
    /// Inline probe; when absent the source is analysed server-side
    #[serde(default)]
    pub probe: Option<MediaProbe>,
    #[serde(default)]
    pub bandwidth_kbps: Option<u64>,
}

/// Response body for `POST /playback/decide`
#[derive(Debug, Serialize)]
pub struct DecideResponse {
    pub should_transcode: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direct_play_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcode_params: Option<TranscodeParams>,
}

/// Playback decision and session lifecycle handlers
pub struct PlaybackHandler;

impl PlaybackHandler {
    /// Decide whether a source should be transcoded for a device
    pub async fn decide(
        State(state): State<AppState>,
        Json(request): Json<DecideRequest>,
    ) -> Result<ResponseJson<DecideResponse>, ApiError> {
        let probe = match request.probe {
            Some(probe) => probe,
            None => state.prober.probe(&request.media_path).await?,
        };
        let device = request.device_profile.unwrap_or_default();
        let decision = viewra_decision::decide(&probe, &device, request.bandwidth_kbps)?;

        let response = match decision {
            PlaybackDecision::DirectPlay { reason } => DecideResponse {
                should_transcode: false,
                reason,
                direct_play_url: Some(request.media_path.to_string_lossy().into_owned()),
                transcode_params: None,
            },
            PlaybackDecision::Transcode { params, reason } => DecideResponse {
                should_transcode: true,
                reason,
                direct_play_url: None,
                transcode_params: Some(params),
            },
        };
        Ok(ResponseJson(response))
    }

    /// Start a transcoding session
    ///
    /// 201 with the new session, or 409 carrying the existing session when
    /// an active one already covers the same input and offset.
    pub async fn start(
        State(state): State<AppState>,
        Json(mut request): Json<TranscodeRequest>,
    ) -> Result<Response, ApiError> {
        let params = match request.params.clone() {
            Some(params) => params,
            None => {
                let probe = match request.probe.clone() {
                    Some(probe) => probe,
                    None => {
                        let probe = state.prober.probe(&request.input_path).await?;
                        // Keep the probe on the request so the supervisor
                        // knows the expected output duration
                        request.probe = Some(probe.clone());
                        probe
                    }
                };
                let device = request.device_profile.clone().unwrap_or_default();
                match viewra_decision::decide(&probe, &device, request.bandwidth_kbps)? {
                    PlaybackDecision::Transcode { params, .. } => params,
                    // The caller asked for a transcode even though the
                    // source direct-plays; honour it with defaults
                    PlaybackDecision::DirectPlay { .. } => TranscodeParams::default(),
                }
            }
        };

        let outcome = state.transcoder.start_session(request, params).await?;
        let response = match outcome {
            viewra_core::CreateOutcome::Created(session) => {
                (StatusCode::CREATED, ResponseJson(snapshot(session))).into_response()
            }
            viewra_core::CreateOutcome::Deduped(session) => {
                (StatusCode::CONFLICT, ResponseJson(snapshot(session))).into_response()
            }
        };
        Ok(response)
    }

    /// Session snapshot including progress
    pub async fn get_session(
        State(state): State<AppState>,
        Path(id): Path<String>,
    ) -> Result<ResponseJson<TranscodeSession>, ApiError> {
        let session = state.transcoder.manager().get(&id).await?;
        Ok(ResponseJson(snapshot(session)))
    }

    /// List active sessions
    pub async fn list_sessions(
        State(state): State<AppState>,
    ) -> ResponseJson<Vec<TranscodeSession>> {
        let sessions = state
            .transcoder
            .manager()
            .list_active()
            .await
            .into_iter()
            .map(snapshot)
            .collect();
        ResponseJson(sessions)
    }

    /// Stop a session (idempotent)
    pub async fn stop_session(
        State(state): State<AppState>,
        Path(id): Path<String>,
    ) -> Result<StatusCode, ApiError> {
        state.transcoder.stop_session(&id).await?;
        Ok(StatusCode::NO_CONTENT)
    }
}

/// Streaming handlers
pub struct StreamHandler;

impl StreamHandler {
    /// Progressive stream, or a redirect to the manifest for segmented output
    pub async fn stream(
        State(state): State<AppState>,
        Path(id): Path<String>,
        method: Method,
        headers: HeaderMap,
    ) -> Result<Response, ApiError> {
        let session = state.transcoder.manager().get(&id).await?;

        match session.state {
            // An idle-reaped or expired stream is gone
            SessionState::Cancelled | SessionState::TimedOut => {
                return Err(PlaybackError::not_found("stream", id.as_str()).into());
            }
            SessionState::Failed => {
                return Err(PlaybackError::EncoderFailed {
                    exit_code: None,
                    stderr_tail: session.error.clone().unwrap_or_default(),
                }
                .into());
            }
            _ => {}
        }

        if session.params.container.is_segmented() {
            let manifest = session.params.container.output_filename(&id);
            let location = format!("/playback/stream/{id}/{manifest}");
            return Ok(Response::builder()
                .status(StatusCode::TEMPORARY_REDIRECT)
                .header(LOCATION, location)
                .body(Body::empty())
                .unwrap_or_default());
        }

        let output = session
            .directory
            .join(session.params.container.output_filename(&id));
        let content_type = content_type_for(&output);
        let _ = state.transcoder.manager().touch(&id).await;

        if session.state == SessionState::Completed {
            return serve_file(&output, &headers, &method).await;
        }

        // Still encoding: a ranged request against the bytes already on
        // disk is honoured; everything else gets the tail stream
        if headers.contains_key(RANGE) && output.exists() {
            return serve_file(&output, &headers, &method).await;
        }

        let builder = Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, content_type)
            .header(ACCEPT_RANGES, "bytes");

        if method == Method::HEAD {
            return Ok(builder.body(Body::empty()).unwrap_or_default());
        }

        debug!(session_id = %id, "starting progressive tail stream");
        let reader = TailReader::new(state.transcoder.manager().clone(), id, output);
        Ok(builder
            .body(Body::from_stream(reader.into_stream()))
            .unwrap_or_default())
    }

    /// Serve a named artefact (manifest, playlist, or segment)
    pub async fn stream_file(
        State(state): State<AppState>,
        Path((id, file)): Path<(String, String)>,
        method: Method,
        headers: HeaderMap,
    ) -> Result<Response, ApiError> {
        let session = state.transcoder.manager().get(&id).await?;
        let path = resolve_artifact(&session.directory, &file)?;

        // Manifest requests tolerate the encoder not having written it yet
        let is_manifest = file == session.params.container.output_filename(&id)
            && session.params.container.is_segmented();
        if is_manifest && !session.state.is_terminal() {
            let config = &state.config.streaming;
            wait_for_manifest(&path, config.manifest_wait(), config.poll_max()).await;
        }

        if !path.exists() {
            return Err(PlaybackError::not_found("artefact", file.as_str()).into());
        }

        let _ = state.transcoder.manager().touch(&id).await;
        serve_file(&path, &headers, &method).await
    }
}

/// Strip request internals from a session before putting it on the wire
fn snapshot(mut session: TranscodeSession) -> TranscodeSession {
    session.request = None;
    session
}

/// Static file serve with HEAD and single-range support
///
/// HEAD responses carry exactly the headers (including Content-Length) the
/// matching GET would.
async fn serve_file(
    path: &std::path::Path,
    headers: &HeaderMap,
    method: &Method,
) -> Result<Response, ApiError> {
    let mut file = tokio::fs::File::open(path).await.map_err(|_| {
        PlaybackError::not_found("artefact", path.to_string_lossy().as_ref())
    })?;
    let len = file
        .metadata()
        .await
        .map_err(PlaybackError::from)?
        .len();
    let content_type = content_type_for(path);

    let range_header = headers.get(RANGE).and_then(|v| v.to_str().ok());
    match parse_range_header(range_header, len) {
        RangeOutcome::Full => {
            let builder = Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_TYPE, content_type)
                .header(CONTENT_LENGTH, len)
                .header(ACCEPT_RANGES, "bytes");
            let body = if *method == Method::HEAD {
                Body::empty()
            } else {
                Body::from_stream(ReaderStream::new(file))
            };
            Ok(builder.body(body).unwrap_or_default())
        }
        outcome @ RangeOutcome::Partial { start, end } => {
            let content_length = end - start + 1;
            let builder = Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(CONTENT_TYPE, content_type)
                .header(CONTENT_LENGTH, content_length)
                .header(
                    CONTENT_RANGE,
                    outcome.content_range(len).unwrap_or_default(),
                )
                .header(ACCEPT_RANGES, "bytes");
            let body = if *method == Method::HEAD {
                Body::empty()
            } else {
                file.seek(std::io::SeekFrom::Start(start))
                    .await
                    .map_err(PlaybackError::from)?;
                Body::from_stream(ReaderStream::new(file.take(content_length)))
            };
            Ok(builder.body(body).unwrap_or_default())
        }
        RangeOutcome::Unsatisfiable => Ok(Response::builder()
            .status(StatusCode::RANGE_NOT_SATISFIABLE)
            .header(CONTENT_RANGE, format!("bytes */{len}"))
            .header(ACCEPT_RANGES, "bytes")
            .body(Body::empty())
            .unwrap_or_default()),
    }
}
