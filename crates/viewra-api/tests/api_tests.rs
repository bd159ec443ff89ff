//! HTTP API integration tests
//!
//! Exercise the full router against a transcoder service whose "encoder"
//! is a shell script, covering the decision, lifecycle, and streaming
//! endpoints end to end.

#![cfg(unix)]

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use viewra_api::{ApiService, AppState};
use viewra_core::PlaybackConfig;
use viewra_database::DatabaseService;
use viewra_transcoder::TranscoderService;

struct TestServer {
    app: Router,
    #[allow(dead_code)]
    dir: tempfile::TempDir,
    input: PathBuf,
}

/// Build a server whose encoder is the given shell script body
async fn server_with_encoder(body: &str) -> TestServer {
    let dir = tempfile::tempdir().unwrap();

    let encoder = dir.path().join("fake-encoder.sh");
    std::fs::write(&encoder, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&encoder).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&encoder, perms).unwrap();

    let input = dir.path().join("movie.mkv");
    std::fs::write(&input, b"fake media bytes").unwrap();

    let mut config = PlaybackConfig::default();
    config.transcoding.transcoding_root = dir.path().join("transcoding");
    config.transcoding.encoder_path = encoder;
    let config = Arc::new(config);

    let database = DatabaseService::in_memory().await.unwrap();
    let transcoder = TranscoderService::new(config.clone(), database)
        .await
        .unwrap();
    let app = ApiService::new(AppState::new(config, transcoder)).router();

    TestServer { app, dir, input }
}

fn probe_json(_input: &Path) -> Value {
    json!({
        "width": 1920,
        "height": 1080,
        "fps": 23.976,
        "duration_seconds": 3600.0,
        "video_codec": "h264",
        "audio_codec": "aac",
        "container": "mp4",
        "pixel_format": "yuv420p",
        "is_hdr": false,
        "audio_channels": 2,
        "bitrate_bps": 6_000_000u64,
        "quality_tier": "standard",
        "kind": "movie",
    })
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, headers, body)
}

async fn send_raw(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, bytes.to_vec())
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Start a session with explicit params; returns the session id
async fn start_session(server: &TestServer, container: &str) -> String {
    let body = json!({
        "input_path": server.input,
        "probe": probe_json(&server.input),
        "params": {
            "video_codec": "h264",
            "audio_codec": "aac",
            "container": container,
            "resolution": "1080p",
            "audio_bitrate_kbps": 128,
            "quality": 23,
            "preset": "fast",
            "hdr_handling": "none"
        }
    });
    let (status, _, session) = send(&server.app, post_json("/playback/start", body)).await;
    assert_eq!(status, StatusCode::CREATED);
    session["id"].as_str().unwrap().to_string()
}

async fn wait_for_state(server: &TestServer, id: &str, state: &str) {
    for _ in 0..100 {
        let (status, _, session) = send(&server.app, get(&format!("/playback/session/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        if session["state"] == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("session {id} never reached state {state}");
}

#[tokio::test]
async fn health_reports_capacity() {
    let server = server_with_encoder("sleep 30").await;
    let (status, _, body) = send(&server.app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["active_sessions"], 0);
}

#[tokio::test]
async fn decide_direct_play_for_compatible_source() {
    let server = server_with_encoder("exit 0").await;
    let body = json!({
        "media_path": server.input,
        "probe": probe_json(&server.input),
        "device_profile": {
            "user_agent": "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36",
            "supported_codecs": ["h264", "aac"],
            "max_resolution": "1080p",
            "max_bitrate_bps": 10_000_000u64
        },
        "bandwidth_kbps": 8000
    });

    let (status, _, response) = send(&server.app, post_json("/playback/decide", body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["should_transcode"], false);
    assert_eq!(
        response["direct_play_url"].as_str().unwrap(),
        server.input.to_string_lossy()
    );
}

#[tokio::test]
async fn decide_transcodes_oversized_source_to_hls_for_safari() {
    let server = server_with_encoder("exit 0").await;
    let mut probe = probe_json(&server.input);
    probe["bitrate_bps"] = json!(50_000_000u64);
    let body = json!({
        "media_path": server.input,
        "probe": probe,
        "device_profile": {
            "user_agent": "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
            "supported_codecs": ["h264", "aac"],
            "max_resolution": "1080p",
            "max_bitrate_bps": 10_000_000u64
        },
        "bandwidth_kbps": 8000
    });

    let (status, _, response) = send(&server.app, post_json("/playback/decide", body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["should_transcode"], true);
    let params = &response["transcode_params"];
    assert_eq!(params["container"], "hls");
    assert_eq!(params["video_codec"], "h264");
    assert_eq!(params["resolution"], "1080p");
    assert_eq!(params["preset"], "fast");
    assert_eq!(params["quality"], 22);
}

#[tokio::test]
async fn decide_rejects_probe_without_video() {
    let server = server_with_encoder("exit 0").await;
    let mut probe = probe_json(&server.input);
    probe["video_codec"] = Value::Null;
    probe["width"] = json!(0);
    probe["height"] = json!(0);
    let body = json!({ "media_path": server.input, "probe": probe });

    let (status, _, response) = send(&server.app, post_json("/playback/decide", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["kind"], "PROBE_INCOMPLETE");
}

#[tokio::test]
async fn duplicate_start_returns_conflict_with_existing_session() {
    let server = server_with_encoder("sleep 30").await;
    let id = start_session(&server, "mp4").await;

    let body = json!({
        "input_path": server.input,
        "probe": probe_json(&server.input),
        "params": {
            "video_codec": "h264",
            "audio_codec": "aac",
            "container": "mp4",
            "resolution": "1080p",
            "audio_bitrate_kbps": 128,
            "quality": 23,
            "preset": "fast",
            "hdr_handling": "none"
        }
    });
    let (status, _, session) = send(&server.app, post_json("/playback/start", body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(session["id"].as_str().unwrap(), id);

    let (status, _, sessions) = send(&server.app, get("/playback/sessions")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sessions.as_array().unwrap().len(), 1);

    // Cleanup
    let delete = Request::builder()
        .method(Method::DELETE)
        .uri(format!("/playback/session/{id}"))
        .body(Body::empty())
        .unwrap();
    send(&server.app, delete).await;
}

#[tokio::test]
async fn delete_session_is_idempotent() {
    let server = server_with_encoder("sleep 30").await;
    let id = start_session(&server, "mp4").await;

    for _ in 0..2 {
        let delete = Request::builder()
            .method(Method::DELETE)
            .uri(format!("/playback/session/{id}"))
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = send(&server.app, delete).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    let (status, _, session) = send(&server.app, get(&format!("/playback/session/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["state"], "cancelled");
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let server = server_with_encoder("exit 0").await;
    let (status, _, body) = send(&server.app, get("/playback/session/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "NOT_FOUND");

    let (status, _, _) = send(&server.app, get("/playback/stream/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn dash_session_serves_manifest_and_ranged_segments() {
    // Writes a manifest and an init segment, then keeps "encoding"
    let server = server_with_encoder(
        r#"
for last; do :; done
dir=$(dirname "$last")
printf '<?xml version="1.0" encoding="utf-8"?><MPD></MPD>' > "$last"
printf '0123456789abcdef' > "$dir/init-stream0.m4s"
sleep 30
"#,
    )
    .await;
    let id = start_session(&server, "dash").await;
    wait_for_state(&server, &id, "running").await;

    // Progressive endpoint redirects to the manifest
    let (status, headers, _) = send_raw(&server.app, get(&format!("/playback/stream/{id}"))).await;
    assert_eq!(status, StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        headers[header::LOCATION],
        format!("/playback/stream/{id}/manifest.mpd")
    );

    // Manifest appears within the wait window
    let (status, headers, body) =
        send_raw(&server.app, get(&format!("/playback/stream/{id}/manifest.mpd"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/dash+xml");
    assert!(body.starts_with(b"<?xml"));

    // Ranged init segment
    let request = Request::builder()
        .uri(format!("/playback/stream/{id}/init-stream0.m4s"))
        .header(header::RANGE, "bytes=0-9")
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send_raw(&server.app, request).await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(headers[header::CONTENT_RANGE], "bytes 0-9/16");
    assert_eq!(body, b"0123456789");

    // Exactly one byte
    let request = Request::builder()
        .uri(format!("/playback/stream/{id}/init-stream0.m4s"))
        .header(header::RANGE, "bytes=0-0")
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send_raw(&server.app, request).await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(headers[header::CONTENT_RANGE], "bytes 0-0/16");
    assert_eq!(body.len(), 1);

    // Beyond EOF
    let request = Request::builder()
        .uri(format!("/playback/stream/{id}/init-stream0.m4s"))
        .header(header::RANGE, "bytes=500-")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send_raw(&server.app, request).await;
    assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);

    // Unproduced segment
    let (status, _, _) =
        send_raw(&server.app, get(&format!("/playback/stream/{id}/chunk-stream0-99999.m4s"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // HEAD mirrors GET headers
    let head = Request::builder()
        .method(Method::HEAD)
        .uri(format!("/playback/stream/{id}/init-stream0.m4s"))
        .body(Body::empty())
        .unwrap();
    let (status, head_headers, body) = send_raw(&server.app, head).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
    let (_, get_headers, _) =
        send_raw(&server.app, get(&format!("/playback/stream/{id}/init-stream0.m4s"))).await;
    assert_eq!(head_headers[header::CONTENT_LENGTH], get_headers[header::CONTENT_LENGTH]);
    assert_eq!(head_headers[header::CONTENT_TYPE], get_headers[header::CONTENT_TYPE]);

    // Cleanup
    let delete = Request::builder()
        .method(Method::DELETE)
        .uri(format!("/playback/session/{id}"))
        .body(Body::empty())
        .unwrap();
    send(&server.app, delete).await;
}

#[tokio::test]
async fn crashed_encoder_surfaces_failure() {
    let server = server_with_encoder(r#"echo "cannot open codec" >&2; exit 1"#).await;
    let id = start_session(&server, "mp4").await;
    wait_for_state(&server, &id, "failed").await;

    let (status, _, session) = send(&server.app, get(&format!("/playback/session/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["state"], "failed");
    assert!(!session["error"].as_str().unwrap().is_empty());

    let (status, _, body) = send(&server.app, get(&format!("/playback/stream/{id}"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["kind"], "ENCODER_FAILED");
}

#[tokio::test]
async fn path_traversal_is_rejected() {
    let server = server_with_encoder("sleep 30").await;
    let id = start_session(&server, "mp4").await;

    let (status, _, body) = send(
        &server.app,
        get(&format!("/playback/stream/{id}/%2e%2e%2fsecrets")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "BAD_REQUEST");

    // Cleanup
    let delete = Request::builder()
        .method(Method::DELETE)
        .uri(format!("/playback/session/{id}"))
        .body(Body::empty())
        .unwrap();
    send(&server.app, delete).await;
}

#[tokio::test]
async fn capacity_limit_returns_too_many_requests() {
    let server = server_with_encoder("sleep 30").await;

    // Default max_concurrent is 4; a distinct input per session
    let mut ids = Vec::new();
    for i in 0..4 {
        let input = server.dir.path().join(format!("movie{i}.mkv"));
        std::fs::write(&input, b"media").unwrap();
        let body = json!({
            "input_path": input,
            "probe": probe_json(&input),
            "params": {
                "video_codec": "h264",
                "audio_codec": "aac",
                "container": "mp4",
                "resolution": "1080p",
                "audio_bitrate_kbps": 128,
                "quality": 23,
                "preset": "fast",
                "hdr_handling": "none"
            }
        });
        let (status, _, session) = send(&server.app, post_json("/playback/start", body)).await;
        assert_eq!(status, StatusCode::CREATED);
        ids.push(session["id"].as_str().unwrap().to_string());
    }

    let input = server.dir.path().join("one-too-many.mkv");
    std::fs::write(&input, b"media").unwrap();
    let body = json!({
        "input_path": input,
        "probe": probe_json(&input),
        "params": {
            "video_codec": "h264",
            "audio_codec": "aac",
            "container": "mp4",
            "resolution": "1080p",
            "audio_bitrate_kbps": 128,
            "quality": 23,
            "preset": "fast",
            "hdr_handling": "none"
        }
    });
    let (status, _, response) = send(&server.app, post_json("/playback/start", body)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response["kind"], "AT_CAPACITY");

    for id in ids {
        let delete = Request::builder()
            .method(Method::DELETE)
            .uri(format!("/playback/session/{id}"))
            .body(Body::empty())
            .unwrap();
        send(&server.app, delete).await;
    }
}

#[tokio::test]
async fn progressive_stream_tails_growing_output() {
    // Write some bytes, keep running long enough for the client to read
    let server = server_with_encoder(
        r#"
for last; do :; done
printf 'mp4 header and frames' > "$last"
sleep 30
"#,
    )
    .await;
    let id = start_session(&server, "mp4").await;
    wait_for_state(&server, &id, "running").await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Ranged read against the bytes already on disk
    let request = Request::builder()
        .uri(format!("/playback/stream/{id}"))
        .header(header::RANGE, "bytes=0-3")
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send_raw(&server.app, request).await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(headers[header::ACCEPT_RANGES], "bytes");
    assert_eq!(body, b"mp4 ");

    // Cleanup
    let delete = Request::builder()
        .method(Method::DELETE)
        .uri(format!("/playback/session/{id}"))
        .body(Body::empty())
        .unwrap();
    send(&server.app, delete).await;
}
