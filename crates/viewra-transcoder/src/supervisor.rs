//! Encoder subprocess supervision
//!
//! Owns the lifetime of exactly one subprocess per session: spawn with a
//! cancellable scope, ingest the progress stream, enforce wall-clock
//! deadlines, and report every state change to the session manager.

use crate::command::{build_args, output_path};
use crate::manager::{SessionHandle, SessionManager};
use crate::orphan;
use crate::progress::ProgressParser;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use viewra_core::session::{SessionState, TranscodeSession};
use viewra_core::{PlaybackConfig, PlaybackError, Result};

/// Bytes of encoder diagnostics retained for failure reports
const STDERR_TAIL_BYTES: usize = 4096;

/// Runtime below which an exit is treated as an immediate crash
const IMMEDIATE_CRASH_WINDOW: Duration = Duration::from_secs(1);

/// Supervises encoder subprocesses for the session manager
#[derive(Clone)]
pub struct EncoderSupervisor {
    config: Arc<PlaybackConfig>,
    manager: SessionManager,
}

impl EncoderSupervisor {
    pub fn new(config: Arc<PlaybackConfig>, manager: SessionManager) -> Self {
        Self { config, manager }
    }

    /// Spawn the encoder for a freshly created session
    ///
    /// Drives Pending -> Starting -> Running and hands the child to a
    /// supervision task bound to the session's cancellation scope.
    pub async fn start(&self, handle: Arc<SessionHandle>) -> Result<()> {
        let session = handle.snapshot().await;
        let id = session.id.clone();

        self.manager
            .transition(&id, SessionState::Starting, None)
            .await?;

        if let Err(e) = tokio::fs::metadata(&session.input_path).await {
            let message = format!(
                "input not readable: {}: {}",
                session.input_path.display(),
                e
            );
            self.manager
                .transition(&id, SessionState::Failed, Some(message.clone()))
                .await?;
            return Err(PlaybackError::encoder_start_failed(message));
        }

        let args = build_args(
            &session.input_path,
            &session.params,
            &session.directory,
            &id,
            self.config.transcoding.hardware_acceleration,
        );
        debug!(session_id = %id, ?args, "spawning encoder");

        let spawned = Command::new(&self.config.transcoding.encoder_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let message = format!("failed to spawn encoder: {e}");
                self.manager
                    .transition(&id, SessionState::Failed, Some(message.clone()))
                    .await?;
                return Err(PlaybackError::encoder_start_failed(message));
            }
        };

        let pid = child.id();
        self.manager.set_process_id(&id, pid).await?;
        self.manager
            .transition(&id, SessionState::Running, None)
            .await?;
        info!(session_id = %id, pid, "encoder running");

        self.spawn_supervision(handle, child, session);
        Ok(())
    }

    /// Stop a session (idempotent)
    ///
    /// Cancels the session scope; the supervision task sends the graceful
    /// interrupt, escalates to kill after the grace period, and the
    /// directory deletion is deferred for in-flight segment requests.
    pub async fn stop(&self, id: &str) -> Result<()> {
        let session = self.manager.get(id).await?;
        if session.state.is_terminal() {
            return Ok(());
        }

        match self.manager.handle(id).await {
            Ok(handle) => {
                handle.cancel.cancel();
                // The supervision task also tries this transition; whichever
                // runs first wins and the loser's BAD_STATE is ignored.
                let _ = self
                    .manager
                    .transition(id, SessionState::Cancelled, None)
                    .await;
            }
            Err(_) => {
                // Not resident: a leftover row. Close it out directly.
                let _ = self
                    .manager
                    .transition(id, SessionState::Cancelled, None)
                    .await;
            }
        }

        schedule_dir_cleanup(
            session.directory.clone(),
            self.config.retention.post_close_dir_delete(),
        );
        Ok(())
    }

    fn spawn_supervision(
        &self,
        handle: Arc<SessionHandle>,
        mut child: Child,
        session: TranscodeSession,
    ) {
        let manager = self.manager.clone();
        let config = self.config.clone();
        let id = session.id.clone();
        let started_at = Instant::now();

        // Expected output duration drives the percent computation
        let expected_duration = session
            .request
            .as_ref()
            .and_then(|r| r.probe.as_ref())
            .map(|p| (p.duration_seconds - f64::from(session.params.start_offset_seconds)).max(0.0))
            .unwrap_or(0.0);

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let progress_task = stdout.map(|stdout| {
            let manager = manager.clone();
            let id = id.clone();
            let interval = config.transcoding.progress_event_interval();
            tokio::spawn(async move {
                ingest_progress(manager, id, stdout, expected_duration, interval).await
            })
        });

        let stderr_task = stderr.map(|stderr| {
            tokio::spawn(async move { collect_stderr_tail(stderr).await })
        });

        let output = output_path(&session.directory, session.params.container, &id);
        let soft_deadline = config.transcoding.soft_deadline();
        let hard_deadline = config.transcoding.hard_deadline();
        let graceful = config.transcoding.graceful_stop();
        let dir_delete_delay = config.retention.post_close_dir_delete();

        tokio::spawn(async move {
            let soft = sleep(soft_deadline);
            let hard = sleep(hard_deadline);
            tokio::pin!(soft, hard);
            let mut soft_fired = false;

            let outcome = loop {
                tokio::select! {
                    status = child.wait() => break Exit::Finished(status),
                    _ = handle.cancel.cancelled() => break Exit::Cancelled,
                    _ = &mut hard => break Exit::HardDeadline,
                    _ = &mut soft, if !soft_fired => {
                        warn!(session_id = %id, "session past soft deadline ({}h)",
                            soft_deadline.as_secs() / 3600);
                        soft_fired = true;
                    }
                }
            };

            match outcome {
                Exit::Finished(Ok(status)) => {
                    // The pipes are closed now, so the tail is complete
                    let stderr_tail = match stderr_task {
                        Some(task) => task.await.unwrap_or_default(),
                        None => String::new(),
                    };
                    if let Some(task) = progress_task {
                        task.abort();
                    }
                    let runtime = started_at.elapsed();
                    if status.success() {
                        let _ = manager
                            .transition(&id, SessionState::Completed, None)
                            .await;
                        info!(session_id = %id, "encoder completed");
                    } else if output_is_usable(&output).await {
                        // Some encoders exit nonzero after producing a
                        // perfectly servable output
                        warn!(session_id = %id, code = ?status.code(),
                            "encoder exited nonzero with usable output; completing");
                        let _ = manager
                            .transition(&id, SessionState::Completed, None)
                            .await;
                    } else {
                        if runtime < IMMEDIATE_CRASH_WINDOW {
                            warn!(session_id = %id, "encoder crashed within {}ms of spawn",
                                runtime.as_millis());
                        }
                        let message = failure_message(status.code(), &stderr_tail);
                        let _ = manager
                            .transition(&id, SessionState::Failed, Some(message))
                            .await;
                        schedule_dir_cleanup(session.directory.clone(), dir_delete_delay);
                    }
                }
                Exit::Finished(Err(e)) => {
                    if let Some(task) = stderr_task {
                        task.abort();
                    }
                    if let Some(task) = progress_task {
                        task.abort();
                    }
                    error!(session_id = %id, error = %e, "failed waiting on encoder");
                    let _ = manager
                        .transition(&id, SessionState::Failed, Some(format!("wait failed: {e}")))
                        .await;
                }
                Exit::Cancelled => {
                    // Kill first: the pipe readers only finish once the
                    // process is gone
                    stop_child(&mut child, graceful).await;
                    if let Some(task) = stderr_task {
                        task.abort();
                    }
                    if let Some(task) = progress_task {
                        task.abort();
                    }
                    let _ = manager
                        .transition(&id, SessionState::Cancelled, None)
                        .await;
                    info!(session_id = %id, "session cancelled");
                    schedule_dir_cleanup(session.directory.clone(), dir_delete_delay);
                }
                Exit::HardDeadline => {
                    warn!(session_id = %id, "session past hard deadline; stopping encoder");
                    stop_child(&mut child, graceful).await;
                    if let Some(task) = stderr_task {
                        task.abort();
                    }
                    if let Some(task) = progress_task {
                        task.abort();
                    }
                    let _ = manager
                        .transition(
                            &id,
                            SessionState::TimedOut,
                            Some(format!(
                                "exceeded hard deadline of {}h",
                                hard_deadline.as_secs() / 3600
                            )),
                        )
                        .await;
                    schedule_dir_cleanup(session.directory.clone(), dir_delete_delay);
                }
            }
        });
    }
}

enum Exit {
    Finished(std::io::Result<std::process::ExitStatus>),
    Cancelled,
    HardDeadline,
}

/// Graceful interrupt, then kill after the grace period
async fn stop_child(child: &mut Child, graceful: Duration) {
    if let Some(pid) = child.id() {
        orphan::terminate_process(pid);
    }
    tokio::select! {
        _ = child.wait() => {}
        _ = sleep(graceful) => {
            let _ = child.kill().await;
        }
    }
}

/// Read the progress pipe line-by-line, publishing throttled updates
async fn ingest_progress(
    manager: SessionManager,
    id: String,
    stdout: tokio::process::ChildStdout,
    expected_duration: f64,
    interval: Duration,
) {
    let mut lines = BufReader::new(stdout).lines();
    let mut parser = ProgressParser::new();
    let mut last_emit: Option<Instant> = None;

    while let Ok(Some(line)) = lines.next_line().await {
        if !parser.parse_line(&line) {
            continue;
        }
        let due = last_emit
            .map(|at| at.elapsed() >= interval)
            .unwrap_or(true);
        if due || parser.is_complete {
            last_emit = Some(Instant::now());
            let progress = parser.to_progress(expected_duration);
            if manager.update_progress(&id, progress).await.is_err() {
                break;
            }
        }
        if parser.is_complete {
            break;
        }
    }
    debug!(session_id = %id, "progress stream closed");
}

/// Collect the last few KiB of encoder diagnostics
async fn collect_stderr_tail(stderr: tokio::process::ChildStderr) -> String {
    let mut reader = BufReader::new(stderr);
    let mut tail = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&buf[..n]);
                if tail.len() > STDERR_TAIL_BYTES {
                    let excess = tail.len() - STDERR_TAIL_BYTES;
                    tail.drain(..excess);
                }
            }
        }
    }
    String::from_utf8_lossy(&tail).into_owned()
}

/// A nonzero exit still counts as success when the output is servable
async fn output_is_usable(output: &PathBuf) -> bool {
    match tokio::fs::metadata(output).await {
        Ok(meta) => meta.len() > 0,
        Err(_) => false,
    }
}

fn failure_message(code: Option<i32>, stderr_tail: &str) -> String {
    let tail = stderr_tail.trim();
    match (code, tail.is_empty()) {
        (Some(code), false) => format!("encoder exited with code {code}: {tail}"),
        (Some(code), true) => format!("encoder exited with code {code}"),
        (None, false) => format!("encoder killed by signal: {tail}"),
        (None, true) => "encoder killed by signal".to_string(),
    }
}

/// Delete a session directory after the deferred-cleanup window
fn schedule_dir_cleanup(directory: PathBuf, delay: Duration) {
    tokio::spawn(async move {
        sleep(delay).await;
        if directory.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(&directory).await {
                warn!(directory = %directory.display(), error = %e,
                    "deferred directory cleanup failed");
            }
        }
    });
}
