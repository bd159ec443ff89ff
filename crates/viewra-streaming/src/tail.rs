//! Progressive tail-read streaming
//!
//! Reads a file the encoder is still appending to. On reaching the current
//! EOF the reader consults the owning session: still running means wait and
//! retry with bounded backoff, completed means real EOF once every byte is
//! out, failed or cancelled means abort the stream. A filesystem watcher on
//! the session directory wakes the wait early when the encoder writes; the
//! backoff poll keeps things moving when no watcher could be established.
//! Each successful read refreshes the session's `last_accessed`; a reader
//! that sees no data for the idle window cancels the session on the
//! assumption the client is gone.

use bytes::Bytes;
use futures::stream::Stream;
use notify::{RecursiveMode, Watcher};
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::time::sleep;
use tracing::{debug, warn};
use viewra_core::session::SessionState;
use viewra_transcoder::SessionManager;

/// Read buffer size per chunk
const CHUNK_BYTES: usize = 64 * 1024;

/// Tail-reading file streamer bound to a session
pub struct TailReader {
    manager: SessionManager,
    session_id: String,
    path: PathBuf,
    file: Option<File>,
    offset: u64,
    poll_min: Duration,
    poll_max: Duration,
    backoff: Duration,
    silent_cap: Duration,
    idle_limit: Duration,
    last_data: Instant,
    silent_since: Option<Instant>,
    keepalive_sent: bool,
    wake_rx: tokio::sync::mpsc::Receiver<()>,
    /// Held so the wake channel stays open even without a watcher
    _wake_tx: tokio::sync::mpsc::Sender<()>,
    /// Keeps the directory watch alive for the reader's lifetime
    _watcher: Option<notify::RecommendedWatcher>,
}

impl TailReader {
    /// Create a reader over the session's primary output file
    ///
    /// The file may not exist yet; the reader waits for it the same way it
    /// waits for new bytes.
    pub fn new(manager: SessionManager, session_id: String, path: PathBuf) -> Self {
        let config = manager.config();
        let poll_min = config.streaming.poll_min();
        let poll_max = config.streaming.poll_max();
        let silent_cap = config.streaming.poll_silent_cap();
        let idle_limit = config.retention.reader_idle();

        // Change notifications on the session directory wake the EOF wait
        // as soon as the encoder writes; the file itself may not exist yet
        let (wake_tx, wake_rx) = tokio::sync::mpsc::channel::<()>(8);
        let watcher = path.parent().and_then(|parent| {
            let wake_tx = wake_tx.clone();
            let mut watcher = notify::recommended_watcher(move |_event| {
                let _ = wake_tx.try_send(());
            })
            .ok()?;
            watcher.watch(parent, RecursiveMode::NonRecursive).ok()?;
            Some(watcher)
        });

        Self {
            manager,
            session_id,
            path,
            file: None,
            offset: 0,
            poll_min,
            poll_max,
            backoff: poll_min,
            silent_cap,
            idle_limit,
            last_data: Instant::now(),
            silent_since: None,
            keepalive_sent: false,
            wake_rx,
            _wake_tx: wake_tx,
            _watcher: watcher,
        }
    }

    /// Produce the next chunk, waiting past EOF while the encoder runs
    ///
    /// None is real end-of-stream; an Err aborts the HTTP response.
    pub async fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
        loop {
            if self.file.is_none() {
                match File::open(&self.path).await {
                    Ok(file) => self.file = Some(file),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        // The encoder has not created the output yet
                        if let Some(done) = self.wait_for_more().await {
                            return done;
                        }
                        continue;
                    }
                    Err(e) => return Some(Err(e)),
                }
            }

            let file = self.file.as_mut().expect("file opened above");
            let mut buf = vec![0u8; CHUNK_BYTES];
            match file.read(&mut buf).await {
                Ok(0) => {
                    if let Some(done) = self.wait_for_more().await {
                        return done;
                    }
                }
                Ok(n) => {
                    buf.truncate(n);
                    self.offset += n as u64;
                    self.last_data = Instant::now();
                    self.silent_since = None;
                    self.keepalive_sent = false;
                    self.backoff = self.poll_min;
                    if let Err(e) = self.manager.touch(&self.session_id).await {
                        debug!(session_id = %self.session_id, error = %e, "touch failed");
                    }
                    return Some(Ok(Bytes::from(buf)));
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }

    /// Decide what to do at the current EOF
    ///
    /// Returns Some(outcome) to finish the stream one way or another, None
    /// to retry the read.
    async fn wait_for_more(&mut self) -> Option<Option<io::Result<Bytes>>> {
        let state = match self.manager.get(&self.session_id).await {
            Ok(session) => session.state,
            Err(_) => {
                return Some(Some(Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    "session disappeared during streaming",
                ))))
            }
        };

        match state {
            SessionState::Completed => {
                let len = tokio::fs::metadata(&self.path)
                    .await
                    .map(|m| m.len())
                    .unwrap_or(self.offset);
                if self.offset >= len {
                    return Some(None); // real EOF
                }
                None // more bytes on disk than we have read
            }
            SessionState::Failed | SessionState::TimedOut => Some(Some(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "encoder failed before completing the stream",
            )))),
            SessionState::Cancelled => Some(Some(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "session was cancelled",
            )))),
            SessionState::Pending | SessionState::Starting | SessionState::Running => {
                if self.last_data.elapsed() >= self.idle_limit {
                    warn!(session_id = %self.session_id,
                        "no reads for {}m; cancelling session", self.idle_limit.as_secs() / 60);
                    if let Ok(handle) = self.manager.handle(&self.session_id).await {
                        handle.cancel.cancel();
                    }
                    return Some(Some(Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "reader idle timeout",
                    ))));
                }

                let silent_since = *self.silent_since.get_or_insert_with(Instant::now);
                if silent_since.elapsed() >= self.silent_cap && !self.keepalive_sent {
                    // Yield an empty chunk so the HTTP layer sees liveness
                    self.keepalive_sent = true;
                    return Some(Some(Ok(Bytes::new())));
                }

                // Sleep the backoff, or wake early on a directory event
                let backoff = self.backoff;
                let woke = tokio::select! {
                    _ = sleep(backoff) => false,
                    _ = self.wake_rx.recv() => true,
                };
                self.backoff = if woke {
                    self.poll_min
                } else {
                    (self.backoff * 2).min(self.poll_max)
                };
                None
            }
        }
    }

    /// Adapt into a body stream
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send {
        futures::stream::unfold(self, |mut reader| async move {
            reader.next_chunk().await.map(|chunk| (chunk, reader))
        })
    }
}
