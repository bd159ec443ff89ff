//! Background janitor owned by the session manager
//!
//! Periodically reclaims: sessions idle past the reader-idle window,
//! terminal sessions past their retention, excess disk usage over the size
//! cap, and orphaned encoder processes.

use crate::manager::SessionManager;
use crate::orphan;
use crate::supervisor::EncoderSupervisor;
use chrono::Utc;
use std::collections::HashSet;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use viewra_core::session::{SessionState, TranscodeSession};
use walkdir::WalkDir;

/// Periodic cleanup task
pub struct Janitor {
    manager: SessionManager,
    supervisor: EncoderSupervisor,
    cancel: CancellationToken,
}

impl Janitor {
    pub fn new(
        manager: SessionManager,
        supervisor: EncoderSupervisor,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            manager,
            supervisor,
            cancel,
        }
    }

    /// Run until cancelled
    pub async fn run(self) {
        let cleanup_every = self.manager.config().retention.cleanup_interval();
        let orphans_every = self.manager.config().transcoding.orphan_sweep_interval();

        let mut cleanup = tokio::time::interval(cleanup_every);
        let mut orphans = tokio::time::interval(orphans_every);
        // The first tick of an interval fires immediately; skip it so a
        // fresh start does not sweep before anything exists
        cleanup.tick().await;
        orphans.tick().await;

        info!("janitor started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = cleanup.tick() => self.cleanup_pass().await,
                _ = orphans.tick() => self.orphan_pass().await,
            }
        }
        info!("janitor stopped");
    }

    /// One full cleanup pass (also callable directly from tests)
    pub async fn cleanup_pass(&self) {
        self.reap_idle_sessions().await;
        self.reap_expired_sessions().await;
        self.enforce_size_cap().await;
    }

    /// Cancel sessions with no streaming reads inside the idle window
    async fn reap_idle_sessions(&self) {
        let idle_for = self.manager.config().retention.reader_idle();
        for session in self.manager.idle_sessions(idle_for).await {
            info!(session_id = %session.id, "cancelling idle session (no reads in {}m)",
                idle_for.as_secs() / 60);
            if let Err(e) = self.supervisor.stop(&session.id).await {
                warn!(session_id = %session.id, error = %e, "failed to stop idle session");
            }
        }
    }

    /// Remove terminal sessions whose retention has expired
    async fn reap_expired_sessions(&self) {
        let retention = self.manager.config().retention.clone();
        let base_cutoff = Utc::now() - chrono::Duration::hours(retention.file_retention_hours as i64);

        let expired = match self.manager.expired_sessions(base_cutoff).await {
            Ok(expired) => expired,
            Err(e) => {
                warn!(error = %e, "retention scan failed");
                return;
            }
        };

        let extended_cutoff =
            Utc::now() - chrono::Duration::hours(retention.extended_retention_hours as i64);
        let grace_cutoff = Utc::now()
            - chrono::Duration::seconds(retention.post_complete_grace_seconds as i64);
        let large_bytes = retention.large_file_mb * 1024 * 1024;

        for session in expired {
            let ended = session.end_time.unwrap_or(session.start_time);
            // A completed session keeps its directory for the streaming
            // grace window regardless of how short retention is set
            if session.state == SessionState::Completed && ended > grace_cutoff {
                continue;
            }
            let size = directory_size(&session.directory).await;
            if size > large_bytes {
                // Large outputs get the extended retention window
                if ended > extended_cutoff {
                    continue;
                }
            }
            debug!(session_id = %session.id, "removing expired session");
            if let Err(e) = self.manager.remove(&session.id).await {
                warn!(session_id = %session.id, error = %e, "failed to remove expired session");
            }
        }
    }

    /// Delete the oldest terminal sessions when the root exceeds the cap
    async fn enforce_size_cap(&self) {
        let config = self.manager.config();
        let cap_bytes = config.retention.max_size_gb * 1024 * 1024 * 1024;
        let root = config.transcoding.transcoding_root.clone();

        let total = directory_size(&root).await;
        if total <= cap_bytes {
            return;
        }
        warn!(
            total_gb = total / (1024 * 1024 * 1024),
            cap_gb = config.retention.max_size_gb,
            "transcoding root over size cap"
        );

        let mut terminal: Vec<TranscodeSession> = match self
            .manager
            .expired_sessions(Utc::now())
            .await
        {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(error = %e, "size-cap scan failed");
                return;
            }
        };
        terminal.sort_by_key(|s| s.end_time.unwrap_or(s.start_time));

        let mut reclaimed: u64 = 0;
        for session in terminal {
            if total - reclaimed <= cap_bytes {
                break;
            }
            reclaimed += directory_size(&session.directory).await;
            if let Err(e) = self.manager.remove(&session.id).await {
                warn!(session_id = %session.id, error = %e, "failed to remove session for size cap");
            }
        }
    }

    /// Kill encoder processes no active session owns
    async fn orphan_pass(&self) {
        let root = self.manager.config().transcoding.transcoding_root.clone();
        let active: HashSet<u32> = self.manager.active_pids().await.into_iter().collect();

        let killed = tokio::task::spawn_blocking(move || orphan::sweep(&root, &active))
            .await
            .unwrap_or(0);
        if killed > 0 {
            warn!(killed, "orphan sweep killed encoder processes");
        }
    }
}

/// Recursive directory size; zero when missing
async fn directory_size(path: &Path) -> u64 {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        WalkDir::new(&path)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.metadata().ok())
            .filter(|meta| meta.is_file())
            .map(|meta| meta.len())
            .sum()
    })
    .await
    .unwrap_or(0)
}
