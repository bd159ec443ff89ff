//! Manifest materialisation wait
//!
//! A manifest request may arrive before the encoder has written the file.
//! Waits on filesystem change notifications with a bounded polling
//! fallback, up to the configured deadline.

use notify::{RecursiveMode, Watcher};
use std::path::Path;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::debug;

/// Wait for a manifest (or playlist) to exist with content
///
/// Returns true once the file exists and is non-empty, false if the
/// deadline passed first.
pub async fn wait_for_manifest(path: &Path, deadline: Duration, poll_interval: Duration) -> bool {
    if is_ready(path).await {
        return true;
    }

    // Change notifications on the parent directory wake us early; polling
    // still runs underneath in case the watcher cannot be established.
    let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(8);
    let _watcher = path.parent().and_then(|parent| {
        let mut watcher = notify::recommended_watcher(move |_event| {
            let _ = tx.blocking_send(());
        })
        .ok()?;
        watcher.watch(parent, RecursiveMode::NonRecursive).ok()?;
        Some(watcher)
    });

    let wait = async {
        loop {
            tokio::select! {
                _ = sleep(poll_interval) => {}
                _ = rx.recv() => {}
            }
            if is_ready(path).await {
                return;
            }
        }
    };

    match timeout(deadline, wait).await {
        Ok(()) => true,
        Err(_) => {
            debug!(path = %path.display(), "manifest did not materialise before deadline");
            false
        }
    }
}

async fn is_ready(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len() > 0,
        Err(_) => false,
    }
}
