//! Session artefact resolution and content types

use std::path::{Component, Path, PathBuf};
use viewra_core::{PlaybackError, Result};

/// Resolve a requested artefact name inside a session directory
///
/// Every served path must be a strict child of the session directory;
/// absolute paths and any `..` component are rejected.
pub fn resolve_artifact(directory: &Path, file: &str) -> Result<PathBuf> {
    if file.is_empty() {
        return Err(PlaybackError::bad_request("empty artefact name"));
    }

    let requested = Path::new(file);
    if requested.is_absolute() {
        return Err(PlaybackError::bad_request("absolute artefact path"));
    }
    for component in requested.components() {
        match component {
            Component::Normal(_) => {}
            _ => {
                return Err(PlaybackError::bad_request(format!(
                    "path traversal rejected: {file}"
                )))
            }
        }
    }

    let resolved = directory.join(requested);
    if !resolved.starts_with(directory) {
        return Err(PlaybackError::bad_request(format!(
            "artefact escapes session directory: {file}"
        )));
    }
    Ok(resolved)
}

/// Content type by artefact extension
pub fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("mpd") => "application/dash+xml",
        Some("m3u8") => "application/vnd.apple.mpegurl",
        Some("m4s") => "video/iso.segment",
        Some("ts") => "video/mp2t",
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        _ => "application/octet-stream",
    }
}
