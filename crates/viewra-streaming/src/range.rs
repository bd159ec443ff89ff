//! HTTP Range request handling
//!
//! Single-range `bytes=` requests only; multi-range requests fall back to a
//! full response, which clients handle fine.

/// Outcome of interpreting a Range header against a file length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    /// No range requested (or an ignorable multi-range): serve the whole file
    Full,
    /// Serve the inclusive byte range with 206
    Partial { start: u64, end: u64 },
    /// Range cannot be satisfied: 416
    Unsatisfiable,
}

impl RangeOutcome {
    /// The `Content-Range` value for a partial response
    pub fn content_range(&self, file_len: u64) -> Option<String> {
        match self {
            Self::Partial { start, end } => Some(format!("bytes {start}-{end}/{file_len}")),
            _ => None,
        }
    }

    /// Number of bytes a partial response carries
    pub fn len(&self) -> Option<u64> {
        match self {
            Self::Partial { start, end } => Some(end - start + 1),
            _ => None,
        }
    }
}

/// Interpret an optional `Range` header value against the current file length
pub fn parse_range_header(header: Option<&str>, file_len: u64) -> RangeOutcome {
    let Some(header) = header else {
        return RangeOutcome::Full;
    };
    let Some(spec) = header.trim().strip_prefix("bytes=") else {
        // Unknown unit: ignore the header
        return RangeOutcome::Full;
    };
    if spec.contains(',') {
        return RangeOutcome::Full;
    }

    let Some((start_str, end_str)) = spec.split_once('-') else {
        return RangeOutcome::Unsatisfiable;
    };
    let start_str = start_str.trim();
    let end_str = end_str.trim();

    if start_str.is_empty() {
        // Suffix range: last N bytes
        let Ok(suffix) = end_str.parse::<u64>() else {
            return RangeOutcome::Unsatisfiable;
        };
        if suffix == 0 || file_len == 0 {
            return RangeOutcome::Unsatisfiable;
        }
        let n = suffix.min(file_len);
        return RangeOutcome::Partial {
            start: file_len - n,
            end: file_len - 1,
        };
    }

    let Ok(start) = start_str.parse::<u64>() else {
        return RangeOutcome::Unsatisfiable;
    };
    if start >= file_len {
        return RangeOutcome::Unsatisfiable;
    }

    let end = if end_str.is_empty() {
        file_len - 1
    } else {
        match end_str.parse::<u64>() {
            // An end past EOF is clamped, per RFC 7233
            Ok(end) => end.min(file_len - 1),
            Err(_) => return RangeOutcome::Unsatisfiable,
        }
    };
    if end < start {
        return RangeOutcome::Unsatisfiable;
    }

    RangeOutcome::Partial { start, end }
}
