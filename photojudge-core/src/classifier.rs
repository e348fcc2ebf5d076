/// Error classification for the batch driver.
///
/// Maps whatever a scorer, validator or the filesystem threw at us onto a
/// fixed taxonomy. The driver only ever branches on `ErrorKind`; everything
/// else here is for the failed-items report.
use crate::scorer::ScorerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    BackendUnreachable,
    Filesystem,
    CorruptedFile,
    InvalidFormat,
    Unknown,
}

impl ErrorKind {
    /// System-wide failures stop the whole run; everything else only costs
    /// the photo it happened on.
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorKind::BackendUnreachable)
    }

    /// Short reason recorded next to a skipped photo.
    pub fn reason(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::BackendUnreachable => "backend unreachable",
            ErrorKind::Filesystem => "filesystem error",
            ErrorKind::CorruptedFile => "corrupted file",
            ErrorKind::InvalidFormat => "invalid format",
            ErrorKind::Unknown => "unknown error",
        }
    }

    /// What the user can do about it.
    pub fn remedy(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "increase timeout (--timeout) and re-run",
            ErrorKind::BackendUnreachable => "check that the scoring endpoint is reachable, then re-run to resume",
            ErrorKind::Filesystem => "check permissions and free disk space",
            ErrorKind::CorruptedFile => "re-export the file from the original",
            ErrorKind::InvalidFormat => "convert format to JPEG or PNG",
            ErrorKind::Unknown => "inspect logs with --verbose",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::BackendUnreachable => "backend_unreachable",
            ErrorKind::Filesystem => "filesystem",
            ErrorKind::CorruptedFile => "corrupted_file",
            ErrorKind::InvalidFormat => "invalid_format",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorClassification {
    pub kind: ErrorKind,
    pub message: String,
    /// Whether the user can fix this themselves (everything but `Unknown`).
    pub actionable: bool,
    pub remedy: &'static str,
}

impl ErrorClassification {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        ErrorClassification {
            kind,
            message: message.into(),
            actionable: kind != ErrorKind::Unknown,
            remedy: kind.remedy(),
        }
    }
}

/// Classify an arbitrary error by walking its source chain.
///
/// Typed errors win over message sniffing: a `ScorerError` or `io::Error`
/// anywhere in the chain decides the kind. Only when none is found do we fall
/// back to matching the rendered messages.
pub fn classify(error: &(dyn std::error::Error + 'static)) -> ErrorClassification {
    let message = render_chain(error);

    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(err) = current {
        if let Some(scorer_err) = err.downcast_ref::<ScorerError>() {
            match scorer_err {
                ScorerError::Timeout(_) => return ErrorClassification::new(ErrorKind::Timeout, message),
                ScorerError::Unreachable(_) => {
                    return ErrorClassification::new(ErrorKind::BackendUnreachable, message)
                }
                ScorerError::Failed(_) => {}
            }
        }
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if let Some(kind) = kind_from_io(io_err.kind()) {
                return ErrorClassification::new(kind, message);
            }
        }
        current = err.source();
    }

    ErrorClassification::new(classify_message(&message), message)
}

/// Classify a scorer error. Thin wrapper so callers don't need the trait object cast.
pub fn classify_scorer_error(error: &ScorerError) -> ErrorClassification {
    classify(error)
}

fn kind_from_io(kind: io::ErrorKind) -> Option<ErrorKind> {
    match kind {
        io::ErrorKind::TimedOut => Some(ErrorKind::Timeout),
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::AddrNotAvailable => Some(ErrorKind::BackendUnreachable),
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied | io::ErrorKind::AlreadyExists => {
            Some(ErrorKind::Filesystem)
        }
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => Some(ErrorKind::CorruptedFile),
        io::ErrorKind::Unsupported => Some(ErrorKind::InvalidFormat),
        _ => None,
    }
}

/// Message heuristics, checked most-specific first.
pub fn classify_message(message: &str) -> ErrorKind {
    let m = message.to_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| m.contains(n));

    if any(&["timed out", "timeout", "deadline exceeded"]) {
        ErrorKind::Timeout
    } else if any(&[
        "econnrefused",
        "connection refused",
        "connection reset",
        "enotfound",
        "dns error",
        "unreachable",
        "service unavailable",
        "bad gateway",
    ]) {
        ErrorKind::BackendUnreachable
    } else if any(&["corrupt", "truncated", "premature end", "unexpected eof"]) {
        ErrorKind::CorruptedFile
    } else if any(&["unsupported", "invalid format", "unknown format", "not an image"]) {
        ErrorKind::InvalidFormat
    } else if any(&["permission denied", "eacces", "no such file", "enoent", "no space", "enospc", "read-only file system"]) {
        ErrorKind::Filesystem
    } else {
        ErrorKind::Unknown
    }
}

fn render_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut out = error.to_string();
    let mut source = error.source();
    while let Some(err) = source {
        let s = err.to_string();
        if !out.contains(&s) {
            out.push_str(": ");
            out.push_str(&s);
        }
        source = err.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_typed_scorer_errors() {
        let c = classify_scorer_error(&ScorerError::Timeout(Duration::from_secs(60)));
        assert_eq!(c.kind, ErrorKind::Timeout);
        assert_eq!(c.remedy, ErrorKind::Timeout.remedy());

        let c = classify_scorer_error(&ScorerError::Unreachable("connect failed".into()));
        assert_eq!(c.kind, ErrorKind::BackendUnreachable);
        assert!(c.kind.is_fatal());
    }

    #[test]
    fn test_io_error_in_chain() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        let wrapped = ScorerError::Failed(Box::new(io_err));
        let c = classify_scorer_error(&wrapped);
        assert_eq!(c.kind, ErrorKind::Filesystem);

        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(classify(&refused).kind, ErrorKind::BackendUnreachable);
    }

    #[test]
    fn test_message_fallback() {
        assert_eq!(classify_message("request timed out"), ErrorKind::Timeout);
        assert_eq!(classify_message("connect ECONNREFUSED 127.0.0.1:8000"), ErrorKind::BackendUnreachable);
        assert_eq!(classify_message("JPEG data is truncated"), ErrorKind::CorruptedFile);
        assert_eq!(classify_message("Unsupported image type"), ErrorKind::InvalidFormat);
        assert_eq!(classify_message("EACCES: permission denied"), ErrorKind::Filesystem);
        assert_eq!(classify_message("model refused to answer"), ErrorKind::Unknown);
    }

    #[test]
    fn test_only_backend_unreachable_is_fatal() {
        for kind in [
            ErrorKind::Timeout,
            ErrorKind::Filesystem,
            ErrorKind::CorruptedFile,
            ErrorKind::InvalidFormat,
            ErrorKind::Unknown,
        ] {
            assert!(!kind.is_fatal(), "{kind} should be recoverable");
        }
    }

    #[test]
    fn test_unknown_is_not_actionable() {
        let c = classify(&ScorerError::failed("something odd"));
        assert_eq!(c.kind, ErrorKind::Unknown);
        assert!(!c.actionable);
        assert_eq!(c.message, "something odd");
    }
}
