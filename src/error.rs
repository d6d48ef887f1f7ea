//! Error types for the score2musicxml library.
//!
//! Two types reflect two audiences:
//!
//! * [`ConvertError`] — returned from every fallible operation. Callers of the
//!   session controller get one back when an operation is refused (wrong
//!   phase, bad input) or when a remote call fails.
//!
//! * [`FailureKind`] — the coarse class of a remote failure, stored on the
//!   [`crate::session::Session`] record when it enters
//!   [`crate::session::Phase::Failed`]. It is serialisable so it survives a
//!   `--json` dump of the session.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the score2musicxml library.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Remote service errors ─────────────────────────────────────────────
    /// The request never produced an HTTP response (DNS, TLS, reset, timeout).
    #[error("Request to '{url}' failed: {reason}\nCheck the service URL and your connection.")]
    Transport { url: String, reason: String },

    /// The service answered with a non-success status code.
    #[error("Service returned HTTP {status} for '{url}'")]
    Server { url: String, status: u16 },

    /// The response body was not the JSON shape the service promises.
    #[error("Unexpected response from '{url}': {detail}")]
    Protocol { url: String, detail: String },

    /// The service reported the job itself as failed.
    #[error("Job '{job_id}' failed on the server (last status: {message:?})")]
    JobFailed { job_id: String, message: String },

    /// Polling hit the configured attempt limit without a terminal status.
    #[error("Job '{job_id}' still not finished after {attempts} status checks")]
    PollLimit { job_id: String, attempts: u32 },

    // ── Session errors ────────────────────────────────────────────────────
    /// The session ended in `Failed`; carries what the session recorded.
    #[error("Conversion failed ({kind}): {detail}")]
    SessionFailed { kind: FailureKind, detail: String },

    /// The operation is not allowed in the session's current phase.
    #[error("Cannot {operation} while the session is {phase}")]
    InvalidState {
        operation: &'static str,
        phase: crate::session::Phase,
    },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// Strict format mode is on and the file is not a supported image.
    #[error("Unsupported file '{name}' ({mime})\nSupported formats: PNG, JPG, JFIF (JPEG), GIF, PDF")]
    UnsupportedFormat { name: String, mime: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the downloaded MusicXML file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConvertError {
    /// The failure class recorded on the session, for remote errors only.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            ConvertError::Transport { .. } => Some(FailureKind::Transport),
            ConvertError::Server { .. } => Some(FailureKind::Server),
            ConvertError::Protocol { .. } => Some(FailureKind::Protocol),
            ConvertError::JobFailed { .. } => Some(FailureKind::JobFailed),
            ConvertError::PollLimit { .. } => Some(FailureKind::PollLimit),
            _ => None,
        }
    }
}

/// Why a session ended up in [`crate::session::Phase::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network or fetch failure.
    Transport,
    /// Non-success HTTP status.
    Server,
    /// Malformed or unexpected JSON body.
    Protocol,
    /// The server reported the `Failed` sentinel.
    JobFailed,
    /// `max_poll_attempts` was reached.
    PollLimit,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Transport => "transport error",
            FailureKind::Server => "server error",
            FailureKind::Protocol => "protocol error",
            FailureKind::JobFailed => "job failed",
            FailureKind::PollLimit => "poll limit reached",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Phase;

    #[test]
    fn server_error_display() {
        let e = ConvertError::Server {
            url: "http://svc/api/sendFile".into(),
            status: 500,
        };
        let msg = e.to_string();
        assert!(msg.contains("HTTP 500"), "got: {msg}");
        assert!(msg.contains("/api/sendFile"));
    }

    #[test]
    fn invalid_state_display() {
        let e = ConvertError::InvalidState {
            operation: "download",
            phase: Phase::Polling,
        };
        assert_eq!(e.to_string(), "Cannot download while the session is polling");
    }

    #[test]
    fn remote_errors_have_failure_kind() {
        let e = ConvertError::JobFailed {
            job_id: "abc".into(),
            message: "Failed".into(),
        };
        assert_eq!(e.failure_kind(), Some(FailureKind::JobFailed));

        let e = ConvertError::PollLimit {
            job_id: "abc".into(),
            attempts: 3,
        };
        assert_eq!(e.failure_kind(), Some(FailureKind::PollLimit));
    }

    #[test]
    fn local_errors_have_no_failure_kind() {
        let e = ConvertError::InvalidConfig("missing base URL".into());
        assert_eq!(e.failure_kind(), None);
    }

    #[test]
    fn session_failed_display() {
        let e = ConvertError::SessionFailed {
            kind: FailureKind::Server,
            detail: "HTTP 502".into(),
        };
        assert_eq!(e.to_string(), "Conversion failed (server error): HTTP 502");
    }

    #[test]
    fn failure_kind_serialises_snake_case() {
        let json = serde_json::to_string(&FailureKind::JobFailed).unwrap();
        assert_eq!(json, "\"job_failed\"");
    }
}
