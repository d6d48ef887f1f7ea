//! Progress-callback trait for session lifecycle events.
//!
//! Attach an [`Arc<dyn JobProgressCallback>`] with
//! [`crate::session::SessionController::with_progress`] to hear about each
//! transition as it happens: the CLI drives a terminal progress bar from it,
//! a GUI could repaint, a service could forward events to a channel.
//!
//! # Example
//!
//! ```rust
//! use score2musicxml::JobProgressCallback;
//! use std::sync::atomic::{AtomicU8, Ordering};
//!
//! struct LastPercent(AtomicU8);
//!
//! impl JobProgressCallback for LastPercent {
//!     fn on_status(&self, _job_id: &str, _message: &str, percent: u8) {
//!         self.0.store(percent, Ordering::SeqCst);
//!     }
//! }
//! ```

use crate::error::FailureKind;
use crate::session::Phase;
use std::sync::Arc;

/// Called by the session controller and its polling task.
///
/// Implementations must be `Send + Sync`: status events come from the
/// spawned polling task, phase events from the caller's task. All methods
/// have no-op defaults so callers only override what they care about.
pub trait JobProgressCallback: Send + Sync {
    /// The session moved to a new phase.
    fn on_phase_change(&self, from: Phase, to: Phase) {
        let _ = (from, to);
    }

    /// The service accepted the upload.
    fn on_submitted(&self, job_id: &str) {
        let _ = job_id;
    }

    /// A status check returned `message`; `percent` is the session's
    /// progress after applying it.
    fn on_status(&self, job_id: &str, message: &str, percent: u8) {
        let _ = (job_id, message, percent);
    }

    /// The session entered `Failed`.
    fn on_failed(&self, kind: FailureKind, detail: &str) {
        let _ = (kind, detail);
    }
}

/// A no-op implementation; the default when no callback is attached.
pub struct NoopProgressCallback;

impl JobProgressCallback for NoopProgressCallback {}

/// Shared handle to a callback, as stored by the controller.
pub type ProgressCallback = Arc<dyn JobProgressCallback>;
