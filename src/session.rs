//! The upload → poll → download session.
//!
//! A [`Session`] is the plain record of one conversion lifecycle. Its
//! transition methods are pure and enforce the record's invariants; the
//! [`SessionController`] owns the record, talks to the [`JobService`], and
//! runs the polling task.
//!
//! ```text
//! Idle ─select─▶ FileChosen ─submit ok─▶ Polling ─"File is ready"─▶ Ready
//!                    │                      │
//!                    └─submit error─▶ Failed ◀─"Failed" / error / poll limit
//!
//! reset: any phase ─▶ Idle          select: any phase ─▶ FileChosen
//! ```
//!
//! ## Polling and cancellation
//!
//! The record lives in a [`tokio::sync::watch`] channel so the polling task,
//! the controller, and any observer share one copy and every write is
//! serialised. At most one polling task exists per controller. Before the
//! controller starts a new one, selects a new file, or resets, it cancels the
//! current task: it bumps a generation counter and aborts the task. The task
//! re-checks the generation under the channel's lock before each write, so a
//! cancelled task can never touch the record even if it was mid-request when
//! the abort landed.

use crate::api::{HttpJobService, JobService};
use crate::config::ClientConfig;
use crate::error::{ConvertError, FailureKind};
use crate::file::SelectedFile;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::status::{self, StatusKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

// ── Session record ───────────────────────────────────────────────────────

/// Discrete state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    FileChosen,
    Submitting,
    Polling,
    Ready,
    Failed,
}

impl Phase {
    /// `Ready` and `Failed` stay put until the session is reset.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Ready | Phase::Failed)
    }

    /// A job is in flight: the upload is running or the poller is active.
    pub fn is_busy(self) -> bool {
        matches!(self, Phase::Submitting | Phase::Polling)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::FileChosen => "file chosen",
            Phase::Submitting => "submitting",
            Phase::Polling => "polling",
            Phase::Ready => "ready",
            Phase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What moved a session to [`Phase::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub detail: String,
}

impl From<Failure> for ConvertError {
    fn from(f: Failure) -> Self {
        ConvertError::SessionFailed {
            kind: f.kind,
            detail: f.detail,
        }
    }
}

/// One upload-to-download lifecycle.
///
/// `Session::default()` is the initial, empty record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub selected_file: Option<SelectedFile>,
    /// Assigned by the service once the upload is accepted.
    pub job_id: Option<String>,
    pub phase: Phase,
    /// 0–100; never decreases while polling one job.
    pub progress_percent: u8,
    /// Last raw status text from the service.
    pub status_message: String,
    /// Download location; set only in `Ready`.
    pub result_ref: Option<String>,
    /// Set only in `Failed`.
    pub failure: Option<Failure>,
}

impl Session {
    /// Start over with `file` as the selection.
    pub fn choose_file(&mut self, file: SelectedFile) {
        *self = Session {
            selected_file: Some(file),
            phase: Phase::FileChosen,
            ..Session::default()
        };
    }

    /// `FileChosen` → `Submitting`. Returns the file to upload.
    pub fn begin_submit(&mut self) -> Result<SelectedFile, ConvertError> {
        let file = match (&self.phase, &self.selected_file) {
            (Phase::FileChosen, Some(file)) => file.clone(),
            _ => {
                return Err(ConvertError::InvalidState {
                    operation: "submit",
                    phase: self.phase,
                })
            }
        };
        self.phase = Phase::Submitting;
        Ok(file)
    }

    /// `Submitting` → `Polling` with the id the service assigned.
    pub fn accept_job(&mut self, job_id: impl Into<String>) -> Result<(), ConvertError> {
        if self.phase != Phase::Submitting {
            return Err(ConvertError::InvalidState {
                operation: "accept a job",
                phase: self.phase,
            });
        }
        self.job_id = Some(job_id.into());
        self.progress_percent = 0;
        self.status_message.clear();
        self.phase = Phase::Polling;
        Ok(())
    }

    /// Apply one status message received while polling.
    ///
    /// `result_url` is only called when the message is the ready sentinel.
    /// Messages arriving outside `Polling` are ignored and classified as
    /// terminal so a stray poller stops.
    pub fn apply_status(
        &mut self,
        message: &str,
        result_url: impl FnOnce(&str) -> String,
    ) -> StatusKind {
        let job_id = match (&self.phase, &self.job_id) {
            (Phase::Polling, Some(id)) => id.clone(),
            _ => return StatusKind::Failed,
        };

        self.status_message = message.to_string();
        if let Some(percent) = status::progress_for(message) {
            self.progress_percent = self.progress_percent.max(percent);
        }

        let kind = StatusKind::classify(message);
        match kind {
            StatusKind::Ready => {
                self.result_ref = Some(result_url(&job_id));
                self.progress_percent = 100;
                self.phase = Phase::Ready;
            }
            StatusKind::Failed => {
                let e = ConvertError::JobFailed {
                    job_id,
                    message: message.to_string(),
                };
                self.fail(FailureKind::JobFailed, e.to_string());
            }
            StatusKind::InProgress => {}
        }
        kind
    }

    /// Enter `Failed`. `progress_percent` is capped below 100 because only a
    /// ready session may report completion.
    pub fn fail(&mut self, kind: FailureKind, detail: impl Into<String>) {
        self.phase = Phase::Failed;
        self.result_ref = None;
        self.progress_percent = self.progress_percent.min(99);
        self.failure = Some(Failure {
            kind,
            detail: detail.into(),
        });
    }

    /// Name the downloaded artifact is saved under.
    pub fn output_name(&self, extension: &str) -> Option<String> {
        self.selected_file
            .as_ref()
            .map(|f| f.output_name(extension))
    }
}

// ── Controller ───────────────────────────────────────────────────────────

struct Poller {
    job_id: String,
    task: JoinHandle<()>,
}

/// Drives a [`Session`] against a [`JobService`].
///
/// Operations that change the lifecycle take `&mut self`: like the UI
/// component it stands in for, a controller has one driver. Observers use
/// [`SessionController::subscribe`] or [`SessionController::wait_until_settled`].
pub struct SessionController {
    service: Arc<dyn JobService>,
    config: ClientConfig,
    state: Arc<watch::Sender<Session>>,
    generation: Arc<AtomicU64>,
    poller: Option<Poller>,
    progress: ProgressCallback,
}

impl SessionController {
    pub fn new(service: Arc<dyn JobService>, config: ClientConfig) -> Self {
        let (state, _) = watch::channel(Session::default());
        Self {
            service,
            config,
            state: Arc::new(state),
            generation: Arc::new(AtomicU64::new(0)),
            poller: None,
            progress: Arc::new(NoopProgressCallback),
        }
    }

    /// Controller backed by [`HttpJobService`].
    pub fn connect(config: ClientConfig) -> Result<Self, ConvertError> {
        let service = HttpJobService::new(&config)?;
        Ok(Self::new(Arc::new(service), config))
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Copy of the current record.
    pub fn snapshot(&self) -> Session {
        self.state.borrow().clone()
    }

    pub fn phase(&self) -> Phase {
        self.state.borrow().phase
    }

    /// Observe every change to the record.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    /// Whether a polling task is still running.
    pub fn is_polling(&self) -> bool {
        self.poller
            .as_ref()
            .is_some_and(|p| !p.task.is_finished())
    }

    /// Accept a file. Cancels any job in flight and starts a fresh lifecycle.
    pub fn select_file(&mut self, file: SelectedFile) -> Result<(), ConvertError> {
        if self.config.validate_format && !file.is_supported() {
            return Err(ConvertError::UnsupportedFormat {
                name: file.name,
                mime: file.mime,
            });
        }
        self.cancel_poller();
        info!("Selected '{}' ({} bytes, {})", file.name, file.len(), file.mime);
        self.transition(|s| s.choose_file(file));
        Ok(())
    }

    /// Upload the selected file and start polling.
    ///
    /// On a remote failure the session is left in `Failed` and the error is
    /// also returned.
    pub async fn submit(&mut self) -> Result<String, ConvertError> {
        let phase = self.phase();
        if phase != Phase::FileChosen {
            return Err(ConvertError::InvalidState {
                operation: "submit",
                phase,
            });
        }
        self.cancel_poller();

        let mut begun = None;
        self.transition(|s| begun = Some(s.begin_submit()));
        let file = match begun {
            Some(result) => result?,
            None => return Err(ConvertError::Internal("submit transition did not run".into())),
        };

        info!("Uploading '{}' to {}", file.name, self.config.submit_url());
        let mut guard = SubmitGuard {
            state: Arc::clone(&self.state),
            progress: Arc::clone(&self.progress),
            armed: true,
        };
        let submitted = self.service.submit(&file).await;
        guard.armed = false;
        match submitted {
            Ok(job_id) => {
                info!("Job '{}' accepted", job_id);
                let mut accepted = Ok(());
                self.transition(|s| accepted = s.accept_job(job_id.clone()));
                accepted?;
                self.progress.on_submitted(&job_id);
                self.spawn_poller(job_id.clone());
                Ok(job_id)
            }
            Err(e) => {
                warn!("Upload of '{}' failed: {}", file.name, e);
                let kind = e.failure_kind().unwrap_or(FailureKind::Transport);
                let detail = e.to_string();
                self.transition(|s| s.fail(kind, detail.clone()));
                self.progress.on_failed(kind, &detail);
                Err(e)
            }
        }
    }

    /// Resolve once no job is in flight, with the record at that moment.
    pub async fn wait_until_settled(&self) -> Result<Session, ConvertError> {
        let mut rx = self.state.subscribe();
        let settled = rx
            .wait_for(|s| !s.phase.is_busy())
            .await
            .map_err(|_| ConvertError::Internal("session state dropped".into()))?;
        Ok(settled.clone())
    }

    /// Fetch the finished artifact without writing it anywhere.
    pub async fn fetch_result(&self) -> Result<Vec<u8>, ConvertError> {
        let url = self.ready_result_ref("download")?;
        self.service.fetch(&url).await.map_err(|e| {
            warn!("Download from {} failed: {}", url, e);
            e
        })
    }

    /// Fetch the artifact and save it in `dir` under the derived name.
    ///
    /// The file is written to a temporary file in `dir` first and then moved
    /// into place, so a failed write never leaves a truncated MusicXML file.
    /// The session is not changed, whatever the outcome.
    pub async fn download(&self, dir: impl AsRef<Path>) -> Result<PathBuf, ConvertError> {
        let name = {
            let s = self.state.borrow();
            if s.phase != Phase::Ready {
                return Err(ConvertError::InvalidState {
                    operation: "download",
                    phase: s.phase,
                });
            }
            s.output_name(&self.config.target_extension)
                .ok_or_else(|| ConvertError::Internal("ready session has no selected file".into()))?
        };
        let bytes = self.fetch_result().await?;

        let target = dir.as_ref().join(&name);
        let write_target = target.clone();
        tokio::task::spawn_blocking(move || write_atomic(&write_target, &bytes))
            .await
            .map_err(|e| ConvertError::Internal(format!("write task: {e}")))?
            .map_err(|source| {
                warn!("Saving {} failed: {}", target.display(), source);
                ConvertError::OutputWriteFailed {
                    path: target.clone(),
                    source,
                }
            })?;

        info!("Saved {}", target.display());
        Ok(target)
    }

    /// Cancel any poller and return to the initial record.
    pub fn reset(&mut self) {
        self.cancel_poller();
        self.transition(|s| *s = Session::default());
        debug!("Session reset");
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    fn ready_result_ref(&self, operation: &'static str) -> Result<String, ConvertError> {
        let s = self.state.borrow();
        match (&s.phase, &s.result_ref) {
            (Phase::Ready, Some(url)) => Ok(url.clone()),
            _ => Err(ConvertError::InvalidState {
                operation,
                phase: s.phase,
            }),
        }
    }

    /// Apply a controller-side change and report a phase change, if any.
    fn transition(&self, f: impl FnOnce(&mut Session)) {
        let from = self.phase();
        self.state.send_modify(f);
        let to = self.phase();
        if from != to {
            debug!("Phase {} -> {}", from, to);
            self.progress.on_phase_change(from, to);
        }
    }

    fn cancel_poller(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(poller) = self.poller.take() {
            poller.task.abort();
            debug!("Cancelled poller for job '{}'", poller.job_id);
        }
    }

    fn spawn_poller(&mut self, job_id: String) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let task = PollTask {
            service: Arc::clone(&self.service),
            state: Arc::clone(&self.state),
            current: Arc::clone(&self.generation),
            generation,
            job_id: job_id.clone(),
            interval: self.config.poll_interval,
            max_attempts: self.config.max_poll_attempts,
            progress: Arc::clone(&self.progress),
        };
        self.poller = Some(Poller {
            job_id,
            task: tokio::spawn(task.run()),
        });
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.cancel_poller();
    }
}

impl fmt::Debug for SessionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionController")
            .field("config", &self.config)
            .field("session", &*self.state.borrow())
            .field("polling", &self.is_polling())
            .finish()
    }
}

/// Detail recorded when the caller drops `submit` before the upload finishes.
pub const SUBMIT_CANCELLED: &str = "submission cancelled";

/// Fails a session left in `Submitting` when the `submit` future is dropped
/// mid-upload, so the record never gets stuck busy.
struct SubmitGuard {
    state: Arc<watch::Sender<Session>>,
    progress: ProgressCallback,
    armed: bool,
}

impl Drop for SubmitGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let failed = self.state.send_if_modified(|s| {
            if s.phase != Phase::Submitting {
                return false;
            }
            s.fail(FailureKind::Transport, SUBMIT_CANCELLED);
            true
        });
        if failed {
            warn!("Upload abandoned before the service answered");
            self.progress
                .on_phase_change(Phase::Submitting, Phase::Failed);
            self.progress
                .on_failed(FailureKind::Transport, SUBMIT_CANCELLED);
        }
    }
}

// ── Polling task ─────────────────────────────────────────────────────────

struct PollTask {
    service: Arc<dyn JobService>,
    state: Arc<watch::Sender<Session>>,
    current: Arc<AtomicU64>,
    generation: u64,
    job_id: String,
    interval: std::time::Duration,
    max_attempts: Option<u32>,
    progress: ProgressCallback,
}

impl PollTask {
    async fn run(self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut attempts: u32 = 0;

        loop {
            ticker.tick().await;
            attempts += 1;

            let message = match self.service.status(&self.job_id).await {
                Ok(message) => message,
                Err(e) => {
                    warn!("Status check for job '{}' failed: {}", self.job_id, e);
                    let kind = e.failure_kind().unwrap_or(FailureKind::Transport);
                    self.fail(kind, e.to_string());
                    return;
                }
            };
            debug!("Job '{}' status #{}: {:?}", self.job_id, attempts, message);

            let mut outcome = None;
            let mut percent = 0;
            let applied = self.update(|s| {
                outcome = Some(s.apply_status(&message, |id| self.service.result_url(id)));
                percent = s.progress_percent;
            });
            let Some(kind) = outcome.filter(|_| applied) else {
                return;
            };
            self.progress.on_status(&self.job_id, &message, percent);

            match kind {
                StatusKind::Ready => {
                    info!("Job '{}' is ready", self.job_id);
                    self.progress.on_phase_change(Phase::Polling, Phase::Ready);
                    return;
                }
                StatusKind::Failed => {
                    warn!("Job '{}' failed on the server", self.job_id);
                    let detail = self
                        .state
                        .borrow()
                        .failure
                        .as_ref()
                        .map(|f| f.detail.clone())
                        .unwrap_or_default();
                    self.progress.on_phase_change(Phase::Polling, Phase::Failed);
                    self.progress.on_failed(FailureKind::JobFailed, &detail);
                    return;
                }
                StatusKind::InProgress => {}
            }

            if let Some(max) = self.max_attempts {
                if attempts >= max {
                    let e = ConvertError::PollLimit {
                        job_id: self.job_id.clone(),
                        attempts,
                    };
                    warn!("{}", e);
                    self.fail(FailureKind::PollLimit, e.to_string());
                    return;
                }
            }
        }
    }

    /// Write to the record only while this task is the current poller.
    fn update(&self, f: impl FnOnce(&mut Session)) -> bool {
        self.state.send_if_modified(|s| {
            if self.current.load(Ordering::SeqCst) != self.generation {
                return false;
            }
            f(s);
            true
        })
    }

    fn fail(&self, kind: FailureKind, detail: String) {
        if self.update(|s| s.fail(kind, detail.clone())) {
            self.progress.on_phase_change(Phase::Polling, Phase::Failed);
            self.progress.on_failed(kind, &detail);
        }
    }
}

fn write_atomic(target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chosen() -> Session {
        let mut s = Session::default();
        s.choose_file(SelectedFile::new("song.png", vec![0x89, b'P', b'N', b'G']));
        s
    }

    fn polling(job_id: &str) -> Session {
        let mut s = chosen();
        s.begin_submit().unwrap();
        s.accept_job(job_id).unwrap();
        s
    }

    fn url(id: &str) -> String {
        format!("http://svc/api/getFile/{id}")
    }

    #[test]
    fn initial_record() {
        let s = Session::default();
        assert_eq!(s.phase, Phase::Idle);
        assert_eq!(s.progress_percent, 0);
        assert!(s.selected_file.is_none() && s.job_id.is_none() && s.result_ref.is_none());
        assert!(s.status_message.is_empty());
    }

    #[test]
    fn choose_file_enters_file_chosen() {
        let s = chosen();
        assert_eq!(s.phase, Phase::FileChosen);
        assert_eq!(s.selected_file.as_ref().unwrap().name, "song.png");
    }

    #[test]
    fn submit_requires_file_chosen() {
        let mut s = Session::default();
        let err = s.begin_submit().unwrap_err();
        assert!(matches!(
            err,
            ConvertError::InvalidState { phase: Phase::Idle, .. }
        ));
        assert_eq!(s.phase, Phase::Idle);
    }

    #[test]
    fn accepted_job_starts_polling_without_progress() {
        let s = polling("abc");
        assert_eq!(s.phase, Phase::Polling);
        assert_eq!(s.job_id.as_deref(), Some("abc"));
        assert_eq!(s.progress_percent, 0);
    }

    #[test]
    fn known_status_sets_progress() {
        let mut s = polling("abc");
        let kind = s.apply_status("Extracting staffline and symbols", url);
        assert_eq!(kind, StatusKind::InProgress);
        assert_eq!(s.progress_percent, 5);
        assert_eq!(s.phase, Phase::Polling);
        assert_eq!(s.status_message, "Extracting staffline and symbols");
    }

    #[test]
    fn unknown_status_keeps_progress_but_records_message() {
        let mut s = polling("abc");
        s.apply_status("Extracting noteheads", url);
        s.apply_status("Warming up GPU", url);
        assert_eq!(s.progress_percent, 15);
        assert_eq!(s.status_message, "Warming up GPU");
    }

    #[test]
    fn progress_never_decreases() {
        let mut s = polling("abc");
        s.apply_status("Building MusicXML document", url);
        s.apply_status("Extracting noteheads", url);
        assert_eq!(s.progress_percent, 75);
    }

    #[test]
    fn ready_status_sets_result_ref() {
        let mut s = polling("abc");
        let kind = s.apply_status(status::READY_MESSAGE, url);
        assert_eq!(kind, StatusKind::Ready);
        assert_eq!(s.phase, Phase::Ready);
        assert_eq!(s.progress_percent, 100);
        assert_eq!(s.result_ref.as_deref(), Some("http://svc/api/getFile/abc"));
    }

    #[test]
    fn failed_status_fails_session() {
        let mut s = polling("abc");
        s.apply_status("Grouping noteheads", url);
        let kind = s.apply_status(status::FAILED_MESSAGE, url);
        assert_eq!(kind, StatusKind::Failed);
        assert_eq!(s.phase, Phase::Failed);
        let failure = s.failure.as_ref().unwrap();
        assert_eq!(failure.kind, FailureKind::JobFailed);
        assert_eq!(
            failure.detail,
            "Job 'abc' failed on the server (last status: \"Failed\")"
        );
        assert_eq!(s.job_id.as_deref(), Some("abc"));
        assert!(s.result_ref.is_none());
        assert_eq!(s.progress_percent, 30);
    }

    #[test]
    fn status_outside_polling_is_ignored() {
        let mut s = chosen();
        let before = s.clone();
        let kind = s.apply_status(status::READY_MESSAGE, url);
        assert!(kind.is_terminal());
        assert_eq!(s, before);
    }

    #[test]
    fn failed_submission_has_no_job_id() {
        let mut s = chosen();
        s.begin_submit().unwrap();
        s.fail(FailureKind::Server, "HTTP 500");
        assert_eq!(s.phase, Phase::Failed);
        assert!(s.job_id.is_none());
    }

    #[test]
    fn output_name_from_selected_file() {
        assert_eq!(
            chosen().output_name("musicxml").as_deref(),
            Some("song.musicxml")
        );
        assert_eq!(Session::default().output_name("musicxml"), None);
    }

    #[test]
    fn failure_converts_into_error() {
        let err: ConvertError = Failure {
            kind: FailureKind::Protocol,
            detail: "not JSON".into(),
        }
        .into();
        assert!(err.to_string().contains("protocol error"));
    }

    #[test]
    fn session_serialises_without_file_bytes() {
        let s = polling("abc");
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["phase"], "polling");
        assert_eq!(json["job_id"], "abc");
        assert_eq!(json["selected_file"]["name"], "song.png");
        assert!(json["selected_file"].get("bytes").is_none());
    }
}
