//! One-shot conversion entry points.
//!
//! These run a whole session (select → submit → poll → download) and return
//! when it settles. Use [`crate::session::SessionController`] directly when
//! you need to observe or cancel the lifecycle while it runs.

use crate::config::ClientConfig;
use crate::error::{ConvertError, FailureKind};
use crate::file::SelectedFile;
use crate::progress::ProgressCallback;
use crate::session::{Phase, Session, SessionController};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

/// A finished conversion held in memory.
#[derive(Debug, Clone, Serialize)]
pub struct Conversion {
    /// Derived name, e.g. `song.musicxml` for `song.png`.
    pub file_name: String,
    /// The artifact returned by the service.
    #[serde(skip)]
    pub musicxml: Vec<u8>,
    /// Record of the session at the moment it became ready.
    pub session: Session,
    pub duration_ms: u64,
}

/// Result of [`convert_to_file`].
#[derive(Debug, Clone, Serialize)]
pub struct SavedConversion {
    pub path: PathBuf,
    pub session: Session,
    pub duration_ms: u64,
}

/// Convert the file at `input` and return the MusicXML bytes.
///
/// # Errors
/// - reading the input fails, or strict format mode rejects it
/// - the upload fails
/// - the session ends in `Failed` ([`ConvertError::SessionFailed`])
/// - fetching the artifact fails
pub async fn convert(
    input: impl AsRef<Path>,
    config: &ClientConfig,
    progress: Option<ProgressCallback>,
) -> Result<Conversion, ConvertError> {
    let start = Instant::now();
    let file = SelectedFile::from_path(input).await?;
    let controller = run_session(file, config, progress).await?;

    let session = controller.snapshot();
    let musicxml = controller.fetch_result().await?;
    let file_name = session
        .output_name(&config.target_extension)
        .ok_or_else(|| ConvertError::Internal("ready session has no selected file".into()))?;

    Ok(Conversion {
        file_name,
        musicxml,
        session,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Convert the file at `input` and save the result in `output_dir`.
pub async fn convert_to_file(
    input: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    config: &ClientConfig,
    progress: Option<ProgressCallback>,
) -> Result<SavedConversion, ConvertError> {
    let start = Instant::now();
    let file = SelectedFile::from_path(input).await?;
    let controller = run_session(file, config, progress).await?;
    let path = controller.download(output_dir).await?;

    Ok(SavedConversion {
        path,
        session: controller.snapshot(),
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Synchronous wrapper around [`convert_to_file`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_to_file_sync(
    input: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    config: &ClientConfig,
) -> Result<SavedConversion, ConvertError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ConvertError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert_to_file(input, output_dir, config, None))
}

/// Drive a fresh controller until the session is `Ready`.
async fn run_session(
    file: SelectedFile,
    config: &ClientConfig,
    progress: Option<ProgressCallback>,
) -> Result<SessionController, ConvertError> {
    let mut controller = SessionController::connect(config.clone())?;
    if let Some(cb) = progress {
        controller = controller.with_progress(cb);
    }
    controller.select_file(file)?;
    let job_id = controller.submit().await?;

    let settled = controller.wait_until_settled().await?;
    match settled.phase {
        Phase::Ready => {
            info!("Job '{}' finished", job_id);
            Ok(controller)
        }
        _ => Err(settled
            .failure
            .map(ConvertError::from)
            .unwrap_or_else(|| ConvertError::SessionFailed {
                kind: FailureKind::Transport,
                detail: format!("session ended {}", settled.phase),
            })),
    }
}
