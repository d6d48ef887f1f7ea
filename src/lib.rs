//! # score2musicxml
//!
//! Client for a sheet-music recognition service: upload an image of a score,
//! follow the job while the service works on it, and download the resulting
//! MusicXML document.
//!
//! ## Lifecycle
//!
//! ```text
//! file
//!  │
//!  ├─ 1. Select   read the file, sniff its MIME type
//!  ├─ 2. Submit   POST /api/sendFile (multipart)        → job id
//!  ├─ 3. Poll     GET /api/checkFileStatus/{id} every 5 s → progress %
//!  ├─ 4. Ready    "File is ready"                        → /api/getFile/{id}
//!  └─ 5. Save     <stem>.musicxml, written atomically
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use score2musicxml::{convert_to_file, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .base_url("https://omr.example.org")
//!         .build()?;
//!     let saved = convert_to_file("song.png", ".", &config, None).await?;
//!     println!("{}", saved.path.display()); // ./song.musicxml
//!     Ok(())
//! }
//! ```
//!
//! For step-by-step control (progress, cancellation, reset) drive a
//! [`SessionController`] yourself.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `score2xml` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! score2musicxml = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod api;
pub mod config;
pub mod convert;
pub mod error;
pub mod file;
pub mod progress;
pub mod session;
pub mod status;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use api::{HttpJobService, JobService};
pub use config::{ClientConfig, ClientConfigBuilder};
pub use convert::{convert, convert_to_file, convert_to_file_sync, Conversion, SavedConversion};
pub use error::{ConvertError, FailureKind};
pub use file::{output_file_name, SelectedFile};
pub use progress::{JobProgressCallback, NoopProgressCallback, ProgressCallback};
pub use session::{Failure, Phase, Session, SessionController};
pub use status::{progress_for, StatusKind};
