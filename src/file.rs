//! The file a user picked, and the name its converted twin is saved under.
//!
//! Files are read whole into memory: the upload is a single multipart body
//! and score images are small. The MIME type is sniffed from magic bytes
//! first because extensions on scanned images are often wrong (`.jfif`,
//! upper-case `.JPG`, none at all).

use crate::error::ConvertError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// MIME types the recognition service advertises as supported.
pub const SUPPORTED_MIME_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/gif",
    "application/pdf",
];

const FALLBACK_MIME: &str = "application/octet-stream";

/// A file chosen for conversion.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedFile {
    /// Base name, as shown to the user and sent as the multipart file name.
    pub name: String,
    /// Raw contents. Not serialised; a session dump only records the size.
    #[serde(skip)]
    pub bytes: Vec<u8>,
    /// MIME type sent with the upload.
    pub mime: String,
}

impl std::fmt::Debug for SelectedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectedFile")
            .field("name", &self.name)
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .field("mime", &self.mime)
            .finish()
    }
}

impl SelectedFile {
    /// Wrap in-memory contents, sniffing the MIME type.
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let name = name.into();
        let mime = detect_mime(&name, &bytes).to_string();
        Self { name, bytes, mime }
    }

    /// Read a file from disk.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, ConvertError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => ConvertError::PermissionDenied {
                path: path.to_path_buf(),
            },
            std::io::ErrorKind::NotFound => ConvertError::FileNotFound {
                path: path.to_path_buf(),
            },
            _ => ConvertError::Internal(format!("reading {}: {e}", path.display())),
        })?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ConvertError::FileNotFound {
                path: path.to_path_buf(),
            })?;

        let file = Self::new(name, bytes);
        debug!(
            "Loaded {} ({} bytes, {})",
            path.display(),
            file.len(),
            file.mime
        );
        Ok(file)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether the service claims to handle this file type.
    pub fn is_supported(&self) -> bool {
        SUPPORTED_MIME_TYPES.contains(&self.mime.as_str())
    }

    /// Name for the converted file: the original name up to its last `.`,
    /// followed by `extension`.
    pub fn output_name(&self, extension: &str) -> String {
        output_file_name(&self.name, extension)
    }
}

/// `song.png` + `musicxml` → `song.musicxml`.
///
/// Only the text after the last dot is stripped, so `op.27.no2.jpg` keeps
/// `op.27.no2`. A name without a dot keeps its whole text. Any directory
/// part is dropped so the result always stays inside the download directory.
pub fn output_file_name(original: &str, extension: &str) -> String {
    let base = Path::new(original)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| FALLBACK_STEM.to_string());
    let stem = match base.rfind('.') {
        Some(idx) => &base[..idx],
        None => base.as_str(),
    };
    format!("{stem}.{extension}")
}

const FALLBACK_STEM: &str = "score";

fn detect_mime(name: &str, bytes: &[u8]) -> &'static str {
    if let Some(kind) = infer::get(bytes) {
        return kind.mime_type();
    }
    let ext = Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg" | "jfif" | "jpe") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("pdf") => "application/pdf",
        _ => FALLBACK_MIME,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    #[test]
    fn output_name_replaces_extension() {
        assert_eq!(output_file_name("song.png", "musicxml"), "song.musicxml");
        assert_eq!(output_file_name("scan.JFIF", "musicxml"), "scan.musicxml");
    }

    #[test]
    fn output_name_strips_only_last_extension() {
        assert_eq!(
            output_file_name("op.27.no2.jpg", "musicxml"),
            "op.27.no2.musicxml"
        );
    }

    #[test]
    fn output_name_drops_directories() {
        assert_eq!(output_file_name("/abs/evil.png", "musicxml"), "evil.musicxml");
        assert_eq!(output_file_name("../x.png", "musicxml"), "x.musicxml");
        assert_eq!(output_file_name("a/b/../../c.gif", "musicxml"), "c.musicxml");
        assert_eq!(output_file_name("..", "musicxml"), "score.musicxml");
    }

    #[test]
    fn output_name_without_extension() {
        assert_eq!(output_file_name("score", "musicxml"), "score.musicxml");
    }

    #[test]
    fn mime_sniffed_from_magic_bytes() {
        // Extension lies; bytes win.
        let f = SelectedFile::new("page.jpg", PNG_MAGIC.to_vec());
        assert_eq!(f.mime, "image/png");
        assert!(f.is_supported());
    }

    #[test]
    fn mime_falls_back_to_extension() {
        let f = SelectedFile::new("page.JFIF", vec![1, 2, 3]);
        assert_eq!(f.mime, "image/jpeg");
    }

    #[test]
    fn unknown_file_is_octet_stream_and_unsupported() {
        let f = SelectedFile::new("notes.txt", b"hello".to_vec());
        assert_eq!(f.mime, FALLBACK_MIME);
        assert!(!f.is_supported());
    }

    #[test]
    fn debug_hides_bytes() {
        let f = SelectedFile::new("song.png", PNG_MAGIC.to_vec());
        let dbg = format!("{f:?}");
        assert!(dbg.contains("<12 bytes>"), "got: {dbg}");
    }

    #[tokio::test]
    async fn from_path_reads_name_and_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.png");
        std::fs::write(&path, PNG_MAGIC).unwrap();

        let f = SelectedFile::from_path(&path).await.unwrap();
        assert_eq!(f.name, "song.png");
        assert_eq!(f.len(), PNG_MAGIC.len());
        assert_eq!(f.mime, "image/png");
    }

    #[tokio::test]
    async fn from_path_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = SelectedFile::from_path(dir.path().join("nope.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::FileNotFound { .. }), "got: {err}");
    }
}
