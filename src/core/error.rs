use std::path::PathBuf;
use thiserror::Error;

/// Central error type for the version manager.
/// Every module returns `Result<T, NovmError>`.
#[derive(Debug, Error)]
pub enum NovmError {
    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Network ─────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download failed for {url}: HTTP {status}")]
    DownloadFailed { url: String, status: u16 },

    // ── JSON ────────────────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Version requests ────────────────────────────────
    #[error("invalid version spec {input:?}: not a version ({exact}), not a range ({range})")]
    InvalidVersionSpec {
        input: String,
        exact: String,
        range: String,
    },

    #[error("no node release for version {0}")]
    VersionNotFound(String),

    #[error("node {version} found but not published for this platform ({file_type})")]
    VersionNotForPlatform { version: String, file_type: String },

    // ── Catalog ─────────────────────────────────────────
    #[error("failed to load release catalog from {location}: {reason}")]
    CatalogFetch { location: String, reason: String },

    // ── Install ─────────────────────────────────────────
    #[error("failed to extract {archive:?}: {reason}")]
    ArchiveExtraction { archive: PathBuf, reason: String },

    #[error("SHA-256 mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("not enough disk space at {path:?}: available={available} required={required}")]
    InsufficientDiskSpace {
        path: PathBuf,
        available: u64,
        required: u64,
    },

    #[error("nodejs not installed")]
    NotInstalled,

    // ── Processes ───────────────────────────────────────
    #[error("failed to start {binary:?}: {source}")]
    ProcessStart {
        binary: PathBuf,
        source: std::io::Error,
    },

    #[error("unsupported platform: {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    // ── Self-update ─────────────────────────────────────
    #[error("update check failed: {0}")]
    UpdateCheck(#[source] Box<NovmError>),

    #[error("failed to replace {path:?}, reinstall novm manually: {source}")]
    Swap {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type NovmResult<T> = Result<T, NovmError>;

impl NovmError {
    /// True for both flavours of "the catalog has nothing for this request".
    pub fn is_version_not_found(&self) -> bool {
        matches!(
            self,
            NovmError::VersionNotFound(_) | NovmError::VersionNotForPlatform { .. }
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        NovmError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<std::io::Error> for NovmError {
    fn from(source: std::io::Error) -> Self {
        NovmError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}
