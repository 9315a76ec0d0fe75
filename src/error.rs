// ─────────────────────────────────────────────────────────────────────────────
//  fbuild :: error  —  the build pipeline's error taxonomy
// ─────────────────────────────────────────────────────────────────────────────

use std::path::PathBuf;

use thiserror::Error;

/// Every failure mode the build pipeline can produce, grouped by the phase
/// that raises it. Variants carry enough context to render a precise
/// message without re-deriving it at the call site.
#[derive(Debug, Error)]
pub enum FbuildError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("missing project file: {0}")]
    MissingProjectFile(PathBuf),

    #[error("unknown environment '{0}'")]
    UnknownEnvironment(String),

    #[error("unknown board '{0}'")]
    UnknownBoard(String),

    #[error("network error fetching {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: Box<ureq::Error>,
    },

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("extraction failed for {path}: {reason}")]
    Extraction { path: PathBuf, reason: String },

    #[error("unsupported archive format: {0}")]
    UnsupportedArchive(PathBuf),

    #[error("package metadata parse failure: {0}")]
    MetadataParse(String),

    #[error("unsupported host platform: {0}")]
    UnsupportedHost(String),

    #[error("verification failed for cached package at {path}: {reason}")]
    Verification { path: PathBuf, reason: String },

    #[error("compilation failed for {source}")]
    Compilation {
        source: PathBuf,
        stdout: String,
        stderr: String,
    },

    #[error("compilation of {0} timed out")]
    CompilationTimeout(PathBuf),

    #[error("compiler not found: {0}")]
    CompilerNotFound(PathBuf),

    #[error("source file not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("archive creation failed: {reason}")]
    Archive { reason: String, stdout: String, stderr: String },

    #[error("archive was not created after retries: {0}")]
    ArchiveNotCreated(PathBuf),

    #[error("link failed: {reason}")]
    Link { reason: String, stdout: String, stderr: String },

    #[error("link timed out after {0:?}")]
    LinkTimeout(std::time::Duration),

    #[error("binary generation failed: {reason}")]
    BinaryGeneration { reason: String, stdout: String, stderr: String },

    #[error("library error ({name}): {reason}")]
    Library { name: String, reason: String },

    #[error("registry lookup failed for '{name}': {reason}")]
    RegistryLookup { name: String, reason: String },

    #[error(
        "flash overflow: {used} bytes used, {max} bytes available ({over} over)"
    )]
    FlashOverflow { used: u64, max: u64, over: u64 },

    #[error("build interrupted")]
    Interrupted,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, FbuildError>;
