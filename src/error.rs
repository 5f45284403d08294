//! Crate error type and the external error-callback contract.

use std::io::Error as IoError;
use std::path::PathBuf;

/// Everything that can go wrong while reading, writing or extracting an
/// archive.
#[derive(thiserror::Error, Debug)]
pub enum XarError {
    #[error("not a xar archive (bad magic)")]
    BadMagic,
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    #[error("failed to parse table of contents: {0}")]
    TocParse(String),
    #[error("table of contents checksum mismatch")]
    TocChecksumMismatch,
    #[error("archive has a signature but no table-of-contents checksum algorithm")]
    SignatureWithoutChecksum,
    #[error("checksum style `{toc}` does not match header algorithm `{header}`")]
    ChecksumStyleMismatch { header: String, toc: String },
    #[error("failed to decode compressed payload for file {file:?}: {source}")]
    CompressionError {
        file: Option<PathBuf>,
        #[source]
        source: IoError,
    },
    #[error("checksum mismatch for file {file:?} ({kind})")]
    FileChecksumMismatch { file: Option<PathBuf>, kind: ChecksumKind },
    #[error("unexpected end of heap while reading file {file:?}")]
    UnexpectedEof { file: Option<PathBuf> },
    #[error("filesystem error while extracting {path:?}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: IoError,
    },
    #[error("path traversal attempt in archive entry: {0:?}")]
    PathTraversal(PathBuf),
    #[error("cannot change `{0}` once files have been added")]
    OptionMisuse(&'static str),
    #[error("unknown option `{0}`")]
    UnknownOption(String),
    #[error("invalid value for option `{name}`: {value}")]
    InvalidOptionValue { name: &'static str, value: String },
    #[error("signer returned {actual} bytes, expected {expected}")]
    SignerLengthMismatch { expected: u64, actual: u64 },
    #[error("signature verification failed: {0}")]
    SignatureVerification(String),
    #[error(transparent)]
    Io(#[from] IoError),
}

impl From<XarError> for IoError {
    fn from(other: XarError) -> IoError {
        match other {
            XarError::Io(e) => e,
            other => IoError::other(other),
        }
    }
}

/// Which checksum stage failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    Archived,
    Extracted,
}

impl std::fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Archived => write!(f, "archived-checksum"),
            Self::Extracted => write!(f, "extracted-checksum"),
        }
    }
}

/// Severity levels reported to the error callback, matching the original
/// `xar_set_errorhandler` severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Normal,
    Warning,
    NonFatal,
    Fatal,
}

/// Which phase the error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    ArchiveCreation,
    ArchiveExtraction,
}

/// Context handed to the error callback: the offending file (if any), a
/// message, and the underlying error.
#[derive(Debug)]
pub struct ErrorContext<'a> {
    pub file: Option<&'a std::path::Path>,
    pub message: String,
    pub error: Option<&'a XarError>,
}

/// External collaborator notified of every warning/error. Returning `true`
/// requests cancellation of the in-progress operation; `false` continues.
pub trait ErrorCallback {
    fn report(&self, severity: Severity, class: ErrorClass, context: &ErrorContext) -> bool;
}

/// An [`ErrorCallback`] that logs via `tracing` and never cancels.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingCallback;

impl ErrorCallback for TracingCallback {
    fn report(&self, severity: Severity, class: ErrorClass, context: &ErrorContext) -> bool {
        let class = match class {
            ErrorClass::ArchiveCreation => "archive-creation",
            ErrorClass::ArchiveExtraction => "archive-extraction",
        };
        match severity {
            Severity::Debug => tracing::debug!(class, file = ?context.file, "{}", context.message),
            Severity::Info => tracing::info!(class, file = ?context.file, "{}", context.message),
            Severity::Normal => tracing::info!(class, file = ?context.file, "{}", context.message),
            Severity::Warning | Severity::NonFatal => {
                tracing::warn!(class, file = ?context.file, "{}", context.message)
            }
            Severity::Fatal => tracing::error!(class, file = ?context.file, "{}", context.message),
        }
        false
    }
}
