//! Error types for the filesystem policy layer.
//!
//! Each component reports its own error enum; [`FileError`] joins them for
//! callers that drive several components, and [`FileError::kind`] flattens
//! everything onto [`protocol::ErrorKind`].

use std::io;
use std::path::PathBuf;

use protocol::ErrorKind;
use thiserror::Error;

/// Errors produced while turning a raw path string into a [`SanitizedPath`].
///
/// [`SanitizedPath`]: super::SanitizedPath
#[derive(Debug, Error)]
pub enum PathError {
    /// The raw path was empty or filtered down to nothing.
    #[error("path is empty")]
    EmptyPath,

    /// The basename is on the sensitive-name denylist.
    #[error("filename not allowed: {0}")]
    DisallowedName(String),

    /// The path resolves outside the root.
    #[error("path escapes root: {0}")]
    PathEscapesRoot(String),

    /// A filename had no usable characters or no file name component.
    #[error("invalid filename: {0}")]
    InvalidFilename(String),

    /// The configured root is missing or not a directory.
    #[error("invalid root directory: {0}")]
    InvalidRoot(PathBuf),

    /// Resolving the path on disk failed.
    #[error("failed to resolve {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors produced by the extension policy.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    /// Nothing follows the last `.` (or there is no `.`).
    #[error("file has no extension: {0}")]
    MissingExtension(String),

    /// The extension is on the deny list.
    #[error("file type {0} not allowed")]
    DeniedExtension(String),

    /// The extension is not on the allow list.
    #[error("file type {0} is not on the allow list")]
    NotAllowlisted(String),
}

/// Errors produced while reading or mutating the filesystem.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Content exceeds the size ceiling and the policy is to reject.
    #[error("content too large: {size} bytes exceeds limit of {limit} bytes")]
    ContentTooLarge { size: u64, limit: u64 },

    /// Content failed the content policy.
    #[error("content not allowed: {0}")]
    ContentPolicyViolation(String),

    /// A directory tree exceeded the scan limits.
    #[error("directory tree too large: {0}")]
    TreeTooLarge(String),

    /// A filesystem call failed.
    #[error("filesystem operation failed on {path}: {source}")]
    IoFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file to rename or delete does not exist.
    #[error("file not found: {0}")]
    NotFound(String),

    /// A rename or delete named a directory.
    #[error("not a file: {0}")]
    NotAFile(String),

    /// No upload session with this identifier.
    #[error("upload not found: {0}")]
    UploadNotFound(String),

    /// Upload chunk received out of order.
    #[error("expected chunk at offset {expected}, got {received}")]
    ChunkOutOfOrder { expected: u64, received: u64 },

    /// Lock poisoned during operation.
    #[error("lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl StorageError {
    /// Wrap an I/O error together with the path it was attempted on.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StorageError::IoFailure {
            path: path.into(),
            source,
        }
    }
}

/// Any error from the filesystem policy layer.
#[derive(Debug, Error)]
pub enum FileError {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl FileError {
    /// The flat error kind reported to clients.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FileError::Path(e) => match e {
                PathError::EmptyPath => ErrorKind::EmptyPath,
                PathError::DisallowedName(_) => ErrorKind::DisallowedName,
                PathError::PathEscapesRoot(_) => ErrorKind::PathEscapesRoot,
                PathError::InvalidFilename(_) => ErrorKind::InvalidFilename,
                PathError::InvalidRoot(_) => ErrorKind::Internal,
                PathError::Io { .. } => ErrorKind::IoFailure,
            },
            FileError::Policy(e) => match e {
                PolicyError::MissingExtension(_) => ErrorKind::MissingExtension,
                PolicyError::DeniedExtension(_) => ErrorKind::DeniedExtension,
                PolicyError::NotAllowlisted(_) => ErrorKind::NotAllowlisted,
            },
            FileError::Storage(e) => match e {
                StorageError::ContentTooLarge { .. } => ErrorKind::ContentTooLarge,
                StorageError::ContentPolicyViolation(_) => ErrorKind::ContentPolicyViolation,
                StorageError::TreeTooLarge(_) => ErrorKind::TreeTooLarge,
                StorageError::IoFailure { .. } => ErrorKind::IoFailure,
                StorageError::NotFound(_) => ErrorKind::NotFound,
                StorageError::NotAFile(_) => ErrorKind::InvalidRequest,
                StorageError::UploadNotFound(_) => ErrorKind::InvalidRequest,
                StorageError::ChunkOutOfOrder { .. } => ErrorKind::InvalidRequest,
                StorageError::LockPoisoned(_) => ErrorKind::Internal,
            },
        }
    }
}
