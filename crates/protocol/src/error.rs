//! Error types for the protocol crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Flat classification of every failure the filesystem core can report.
///
/// The request layer uses this to pick a status code and a user-facing
/// message without matching on the core's nested error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The raw path was empty (or filtered down to nothing).
    EmptyPath,
    /// The basename is on the sensitive-name denylist.
    DisallowedName,
    /// The path resolves outside the configured root.
    PathEscapesRoot,
    /// An uploaded filename had no usable characters left.
    InvalidFilename,
    /// The filename has no extension.
    MissingExtension,
    /// The extension is on the deny list.
    DeniedExtension,
    /// The extension is not on the allow list.
    NotAllowlisted,
    /// Content exceeds the configured size ceiling.
    ContentTooLarge,
    /// Content failed the content policy (e.g. embedded server script).
    ContentPolicyViolation,
    /// A directory tree exceeded the scan depth or entry limit.
    TreeTooLarge,
    /// A filesystem call failed.
    IoFailure,
    /// The target of a rename or delete does not exist.
    NotFound,
    /// The request itself is malformed (missing fields, unknown upload).
    InvalidRequest,
    /// Unexpected server-side failure.
    Internal,
}

impl ErrorKind {
    /// Whether the caller can fix the problem by changing its input.
    ///
    /// Filesystem failures and internal errors are the only kinds a
    /// client cannot correct on its own.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::IoFailure | Self::Internal)
    }

    /// Stable snake_case name, identical to the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmptyPath => "empty_path",
            Self::DisallowedName => "disallowed_name",
            Self::PathEscapesRoot => "path_escapes_root",
            Self::InvalidFilename => "invalid_filename",
            Self::MissingExtension => "missing_extension",
            Self::DeniedExtension => "denied_extension",
            Self::NotAllowlisted => "not_allowlisted",
            Self::ContentTooLarge => "content_too_large",
            Self::ContentPolicyViolation => "content_policy_violation",
            Self::TreeTooLarge => "tree_too_large",
            Self::IoFailure => "io_failure",
            Self::NotFound => "not_found",
            Self::InvalidRequest => "invalid_request",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol error type covering encoding failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to serialize data.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize data.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// Chunk payload was not valid base64.
    #[error("invalid chunk encoding: {0}")]
    InvalidEncoding(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Deserialization(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}

impl From<base64::DecodeError> for ProtocolError {
    fn from(err: base64::DecodeError) -> Self {
        ProtocolError::InvalidEncoding(err.to_string())
    }
}
