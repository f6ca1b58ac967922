//! Protocol message definitions for Pagekeep.
//!
//! This module defines the request and response messages exchanged between
//! the request layer and the filesystem core. Messages are serialized as
//! JSON; every path field carries the raw, untrusted string exactly as the
//! editor sent it.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, Result};
use crate::tree::TreeEntry;

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Envelope wrapper for all protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version for compatibility checking.
    pub version: u8,
    /// Sequence number used to pair responses with requests.
    pub sequence: u64,
    /// The actual message payload.
    pub payload: Message,
}

impl Envelope {
    /// Create a new envelope with the current protocol version.
    pub fn new(sequence: u64, payload: Message) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sequence,
            payload,
        }
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Top-level message enum containing all message types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Message {
    // Page requests
    /// Save a page.
    Save(SaveRequest),
    /// Save a reusable block or section.
    SaveReusable(SaveReusableRequest),
    /// Rename a page.
    Rename(RenameRequest),
    /// Delete a page.
    Delete(DeleteRequest),
    /// List editable pages.
    ListPages,

    // Media requests
    /// Scan the media tree.
    Scan(ScanRequest),
    /// Open an upload session.
    UploadStart(UploadStart),
    /// Append bytes to an upload session.
    UploadChunk(UploadChunk),
    /// Move a finished upload into place.
    UploadComplete(UploadComplete),
    /// Abandon an upload session.
    UploadCancel(UploadCancel),
    /// Check an extension against the upload policy without uploading.
    CheckExtension(CheckExtensionRequest),

    // Responses
    /// A file was written.
    Saved(FileWritten),
    /// A file was renamed.
    Renamed(FileRenamed),
    /// A file was deleted.
    Deleted(FileDeleted),
    /// Result of a media scan.
    ScanResult(TreeEntry),
    /// An upload session was opened.
    UploadStarted(UploadStarted),
    /// Bytes accepted so far for an upload session.
    UploadProgress(UploadProgress),
    /// An upload finished and is visible at its final name.
    Uploaded(Uploaded),
    /// An upload session was discarded.
    UploadCancelled(UploadCancel),
    /// The extension passed the upload policy.
    ExtensionChecked(ExtensionChecked),
    /// Editable pages.
    PageList(PageList),
    /// Error response.
    Error(ErrorMessage),
}

impl Message {
    /// Whether this message is a response (never valid as an incoming request).
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            Message::Saved(_)
                | Message::Renamed(_)
                | Message::Deleted(_)
                | Message::ScanResult(_)
                | Message::UploadStarted(_)
                | Message::UploadProgress(_)
                | Message::Uploaded(_)
                | Message::UploadCancelled(_)
                | Message::ExtensionChecked(_)
                | Message::PageList(_)
                | Message::Error(_)
        )
    }
}

// ============================================================================
// Page Messages
// ============================================================================

/// Request to save a page.
///
/// When `start_template_url` names an existing page, its content becomes the
/// new page body and `html` is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveRequest {
    /// Destination page path.
    pub file: String,
    /// Page body.
    #[serde(default)]
    pub html: Option<String>,
    /// Page to copy instead of `html`.
    #[serde(default)]
    pub start_template_url: Option<String>,
}

/// Request to save a reusable block or section as `<kind>/<name>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveReusableRequest {
    /// Element type (e.g. `blocks`, `sections`).
    pub kind: String,
    /// Element name.
    pub name: String,
    /// Element body.
    pub html: String,
}

/// Request to rename a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRequest {
    /// Current page path.
    pub file: String,
    /// New page path.
    pub new_file: String,
}

/// Request to delete a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    /// Page path.
    pub file: String,
}

/// Confirmation that a file was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileWritten {
    /// Root-relative path of the written file.
    pub path: String,
    /// Number of bytes written.
    pub size: u64,
}

/// Confirmation that a file was renamed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRenamed {
    /// Root-relative source path.
    pub from: String,
    /// Root-relative destination path.
    pub to: String,
}

/// Confirmation that a file was deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDeleted {
    /// Root-relative path of the deleted file.
    pub path: String,
}

/// Metadata for one editable page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    /// Display name (the subfolder name for `index.html` pages).
    pub name: String,
    /// Root-relative file path.
    pub file: String,
    /// Name with its first letter upper-cased.
    pub title: String,
    /// URL path for the browser.
    pub url: String,
    /// First folder of the path.
    pub folder: String,
}

/// List of editable pages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageList {
    /// Pages in discovery order.
    pub pages: Vec<PageInfo>,
}

// ============================================================================
// Media Messages
// ============================================================================

/// Request to scan the media tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Directory to scan; the configured media directory when absent.
    #[serde(default)]
    pub media_path: Option<String>,
}

/// Open an upload session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadStart {
    /// Destination directory.
    #[serde(default)]
    pub media_path: Option<String>,
    /// Filename as sent by the browser.
    pub filename: String,
    /// Respond with the bare filename instead of `media_path/filename`.
    #[serde(default)]
    pub only_filename: bool,
}

/// Chunk of upload data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadChunk {
    /// Session identifier from [`UploadStarted`].
    pub upload_id: String,
    /// Offset of this chunk.
    pub offset: u64,
    /// The chunk bytes, base64 in JSON.
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Finish an upload session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadComplete {
    /// Session identifier.
    pub upload_id: String,
}

/// Abandon an upload session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadCancel {
    /// Session identifier.
    pub upload_id: String,
}

/// An upload session is open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadStarted {
    /// Session identifier for subsequent chunks.
    pub upload_id: String,
    /// Root-relative path the file will have once complete.
    pub destination: String,
}

/// Bytes accepted so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadProgress {
    /// Session identifier.
    pub upload_id: String,
    /// Total bytes received.
    pub received: u64,
}

/// An upload is in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Uploaded {
    /// Either the filename alone or `media_path/filename`.
    pub location: String,
    /// Final size in bytes.
    pub size: u64,
}

/// Request to check a filename's extension against the upload policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckExtensionRequest {
    /// Filename to check.
    pub filename: String,
}

/// The extension passed the upload policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionChecked {
    /// Lower-cased extension.
    pub extension: String,
}

// ============================================================================
// Error Messages
// ============================================================================

/// Error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Error kind for programmatic handling.
    pub kind: ErrorKind,
    /// Human-readable error message.
    pub message: String,
    /// Optional context (e.g. the offending path).
    pub context: Option<String>,
    /// Whether retrying the same request could succeed.
    pub recoverable: bool,
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
