//! Filesystem policy layer for the page editor.
//!
//! Every operation starts from a raw string sent by the editor and ends in
//! a filesystem call on a path known to lie inside the site root:
//! - [`PathSanitizer`] turns raw strings into [`SanitizedPath`]s
//! - [`ExtensionPolicy`] decides which upload types are accepted
//! - [`SafeWriter`] writes, renames and deletes with temp-file-then-rename
//! - [`TreeScanner`] enumerates media directories into [`protocol::TreeEntry`]
//! - [`UploadResolver`] and [`UploadManager`] validate and stream uploads
//! - [`PageCatalog`] lists editable pages
//!
//! # Security
//!
//! The character pre-filter in the sanitizer only normalizes input. The
//! trust boundary is the containment check on the canonical path, which
//! also catches symlinks pointing outside the root.

pub mod error;
pub mod pages;
pub mod paths;
pub mod policy;
pub mod sanitizer;
pub mod scanner;
pub mod upload;
pub mod writer;

pub use error::{FileError, PathError, PolicyError, StorageError};
pub use pages::PageCatalog;
pub use paths::{Root, SanitizedPath};
pub use policy::{
    AllowAllContent, ContentPolicy, ExtensionDecision, ExtensionPolicy, ServerScriptPolicy,
    Verdict,
};
pub use sanitizer::{PathSanitizer, SanitizeOptions};
pub use scanner::{ScanLimits, TreeScanner};
pub use upload::{CompletedUpload, UploadManager, UploadResolver, UploadTarget};
pub use writer::{ensure_dir, OversizePolicy, SafeWriter, WriteRequest};
