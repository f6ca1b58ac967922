//! Durable writes, renames and deletes under a sanitized path.
//!
//! Content is written to a temporary sibling file, synced, and renamed over
//! the target, so readers see either the old file or the complete new one.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::{FileError, PathError, StorageError};
use super::paths::SanitizedPath;
use super::policy::{AllowAllContent, ContentPolicy};

/// What to do with content larger than the size ceiling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OversizePolicy {
    /// Fail with [`StorageError::ContentTooLarge`].
    #[default]
    Reject,
    /// Keep the first `limit` bytes and drop the rest.
    Truncate,
}

/// A single write: target, bytes and per-request limits.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub target: SanitizedPath,
    pub content: Vec<u8>,
    pub force_extension: Option<String>,
    pub size_limit: Option<u64>,
}

impl WriteRequest {
    pub fn new(target: SanitizedPath, content: impl Into<Vec<u8>>) -> Self {
        Self {
            target,
            content: content.into(),
            force_extension: None,
            size_limit: None,
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.force_extension = Some(extension.into());
        self
    }

    pub fn with_size_limit(mut self, limit: u64) -> Self {
        self.size_limit = Some(limit);
        self
    }
}

/// Writes, renames and deletes files inside the root.
#[derive(Debug, Clone)]
pub struct SafeWriter {
    oversize: OversizePolicy,
    content_policy: Arc<dyn ContentPolicy>,
}

impl Default for SafeWriter {
    fn default() -> Self {
        Self::new(OversizePolicy::default())
    }
}

impl SafeWriter {
    /// Create a writer that accepts any content.
    pub fn new(oversize: OversizePolicy) -> Self {
        Self {
            oversize,
            content_policy: Arc::new(AllowAllContent),
        }
    }

    /// Run `policy` over content before every write.
    pub fn with_content_policy(mut self, policy: Arc<dyn ContentPolicy>) -> Self {
        self.content_policy = policy;
        self
    }

    pub fn oversize_policy(&self) -> OversizePolicy {
        self.oversize
    }

    /// Write the request's content to its target.
    ///
    /// Missing parent directories are created. Returns the final path, which
    /// differs from the requested one when an extension was forced.
    pub fn write(&self, request: WriteRequest) -> Result<SanitizedPath, FileError> {
        let WriteRequest {
            target,
            mut content,
            force_extension,
            size_limit,
        } = request;

        let target = match force_extension {
            Some(extension) => target.with_extension(&extension)?,
            None => target,
        };

        if let Some(limit) = size_limit {
            let size = content.len() as u64;
            if size > limit {
                match self.oversize {
                    OversizePolicy::Reject => {
                        return Err(StorageError::ContentTooLarge { size, limit }.into());
                    }
                    OversizePolicy::Truncate => {
                        warn!(path = %target, size, limit, "Truncating oversized content");
                        content.truncate(limit as usize);
                    }
                }
            }
        }

        self.content_policy
            .check(&content)
            .map_err(StorageError::ContentPolicyViolation)?;

        let parent = target
            .parent()
            .ok_or_else(|| PathError::InvalidFilename(target.relative().to_string()))?;
        let canonical_parent = prepare_dir(&parent)?;

        let name = target
            .file_name()
            .ok_or_else(|| PathError::InvalidFilename(target.relative().to_string()))?;
        let destination = canonical_parent.join(name);

        let mut temp = TempFile::create(&canonical_parent)?;
        temp.write_all(&content)?;
        temp.persist(&destination)?;
        sync_dir(&canonical_parent);

        info!(path = %target, size = content.len(), "Wrote file");
        Ok(target)
    }

    /// Delete a regular file.
    pub fn delete(&self, target: &SanitizedPath) -> Result<(), FileError> {
        if target.is_root() {
            return Err(StorageError::NotAFile(target.relative().to_string()).into());
        }

        let metadata = fs::symlink_metadata(target.absolute()).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StorageError::NotFound(target.relative().to_string())
            } else {
                StorageError::io(target.absolute(), e)
            }
        })?;
        if metadata.is_dir() {
            return Err(StorageError::NotAFile(target.relative().to_string()).into());
        }

        fs::remove_file(target.absolute()).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StorageError::NotFound(target.relative().to_string())
            } else {
                StorageError::io(target.absolute(), e)
            }
        })?;

        info!(path = %target, "Deleted file");
        Ok(())
    }

    /// Rename a regular file, replacing any file already at `to`.
    pub fn rename(&self, from: &SanitizedPath, to: &SanitizedPath) -> Result<(), FileError> {
        if from.is_root() || to.is_root() {
            return Err(StorageError::NotAFile(from.relative().to_string()).into());
        }

        let metadata = fs::symlink_metadata(from.absolute()).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StorageError::NotFound(from.relative().to_string())
            } else {
                StorageError::io(from.absolute(), e)
            }
        })?;
        if metadata.is_dir() {
            return Err(StorageError::NotAFile(from.relative().to_string()).into());
        }

        if let Some(parent) = to.parent() {
            prepare_dir(&parent)?;
        }

        fs::rename(from.absolute(), to.absolute())
            .map_err(|e| StorageError::io(to.absolute(), e))?;

        info!(from = %from, to = %to, "Renamed file");
        Ok(())
    }
}

/// Create `dir` and any missing ancestors.
///
/// Concurrent callers racing on the same directory all succeed.
pub fn ensure_dir(dir: &Path) -> Result<(), StorageError> {
    match fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
        Err(e) => Err(StorageError::io(dir, e)),
    }
}

/// Create a sanitized directory and re-check that it still resolves inside
/// the root. Returns its canonical path.
pub(crate) fn prepare_dir(dir: &SanitizedPath) -> Result<PathBuf, FileError> {
    ensure_dir(dir.absolute())?;

    // The directory may have been swapped for a symlink since sanitizing.
    let canonical =
        fs::canonicalize(dir.absolute()).map_err(|e| StorageError::io(dir.absolute(), e))?;
    if !dir.root_dir().contains(&canonical) {
        return Err(PathError::PathEscapesRoot(dir.relative().to_string()).into());
    }
    Ok(canonical)
}

/// A temporary file next to its destination, removed on drop unless persisted.
#[derive(Debug)]
pub(crate) struct TempFile {
    path: PathBuf,
    file: Option<File>,
}

impl TempFile {
    /// Create `.pagekeep-{random}.tmp` inside `dir`.
    ///
    /// The name does not depend on the destination, so a destination name
    /// at the filesystem limit still gets a temp file.
    pub(crate) fn create(dir: &Path) -> Result<Self, StorageError> {
        let path = dir.join(format!(".pagekeep-{:016x}.tmp", rand::random::<u64>()));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| StorageError::io(&path, e))?;
        debug!(path = %path.display(), "Created temp file");
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn write_all(&mut self, data: &[u8]) -> Result<(), StorageError> {
        match self.file.as_mut() {
            Some(file) => file
                .write_all(data)
                .map_err(|e| StorageError::io(&self.path, e)),
            None => Err(StorageError::io(
                &self.path,
                io::Error::other("temp file already closed"),
            )),
        }
    }

    /// Sync and move the file to `destination`.
    pub(crate) fn persist(mut self, destination: &Path) -> Result<(), StorageError> {
        if let Some(file) = self.file.take() {
            file.sync_all().map_err(|e| StorageError::io(&self.path, e))?;
        }
        fs::rename(&self.path, destination).map_err(|e| StorageError::io(destination, e))?;
        // Renamed away; nothing left for Drop to remove.
        self.path = PathBuf::new();
        Ok(())
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        self.file.take();
        if self.path.as_os_str().is_empty() {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = ?self.path, error = %e, "Failed to cleanup temp file");
            }
        }
    }
}

#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        debug!(path = %dir.display(), error = %e, "Directory sync failed");
    }
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::policy::ServerScriptPolicy;
    use crate::files::{PathSanitizer, Root, SanitizeOptions};
    use std::sync::Barrier;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathSanitizer) {
        let temp_dir = TempDir::new().unwrap();
        let root = Root::new(temp_dir.path()).unwrap();
        (temp_dir, PathSanitizer::new(root))
    }

    fn target(sanitizer: &PathSanitizer, raw: &str) -> SanitizedPath {
        sanitizer.sanitize(raw, &SanitizeOptions::default()).unwrap()
    }

    fn leftover_temp_files(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().map(|e| e == "tmp").unwrap_or(false))
            .collect()
    }

    #[test]
    fn test_write_creates_parents() {
        let (temp_dir, sanitizer) = setup();
        let writer = SafeWriter::default();

        let written = writer
            .write(WriteRequest::new(
                target(&sanitizer, "pages/x.html"),
                "<h1>Hi</h1>",
            ))
            .unwrap();

        assert_eq!(written.relative(), "pages/x.html");
        let on_disk = fs::read(temp_dir.path().join("pages/x.html")).unwrap();
        assert_eq!(on_disk.len(), 11);
        assert!(leftover_temp_files(&temp_dir.path().join("pages")).is_empty());
    }

    #[test]
    fn test_write_replaces_existing() {
        let (temp_dir, sanitizer) = setup();
        let writer = SafeWriter::default();
        let path = target(&sanitizer, "a.html");

        writer
            .write(WriteRequest::new(path.clone(), "first version"))
            .unwrap();
        writer.write(WriteRequest::new(path, "second")).unwrap();

        assert_eq!(
            fs::read_to_string(temp_dir.path().join("a.html")).unwrap(),
            "second"
        );
    }

    #[test]
    fn test_write_forces_extension() {
        let (temp_dir, sanitizer) = setup();
        let writer = SafeWriter::default();

        let written = writer
            .write(WriteRequest::new(target(&sanitizer, "pages/x.php"), "x").with_extension("html"))
            .unwrap();

        assert_eq!(written.relative(), "pages/x.html");
        assert!(temp_dir.path().join("pages/x.html").exists());
        assert!(!temp_dir.path().join("pages/x.php").exists());
    }

    #[test]
    fn test_oversize_rejected_by_default() {
        let (temp_dir, sanitizer) = setup();
        let writer = SafeWriter::default();

        let result = writer
            .write(WriteRequest::new(target(&sanitizer, "big.html"), vec![b'a'; 20]).with_size_limit(10));

        assert!(matches!(
            result,
            Err(FileError::Storage(StorageError::ContentTooLarge {
                size: 20,
                limit: 10
            }))
        ));
        assert!(!temp_dir.path().join("big.html").exists());
    }

    #[test]
    fn test_oversize_truncated() {
        let (temp_dir, sanitizer) = setup();
        let writer = SafeWriter::new(OversizePolicy::Truncate);

        writer
            .write(WriteRequest::new(target(&sanitizer, "big.html"), "0123456789ABCDEF").with_size_limit(10))
            .unwrap();

        assert_eq!(
            fs::read_to_string(temp_dir.path().join("big.html")).unwrap(),
            "0123456789"
        );
    }

    #[test]
    fn test_content_policy_violation() {
        let (temp_dir, sanitizer) = setup();
        let writer = SafeWriter::default().with_content_policy(Arc::new(ServerScriptPolicy));

        let result = writer.write(WriteRequest::new(
            target(&sanitizer, "x.html"),
            "<?php system($_GET['c']); ?>",
        ));

        assert!(matches!(
            result,
            Err(FileError::Storage(StorageError::ContentPolicyViolation(_)))
        ));
        assert!(!temp_dir.path().join("x.html").exists());
        assert!(leftover_temp_files(temp_dir.path()).is_empty());
    }

    #[test]
    fn test_failed_write_leaves_nothing() {
        let (temp_dir, sanitizer) = setup();
        let writer = SafeWriter::default();
        // A directory at the final name makes the rename fail.
        fs::create_dir_all(temp_dir.path().join("taken.html/inner")).unwrap();

        let result = writer.write(WriteRequest::new(target(&sanitizer, "taken.html"), "x"));

        assert!(matches!(
            result,
            Err(FileError::Storage(StorageError::IoFailure { .. }))
        ));
        assert!(leftover_temp_files(temp_dir.path()).is_empty());
    }

    #[test]
    fn test_write_name_at_length_limit() {
        let (temp_dir, sanitizer) = setup();
        let writer = SafeWriter::default();

        // 250 bytes; the longest names most filesystems accept are 255.
        let name = format!("{}.html", "a".repeat(245));
        let written = writer
            .write(WriteRequest::new(
                target(&sanitizer, &format!("pages/{}", name)),
                "<p>long</p>",
            ))
            .unwrap();

        assert_eq!(written.relative(), format!("pages/{}", name));
        assert_eq!(
            fs::read_to_string(temp_dir.path().join("pages").join(&name)).unwrap(),
            "<p>long</p>"
        );
        assert!(leftover_temp_files(&temp_dir.path().join("pages")).is_empty());
    }

    #[test]
    fn test_temp_file_removed_on_drop() {
        let temp_dir = TempDir::new().unwrap();
        let path = {
            let mut temp = TempFile::create(temp_dir.path()).unwrap();
            temp.write_all(b"partial").unwrap();
            temp.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_ensure_dir_concurrent() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("media/new/deep");
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let dir = dir.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    ensure_dir(&dir)
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert!(dir.is_dir());
    }

    #[test]
    fn test_ensure_dir_over_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("file"), "x").unwrap();
        let result = ensure_dir(&temp_dir.path().join("file"));
        assert!(matches!(result, Err(StorageError::IoFailure { .. })));
    }

    #[test]
    fn test_delete() {
        let (temp_dir, sanitizer) = setup();
        let writer = SafeWriter::default();
        fs::write(temp_dir.path().join("old.html"), "x").unwrap();

        writer.delete(&target(&sanitizer, "old.html")).unwrap();
        assert!(!temp_dir.path().join("old.html").exists());

        let again = writer.delete(&target(&sanitizer, "old.html"));
        assert!(matches!(
            again,
            Err(FileError::Storage(StorageError::NotFound(_)))
        ));
    }

    #[test]
    fn test_delete_refuses_directories() {
        let (temp_dir, sanitizer) = setup();
        let writer = SafeWriter::default();
        fs::create_dir_all(temp_dir.path().join("pages")).unwrap();

        assert!(matches!(
            writer.delete(&target(&sanitizer, "pages")),
            Err(FileError::Storage(StorageError::NotAFile(_)))
        ));
        assert!(matches!(
            writer.delete(&SanitizedPath::root(sanitizer.root())),
            Err(FileError::Storage(StorageError::NotAFile(_)))
        ));
        assert!(temp_dir.path().join("pages").is_dir());
    }

    #[test]
    fn test_rename() {
        let (temp_dir, sanitizer) = setup();
        let writer = SafeWriter::default();
        fs::write(temp_dir.path().join("a.html"), "content").unwrap();

        writer
            .rename(
                &target(&sanitizer, "a.html"),
                &target(&sanitizer, "moved/b.html"),
            )
            .unwrap();

        assert!(!temp_dir.path().join("a.html").exists());
        assert_eq!(
            fs::read_to_string(temp_dir.path().join("moved/b.html")).unwrap(),
            "content"
        );
    }

    #[test]
    fn test_rename_missing_source() {
        let (_temp_dir, sanitizer) = setup();
        let writer = SafeWriter::default();

        let result = writer.rename(
            &target(&sanitizer, "missing.html"),
            &target(&sanitizer, "b.html"),
        );
        assert!(matches!(
            result,
            Err(FileError::Storage(StorageError::NotFound(_)))
        ));
    }

    #[test]
    fn test_oversize_policy_serde() {
        #[derive(Deserialize)]
        struct Wrapper {
            oversize: OversizePolicy,
        }
        let parsed: Wrapper = toml::from_str("oversize = \"truncate\"").unwrap();
        assert_eq!(parsed.oversize, OversizePolicy::Truncate);
        assert_eq!(OversizePolicy::default(), OversizePolicy::Reject);
    }
}
