//! Upload destination resolution and chunked upload sessions.
//!
//! [`UploadResolver`] turns the editor's raw media path and filename into a
//! validated target and runs the extension policy before any byte is
//! stored. [`UploadManager`] streams accepted uploads into a temporary file
//! next to the destination and renames it into place on completion.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock, TryLockError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::{FileError, StorageError};
use super::paths::SanitizedPath;
use super::policy::{ExtensionDecision, ExtensionPolicy};
use super::sanitizer::{PathSanitizer, SanitizeOptions};
use super::writer::{prepare_dir, sync_dir, TempFile};

/// Default upload size limit (20 MiB).
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 20 * 1024 * 1024;

/// A validated upload destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    /// Directory the file goes into.
    pub directory: SanitizedPath,
    /// Sanitized filename.
    pub filename: String,
    /// The extension decision that admitted the file.
    pub decision: ExtensionDecision,
}

impl UploadTarget {
    /// Full destination path.
    pub fn path(&self) -> Result<SanitizedPath, FileError> {
        Ok(self.directory.join_file(&self.filename)?)
    }

    /// What the editor expects back: the bare filename, or the path of the
    /// file relative to the root.
    pub fn location(&self, only_filename: bool) -> String {
        if only_filename || self.directory.is_root() {
            self.filename.clone()
        } else {
            format!("{}/{}", self.directory.relative(), self.filename)
        }
    }
}

/// Combines directory sanitizing, filename sanitizing and the extension
/// policy.
#[derive(Debug, Clone)]
pub struct UploadResolver {
    sanitizer: PathSanitizer,
    policy: ExtensionPolicy,
}

impl UploadResolver {
    pub fn new(sanitizer: PathSanitizer, policy: ExtensionPolicy) -> Self {
        Self { sanitizer, policy }
    }

    pub fn policy(&self) -> &ExtensionPolicy {
        &self.policy
    }

    /// Resolve the destination for an upload.
    ///
    /// An empty `media_path` means the root directory.
    pub fn resolve(&self, media_path: &str, filename: &str) -> Result<UploadTarget, FileError> {
        let directory = if media_path.trim().trim_matches('/').is_empty() {
            SanitizedPath::root(self.sanitizer.root())
        } else {
            self.sanitizer.sanitize(media_path, &SanitizeOptions::default())?
        };

        let filename = self.sanitizer.sanitize_filename(filename)?;
        let decision = self.policy.check(&filename)?;

        let target = UploadTarget {
            directory,
            filename,
            decision,
        };
        // Reject names join_file refuses before any session exists.
        target.path()?;
        Ok(target)
    }
}

/// A finished upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedUpload {
    /// Response string for the editor, see [`UploadTarget::location`].
    pub location: String,
    /// Final path of the file.
    pub path: SanitizedPath,
    /// Bytes written.
    pub size: u64,
}

/// State for an in-progress upload.
///
/// `temp` is `None` once the session has been completed, cancelled or
/// dropped; a writer that was already waiting on the session lock then sees
/// an unknown upload.
#[derive(Debug)]
struct UploadSession {
    target: UploadTarget,
    destination: PathBuf,
    temp: Option<TempFile>,
    received: u64,
    only_filename: bool,
    last_activity: Instant,
}

type SharedSession = Arc<Mutex<UploadSession>>;

/// Tracks chunked uploads.
///
/// The session map lock is only held to look up, insert or remove a
/// session; chunk I/O happens under the per-session lock, so uploads do not
/// wait on each other's disk writes.
///
/// Dropping a session (cancel, error, stale cleanup or dropping the manager)
/// removes its temporary file.
#[derive(Debug)]
pub struct UploadManager {
    resolver: UploadResolver,
    uploads: RwLock<HashMap<String, SharedSession>>,
    max_size: u64,
}

impl UploadManager {
    pub fn new(resolver: UploadResolver, max_size: u64) -> Self {
        Self {
            resolver,
            uploads: RwLock::new(HashMap::new()),
            max_size,
        }
    }

    pub fn resolver(&self) -> &UploadResolver {
        &self.resolver
    }

    /// Open an upload session. Returns its identifier and the final path.
    pub fn start_upload(
        &self,
        media_path: &str,
        filename: &str,
        only_filename: bool,
    ) -> Result<(String, SanitizedPath), FileError> {
        let target = self.resolver.resolve(media_path, filename)?;
        let path = target.path()?;

        let directory = prepare_dir(&target.directory)?;
        let temp = TempFile::create(&directory)?;
        let destination = directory.join(&target.filename);

        let upload_id = Uuid::new_v4().to_string();
        let session = UploadSession {
            target,
            destination,
            temp: Some(temp),
            received: 0,
            only_filename,
            last_activity: Instant::now(),
        };

        let mut uploads = self
            .uploads
            .write()
            .map_err(|_| StorageError::LockPoisoned("uploads lock during start_upload"))?;
        uploads.insert(upload_id.clone(), Arc::new(Mutex::new(session)));

        debug!(upload_id = %upload_id, path = %path, "Upload started");
        Ok((upload_id, path))
    }

    fn session(&self, upload_id: &str) -> Result<SharedSession, StorageError> {
        let uploads = self
            .uploads
            .read()
            .map_err(|_| StorageError::LockPoisoned("uploads lock during lookup"))?;
        uploads
            .get(upload_id)
            .cloned()
            .ok_or_else(|| StorageError::UploadNotFound(upload_id.to_string()))
    }

    fn remove(&self, upload_id: &str) -> Result<Option<SharedSession>, StorageError> {
        let mut uploads = self
            .uploads
            .write()
            .map_err(|_| StorageError::LockPoisoned("uploads lock during remove"))?;
        Ok(uploads.remove(upload_id))
    }

    /// Append a chunk. Returns the total bytes received so far.
    pub fn write_chunk(&self, upload_id: &str, offset: u64, data: &[u8]) -> Result<u64, FileError> {
        let shared = self.session(upload_id)?;

        let failure = {
            let mut session = shared
                .lock()
                .map_err(|_| StorageError::LockPoisoned("upload session during write_chunk"))?;
            let UploadSession {
                temp,
                received,
                last_activity,
                ..
            } = &mut *session;

            let Some(file) = temp.as_mut() else {
                return Err(StorageError::UploadNotFound(upload_id.to_string()).into());
            };

            if offset != *received {
                return Err(StorageError::ChunkOutOfOrder {
                    expected: *received,
                    received: offset,
                }
                .into());
            }

            let size = *received + data.len() as u64;
            let failure = if size > self.max_size {
                warn!(upload_id = %upload_id, size, limit = self.max_size, "Upload exceeds size limit");
                StorageError::ContentTooLarge {
                    size,
                    limit: self.max_size,
                }
            } else {
                match file.write_all(data) {
                    Ok(()) => {
                        *received = size;
                        *last_activity = Instant::now();
                        return Ok(size);
                    }
                    Err(e) => e,
                }
            };

            // The session is unusable; dropping the temp file removes it.
            *temp = None;
            failure
        };

        self.remove(upload_id)?;
        Err(failure.into())
    }

    /// Move a finished upload into place.
    pub fn complete_upload(&self, upload_id: &str) -> Result<CompletedUpload, FileError> {
        let shared = self
            .remove(upload_id)?
            .ok_or_else(|| StorageError::UploadNotFound(upload_id.to_string()))?;

        let (target, destination, temp, received, only_filename) = {
            let mut session = shared
                .lock()
                .map_err(|_| StorageError::LockPoisoned("upload session during complete"))?;
            let temp = session
                .temp
                .take()
                .ok_or_else(|| StorageError::UploadNotFound(upload_id.to_string()))?;
            (
                session.target.clone(),
                session.destination.clone(),
                temp,
                session.received,
                session.only_filename,
            )
        };

        temp.persist(&destination)?;
        if let Some(dir) = destination.parent() {
            sync_dir(dir);
        }

        let path = target.path()?;
        info!(path = %path, size = received, "Upload complete");
        Ok(CompletedUpload {
            location: target.location(only_filename),
            path,
            size: received,
        })
    }

    /// Discard an upload session. Returns whether it existed.
    pub fn cancel_upload(&self, upload_id: &str) -> Result<bool, FileError> {
        let Some(shared) = self.remove(upload_id)? else {
            return Ok(false);
        };

        // A poisoned session is dropped with the map entry anyway.
        if let Ok(mut session) = shared.lock() {
            session.temp = None;
        }
        debug!(upload_id = %upload_id, "Upload cancelled");
        Ok(true)
    }

    /// Store a whole file in one call.
    pub fn upload(
        &self,
        media_path: &str,
        filename: &str,
        only_filename: bool,
        data: &[u8],
    ) -> Result<CompletedUpload, FileError> {
        let (upload_id, _) = self.start_upload(media_path, filename, only_filename)?;
        if let Err(e) = self.write_chunk(&upload_id, 0, data) {
            let _ = self.cancel_upload(&upload_id);
            return Err(e);
        }
        self.complete_upload(&upload_id)
    }

    /// Bytes received for an open session.
    pub fn upload_status(&self, upload_id: &str) -> Option<u64> {
        let shared = self.session(upload_id).ok()?;
        let session = shared.lock().ok()?;
        session.temp.as_ref().map(|_| session.received)
    }

    /// Number of open sessions.
    pub fn active_uploads(&self) -> usize {
        self.uploads.read().map(|u| u.len()).unwrap_or(0)
    }

    /// Drop sessions that have not received a chunk for longer than
    /// `max_idle`. Returns how many were removed.
    ///
    /// A session whose lock is held is mid-write and therefore active.
    pub fn cleanup_stale_uploads(&self, max_idle: Duration) -> Result<usize, FileError> {
        let mut uploads = self
            .uploads
            .write()
            .map_err(|_| StorageError::LockPoisoned("uploads lock during cleanup"))?;

        let before = uploads.len();
        uploads.retain(|id, shared| match shared.try_lock() {
            Ok(mut session) => {
                if session.last_activity.elapsed() <= max_idle {
                    return true;
                }
                debug!(upload_id = %id, path = %session.target.directory, "Dropping stale upload");
                session.temp = None;
                false
            }
            Err(TryLockError::WouldBlock) => true,
            Err(TryLockError::Poisoned(_)) => false,
        });
        Ok(before - uploads.len())
    }
}
