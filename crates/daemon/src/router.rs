//! Message router for dispatching requests to the filesystem policy layer.
//!
//! This module provides the `MessageRouter` struct that receives protocol
//! messages and routes them to the page, media and upload handlers. Every
//! handler does blocking filesystem work, so each request runs on the tokio
//! blocking pool and a slow disk never stalls other requests.

use std::fs;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use protocol::messages::{
    CheckExtensionRequest, DeleteRequest, ErrorMessage, ExtensionChecked, FileDeleted,
    FileRenamed, FileWritten, PageList, RenameRequest, SaveRequest, SaveReusableRequest,
    ScanRequest, UploadCancel, UploadChunk, UploadComplete, UploadProgress, UploadStart,
    UploadStarted, Uploaded,
};
use protocol::{Envelope, ErrorKind, Message};
use tracing::{debug, warn};

use crate::config::Config;
use crate::files::{
    ExtensionPolicy, FileError, PageCatalog, PathError, PathSanitizer, PolicyError, Root,
    SafeWriter, SanitizeOptions, SanitizedPath, ScanLimits, ServerScriptPolicy, StorageError,
    TreeScanner, UploadManager, UploadResolver, WriteRequest,
};

/// Result type for router operations.
pub type RouterResult = Result<Option<Message>, RouterError>;

/// Errors that can occur during message routing.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// Filesystem policy error.
    #[error(transparent)]
    File(#[from] FileError),

    /// Invalid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<PathError> for RouterError {
    fn from(e: PathError) -> Self {
        RouterError::File(e.into())
    }
}

impl From<PolicyError> for RouterError {
    fn from(e: PolicyError) -> Self {
        RouterError::File(e.into())
    }
}

impl From<StorageError> for RouterError {
    fn from(e: StorageError) -> Self {
        RouterError::File(e.into())
    }
}

impl RouterError {
    /// The flat error kind reported to clients.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RouterError::File(e) => e.kind(),
            RouterError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            RouterError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Convert the error to a protocol ErrorMessage.
    pub fn to_error_message(&self, context: Option<String>) -> ErrorMessage {
        let kind = self.kind();
        ErrorMessage {
            kind,
            message: self.to_string(),
            context,
            recoverable: !kind.is_client_error(),
        }
    }
}

/// The filesystem components, built once from configuration.
#[derive(Debug)]
pub struct Services {
    sanitizer: PathSanitizer,
    writer: SafeWriter,
    scanner: TreeScanner,
    uploads: UploadManager,
    pages: PageCatalog,
    page_extension: String,
    page_max_size: u64,
    media_default_path: String,
    media_max_path_length: usize,
    stale_upload_age: Duration,
}

impl Services {
    /// Validate `config` and freeze it into the filesystem components.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        config.validate().context("Invalid configuration")?;

        let root = Root::new(&config.daemon.root)
            .with_context(|| format!("Invalid site root: {}", config.daemon.root.display()))?;
        let sanitizer =
            PathSanitizer::new(root).with_disallowed_names(config.security.disallowed_names.clone());

        let mut writer = SafeWriter::new(config.pages.oversize);
        if !config.pages.allow_server_scripts {
            writer = writer.with_content_policy(Arc::new(ServerScriptPolicy));
        }

        let scanner = TreeScanner::new(ScanLimits {
            max_depth: config.media.scan_max_depth,
            max_entries: config.media.scan_max_entries,
        });

        let policy = ExtensionPolicy::new(
            &config.upload.deny_extensions,
            &config.upload.allow_extensions,
        );
        let uploads = UploadManager::new(
            UploadResolver::new(sanitizer.clone(), policy),
            config.upload.max_size,
        );

        let page_extension = config.pages.extension.trim().trim_start_matches('.').to_string();
        let pages = PageCatalog::new(sanitizer.clone(), scanner.clone(), page_extension.clone())
            .with_page_dirs(config.pages.page_dirs.clone())
            .with_excluded(config.pages.excluded.clone());

        Ok(Self {
            sanitizer,
            writer,
            scanner,
            uploads,
            pages,
            page_extension,
            page_max_size: config.pages.max_size,
            media_default_path: config.media.default_path.clone(),
            media_max_path_length: config.media.max_path_length,
            stale_upload_age: Duration::from_secs(config.upload.stale_after_secs),
        })
    }

    /// The site root.
    pub fn root(&self) -> &Root {
        self.sanitizer.root()
    }

    pub fn uploads(&self) -> &UploadManager {
        &self.uploads
    }

    /// Drop upload sessions idle longer than the configured age.
    pub fn sweep_stale_uploads(&self) -> Result<usize, FileError> {
        self.uploads.cleanup_stale_uploads(self.stale_upload_age)
    }

    fn page_options(&self) -> SanitizeOptions {
        SanitizeOptions::force_extension(&self.page_extension)
    }

    fn sanitize_page(&self, raw: &str) -> Result<SanitizedPath, PathError> {
        self.sanitizer.sanitize(raw, &self.page_options())
    }

    fn write_page(&self, target: SanitizedPath, body: Vec<u8>) -> Result<Message, RouterError> {
        let size = (body.len() as u64).min(self.page_max_size);
        let written = self.writer.write(
            WriteRequest::new(target, body)
                .with_extension(&self.page_extension)
                .with_size_limit(self.page_max_size),
        )?;
        Ok(Message::Saved(FileWritten {
            path: written.relative().to_string(),
            size,
        }))
    }

    // =========================================================================
    // Page Handlers
    // =========================================================================

    fn save(&self, req: SaveRequest) -> Result<Message, RouterError> {
        debug!(file = %req.file, template = ?req.start_template_url, "Saving page");

        let template = req
            .start_template_url
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());
        let body = match template {
            Some(template) => read_template(&self.sanitize_page(template)?)?,
            None => req.html.unwrap_or_default().into_bytes(),
        };
        if body.is_empty() {
            return Err(RouterError::InvalidRequest("Html content is empty".to_string()));
        }

        let target = self.sanitize_page(&req.file)?;
        self.write_page(target, body)
    }

    fn save_reusable(&self, req: SaveReusableRequest) -> Result<Message, RouterError> {
        debug!(kind = %req.kind, name = %req.name, "Saving reusable element");

        if req.kind.trim().is_empty() || req.name.trim().is_empty() || req.html.is_empty() {
            return Err(RouterError::InvalidRequest(
                "Missing reusable element data".to_string(),
            ));
        }

        let target = self.sanitize_page(&format!("{}/{}", req.kind, req.name))?;
        self.write_page(target, req.html.into_bytes())
    }

    fn rename(&self, req: RenameRequest) -> Result<Message, RouterError> {
        debug!(file = %req.file, new_file = %req.new_file, "Renaming page");

        let from = self.sanitize_page(&req.file)?;
        let to = self.sanitize_page(&req.new_file)?;
        self.writer.rename(&from, &to)?;

        Ok(Message::Renamed(FileRenamed {
            from: from.relative().to_string(),
            to: to.relative().to_string(),
        }))
    }

    fn delete(&self, req: DeleteRequest) -> Result<Message, RouterError> {
        debug!(file = %req.file, "Deleting page");

        let target = self.sanitize_page(&req.file)?;
        self.writer.delete(&target)?;

        Ok(Message::Deleted(FileDeleted {
            path: target.relative().to_string(),
        }))
    }

    fn list_pages(&self) -> Result<Message, RouterError> {
        let pages = self.pages.list()?;
        Ok(Message::PageList(PageList { pages }))
    }

    // =========================================================================
    // Media Handlers
    // =========================================================================

    fn scan(&self, req: ScanRequest) -> Result<Message, RouterError> {
        let raw: String = req
            .media_path
            .unwrap_or_default()
            .chars()
            .take(self.media_max_path_length)
            .collect();

        debug!(media_path = %raw, "Scanning media");

        // Input that filters down to nothing means "the media directory".
        // Traversal and absolute paths are rejected before that check.
        let opts = SanitizeOptions::default();
        let dir = match self.sanitizer.sanitize(&raw, &opts) {
            Err(PathError::EmptyPath) => {
                debug!(default = %self.media_default_path, "Falling back to default media path");
                self.sanitizer.sanitize(&self.media_default_path, &opts)?
            }
            result => result?,
        };
        let tree = self.scanner.scan(&dir)?;
        Ok(Message::ScanResult(tree))
    }

    fn upload_start(&self, req: UploadStart) -> Result<Message, RouterError> {
        let media_path = req.media_path.unwrap_or_default();
        debug!(media_path = %media_path, filename = %req.filename, "Starting upload");

        let (upload_id, destination) =
            self.uploads
                .start_upload(&media_path, &req.filename, req.only_filename)?;

        Ok(Message::UploadStarted(UploadStarted {
            upload_id,
            destination: destination.relative().to_string(),
        }))
    }

    fn upload_chunk(&self, req: UploadChunk) -> Result<Message, RouterError> {
        let received = self
            .uploads
            .write_chunk(&req.upload_id, req.offset, &req.data)?;

        Ok(Message::UploadProgress(UploadProgress {
            upload_id: req.upload_id,
            received,
        }))
    }

    fn upload_complete(&self, req: UploadComplete) -> Result<Message, RouterError> {
        let done = self.uploads.complete_upload(&req.upload_id)?;
        Ok(Message::Uploaded(Uploaded {
            location: done.location,
            size: done.size,
        }))
    }

    fn upload_cancel(&self, req: UploadCancel) -> Result<Message, RouterError> {
        if !self.uploads.cancel_upload(&req.upload_id)? {
            return Err(StorageError::UploadNotFound(req.upload_id).into());
        }
        Ok(Message::UploadCancelled(req))
    }

    fn check_extension(&self, req: CheckExtensionRequest) -> Result<Message, RouterError> {
        let decision = self.uploads.resolver().policy().check(&req.filename)?;
        Ok(Message::ExtensionChecked(ExtensionChecked {
            extension: decision.extension,
        }))
    }
}

/// Read a start template, mapping a missing file to `NotFound`.
fn read_template(template: &SanitizedPath) -> Result<Vec<u8>, StorageError> {
    fs::read(template.absolute()).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            StorageError::NotFound(template.relative().to_string())
        } else {
            StorageError::io(template.absolute(), e)
        }
    })
}

/// Message router that dispatches requests to the filesystem services.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    services: Arc<Services>,
}

impl MessageRouter {
    /// Create a new message router over shared services.
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    /// Build services from configuration and wrap them in a router.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self::new(Arc::new(Services::from_config(config)?)))
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Route a message to the appropriate handler.
    ///
    /// Returns `Ok(Some(response))` for requests, `Ok(None)` for response
    /// messages received as requests, or `Err(error)` if handling failed.
    pub async fn route(&self, message: Message) -> RouterResult {
        match message {
            // Page requests
            Message::Save(req) => self.run(move |s| s.save(req)).await,
            Message::SaveReusable(req) => self.run(move |s| s.save_reusable(req)).await,
            Message::Rename(req) => self.run(move |s| s.rename(req)).await,
            Message::Delete(req) => self.run(move |s| s.delete(req)).await,
            Message::ListPages => self.run(|s| s.list_pages()).await,

            // Media requests
            Message::Scan(req) => self.run(move |s| s.scan(req)).await,
            Message::UploadStart(req) => self.run(move |s| s.upload_start(req)).await,
            Message::UploadChunk(req) => self.run(move |s| s.upload_chunk(req)).await,
            Message::UploadComplete(req) => self.run(move |s| s.upload_complete(req)).await,
            Message::UploadCancel(req) => self.run(move |s| s.upload_cancel(req)).await,
            Message::CheckExtension(req) => self.run(move |s| s.check_extension(req)).await,

            Message::Error(err) => {
                warn!(?err, "Received error from peer");
                Ok(None)
            }
            other => {
                // Response messages are never valid requests
                debug!(message = ?other, "Ignoring response message received as request");
                Ok(None)
            }
        }
    }

    /// Route an envelope, answering errors with an `Error` envelope.
    ///
    /// Returns `None` when the message needs no response.
    pub async fn handle(&self, envelope: Envelope) -> Option<Envelope> {
        let sequence = envelope.sequence;
        let context = request_context(&envelope.payload);

        match self.route(envelope.payload).await {
            Ok(Some(response)) => Some(Envelope::new(sequence, response)),
            Ok(None) => None,
            Err(e) => {
                warn!(sequence, kind = %e.kind(), error = %e, "Request rejected");
                Some(Envelope::new(
                    sequence,
                    Message::Error(e.to_error_message(context)),
                ))
            }
        }
    }

    async fn run<F>(&self, handler: F) -> RouterResult
    where
        F: FnOnce(&Services) -> Result<Message, RouterError> + Send + 'static,
    {
        let services = Arc::clone(&self.services);
        tokio::task::spawn_blocking(move || handler(&services))
            .await
            .map_err(|e| RouterError::Internal(format!("request worker failed: {}", e)))?
            .map(Some)
    }
}

/// The raw path a request named, for error context.
fn request_context(message: &Message) -> Option<String> {
    match message {
        Message::Save(req) => Some(req.file.clone()),
        Message::Rename(req) => Some(req.file.clone()),
        Message::Delete(req) => Some(req.file.clone()),
        Message::SaveReusable(req) => Some(format!("{}/{}", req.kind, req.name)),
        Message::Scan(req) => req.media_path.clone(),
        Message::UploadStart(req) => Some(req.filename.clone()),
        Message::UploadChunk(req) => Some(req.upload_id.clone()),
        Message::UploadComplete(req) => Some(req.upload_id.clone()),
        Message::UploadCancel(req) => Some(req.upload_id.clone()),
        Message::CheckExtension(req) => Some(req.filename.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::EntryKind;
    use tempfile::TempDir;

    fn test_config(temp_dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.daemon.root = temp_dir.path().to_path_buf();
        config
    }

    fn create_test_router(temp_dir: &TempDir) -> MessageRouter {
        MessageRouter::from_config(&test_config(temp_dir)).unwrap()
    }

    fn expect_error(result: RouterResult) -> ErrorKind {
        match result {
            Err(e) => e.kind(),
            Ok(other) => panic!("expected error, got {:?}", other),
        }
    }

    fn save(file: &str, html: &str) -> Message {
        Message::Save(SaveRequest {
            file: file.to_string(),
            html: Some(html.to_string()),
            start_template_url: None,
        })
    }

    // =========================================================================
    // Page Tests
    // =========================================================================

    #[tokio::test]
    async fn test_route_save() {
        let temp_dir = TempDir::new().unwrap();
        let router = create_test_router(&temp_dir);

        let result = router.route(save("my-pages/about.php?v=2", "<h1>Hi</h1>")).await;
        match result.unwrap() {
            Some(Message::Saved(written)) => {
                assert_eq!(written.path, "my-pages/about.html");
                assert_eq!(written.size, 11);
            }
            other => panic!("unexpected response: {:?}", other),
        }
        assert_eq!(
            fs::read_to_string(temp_dir.path().join("my-pages/about.html")).unwrap(),
            "<h1>Hi</h1>"
        );
    }

    #[tokio::test]
    async fn test_route_save_rejects_escape() {
        let temp_dir = TempDir::new().unwrap();
        let router = create_test_router(&temp_dir);

        let kind = expect_error(router.route(save("../../etc/passwd", "x")).await);
        assert_eq!(kind, ErrorKind::PathEscapesRoot);
    }

    #[tokio::test]
    async fn test_route_save_rejects_php() {
        let temp_dir = TempDir::new().unwrap();
        let router = create_test_router(&temp_dir);

        let kind = expect_error(router.route(save("a.html", "<?php phpinfo(); ?>")).await);
        assert_eq!(kind, ErrorKind::ContentPolicyViolation);
        assert!(!temp_dir.path().join("a.html").exists());
    }

    #[tokio::test]
    async fn test_route_save_allows_php_when_configured() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(&temp_dir);
        config.pages.allow_server_scripts = true;
        let router = MessageRouter::from_config(&config).unwrap();

        let result = router.route(save("a.html", "<?php phpinfo(); ?>")).await;
        assert!(matches!(result, Ok(Some(Message::Saved(_)))));
    }

    #[tokio::test]
    async fn test_route_save_empty_body() {
        let temp_dir = TempDir::new().unwrap();
        let router = create_test_router(&temp_dir);

        let kind = expect_error(router.route(save("a.html", "")).await);
        assert_eq!(kind, ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn test_route_save_empty_file() {
        let temp_dir = TempDir::new().unwrap();
        let router = create_test_router(&temp_dir);

        let kind = expect_error(router.route(save("", "<p>x</p>")).await);
        assert_eq!(kind, ErrorKind::EmptyPath);
    }

    #[tokio::test]
    async fn test_route_save_oversize() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(&temp_dir);
        config.pages.max_size = 8;
        let router = MessageRouter::from_config(&config).unwrap();

        let kind = expect_error(router.route(save("a.html", "0123456789")).await);
        assert_eq!(kind, ErrorKind::ContentTooLarge);

        config.pages.oversize = crate::files::OversizePolicy::Truncate;
        let router = MessageRouter::from_config(&config).unwrap();
        match router.route(save("a.html", "0123456789")).await.unwrap() {
            Some(Message::Saved(written)) => assert_eq!(written.size, 8),
            other => panic!("unexpected response: {:?}", other),
        }
        assert_eq!(
            fs::read_to_string(temp_dir.path().join("a.html")).unwrap(),
            "01234567"
        );
    }

    #[tokio::test]
    async fn test_route_save_from_template() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("my-pages")).unwrap();
        fs::write(
            temp_dir.path().join("my-pages/new-page-blank-template.html"),
            "<body>blank</body>",
        )
        .unwrap();
        let router = create_test_router(&temp_dir);

        let msg = Message::Save(SaveRequest {
            file: "my-pages/fresh.html".to_string(),
            html: Some("ignored".to_string()),
            start_template_url: Some("my-pages/new-page-blank-template.html".to_string()),
        });
        router.route(msg).await.unwrap();

        assert_eq!(
            fs::read_to_string(temp_dir.path().join("my-pages/fresh.html")).unwrap(),
            "<body>blank</body>"
        );

        let msg = Message::Save(SaveRequest {
            file: "my-pages/other.html".to_string(),
            html: None,
            start_template_url: Some("my-pages/missing.html".to_string()),
        });
        assert_eq!(expect_error(router.route(msg).await), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_route_save_reusable() {
        let temp_dir = TempDir::new().unwrap();
        let router = create_test_router(&temp_dir);

        let msg = Message::SaveReusable(SaveReusableRequest {
            kind: "blocks".to_string(),
            name: "hero".to_string(),
            html: "<section>hero</section>".to_string(),
        });
        match router.route(msg).await.unwrap() {
            Some(Message::Saved(written)) => assert_eq!(written.path, "blocks/hero.html"),
            other => panic!("unexpected response: {:?}", other),
        }

        let msg = Message::SaveReusable(SaveReusableRequest {
            kind: "blocks".to_string(),
            name: String::new(),
            html: "<p/>".to_string(),
        });
        assert_eq!(expect_error(router.route(msg).await), ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn test_route_rename_and_delete() {
        let temp_dir = TempDir::new().unwrap();
        let router = create_test_router(&temp_dir);
        router.route(save("my-pages/a.html", "<p>a</p>")).await.unwrap();

        let msg = Message::Rename(RenameRequest {
            file: "my-pages/a.html".to_string(),
            new_file: "my-pages/b".to_string(),
        });
        match router.route(msg).await.unwrap() {
            Some(Message::Renamed(renamed)) => {
                assert_eq!(renamed.from, "my-pages/a.html");
                assert_eq!(renamed.to, "my-pages/b.html");
            }
            other => panic!("unexpected response: {:?}", other),
        }

        let msg = Message::Delete(DeleteRequest {
            file: "my-pages/b.html".to_string(),
        });
        assert!(matches!(
            router.route(msg.clone()).await,
            Ok(Some(Message::Deleted(_)))
        ));
        assert!(!temp_dir.path().join("my-pages/b.html").exists());
        assert_eq!(expect_error(router.route(msg).await), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_route_delete_forces_extension() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("config.json"), "{}").unwrap();
        let router = create_test_router(&temp_dir);

        let msg = Message::Delete(DeleteRequest {
            file: "config.json".to_string(),
        });
        assert_eq!(expect_error(router.route(msg).await), ErrorKind::NotFound);
        assert!(temp_dir.path().join("config.json").exists());
    }

    #[tokio::test]
    async fn test_route_list_pages() {
        let temp_dir = TempDir::new().unwrap();
        let router = create_test_router(&temp_dir);
        router.route(save("my-pages/about.html", "<p>a</p>")).await.unwrap();
        router.route(save("demo/shop/index.html", "<p>b</p>")).await.unwrap();

        match router.route(Message::ListPages).await.unwrap() {
            Some(Message::PageList(list)) => {
                let names: Vec<&str> = list.pages.iter().map(|p| p.name.as_str()).collect();
                assert_eq!(names, vec!["about", "shop"]);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    // =========================================================================
    // Media Tests
    // =========================================================================

    #[tokio::test]
    async fn test_route_scan_default_media_path() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("media/icons")).unwrap();
        fs::write(temp_dir.path().join("media/icons/a.svg"), "<svg/>").unwrap();
        let router = create_test_router(&temp_dir);

        for media_path in [None, Some(String::new()), Some("???".to_string())] {
            let msg = Message::Scan(ScanRequest { media_path });
            match router.route(msg).await.unwrap() {
                Some(Message::ScanResult(tree)) => {
                    assert_eq!(tree.kind, EntryKind::Folder);
                    assert_eq!(tree.find("icons/a.svg").unwrap().size, Some(6));
                }
                other => panic!("unexpected response: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_route_scan_missing_dir_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let router = create_test_router(&temp_dir);

        let msg = Message::Scan(ScanRequest {
            media_path: Some("media/not-yet".to_string()),
        });
        match router.route(msg).await.unwrap() {
            Some(Message::ScanResult(tree)) => assert!(tree.children().is_empty()),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_route_scan_escape() {
        let temp_dir = TempDir::new().unwrap();
        let router = create_test_router(&temp_dir);

        for raw in ["../", "..", "/", "media/../..", "..\\"] {
            let msg = Message::Scan(ScanRequest {
                media_path: Some(raw.to_string()),
            });
            assert_eq!(
                expect_error(router.route(msg).await),
                ErrorKind::PathEscapesRoot,
                "media path {:?}",
                raw
            );
        }
    }

    #[tokio::test]
    async fn test_route_upload_flow() {
        let temp_dir = TempDir::new().unwrap();
        let router = create_test_router(&temp_dir);

        let msg = Message::UploadStart(UploadStart {
            media_path: Some("media".to_string()),
            filename: "photo.JPG".to_string(),
            only_filename: false,
        });
        let upload_id = match router.route(msg).await.unwrap() {
            Some(Message::UploadStarted(started)) => {
                assert_eq!(started.destination, "media/photo.JPG");
                started.upload_id
            }
            other => panic!("unexpected response: {:?}", other),
        };

        let msg = Message::UploadChunk(UploadChunk {
            upload_id: upload_id.clone(),
            offset: 0,
            data: b"Hello World!".to_vec(),
        });
        match router.route(msg).await.unwrap() {
            Some(Message::UploadProgress(progress)) => assert_eq!(progress.received, 12),
            other => panic!("unexpected response: {:?}", other),
        }

        let msg = Message::UploadComplete(UploadComplete { upload_id });
        match router.route(msg).await.unwrap() {
            Some(Message::Uploaded(uploaded)) => {
                assert_eq!(uploaded.location, "media/photo.JPG");
                assert_eq!(uploaded.size, 12);
            }
            other => panic!("unexpected response: {:?}", other),
        }
        assert_eq!(
            fs::read(temp_dir.path().join("media/photo.JPG")).unwrap(),
            b"Hello World!"
        );
    }

    #[tokio::test]
    async fn test_route_upload_denied_extension() {
        let temp_dir = TempDir::new().unwrap();
        let router = create_test_router(&temp_dir);

        let msg = Message::UploadStart(UploadStart {
            media_path: Some("media".to_string()),
            filename: "shell.php".to_string(),
            only_filename: false,
        });
        assert_eq!(expect_error(router.route(msg).await), ErrorKind::DeniedExtension);
        assert!(!temp_dir.path().join("media").exists());
    }

    #[tokio::test]
    async fn test_route_upload_cancel_unknown() {
        let temp_dir = TempDir::new().unwrap();
        let router = create_test_router(&temp_dir);

        let msg = Message::UploadCancel(UploadCancel {
            upload_id: "nope".to_string(),
        });
        assert_eq!(expect_error(router.route(msg).await), ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn test_route_check_extension() {
        let temp_dir = TempDir::new().unwrap();
        let router = create_test_router(&temp_dir);

        let msg = Message::CheckExtension(CheckExtensionRequest {
            filename: "icon.ICO".to_string(),
        });
        match router.route(msg).await.unwrap() {
            Some(Message::ExtensionChecked(checked)) => assert_eq!(checked.extension, "ico"),
            other => panic!("unexpected response: {:?}", other),
        }

        let msg = Message::CheckExtension(CheckExtensionRequest {
            filename: "run.exe".to_string(),
        });
        assert_eq!(expect_error(router.route(msg).await), ErrorKind::NotAllowlisted);
    }

    // =========================================================================
    // Envelope and Error Tests
    // =========================================================================

    #[tokio::test]
    async fn test_route_response_message_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let router = create_test_router(&temp_dir);

        let msg = Message::Deleted(FileDeleted {
            path: "a.html".to_string(),
        });
        assert!(router.route(msg).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_handle_wraps_errors() {
        let temp_dir = TempDir::new().unwrap();
        let router = create_test_router(&temp_dir);

        let response = router
            .handle(Envelope::new(7, save("../x.html", "<p/>")))
            .await
            .unwrap();
        assert_eq!(response.sequence, 7);
        match response.payload {
            Message::Error(err) => {
                assert_eq!(err.kind, ErrorKind::PathEscapesRoot);
                assert_eq!(err.context.as_deref(), Some("../x.html"));
                assert!(!err.recoverable);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_into_new_directory() {
        let temp_dir = TempDir::new().unwrap();
        let router = create_test_router(&temp_dir);

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let router = router.clone();
                tokio::spawn(async move {
                    router
                        .route(save(&format!("fresh/dir/page{}.html", i), "<p>x</p>"))
                        .await
                })
            })
            .collect();

        for handle in handles {
            assert!(matches!(
                handle.await.unwrap(),
                Ok(Some(Message::Saved(_)))
            ));
        }
        assert_eq!(
            fs::read_dir(temp_dir.path().join("fresh/dir")).unwrap().count(),
            16
        );
    }

    #[test]
    fn test_from_config_rejects_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.daemon.root = temp_dir.path().join("missing");
        assert!(Services::from_config(&config).is_err());
    }

    #[test]
    fn test_error_message_recoverable() {
        let io = RouterError::from(StorageError::io("/x", io::Error::other("disk")));
        let msg = io.to_error_message(None);
        assert_eq!(msg.kind, ErrorKind::IoFailure);
        assert!(msg.recoverable);

        let denied = RouterError::from(PolicyError::DeniedExtension("php".to_string()));
        let msg = denied.to_error_message(Some("a.php".to_string()));
        assert_eq!(msg.kind, ErrorKind::DeniedExtension);
        assert_eq!(msg.message, "file type php not allowed");
        assert!(!msg.recoverable);
    }
}
