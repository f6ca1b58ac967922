//! # Pagekeep Library
//!
//! Safe-path and filesystem-policy layer behind a browser page editor.
//!
//! ## Overview
//!
//! The editor sends raw, untrusted path strings: page names, template
//! URLs, media directories and upload filenames. This crate turns each of
//! them into a path proven to lie inside the configured site root before
//! any filesystem call is made, and then:
//!
//! - **Saves, renames and deletes pages** with an atomic temp-file-then-rename
//!   write and a server-script content check
//! - **Scans media directories** into the nested tree the editor's media
//!   browser renders
//! - **Accepts uploads** after checking the extension against a deny list
//!   and an allow list, streaming chunks into a temp file
//! - **Lists editable pages** for the editor's page picker
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │        CLI (local)  /  Unix socket server (serve)        │
//! ├──────────────────────────────────────────────────────────┤
//! │                     Message Router                       │
//! ├──────────────────────────────────────────────────────────┤
//! │  ┌────────────┐ ┌────────────┐ ┌──────────┐ ┌─────────┐  │
//! │  │ SafeWriter │ │TreeScanner │ │ Uploads  │ │  Pages  │  │
//! │  └────────────┘ └────────────┘ └──────────┘ └─────────┘  │
//! │  ┌─────────────────────────┐ ┌────────────────────────┐  │
//! │  │      PathSanitizer      │ │    ExtensionPolicy     │  │
//! │  └─────────────────────────┘ └────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::{Config, MessageRouter};
//! use protocol::messages::ScanRequest;
//! use protocol::Message;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load_default()?;
//!     config.apply_env_overrides();
//!
//!     let router = MessageRouter::from_config(&config)?;
//!     let tree = router
//!         .route(Message::Scan(ScanRequest { media_path: None }))
//!         .await?;
//!     println!("{:?}", tree);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`files`]: Path sanitization, extension policy, writes, scans, uploads
//! - [`router`]: Message routing to handlers
//! - [`ipc`]: Unix socket server and client

pub mod config;
pub mod files;
pub mod ipc;
pub mod router;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::Config;

// Re-export files types for convenience
pub use files::{
    ExtensionPolicy, FileError, PathSanitizer, Root, SafeWriter, SanitizedPath, TreeScanner,
    UploadManager, UploadResolver,
};

// Re-export router types for convenience
pub use router::{MessageRouter, RouterError, RouterResult, Services};
