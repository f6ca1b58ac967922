//! # Pagekeep Protocol Library
//!
//! Wire types shared between the pagekeep filesystem core and whatever
//! request layer fronts it (HTTP handlers, the CLI, tests).
//!
//! ## Overview
//!
//! - **Message Definitions**: requests for saving, renaming, deleting and
//!   uploading files, scanning the media tree and listing pages, plus the
//!   matching responses
//! - **Media Tree**: the nested `{name, type, path, size?, items?}` shape
//!   returned by a scan, which existing editor clients depend on
//! - **Error Kinds**: the flat error taxonomy every failure maps onto
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{Envelope, Message};
//! use protocol::messages::ScanRequest;
//!
//! let message = Message::Scan(ScanRequest {
//!     media_path: Some("media/photos".to_string()),
//! });
//! let envelope = Envelope::new(1, message);
//!
//! let json = envelope.to_json().unwrap();
//! let decoded = Envelope::from_json(&json).unwrap();
//! assert_eq!(decoded, envelope);
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Request and response message definitions
//! - [`tree`]: Media tree entries
//! - [`error`]: Error kinds and the protocol error type

pub mod error;
pub mod messages;
pub mod tree;

pub use error::{ErrorKind, ProtocolError, Result};
pub use messages::{Envelope, Message, PROTOCOL_VERSION};
pub use tree::{EntryKind, TreeEntry};
