//! Unix Domain Socket endpoint for the request layer.
//!
//! The web front end (or any local tool) talks to `pagekeep serve` over a
//! Unix socket using newline-delimited JSON. Each line is one protocol
//! [`Envelope`](protocol::Envelope); every request gets exactly one
//! response envelope carrying the same sequence number.
//!
//! ## Socket Path
//!
//! - Primary: `$XDG_RUNTIME_DIR/pagekeep/pagekeep.sock`
//! - Fallback: `/tmp/pagekeep-$UID/pagekeep.sock`
//!
//! ## Example
//!
//! ```rust,no_run
//! use daemon::config::Config;
//! use daemon::ipc::{get_socket_path, IpcServer};
//! use daemon::router::MessageRouter;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let router = MessageRouter::from_config(&Config::load_default()?)?;
//!     let server = IpcServer::bind(&get_socket_path()).await?;
//!     server.serve(router).await?;
//!     Ok(())
//! }
//! ```

mod client;
mod server;

pub use client::IpcClient;
pub use server::{IpcConnection, IpcError, IpcServer};

use std::path::PathBuf;

/// Get the socket path for the request endpoint.
///
/// 1. If `$XDG_RUNTIME_DIR` is set: `$XDG_RUNTIME_DIR/pagekeep/pagekeep.sock`
/// 2. Otherwise: `/tmp/pagekeep-$UID/pagekeep.sock`
#[cfg(unix)]
pub fn get_socket_path() -> PathBuf {
    use std::os::unix::fs::MetadataExt;

    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir)
            .join("pagekeep")
            .join("pagekeep.sock")
    } else {
        // Get UID by checking metadata of a file we own
        let uid = std::fs::metadata("/proc/self")
            .map(|m| m.uid())
            .unwrap_or(0);

        PathBuf::from(format!("/tmp/pagekeep-{}", uid)).join("pagekeep.sock")
    }
}

#[cfg(not(unix))]
pub fn get_socket_path() -> PathBuf {
    PathBuf::from("/tmp/pagekeep-unsupported/pagekeep.sock")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_get_socket_path_with_xdg_runtime_dir() {
        let original = std::env::var("XDG_RUNTIME_DIR").ok();

        // SAFETY: serialized with the other environment tests
        unsafe {
            std::env::set_var("XDG_RUNTIME_DIR", "/run/user/1000");
        }
        let path = get_socket_path();
        assert_eq!(path, PathBuf::from("/run/user/1000/pagekeep/pagekeep.sock"));

        // SAFETY: serialized with the other environment tests
        unsafe {
            match original {
                Some(val) => std::env::set_var("XDG_RUNTIME_DIR", val),
                None => std::env::remove_var("XDG_RUNTIME_DIR"),
            }
        }
    }

    #[test]
    #[serial]
    fn test_get_socket_path_without_xdg_runtime_dir() {
        let original = std::env::var("XDG_RUNTIME_DIR").ok();

        // SAFETY: serialized with the other environment tests
        unsafe {
            std::env::remove_var("XDG_RUNTIME_DIR");
        }
        let path = get_socket_path();
        assert!(path.to_str().unwrap().starts_with("/tmp/pagekeep-"));
        assert!(path.to_str().unwrap().ends_with("/pagekeep.sock"));

        // SAFETY: serialized with the other environment tests
        unsafe {
            if let Some(val) = original {
                std::env::set_var("XDG_RUNTIME_DIR", val);
            }
        }
    }

    #[test]
    #[serial]
    fn test_socket_path_is_absolute() {
        assert!(get_socket_path().is_absolute());
    }
}
