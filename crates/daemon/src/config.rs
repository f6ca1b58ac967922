//! Configuration management for pagekeep.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/pagekeep/config.toml`.
//! Loaded values are validated once and then frozen into the immutable
//! filesystem components by [`crate::router::Services::from_config`].

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::files::OversizePolicy;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be greater than 0")]
    ZeroLimit { field: &'static str },

    #[error("pages.extension must not be empty")]
    EmptyPageExtension,

    #[error("extension {0} is on both the upload deny and allow lists")]
    ConflictingExtension(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for pagekeep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General settings.
    pub daemon: DaemonConfig,

    /// Sensitive-name denylist.
    pub security: SecurityConfig,

    /// Page saving and listing.
    pub pages: PagesConfig,

    /// Media scanning.
    pub media: MediaConfig,

    /// Upload policy.
    pub upload: UploadConfig,
}

/// General configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Site directory every path is confined to.
    pub root: PathBuf,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Security settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    /// Basenames refused anywhere in a path, compared case-insensitively.
    pub disallowed_names: Vec<String>,
}

/// Page configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PagesConfig {
    /// Extension forced on every saved, renamed or deleted page.
    pub extension: String,

    /// Maximum page size in bytes (default: 2MB).
    pub max_size: u64,

    /// Whether oversized pages are rejected or truncated.
    pub oversize: OversizePolicy,

    /// Skip the server-side script check on page content.
    pub allow_server_scripts: bool,

    /// Directories listed by the page catalog. Only files directly inside
    /// are listed unless the entry ends in `/**`.
    pub page_dirs: Vec<String>,

    /// File names never listed.
    pub excluded: Vec<String>,
}

/// Media configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MediaConfig {
    /// Directory scanned when a request names none.
    pub default_path: String,

    /// Raw media paths are cut to this many characters.
    pub max_path_length: usize,

    /// Maximum folder nesting in a scan.
    pub scan_max_depth: usize,

    /// Maximum number of entries in a scan.
    pub scan_max_entries: usize,
}

/// Upload configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadConfig {
    /// Extensions always refused.
    pub deny_extensions: Vec<String>,

    /// Extensions accepted; anything else is refused.
    pub allow_extensions: Vec<String>,

    /// Maximum upload size in bytes (default: 20MB).
    pub max_size: u64,

    /// Upload sessions that received no chunk for this long are dropped
    /// (seconds).
    pub stale_after_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            log_level: "info".to_string(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            disallowed_names: crate::files::sanitizer::DEFAULT_DISALLOWED_NAMES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Default for PagesConfig {
    fn default() -> Self {
        Self {
            extension: "html".to_string(),
            max_size: 2 * 1024 * 1024, // 2MB
            oversize: OversizePolicy::Reject,
            allow_server_scripts: false,
            page_dirs: vec!["my-pages".to_string(), "demo/**".to_string()],
            excluded: vec![
                "new-page-blank-template.html".to_string(),
                "editor.html".to_string(),
            ],
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            default_path: "media".to_string(),
            max_path_length: 256,
            scan_max_depth: crate::files::scanner::DEFAULT_MAX_DEPTH,
            scan_max_entries: crate::files::scanner::DEFAULT_MAX_ENTRIES,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            deny_extensions: vec!["php".to_string()],
            allow_extensions: ["ico", "jpg", "jpeg", "png", "gif", "webp", "svg"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_size: crate::files::upload::DEFAULT_MAX_UPLOAD_SIZE,
            stale_after_secs: 3600,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pagekeep")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - PAGEKEEP_ROOT: Override the site root directory
    /// - PAGEKEEP_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("PAGEKEEP_ROOT") {
            if !root.is_empty() {
                tracing::info!("Overriding root from environment: {}", root);
                self.daemon.root = PathBuf::from(root);
            }
        }

        if let Ok(level) = std::env::var("PAGEKEEP_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits: [(&'static str, u64); 5] = [
            ("pages.max_size", self.pages.max_size),
            ("media.max_path_length", self.media.max_path_length as u64),
            ("media.scan_max_depth", self.media.scan_max_depth as u64),
            ("media.scan_max_entries", self.media.scan_max_entries as u64),
            ("upload.max_size", self.upload.max_size),
        ];
        if let Some((field, _)) = limits.into_iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::ZeroLimit { field });
        }

        if self.pages.extension.trim().trim_start_matches('.').is_empty() {
            return Err(ConfigError::EmptyPageExtension);
        }

        // Deny wins at runtime, but an entry on both lists is a mistake.
        for denied in &self.upload.deny_extensions {
            let denied = denied.trim().trim_start_matches('.');
            if self
                .upload
                .allow_extensions
                .iter()
                .any(|a| a.trim().trim_start_matches('.').eq_ignore_ascii_case(denied))
            {
                return Err(ConfigError::ConflictingExtension(denied.to_lowercase()));
            }
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
