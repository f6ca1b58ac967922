//! Sanitization of untrusted path strings.
//!
//! Raw strings from the editor go through a character pre-filter and are
//! then resolved on disk. The pre-filter only normalizes; the containment
//! check on the canonical path is what keeps every result inside the root.
//! Symlinks are resolved before that check, so a link pointing outside the
//! root is rejected like a `..` escape.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::PathError;
use super::paths::{replace_extension, Root, SanitizedPath};

/// Basenames rejected wherever they appear.
pub const DEFAULT_DISALLOWED_NAMES: &[&str] = &[".htaccess", "passwd"];

/// Options for [`PathSanitizer::sanitize`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizeOptions {
    /// Replace the file extension with this one.
    pub force_extension: Option<String>,
}

impl SanitizeOptions {
    /// Force the given extension on the sanitized file name.
    pub fn force_extension(extension: impl Into<String>) -> Self {
        Self {
            force_extension: Some(extension.into()),
        }
    }
}

/// Validates raw path strings against a [`Root`].
#[derive(Debug, Clone)]
pub struct PathSanitizer {
    root: Root,
    disallowed_names: Vec<String>,
}

impl PathSanitizer {
    /// Create a sanitizer with the default sensitive-name denylist.
    pub fn new(root: Root) -> Self {
        Self {
            root,
            disallowed_names: DEFAULT_DISALLOWED_NAMES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Replace the sensitive-name denylist.
    pub fn with_disallowed_names(mut self, names: Vec<String>) -> Self {
        self.disallowed_names = names;
        self
    }

    /// The root all results are confined to.
    pub fn root(&self) -> &Root {
        &self.root
    }

    /// Turn a raw path string into a [`SanitizedPath`] inside the root.
    ///
    /// The target does not have to exist yet. Fails with
    /// [`PathError::PathEscapesRoot`] for `..` segments, absolute paths
    /// outside the root and symlinks resolving outside the root.
    pub fn sanitize(&self, raw: &str, opts: &SanitizeOptions) -> Result<SanitizedPath, PathError> {
        if raw.trim().is_empty() {
            return Err(PathError::EmptyPath);
        }

        let raw = strip_query(raw);
        if has_traversal_segment(raw) {
            debug!(raw = %raw, "Rejecting path with parent segment");
            return Err(PathError::PathEscapesRoot(raw.to_string()));
        }
        self.check_name(basename(raw))?;

        let mut filtered = prefilter(raw);
        if filtered.trim_matches('/').is_empty() && !filtered.starts_with('/') {
            return Err(PathError::EmptyPath);
        }

        if let Some(extension) = &opts.force_extension {
            filtered = force_extension(&filtered, extension)?;
        }
        // Dropped characters can assemble a denied name.
        self.check_name(basename(&filtered))?;

        // An absolute string replaces the root here; the containment check
        // below rejects it unless it points back inside.
        let candidate = self.root.path().join(&filtered);
        let resolved = resolve(&candidate, raw)?;

        if !self.root.contains(&resolved) {
            debug!(raw = %raw, resolved = %resolved.display(), "Path escapes root");
            return Err(PathError::PathEscapesRoot(raw.to_string()));
        }

        SanitizedPath::from_canonical(&self.root, resolved)
    }

    /// Sanitize the basename of an uploaded filename.
    ///
    /// Directory parts are dropped and the remaining characters are limited
    /// to the allow-set; no path resolution happens here.
    pub fn sanitize_filename(&self, raw: &str) -> Result<String, PathError> {
        let raw = strip_query(raw);
        let name = basename(raw);
        self.check_name(name)?;

        let cleaned: String = remove_dot_runs(name)
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            .collect();

        if cleaned.chars().all(|c| c == '.') {
            return Err(PathError::InvalidFilename(raw.to_string()));
        }
        self.check_name(&cleaned)?;
        Ok(cleaned)
    }

    fn check_name(&self, name: &str) -> Result<(), PathError> {
        if self
            .disallowed_names
            .iter()
            .any(|d| d.eq_ignore_ascii_case(name))
        {
            return Err(PathError::DisallowedName(name.to_string()));
        }
        Ok(())
    }
}

/// Drop a trailing `?query` suffix.
fn strip_query(raw: &str) -> &str {
    match raw.find('?') {
        Some(idx) => &raw[..idx],
        None => raw,
    }
}

/// Last component, splitting on both separator styles.
fn basename(raw: &str) -> &str {
    raw.rsplit(['/', '\\']).next().unwrap_or(raw)
}

/// Whether any segment consists only of two or more dots.
fn has_traversal_segment(raw: &str) -> bool {
    raw.split(['/', '\\'])
        .any(|segment| segment.len() >= 2 && segment.chars().all(|c| c == '.'))
}

/// Remove every run of two or more dots.
fn remove_dot_runs(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut dots = 0usize;
    for c in raw.chars() {
        if c == '.' {
            dots += 1;
            continue;
        }
        if dots == 1 {
            out.push('.');
        }
        dots = 0;
        out.push(c);
    }
    if dots == 1 {
        out.push('.');
    }
    out
}

/// Character pre-filter applied before resolution.
///
/// Backslashes become `/`, separator runs collapse, dot runs disappear and
/// anything outside `[A-Za-z0-9._/-]` is dropped.
pub fn prefilter(raw: &str) -> String {
    let unified: String = strip_query(raw)
        .chars()
        .map(|c| if c == '\\' { '/' } else { c })
        .collect();

    let mut out = String::with_capacity(unified.len());
    for c in remove_dot_runs(&unified).chars() {
        let keep = c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/');
        if !keep || (c == '/' && out.ends_with('/')) {
            continue;
        }
        out.push(c);
    }
    out
}

/// Apply a forced extension to the last segment of a filtered path.
fn force_extension(filtered: &str, extension: &str) -> Result<String, PathError> {
    let (dir, name) = match filtered.rfind('/') {
        Some(idx) => filtered.split_at(idx + 1),
        None => ("", filtered),
    };
    if name.is_empty() || name == "." {
        return Err(PathError::InvalidFilename(filtered.to_string()));
    }
    Ok(format!("{}{}", dir, replace_extension(name, extension)))
}

/// Canonicalize a path whose tail may not exist yet.
///
/// The deepest existing ancestor is canonicalized (resolving symlinks) and
/// the missing components are appended. A component that exists as a link
/// but cannot be resolved is treated as an escape.
fn resolve(candidate: &Path, raw: &str) -> Result<PathBuf, PathError> {
    let mut existing = candidate.to_path_buf();
    let mut missing: Vec<OsString> = Vec::new();

    loop {
        match fs::canonicalize(&existing) {
            Ok(mut resolved) => {
                for part in missing.iter().rev() {
                    resolved.push(part);
                }
                return Ok(resolved);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if fs::symlink_metadata(&existing).is_ok() {
                    debug!(path = %existing.display(), "Dangling symlink in path");
                    return Err(PathError::PathEscapesRoot(raw.to_string()));
                }
                let (Some(name), Some(parent)) = (existing.file_name(), existing.parent()) else {
                    return Err(PathError::Io {
                        path: candidate.to_path_buf(),
                        source: e,
                    });
                };
                missing.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            Err(e) => {
                return Err(PathError::Io {
                    path: existing,
                    source: e,
                })
            }
        }
    }
}
