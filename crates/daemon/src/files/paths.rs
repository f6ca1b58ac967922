//! Root directory and sanitized path types.
//!
//! A [`Root`] is canonicalized once at startup. A [`SanitizedPath`] can only
//! be built by the sanitizer (or from the root itself), so holding one means
//! its canonical form lies inside the root.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use super::error::PathError;

/// The canonical directory every operation is confined to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Root {
    path: Arc<PathBuf>,
}

impl Root {
    /// Canonicalize `path` and use it as the root.
    ///
    /// The directory must already exist.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, PathError> {
        let path = path.as_ref();
        let canonical = fs::canonicalize(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PathError::InvalidRoot(path.to_path_buf())
            } else {
                PathError::Io {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })?;

        if !canonical.is_dir() {
            return Err(PathError::InvalidRoot(path.to_path_buf()));
        }

        Ok(Self {
            path: Arc::new(canonical),
        })
    }

    /// The canonical root directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a canonical path is the root or lies below it.
    ///
    /// Comparison is per component, so `/srv/site2` is not inside `/srv/site`.
    pub fn contains(&self, canonical: &Path) -> bool {
        canonical.starts_with(self.path.as_path())
    }

    /// Root-relative, `/`-separated form of a canonical path inside the root.
    pub fn relative(&self, canonical: &Path) -> Option<String> {
        let rest = canonical.strip_prefix(self.path.as_path()).ok()?;
        Some(to_slash(rest))
    }
}

/// A path validated against a [`Root`].
///
/// Carries both the canonical absolute path used for filesystem calls and the
/// root-relative `/`-separated form used in client responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedPath {
    root: Root,
    absolute: PathBuf,
    relative: String,
}

impl SanitizedPath {
    /// Build from a canonical path. Callers must have checked containment.
    pub(crate) fn from_canonical(root: &Root, absolute: PathBuf) -> Result<Self, PathError> {
        let relative = root
            .relative(&absolute)
            .ok_or_else(|| PathError::PathEscapesRoot(absolute.display().to_string()))?;
        Ok(Self {
            root: root.clone(),
            absolute,
            relative,
        })
    }

    /// The root directory itself.
    pub fn root(root: &Root) -> Self {
        Self {
            root: root.clone(),
            absolute: root.path().to_path_buf(),
            relative: String::new(),
        }
    }

    /// Canonical absolute path.
    pub fn absolute(&self) -> &Path {
        &self.absolute
    }

    /// Root-relative path with `/` separators; empty for the root.
    pub fn relative(&self) -> &str {
        &self.relative
    }

    /// The root this path was validated against.
    pub fn root_dir(&self) -> &Root {
        &self.root
    }

    /// Whether this path is the root directory.
    pub fn is_root(&self) -> bool {
        self.relative.is_empty()
    }

    /// Final path component, `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.relative.rsplit('/').next()
    }

    /// The containing directory, `None` for the root.
    pub fn parent(&self) -> Option<SanitizedPath> {
        if self.is_root() {
            return None;
        }
        let absolute = self.absolute.parent()?.to_path_buf();
        let relative = match self.relative.rfind('/') {
            Some(idx) => self.relative[..idx].to_string(),
            None => String::new(),
        };
        Some(Self {
            root: self.root.clone(),
            absolute,
            relative,
        })
    }

    /// Append a single file name.
    ///
    /// The name must be one plain component: no separators, not `.` or `..`.
    pub fn join_file(&self, name: &str) -> Result<SanitizedPath, PathError> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) if !name.contains(['/', '\\']) => {}
            _ => return Err(PathError::InvalidFilename(name.to_string())),
        }

        let relative = if self.relative.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.relative, name)
        };
        Ok(Self {
            root: self.root.clone(),
            absolute: self.absolute.join(name),
            relative,
        })
    }

    /// Replace the suffix after the last `.` of the file name with `extension`,
    /// or append it when the name has no `.`.
    pub fn with_extension(&self, extension: &str) -> Result<SanitizedPath, PathError> {
        let name = self
            .file_name()
            .ok_or_else(|| PathError::InvalidFilename(self.relative.clone()))?;
        let renamed = replace_extension(name, extension);
        match self.parent() {
            Some(parent) => parent.join_file(&renamed),
            None => Err(PathError::InvalidFilename(self.relative.clone())),
        }
    }
}

impl std::fmt::Display for SanitizedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.relative)
    }
}

/// Replace the suffix after the last `.` in `name`, or append one.
pub(crate) fn replace_extension(name: &str, extension: &str) -> String {
    let extension = extension.trim_start_matches('.');
    let stem = match name.rfind('.') {
        Some(idx) => &name[..idx],
        None => name,
    };
    format!("{}.{}", stem, extension)
}

/// Join path components with `/`, whatever the host separator.
pub(crate) fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
