//! Directory tree enumeration for the media browser.
//!
//! The walk is iterative with an explicit stack and stops with
//! [`StorageError::TreeTooLarge`] once the configured depth or entry count is
//! exceeded. Entries whose name starts with `.` are skipped at every level.
//! Symlinks are followed only when they resolve inside the root, and a
//! directory already visited (by its canonical path) is not entered again.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::PathBuf;

use protocol::TreeEntry;
use tracing::{debug, warn};

use super::error::StorageError;
use super::paths::{Root, SanitizedPath};

/// Default maximum folder nesting below the scanned directory.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Default maximum number of entries in one scan.
pub const DEFAULT_MAX_ENTRIES: usize = 50_000;

/// Bounds on a single scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanLimits {
    pub max_depth: usize,
    pub max_entries: usize,
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

/// Builds [`TreeEntry`] trees from directories inside the root.
#[derive(Debug, Clone, Default)]
pub struct TreeScanner {
    limits: ScanLimits,
}

struct Node {
    entry: TreeEntry,
    children: Vec<usize>,
}

struct PendingDir {
    node: usize,
    canonical: PathBuf,
    relative: String,
    depth: usize,
}

impl TreeScanner {
    pub fn new(limits: ScanLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> ScanLimits {
        self.limits
    }

    /// Enumerate `dir` into a tree.
    ///
    /// A directory that does not exist yet yields an empty folder. Siblings
    /// are ordered by name. Paths in the result are relative to `dir`.
    pub fn scan(&self, dir: &SanitizedPath) -> Result<TreeEntry, StorageError> {
        let metadata = match fs::metadata(dir.absolute()) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %dir, "Scan target missing, returning empty tree");
                return Ok(TreeEntry::empty_root());
            }
            Err(e) => return Err(StorageError::io(dir.absolute(), e)),
        };
        if !metadata.is_dir() {
            return Err(StorageError::io(
                dir.absolute(),
                io::Error::new(io::ErrorKind::NotADirectory, "scan target is not a directory"),
            ));
        }

        let root = dir.root_dir();
        let mut arena = vec![Node {
            entry: TreeEntry::empty_root(),
            children: Vec::new(),
        }];
        let mut visited = HashSet::new();
        visited.insert(dir.absolute().to_path_buf());

        let mut stack = vec![PendingDir {
            node: 0,
            canonical: dir.absolute().to_path_buf(),
            relative: String::new(),
            depth: 0,
        }];
        let mut count = 0usize;

        while let Some(pending) = stack.pop() {
            let mut names = self.read_names(&pending)?;
            names.sort();

            // Reverse push keeps the walk depth-first in name order.
            let mut subdirs = Vec::new();
            for name in names {
                let path = pending.canonical.join(&name);
                let relative = if pending.relative.is_empty() {
                    name.clone()
                } else {
                    format!("{}/{}", pending.relative, name)
                };

                let Some((canonical, metadata, is_link)) = resolve_entry(root, path)? else {
                    continue;
                };
                // The real directory is listed at its own location.
                if is_link && metadata.is_dir() && canonical.starts_with(dir.absolute()) {
                    debug!(path = %relative, "Skipping link into the scanned tree");
                    continue;
                }

                count += 1;
                if count > self.limits.max_entries {
                    return Err(StorageError::TreeTooLarge(format!(
                        "more than {} entries",
                        self.limits.max_entries
                    )));
                }

                let index = arena.len();
                if metadata.is_dir() {
                    if !visited.insert(canonical.clone()) {
                        debug!(path = %relative, "Skipping already visited directory");
                        count -= 1;
                        continue;
                    }
                    let depth = pending.depth + 1;
                    if depth > self.limits.max_depth {
                        return Err(StorageError::TreeTooLarge(format!(
                            "nesting deeper than {} levels",
                            self.limits.max_depth
                        )));
                    }
                    arena.push(Node {
                        entry: TreeEntry::folder(name, relative.clone(), Vec::new()),
                        children: Vec::new(),
                    });
                    subdirs.push(PendingDir {
                        node: index,
                        canonical,
                        relative,
                        depth,
                    });
                } else if metadata.is_file() {
                    arena.push(Node {
                        entry: TreeEntry::file(name, relative, metadata.len()),
                        children: Vec::new(),
                    });
                } else {
                    count -= 1;
                    continue;
                }
                arena[pending.node].children.push(index);
            }
            stack.extend(subdirs.into_iter().rev());
        }

        Ok(assemble(arena))
    }

    fn read_names(&self, pending: &PendingDir) -> Result<Vec<String>, StorageError> {
        let entries = fs::read_dir(&pending.canonical)
            .map_err(|e| StorageError::io(&pending.canonical, e))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(path = %pending.canonical.display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            names.push(name);
        }
        Ok(names)
    }
}

/// Stat an entry, following symlinks that stay inside the root.
///
/// `None` means the entry is left out of the tree. The flag is set when the
/// entry was reached through a symlink.
fn resolve_entry(
    root: &Root,
    path: PathBuf,
) -> Result<Option<(PathBuf, fs::Metadata, bool)>, StorageError> {
    let link = match fs::symlink_metadata(&path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::io(&path, e)),
    };

    if !link.file_type().is_symlink() {
        return Ok(Some((path, link, false)));
    }

    let target = match fs::canonicalize(&path) {
        Ok(t) => t,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Skipping dangling symlink");
            return Ok(None);
        }
    };
    if !root.contains(&target) {
        debug!(path = %path.display(), target = %target.display(), "Skipping symlink outside root");
        return Ok(None);
    }
    match fs::metadata(&target) {
        Ok(m) => Ok(Some((target, m, true))),
        Err(e) => Err(StorageError::io(&target, e)),
    }
}

/// Fold the arena into a nested tree. Children always sit at higher indices
/// than their parent, so a reverse pass sees every child before its parent.
fn assemble(arena: Vec<Node>) -> TreeEntry {
    let mut slots: Vec<Option<TreeEntry>> = Vec::with_capacity(arena.len());
    let mut links = Vec::with_capacity(arena.len());
    for node in arena {
        slots.push(Some(node.entry));
        links.push(node.children);
    }

    for index in (0..slots.len()).rev() {
        let children: Vec<TreeEntry> = links[index]
            .iter()
            .filter_map(|&child| slots[child].take())
            .collect();
        if let Some(entry) = slots[index].as_mut() {
            if entry.is_folder() {
                entry.children = Some(children);
            }
        }
    }

    slots
        .first_mut()
        .and_then(Option::take)
        .unwrap_or_else(TreeEntry::empty_root)
}
