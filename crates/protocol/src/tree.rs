//! Media tree entries returned by a directory scan.
//!
//! The serialized shape (`name`, `type`, `path`, `size`, `items`) is what
//! existing editor clients read, so field names are pinned with serde
//! renames rather than following the Rust names.

use serde::{Deserialize, Serialize};

/// Kind of a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory.
    Folder,
}

/// A single node of a scanned tree.
///
/// Files carry `size`, folders carry `children`; the other field is
/// omitted from the serialized form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    /// Entry name (not full path). Empty for the scan root.
    pub name: String,
    /// File or folder.
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Path relative to the scan root, always `/`-separated.
    #[serde(rename = "path")]
    pub relative_path: String,
    /// Size in bytes, files only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Child entries, folders only.
    #[serde(rename = "items", default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<TreeEntry>>,
}

impl TreeEntry {
    /// Create a file entry.
    pub fn file(name: impl Into<String>, relative_path: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
            relative_path: relative_path.into(),
            size: Some(size),
            children: None,
        }
    }

    /// Create a folder entry with the given children.
    pub fn folder(
        name: impl Into<String>,
        relative_path: impl Into<String>,
        children: Vec<TreeEntry>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Folder,
            relative_path: relative_path.into(),
            size: None,
            children: Some(children),
        }
    }

    /// The root node of an empty scan.
    pub fn empty_root() -> Self {
        Self::folder("", "", Vec::new())
    }

    /// Whether this entry is a folder.
    pub fn is_folder(&self) -> bool {
        self.kind == EntryKind::Folder
    }

    /// Children of a folder; empty for files.
    pub fn children(&self) -> &[TreeEntry] {
        self.children.as_deref().unwrap_or(&[])
    }

    /// Find a descendant by its relative path.
    pub fn find(&self, relative_path: &str) -> Option<&TreeEntry> {
        if self.relative_path == relative_path {
            return Some(self);
        }
        self.children().iter().find_map(|c| c.find(relative_path))
    }

    /// Total number of nodes below this one.
    pub fn descendant_count(&self) -> usize {
        self.children()
            .iter()
            .map(|c| 1 + c.descendant_count())
            .sum()
    }

    /// Iterate over every file below this node, depth first.
    pub fn files(&self) -> Vec<&TreeEntry> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(entry) = stack.pop() {
            match entry.kind {
                EntryKind::File => out.push(entry),
                EntryKind::Folder => stack.extend(entry.children().iter().rev()),
            }
        }
        out
    }
}
