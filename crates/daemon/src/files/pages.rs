//! Discovery of editable pages.

use protocol::messages::PageInfo;
use protocol::EntryKind;
use tracing::debug;

use super::error::FileError;
use super::policy::extension_of;
use super::sanitizer::{PathSanitizer, SanitizeOptions};
use super::scanner::TreeScanner;

/// Suffix marking a page directory whose subdirectories are listed too.
pub const RECURSIVE_SUFFIX: &str = "/**";

/// Lists pages under the configured page directories.
///
/// A plain entry (`my-pages`) lists only the files directly inside it; an
/// entry ending in `/**` (`demo/**`) lists the whole subtree.
#[derive(Debug, Clone)]
pub struct PageCatalog {
    sanitizer: PathSanitizer,
    scanner: TreeScanner,
    page_dirs: Vec<String>,
    excluded: Vec<String>,
    extension: String,
}

impl PageCatalog {
    pub fn new(sanitizer: PathSanitizer, scanner: TreeScanner, extension: impl Into<String>) -> Self {
        Self {
            sanitizer,
            scanner,
            page_dirs: Vec::new(),
            excluded: Vec::new(),
            extension: extension.into(),
        }
    }

    pub fn with_page_dirs(mut self, dirs: Vec<String>) -> Self {
        self.page_dirs = dirs;
        self
    }

    /// File names never listed, wherever they appear.
    pub fn with_excluded(mut self, names: Vec<String>) -> Self {
        self.excluded = names;
        self
    }

    /// Every page file, grouped by page directory in configured order and
    /// by path within each directory.
    pub fn list(&self) -> Result<Vec<PageInfo>, FileError> {
        let mut pages = Vec::new();

        for entry in &self.page_dirs {
            let (raw, recursive) = match entry.strip_suffix(RECURSIVE_SUFFIX) {
                Some(raw) => (raw, true),
                None => (entry.as_str(), false),
            };
            let dir = self.sanitizer.sanitize(raw, &SanitizeOptions::default())?;
            let tree = self.scanner.scan(&dir)?;

            let files = if recursive {
                tree.files()
            } else {
                tree.children()
                    .iter()
                    .filter(|c| c.kind == EntryKind::File)
                    .collect()
            };
            for entry in files {
                if self.excluded.iter().any(|x| *x == entry.name) {
                    continue;
                }
                let is_page = extension_of(&entry.name)
                    .map(|ext| ext.eq_ignore_ascii_case(&self.extension))
                    .unwrap_or(false);
                if !is_page {
                    continue;
                }
                pages.push(page_info(&format!("{}/{}", dir.relative(), entry.relative_path)));
            }
        }

        debug!(count = pages.len(), "Listed pages");
        Ok(pages)
    }
}

/// Build page metadata from a root-relative file path.
///
/// `index.html` inside a subfolder (`demo/landing/index.html`) is named
/// after that subfolder.
pub fn page_info(file: &str) -> PageInfo {
    let file = file.trim_start_matches('/');
    let (dir, base) = match file.rfind('/') {
        Some(idx) => (&file[..idx], &file[idx + 1..]),
        None => ("", file),
    };
    let stem = match base.rfind('.') {
        Some(idx) if idx > 0 => &base[..idx],
        _ => base,
    };

    let mut segments = dir.split('/');
    let folder = segments.next().unwrap_or("").to_string();
    let subfolder = segments.next().unwrap_or("");

    let name = if stem == "index" && !subfolder.is_empty() {
        subfolder.to_string()
    } else {
        stem.to_string()
    };

    PageInfo {
        title: capitalize(&name),
        name,
        file: file.to_string(),
        url: file.to_string(),
        folder,
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::Root;
    use std::fs;
    use tempfile::TempDir;

    fn catalog(temp_dir: &TempDir) -> PageCatalog {
        let root = Root::new(temp_dir.path()).unwrap();
        PageCatalog::new(PathSanitizer::new(root), TreeScanner::default(), "html")
            .with_page_dirs(vec!["my-pages".to_string(), "demo/**".to_string()])
            .with_excluded(vec![
                "new-page-blank-template.html".to_string(),
                "editor.html".to_string(),
            ])
    }

    fn touch(temp_dir: &TempDir, rel: &str) {
        let path = temp_dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "<html></html>").unwrap();
    }

    #[test]
    fn test_page_info() {
        let info = page_info("my-pages/about.html");
        assert_eq!(info.name, "about");
        assert_eq!(info.title, "About");
        assert_eq!(info.folder, "my-pages");
        assert_eq!(info.file, "my-pages/about.html");
        assert_eq!(info.url, "my-pages/about.html");
    }

    #[test]
    fn test_page_info_index_in_subfolder() {
        let info = page_info("demo/landing/index.html");
        assert_eq!(info.name, "landing");
        assert_eq!(info.title, "Landing");
        assert_eq!(info.folder, "demo");

        let top = page_info("demo/index.html");
        assert_eq!(top.name, "index");
    }

    #[test]
    fn test_list_pages() {
        let temp_dir = TempDir::new().unwrap();
        touch(&temp_dir, "my-pages/about.html");
        touch(&temp_dir, "my-pages/new-page-blank-template.html");
        touch(&temp_dir, "my-pages/notes.txt");
        touch(&temp_dir, "my-pages/.draft.html");
        touch(&temp_dir, "my-pages/old/archived.html");
        touch(&temp_dir, "demo/landing/index.html");
        touch(&temp_dir, "demo/editor.html");
        touch(&temp_dir, "other/skipped.html");

        let pages = catalog(&temp_dir).list().unwrap();
        let files: Vec<&str> = pages.iter().map(|p| p.file.as_str()).collect();
        assert_eq!(files, vec!["my-pages/about.html", "demo/landing/index.html"]);
        assert_eq!(pages[1].name, "landing");
    }

    #[test]
    fn test_list_pages_recursion_per_dir() {
        let temp_dir = TempDir::new().unwrap();
        touch(&temp_dir, "site/top.html");
        touch(&temp_dir, "site/nested/deep.html");

        let root = Root::new(temp_dir.path()).unwrap();
        let flat = PageCatalog::new(PathSanitizer::new(root.clone()), TreeScanner::default(), "html")
            .with_page_dirs(vec!["site".to_string()]);
        let files: Vec<String> = flat.list().unwrap().into_iter().map(|p| p.file).collect();
        assert_eq!(files, vec!["site/top.html"]);

        let deep = flat.with_page_dirs(vec!["site/**".to_string()]);
        let files: Vec<String> = deep.list().unwrap().into_iter().map(|p| p.file).collect();
        assert_eq!(files, vec!["site/nested/deep.html", "site/top.html"]);
    }

    #[test]
    fn test_list_pages_missing_dirs() {
        let temp_dir = TempDir::new().unwrap();
        assert!(catalog(&temp_dir).list().unwrap().is_empty());
    }
}
