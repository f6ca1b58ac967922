//! Extension and content policies.
//!
//! [`ExtensionPolicy`] decides which file types may be uploaded: the deny
//! list is consulted first, then the allow list, and an extension on
//! neither list is refused. [`ContentPolicy`] implementations inspect bytes
//! before they are written.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::bytes::Regex;

use super::error::PolicyError;

/// Outcome of an extension check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Denied,
}

/// Verdict plus the lower-cased extension it was reached for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionDecision {
    pub verdict: Verdict,
    pub extension: String,
}

impl ExtensionDecision {
    pub fn is_allowed(&self) -> bool {
        self.verdict == Verdict::Allowed
    }
}

/// Deny-then-allow extension policy. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct ExtensionPolicy {
    deny: HashSet<String>,
    allow: HashSet<String>,
}

impl ExtensionPolicy {
    /// Build a policy from deny and allow lists.
    ///
    /// Entries are lower-cased and stripped of leading dots, so `".PNG"`
    /// and `"png"` are the same entry.
    pub fn new<D, A, S>(deny: D, allow: A) -> Self
    where
        D: IntoIterator<Item = S>,
        A: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            deny: deny.into_iter().map(|s| normalize(s.as_ref())).collect(),
            allow: allow.into_iter().map(|s| normalize(s.as_ref())).collect(),
        }
    }

    /// Check a filename's extension.
    pub fn check(&self, filename: &str) -> Result<ExtensionDecision, PolicyError> {
        let extension = extension_of(filename)
            .ok_or_else(|| PolicyError::MissingExtension(filename.to_string()))?;

        if self.deny.contains(&extension) {
            return Err(PolicyError::DeniedExtension(extension));
        }
        if !self.allow.contains(&extension) {
            return Err(PolicyError::NotAllowlisted(extension));
        }

        Ok(ExtensionDecision {
            verdict: Verdict::Allowed,
            extension,
        })
    }

    /// Like [`check`](Self::check) but folds rejections into a `Denied` verdict.
    pub fn decide(&self, filename: &str) -> ExtensionDecision {
        match self.check(filename) {
            Ok(decision) => decision,
            Err(_) => ExtensionDecision {
                verdict: Verdict::Denied,
                extension: extension_of(filename).unwrap_or_default(),
            },
        }
    }

    /// Whether an extension appears on both lists.
    pub fn overlapping(&self) -> Vec<String> {
        let mut both: Vec<String> = self.deny.intersection(&self.allow).cloned().collect();
        both.sort();
        both
    }
}

/// Lower-cased text after the last `.` of the basename.
///
/// `None` when there is no `.`, nothing follows it, or the name is a bare
/// dotfile such as `.htaccess`.
pub fn extension_of(filename: &str) -> Option<String> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let (stem, extension) = name.rsplit_once('.')?;
    if stem.is_empty() || extension.is_empty() {
        return None;
    }
    Some(extension.to_ascii_lowercase())
}

fn normalize(extension: &str) -> String {
    extension.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Inspects content before it is written.
pub trait ContentPolicy: Send + Sync + std::fmt::Debug {
    /// Return `Err(reason)` to refuse the write.
    fn check(&self, content: &[u8]) -> Result<(), String>;
}

/// Accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllContent;

impl ContentPolicy for AllowAllContent {
    fn check(&self, _content: &[u8]) -> Result<(), String> {
        Ok(())
    }
}

static SERVER_SCRIPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<\?php|<\? |<\?=|<\s*script\s*language\s*=\s*"\s*php\s*"\s*>"#)
        .expect("server script pattern is valid")
});

/// Refuses content carrying embedded PHP markers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerScriptPolicy;

impl ContentPolicy for ServerScriptPolicy {
    fn check(&self, content: &[u8]) -> Result<(), String> {
        match SERVER_SCRIPT.find(content) {
            Some(m) => Err(format!("server-side script marker at byte {}", m.start())),
            None => Ok(()),
        }
    }
}
