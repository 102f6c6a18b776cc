//! Gitignore-style path filtering for manifest generation.
//!
//! A workspace tree has no required Git checkout backing it, so manifest
//! generation needs its own ignore-file matcher rather than deferring to
//! Git's own notion of tracked files. Built on the `ignore` crate.

use std::path::Path;

use ignore::gitignore::{Gitignore, GitignoreBuilder};

/// Evaluates `.gitignore`/`.fstignore` rules rooted at a workspace root.
///
/// `.fst` and `.git` are always excluded regardless of ignore file contents;
/// callers additionally skip them directly for clarity, but this matcher
/// would reject them either way.
#[derive(Debug)]
pub struct IgnoreMatcher {
    gitignore: Gitignore,
}

impl IgnoreMatcher {
    /// Build a matcher for `root`, reading `.gitignore` and `.fstignore` if
    /// present. Missing ignore files are not an error; everything is simply
    /// tracked.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        let mut builder = GitignoreBuilder::new(root);
        let _ = builder.add(root.join(".gitignore"));
        let _ = builder.add(root.join(".fstignore"));
        let gitignore = builder.build().unwrap_or_else(|_| Gitignore::empty());
        Self { gitignore }
    }

    /// An empty matcher that excludes nothing but `.fst`/`.git`.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            gitignore: Gitignore::empty(),
        }
    }

    /// Returns `true` if `path` (absolute, under `root`) should be skipped.
    #[must_use]
    pub fn is_ignored(&self, root: &Path, path: &Path, is_dir: bool) -> bool {
        let rel = path.strip_prefix(root).unwrap_or(path);
        if rel.components().any(|c| {
            let s = c.as_os_str();
            s == ".fst" || s == ".git"
        }) {
            return true;
        }
        self.gitignore.matched(rel, is_dir).is_ignore()
    }
}
