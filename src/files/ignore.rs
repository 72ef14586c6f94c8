//! Exclusion rules for the project tree: a fixed built-in set, the
//! project's `.gitignore` / `.bmignore`, and an unconditional rule for
//! hidden path segments.

use std::path::Path;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::warn;

use crate::error::{CoreError, Result};

/// Artefacts that are never knowledge, whatever the project says.
const BUILTIN_PATTERNS: &[&str] = &[
    ".git/",
    ".hg/",
    ".svn/",
    ".DS_Store",
    "Thumbs.db",
    "desktop.ini",
    "*.tmp",
    "*.swp",
    "*~",
    "__pycache__/",
    "node_modules/",
    ".obsidian/",
    // the engine's own sidecar state, should it ever live in-tree
    ".memograph/",
];

pub struct IgnoreFilter {
    matcher: Gitignore,
}

impl IgnoreFilter {
    /// Compile the filter for a project root. `.gitignore` and
    /// `.bmignore` are read from the root only; nested ignore files are
    /// not honoured.
    pub fn build(root: &Path) -> Result<Self> {
        let mut builder = GitignoreBuilder::new(root);

        for pattern in BUILTIN_PATTERNS {
            builder
                .add_line(None, pattern)
                .map_err(|e| CoreError::fatal(format!("bad builtin ignore pattern: {e}")))?;
        }

        for name in [".gitignore", ".bmignore"] {
            let path = root.join(name);
            if path.is_file() {
                if let Some(err) = builder.add(&path) {
                    warn!(?path, %err, "skipping unreadable ignore file");
                }
            }
        }

        let matcher = builder
            .build()
            .map_err(|e| CoreError::fatal(format!("cannot compile ignore patterns: {e}")))?;

        Ok(IgnoreFilter { matcher })
    }

    /// `rel_path` is POSIX-style, relative to the project root.
    pub fn is_ignored(&self, rel_path: &str, is_dir: bool) -> bool {
        if has_hidden_segment(rel_path) {
            return true;
        }
        self.matcher
            .matched_path_or_any_parents(rel_path, is_dir)
            .is_ignore()
    }
}

fn has_hidden_segment(rel_path: &str) -> bool {
    rel_path
        .split('/')
        .any(|segment| segment.starts_with('.') && segment.len() > 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter_for(dir: &Path) -> IgnoreFilter {
        IgnoreFilter::build(dir).unwrap()
    }

    #[test]
    fn builtin_patterns_apply_without_ignore_files() {
        let dir = tempfile::tempdir().unwrap();
        let filter = filter_for(dir.path());

        assert!(filter.is_ignored(".git/config", false));
        assert!(filter.is_ignored("notes/draft.tmp", false));
        assert!(filter.is_ignored("__pycache__/mod.pyc", false));
        assert!(!filter.is_ignored("notes/hello.md", false));
    }

    #[test]
    fn hidden_segments_are_always_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let filter = filter_for(dir.path());

        assert!(filter.is_ignored(".bmignore", false));
        assert!(filter.is_ignored("a/.hidden/note.md", false));
        assert!(filter.is_ignored("a/.secret.md", false));
        assert!(!filter.is_ignored("a/visible.md", false));
    }

    #[test]
    fn bmignore_patterns_are_honoured() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".bmignore"), "drafts/\n*.bak\n").unwrap();
        let filter = filter_for(dir.path());

        assert!(filter.is_ignored("drafts/wip.md", false));
        assert!(filter.is_ignored("notes/old.bak", false));
        assert!(!filter.is_ignored("notes/new.md", false));
    }

    #[test]
    fn gitignore_anchoring_semantics() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "/build\ndocs/**/generated\n").unwrap();
        let filter = filter_for(dir.path());

        assert!(filter.is_ignored("build/out.md", false));
        assert!(filter.is_ignored("docs/a/b/generated", false));
        assert!(!filter.is_ignored("src/build/keep.md", false));
    }
}
