//! Enumerates the text files that make up the corpus.
//!
//! Excluded directories are pruned before they are entered, so large ignored
//! trees (dependency caches, `.git`) are never read. Files that cannot be
//! read, are not UTF-8, or have a path that cannot be stored are skipped and
//! only show up in the [`SkipTally`].

use super::exclusion::ExclusionMatcher;
use crate::error::{Result, RetrieverError};
use ignore::WalkBuilder;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// One indexed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusEntry {
    /// Path relative to the corpus root, `/`-separated
    pub relative_path: String,
    /// Full decoded file content
    pub content: String,
}

/// Why a file was left out of the corpus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SkipReason {
    /// Matched an exclusion rule
    Excluded,
    /// Content is not valid UTF-8
    NotUtf8,
    /// Could not be opened or read
    Unreadable,
    /// Path is not UTF-8 or contains a line break
    UnsupportedPath,
    /// Larger than the configured size cap
    TooLarge,
}

/// Number of skipped files per reason
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SkipTally {
    pub excluded: usize,
    pub not_utf8: usize,
    pub unreadable: usize,
    pub unsupported_path: usize,
    pub too_large: usize,
}

impl SkipTally {
    pub fn record(&mut self, reason: SkipReason) {
        let slot = match reason {
            SkipReason::Excluded => &mut self.excluded,
            SkipReason::NotUtf8 => &mut self.not_utf8,
            SkipReason::Unreadable => &mut self.unreadable,
            SkipReason::UnsupportedPath => &mut self.unsupported_path,
            SkipReason::TooLarge => &mut self.too_large,
        };
        *slot += 1;
    }

    pub fn get(&self, reason: SkipReason) -> usize {
        match reason {
            SkipReason::Excluded => self.excluded,
            SkipReason::NotUtf8 => self.not_utf8,
            SkipReason::Unreadable => self.unreadable,
            SkipReason::UnsupportedPath => self.unsupported_path,
            SkipReason::TooLarge => self.too_large,
        }
    }

    pub fn total(&self) -> usize {
        self.excluded + self.not_utf8 + self.unreadable + self.unsupported_path + self.too_large
    }
}

/// Everything one traversal produced
#[derive(Debug, Clone, Default)]
pub struct WalkOutcome {
    /// Eligible files in traversal order
    pub entries: Vec<CorpusEntry>,
    /// Files left out, per reason
    pub skipped: SkipTally,
    /// Excluded directories that were not descended into
    pub pruned_dirs: Vec<String>,
}

impl WalkOutcome {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.relative_path.as_str())
    }

    /// Split into `(contents, paths)`, two parallel arrays from the same pass.
    pub fn into_parts(self) -> (Vec<String>, Vec<String>) {
        self.entries
            .into_iter()
            .map(|e| (e.content, e.relative_path))
            .unzip()
    }
}

/// Recursive, deterministic corpus traversal.
#[derive(Debug, Clone)]
pub struct CorpusWalker {
    root: PathBuf,
    matcher: Arc<ExclusionMatcher>,
    max_file_size: Option<u64>,
}

impl CorpusWalker {
    pub fn new(root: impl Into<PathBuf>, matcher: ExclusionMatcher) -> Self {
        Self {
            root: root.into(),
            matcher: Arc::new(matcher),
            max_file_size: None,
        }
    }

    /// Skip files larger than `max_bytes` (no limit when `None`)
    pub fn with_max_file_size(mut self, max_bytes: Option<u64>) -> Self {
        self.max_file_size = max_bytes;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn matcher(&self) -> &ExclusionMatcher {
        &self.matcher
    }

    /// Walk the corpus root.
    ///
    /// Children are visited in file-name order, so two walks over an
    /// unchanged tree return the same entries in the same order. Hidden files
    /// are included; symlinked directories are not followed.
    pub fn walk(&self) -> Result<WalkOutcome> {
        if !self.root.is_dir() {
            return Err(RetrieverError::CodebaseNotFound {
                path: self.root.clone(),
            });
        }

        let pruned = Arc::new(Mutex::new(Vec::new()));
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .standard_filters(false)
            .follow_links(false)
            .sort_by_file_name(|a, b| a.cmp(b));
        {
            let matcher = Arc::clone(&self.matcher);
            let root = self.root.clone();
            let pruned = Arc::clone(&pruned);
            builder.filter_entry(move |entry| {
                if entry.depth() == 0 || !entry.file_type().is_some_and(|t| t.is_dir()) {
                    return true;
                }
                let Ok(relative) = entry.path().strip_prefix(&root) else {
                    return true;
                };
                if !matcher.matches(relative, true) {
                    return true;
                }
                debug!("Pruning excluded directory {}", relative.display());
                if let Ok(mut dirs) = pruned.lock() {
                    dirs.push(to_slash_path(relative).unwrap_or_else(|| {
                        relative.to_string_lossy().into_owned()
                    }));
                }
                false
            });
        }

        let mut outcome = WalkOutcome::default();
        for result in builder.build() {
            let entry = match result {
                Ok(entry) => entry,
                Err(err) => {
                    debug!("Skipping unreadable entry: {}", err);
                    outcome.skipped.record(SkipReason::Unreadable);
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }

            let is_file = match entry.file_type() {
                Some(t) if t.is_file() => true,
                Some(t) if t.is_symlink() => entry.path().is_file(),
                _ => false,
            };
            if !is_file {
                continue;
            }

            match self.read_entry(entry.path()) {
                Ok(corpus_entry) => outcome.entries.push(corpus_entry),
                Err(reason) => {
                    debug!("Skipped {} ({:?})", entry.path().display(), reason);
                    outcome.skipped.record(reason);
                }
            }
        }

        outcome.pruned_dirs = pruned
            .lock()
            .map(|mut dirs| std::mem::take(&mut *dirs))
            .unwrap_or_default();
        Ok(outcome)
    }

    fn read_entry(&self, path: &Path) -> std::result::Result<CorpusEntry, SkipReason> {
        let relative = path
            .strip_prefix(&self.root)
            .map_err(|_| SkipReason::UnsupportedPath)?;
        if self.matcher.matches(relative, false) {
            return Err(SkipReason::Excluded);
        }
        let relative_path = to_slash_path(relative).ok_or(SkipReason::UnsupportedPath)?;

        if let Some(max) = self.max_file_size {
            let metadata = std::fs::metadata(path).map_err(|_| SkipReason::Unreadable)?;
            if metadata.len() > max {
                return Err(SkipReason::TooLarge);
            }
        }

        let bytes = std::fs::read(path).map_err(|_| SkipReason::Unreadable)?;
        let content = String::from_utf8(bytes).map_err(|_| SkipReason::NotUtf8)?;
        Ok(CorpusEntry {
            relative_path,
            content,
        })
    }
}

/// `/`-joined form of a relative path, or `None` when it cannot be stored as
/// one line of UTF-8 text.
pub(crate) fn to_slash_path(relative: &Path) -> Option<String> {
    let parts = relative
        .components()
        .map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    let joined = parts.join("/");
    if joined.is_empty() || joined.contains(['\n', '\r']) {
        None
    } else {
        Some(joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(root: &Path, relative: &str, content: &[u8]) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_walk_returns_sorted_relative_paths() {
        let dir = tempdir().unwrap();
        write(dir.path(), "b.py", b"beta");
        write(dir.path(), "a.py", b"alpha");
        write(dir.path(), "src/lib.rs", b"pub fn f() {}");

        let outcome = CorpusWalker::new(dir.path(), ExclusionMatcher::empty())
            .walk()
            .unwrap();
        let paths: Vec<&str> = outcome.paths().collect();
        assert_eq!(paths, vec!["a.py", "b.py", "src/lib.rs"]);
        assert_eq!(outcome.entries[0].content, "alpha");
        assert_eq!(outcome.skipped.total(), 0);
    }

    #[test]
    fn test_excluded_directory_is_pruned() {
        let dir = tempdir().unwrap();
        write(dir.path(), "keep.txt", b"keep");
        write(dir.path(), "node_modules/pkg/index.js", b"module.exports = 1");
        write(dir.path(), "node_modules/other.js", b"x");

        let matcher = ExclusionMatcher::compile(["node_modules/"]).unwrap();
        let outcome = CorpusWalker::new(dir.path(), matcher).walk().unwrap();

        assert_eq!(outcome.paths().collect::<Vec<_>>(), vec!["keep.txt"]);
        assert_eq!(outcome.pruned_dirs, vec!["node_modules".to_string()]);
        // Files inside the pruned tree were never visited, so never counted
        assert_eq!(outcome.skipped.excluded, 0);
    }

    #[test]
    fn test_skip_reasons_are_tallied() {
        let dir = tempdir().unwrap();
        write(dir.path(), "text.md", b"# title");
        write(dir.path(), "image.png", &[0x89, b'P', b'N', b'G', 0xff, 0x00]);
        write(dir.path(), "secrets.env", b"TOKEN=1");
        write(dir.path(), "big.txt", &[b'x'; 64]);

        let matcher = ExclusionMatcher::compile(["secrets.env"]).unwrap();
        let outcome = CorpusWalker::new(dir.path(), matcher)
            .with_max_file_size(Some(32))
            .walk()
            .unwrap();

        assert_eq!(outcome.paths().collect::<Vec<_>>(), vec!["text.md"]);
        assert_eq!(outcome.skipped.get(SkipReason::Excluded), 1);
        assert_eq!(outcome.skipped.get(SkipReason::NotUtf8), 1);
        assert_eq!(outcome.skipped.get(SkipReason::TooLarge), 1);
        assert_eq!(outcome.skipped.total(), 3);
    }

    #[cfg(unix)]
    #[test]
    fn test_unsupported_path_is_skipped() {
        let dir = tempdir().unwrap();
        write(dir.path(), "line\nbreak.txt", b"text");
        write(dir.path(), "fine.txt", b"text");

        let outcome = CorpusWalker::new(dir.path(), ExclusionMatcher::empty())
            .walk()
            .unwrap();
        assert_eq!(outcome.paths().collect::<Vec<_>>(), vec!["fine.txt"]);
        assert_eq!(outcome.skipped.unsupported_path, 1);
    }

    #[test]
    fn test_empty_files_are_part_of_the_corpus() {
        let dir = tempdir().unwrap();
        write(dir.path(), "__init__.py", b"");

        let outcome = CorpusWalker::new(dir.path(), ExclusionMatcher::empty())
            .walk()
            .unwrap();
        assert_eq!(outcome.len(), 1);
        assert_eq!(outcome.entries[0].content, "");
    }

    #[test]
    fn test_into_parts_keeps_rows_aligned() {
        let dir = tempdir().unwrap();
        write(dir.path(), "one.txt", b"1");
        write(dir.path(), "two/three.txt", b"3");

        let outcome = CorpusWalker::new(dir.path(), ExclusionMatcher::empty())
            .walk()
            .unwrap();
        let (contents, paths) = outcome.into_parts();
        assert_eq!(paths, vec!["one.txt", "two/three.txt"]);
        assert_eq!(contents, vec!["1", "3"]);
    }

    #[test]
    fn test_missing_root() {
        let dir = tempdir().unwrap();
        let err = CorpusWalker::new(dir.path().join("nope"), ExclusionMatcher::empty())
            .walk()
            .unwrap_err();
        assert!(matches!(err, RetrieverError::CodebaseNotFound { .. }));
    }

    #[test]
    fn test_repeated_walks_are_identical() {
        let dir = tempdir().unwrap();
        for name in ["z.rs", "m.rs", "a/b.rs", "a/a.rs", ".hidden.rs"] {
            write(dir.path(), name, name.as_bytes());
        }
        let walker = CorpusWalker::new(dir.path(), ExclusionMatcher::empty());
        let first: Vec<String> = walker.walk().unwrap().paths().map(String::from).collect();
        let second: Vec<String> = walker.walk().unwrap().paths().map(String::from).collect();
        assert_eq!(first, second);
        assert_eq!(first, vec![".hidden.rs", "a/a.rs", "a/b.rs", "m.rs", "z.rs"]);
    }

    #[test]
    fn test_to_slash_path() {
        assert_eq!(to_slash_path(Path::new("a/b.rs")).as_deref(), Some("a/b.rs"));
        assert_eq!(to_slash_path(Path::new("")), None);
        assert_eq!(to_slash_path(Path::new("../x")), None);
    }
}
