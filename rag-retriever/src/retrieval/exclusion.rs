//! gitignore-style exclusion rules for corpus traversal.
//!
//! One rule set is active per build. It is made of three layers, in order:
//!
//! 1. built-in defaults ([`DEFAULT_RULES`]): the `.git` directory and the
//!    ignore files themselves,
//! 2. the lines of the first ignore file found at the corpus root
//!    (`.ragignore`, else `.gitignore`),
//! 3. enforced extra rules, e.g. the index storage directory when it lives
//!    inside the corpus.
//!
//! Matching follows git: last match wins, `!` re-includes, and nothing below
//! an excluded directory can be re-included.

use crate::error::{Result, RetrieverError};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Tool-specific ignore file, preferred when present
pub const PRIMARY_IGNORE_FILE: &str = ".ragignore";

/// Generic version-control ignore file used as a fallback
pub const FALLBACK_IGNORE_FILE: &str = ".gitignore";

/// Rules applied before any ignore file
pub const DEFAULT_RULES: &[&str] = &[".git/", "/.ragignore", "/.gitignore"];

/// One parsed ignore-file line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoreRule {
    /// Glob text without the leading `!` and the trailing `/`
    pub pattern: String,
    /// `!pattern`: re-includes paths excluded by earlier rules
    pub negated: bool,
    /// `pattern/`: only matches directories
    pub directory_only: bool,
}

impl IgnoreRule {
    /// Parse one line. Returns `None` for blank lines and `#` comments.
    pub fn parse(line: &str) -> Option<Self> {
        let line = trim_unescaped_trailing_spaces(line.trim_end_matches('\r'));
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let (negated, rest) = match line.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, line),
        };
        let directory_only = rest.len() > 1 && rest.ends_with('/');
        let pattern = if directory_only {
            &rest[..rest.len() - 1]
        } else {
            rest
        };
        if pattern.is_empty() {
            return None;
        }

        Some(Self {
            pattern: pattern.to_string(),
            negated,
            directory_only,
        })
    }
}

fn trim_unescaped_trailing_spaces(line: &str) -> &str {
    let mut end = line.len();
    while line[..end].ends_with(' ') && !line[..end].ends_with("\\ ") {
        end -= 1;
    }
    &line[..end]
}

/// Where the ignore rules come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionOptions {
    /// Candidate ignore files at the corpus root, first existing one wins
    pub ignore_files: Vec<String>,
    /// Rules placed before the ignore file
    pub default_rules: Vec<String>,
    /// Rules placed after the ignore file, so they cannot be re-included
    pub extra_rules: Vec<String>,
}

impl Default for ExclusionOptions {
    fn default() -> Self {
        Self {
            ignore_files: vec![
                PRIMARY_IGNORE_FILE.to_string(),
                FALLBACK_IGNORE_FILE.to_string(),
            ],
            default_rules: DEFAULT_RULES.iter().map(|r| r.to_string()).collect(),
            extra_rules: Vec::new(),
        }
    }
}

impl ExclusionOptions {
    /// Add an enforced rule (builder style)
    pub fn with_extra_rule(mut self, rule: impl Into<String>) -> Self {
        self.extra_rules.push(rule.into());
        self
    }
}

/// Compiled predicate over corpus-relative paths.
#[derive(Debug, Clone)]
pub struct ExclusionMatcher {
    gitignore: Gitignore,
    rules: Vec<IgnoreRule>,
    source: Option<PathBuf>,
}

/// Accumulates rules from several layers into one gitignore matcher.
struct RuleCompiler {
    builder: GitignoreBuilder,
    rules: Vec<IgnoreRule>,
}

impl RuleCompiler {
    fn new() -> Self {
        Self {
            builder: GitignoreBuilder::new("."),
            rules: Vec::new(),
        }
    }

    fn add_lines<I, S>(&mut self, origin: &Path, lines: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for (index, line) in lines.into_iter().enumerate() {
            let line = line.as_ref();
            let Some(rule) = IgnoreRule::parse(line) else {
                continue;
            };
            self.builder
                .add_line(Some(origin.to_path_buf()), line.trim_end_matches('\r'))
                .map_err(|e| RetrieverError::IgnoreFileParse {
                    path: origin.to_path_buf(),
                    line: index + 1,
                    message: e.to_string(),
                })?;
            self.rules.push(rule);
        }
        Ok(())
    }

    fn finish(self, origin: &Path, source: Option<PathBuf>) -> Result<ExclusionMatcher> {
        let gitignore = self
            .builder
            .build()
            .map_err(|e| RetrieverError::IgnoreFileParse {
                path: origin.to_path_buf(),
                line: 0,
                message: e.to_string(),
            })?;
        Ok(ExclusionMatcher {
            gitignore,
            rules: self.rules,
            source,
        })
    }
}

impl ExclusionMatcher {
    /// A matcher that excludes nothing.
    pub fn empty() -> Self {
        Self {
            gitignore: Gitignore::empty(),
            rules: Vec::new(),
            source: None,
        }
    }

    /// Compile ignore-file lines as-is, without defaults.
    ///
    /// Fails with [`RetrieverError::IgnoreFileParse`] on the first invalid glob.
    pub fn compile<I, S>(lines: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let origin = Path::new("<inline>");
        let mut compiler = RuleCompiler::new();
        compiler.add_lines(origin, lines)?;
        compiler.finish(origin, None)
    }

    /// Build the matcher for a corpus root.
    ///
    /// Looks for the configured ignore files in order and uses the first one
    /// that can be read. An unreadable file counts as absent. A file that is
    /// not UTF-8 or holds an invalid glob is an error.
    pub fn discover(root: &Path, options: &ExclusionOptions) -> Result<Self> {
        let mut compiler = RuleCompiler::new();
        compiler.add_lines(Path::new("<default rules>"), &options.default_rules)?;

        let mut source = None;
        for name in &options.ignore_files {
            let path = root.join(name);
            let bytes = match std::fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!("Treating unreadable ignore file {} as absent: {}", path.display(), e);
                    continue;
                }
            };
            let text = String::from_utf8(bytes).map_err(|e| {
                let valid = &e.as_bytes()[..e.utf8_error().valid_up_to()];
                RetrieverError::IgnoreFileParse {
                    path: path.clone(),
                    line: valid.iter().filter(|b| **b == b'\n').count() + 1,
                    message: "file is not valid UTF-8".to_string(),
                }
            })?;
            compiler.add_lines(&path, text.lines())?;
            debug!("Loaded ignore rules from {}", path.display());
            source = Some(path);
            break;
        }

        compiler.add_lines(Path::new("<enforced rules>"), &options.extra_rules)?;
        let origin = source.clone().unwrap_or_else(|| root.to_path_buf());
        compiler.finish(&origin, source)
    }

    /// Whether `relative_path` is excluded.
    ///
    /// The path is relative to the corpus root. Paths under an excluded
    /// directory are excluded as well. The root itself (an empty path) never
    /// matches.
    pub fn matches(&self, relative_path: impl AsRef<Path>, is_dir: bool) -> bool {
        let path = relative_path.as_ref();
        let path = path.strip_prefix("./").unwrap_or(path);
        if path.as_os_str().is_empty() || path.has_root() {
            return false;
        }

        // Outermost directory first: once a directory is excluded, a `!` rule
        // for something inside it cannot bring it back.
        let mut parents: Vec<&Path> = path
            .ancestors()
            .skip(1)
            .filter(|p| !p.as_os_str().is_empty())
            .collect();
        parents.reverse();
        if parents
            .into_iter()
            .any(|dir| self.gitignore.matched(dir, true).is_ignore())
        {
            return true;
        }
        self.gitignore.matched(path, is_dir).is_ignore()
    }

    /// Parsed rules in evaluation order
    pub fn rules(&self) -> &[IgnoreRule] {
        &self.rules
    }

    /// The ignore file the rules were read from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

impl Default for ExclusionMatcher {
    fn default() -> Self {
        Self::empty()
    }
}
