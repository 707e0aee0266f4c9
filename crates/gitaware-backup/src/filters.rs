//! Ignore-rule filtering for backup operations.
//!
//! This module compiles ignore-pattern files into matchable rule sets and
//! answers whether a path is excluded:
//! - One [`RuleSet`] per directory that carries an ignore file, with patterns
//!   relative to that directory
//! - An optional root-anchored rule set built from user-supplied patterns
//! - `.git` metadata directories, which are always excluded
//!
//! Rule sets are evaluated independently. A path is excluded when any rule set
//! on its ancestor chain ignores it; a negation in one directory's file never
//! re-includes a path excluded by another directory's file.

use crate::error::{Error, Result};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

/// Name of the version-control metadata directory that is always pruned.
pub const GIT_DIR_NAME: &str = ".git";

/// Ignore-file name honored by default.
pub const DEFAULT_IGNORE_FILE: &str = ".gitignore";

/// Returns true if `name` is a `.git` metadata directory name.
pub fn is_git_dir_name(name: &std::ffi::OsStr) -> bool {
    name == GIT_DIR_NAME
}

/// A compiled set of ignore patterns anchored at one base directory.
#[derive(Debug, Clone)]
pub struct RuleSet {
    base: PathBuf,
    matcher: Gitignore,
    pattern_count: usize,
}

/// Outcome of compiling ignore-file contents.
///
/// Lines that fail to compile are dropped from the rule set and listed in
/// `rejected` so the caller can report them; the remaining lines still apply.
#[derive(Debug)]
pub struct CompiledRules {
    pub rules: RuleSet,
    pub rejected: Vec<RejectedLine>,
}

/// A single ignore-file line that could not be compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedLine {
    /// Ignore file the line came from, when known
    pub file: Option<PathBuf>,
    pub line_number: usize,
    pub line: String,
    pub message: String,
}

impl RuleSet {
    /// Compiles the contents of an ignore file whose directory is `base`.
    pub fn compile(base: &Path, contents: &str) -> CompiledRules {
        Self::compile_sources(base, &[(None, contents)])
    }

    /// Compiles several ignore files from the same directory into one set.
    ///
    /// Patterns keep their file order, so a later file can negate an earlier
    /// one just like a later line can.
    pub fn compile_sources(base: &Path, sources: &[(Option<&Path>, &str)]) -> CompiledRules {
        let mut builder = GitignoreBuilder::new(base);
        let mut rejected = Vec::new();

        for (file, contents) in sources {
            for (index, line) in contents.lines().enumerate() {
                // git ignores a UTF-8 byte order mark at the start of the file
                let line = if index == 0 {
                    line.trim_start_matches('\u{feff}')
                } else {
                    line
                };
                if let Err(e) = builder.add_line(file.map(Path::to_path_buf), line) {
                    rejected.push(RejectedLine {
                        file: file.map(Path::to_path_buf),
                        line_number: index + 1,
                        line: line.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let rules = match builder.build() {
            Ok(matcher) => {
                let pattern_count = matcher.len();
                Self {
                    base: base.to_path_buf(),
                    matcher,
                    pattern_count,
                }
            }
            Err(e) => {
                rejected.push(RejectedLine {
                    file: None,
                    line_number: 0,
                    line: String::new(),
                    message: e.to_string(),
                });
                Self::empty(base)
            }
        };

        CompiledRules { rules, rejected }
    }

    /// Compiles user-supplied patterns anchored at `base`.
    ///
    /// Unlike ignore files, an invalid pattern here is a configuration error.
    pub fn from_patterns(base: &Path, patterns: &[String]) -> Result<Self> {
        let mut builder = GitignoreBuilder::new(base);
        for pattern in patterns {
            builder
                .add_line(None, pattern)
                .map_err(|e| Error::invalid_pattern(pattern.as_str(), e))?;
        }

        let matcher = builder
            .build()
            .map_err(|e| Error::invalid_pattern(patterns.join(", "), e))?;
        let pattern_count = matcher.len();

        Ok(Self {
            base: base.to_path_buf(),
            matcher,
            pattern_count,
        })
    }

    /// Creates a rule set that matches nothing.
    pub fn empty(base: &Path) -> Self {
        Self {
            base: base.to_path_buf(),
            matcher: Gitignore::empty(),
            pattern_count: 0,
        }
    }

    /// Directory the patterns are relative to.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Number of compiled patterns, negations included.
    pub fn len(&self) -> usize {
        self.pattern_count
    }

    pub fn is_empty(&self) -> bool {
        self.pattern_count == 0
    }

    /// Checks whether `path` (absolute) is excluded by this rule set alone.
    ///
    /// The path and each of its parents below `base` are tested, so a file
    /// under an ignored directory is excluded too. Within this rule set the
    /// last matching pattern wins, which lets `!pattern` re-include a path.
    /// Paths outside `base`, and `base` itself, are never excluded.
    pub fn is_excluded(&self, path: &Path, is_dir: bool) -> bool {
        if self.pattern_count == 0 {
            return false;
        }
        let rel = match path.strip_prefix(&self.base) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel,
            _ => return false,
        };
        self.matcher
            .matched_path_or_any_parents(rel, is_dir)
            .is_ignore()
    }
}

/// All rule sets discovered in a source tree, keyed by directory.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    root: PathBuf,
    by_dir: BTreeMap<PathBuf, RuleSet>,
    global: Option<RuleSet>,
}

impl IgnoreRules {
    /// Creates an empty rule mapping for the tree rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            by_dir: BTreeMap::new(),
            global: None,
        }
    }

    /// Root of the tree these rules belong to.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Adds root-anchored patterns that apply in addition to ignore files.
    pub fn with_global(mut self, rules: RuleSet) -> Self {
        if !rules.is_empty() {
            self.global = Some(rules);
        }
        self
    }

    /// Registers the rule set for the directory it is based on.
    ///
    /// Registering a second set for the same directory replaces the first.
    pub fn insert(&mut self, rules: RuleSet) {
        self.by_dir.insert(rules.base.clone(), rules);
    }

    /// Returns the rule set registered for `dir`, if any.
    pub fn get(&self, dir: &Path) -> Option<&RuleSet> {
        self.by_dir.get(dir)
    }

    /// Number of directories with a registered rule set.
    pub fn len(&self) -> usize {
        self.by_dir.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_dir.is_empty() && self.global.is_none()
    }

    /// Iterates over the directories that carry rule sets.
    pub fn directories(&self) -> impl Iterator<Item = &Path> {
        self.by_dir.keys().map(PathBuf::as_path)
    }

    /// Checks whether `path` (absolute) is excluded.
    ///
    /// A `.git` directory below the root, or anything inside one, is always
    /// excluded. Otherwise every rule set registered on an ancestor directory
    /// of `path` is consulted in isolation and any match excludes.
    pub fn is_excluded(&self, path: &Path, is_dir: bool) -> bool {
        if self.inside_git_dir(path, is_dir) {
            return true;
        }

        if let Some(global) = &self.global {
            if global.is_excluded(path, is_dir) {
                return true;
            }
        }

        path.ancestors()
            .skip(1)
            .filter_map(|dir| self.by_dir.get(dir))
            .any(|rules| rules.is_excluded(path, is_dir))
    }

    fn inside_git_dir(&self, path: &Path, is_dir: bool) -> bool {
        let Ok(rel) = path.strip_prefix(&self.root) else {
            return false;
        };
        let mut components = rel.components().peekable();
        while let Some(component) = components.next() {
            let is_last = components.peek().is_none();
            if is_git_dir_name(component.as_os_str()) && (!is_last || is_dir) {
                return true;
            }
        }
        false
    }
}

/// Absolute paths confirmed excluded during one walk.
///
/// Grows monotonically; a path recorded here, and everything below it, is
/// never evaluated against the rule sets again.
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    paths: HashSet<PathBuf>,
}

impl ExclusionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `path` as excluded. Returns false if it was already recorded.
    pub fn insert(&mut self, path: impl Into<PathBuf>) -> bool {
        self.paths.insert(path.into())
    }

    /// Returns true if `path` itself was recorded.
    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    /// Returns true if `path` or any of its ancestors was recorded.
    pub fn covers(&self, path: &Path) -> bool {
        path.ancestors().any(|p| self.paths.contains(p))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Reads every configured ignore file in `dir` and compiles them together.
///
/// Returns `Ok(None)` when the directory has no ignore file. Read failures are
/// returned as [`Error::PatternFile`] for the caller to report; compile
/// failures on individual lines come back in [`CompiledRules::rejected`].
pub fn load_dir_rules(dir: &Path, filenames: &[String]) -> Result<Option<CompiledRules>> {
    let mut files = Vec::new();

    for name in filenames {
        let path = dir.join(name);
        match std::fs::read_to_string(&path) {
            Ok(text) => files.push((path, text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::pattern_file(&path, e)),
        }
    }

    if files.is_empty() {
        return Ok(None);
    }

    let sources: Vec<(Option<&Path>, &str)> = files
        .iter()
        .map(|(path, text)| (Some(path.as_path()), text.as_str()))
        .collect();
    Ok(Some(RuleSet::compile_sources(dir, &sources)))
}
