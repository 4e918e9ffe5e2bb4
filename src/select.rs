//! context file selection: two-phase walk plus parallel rule evaluation.
//!
//! phase one collects every regular file (and symlink) below the root with
//! a sequential walk; phase two evaluates each candidate against the merged
//! rule set in parallel. directory verdicts are shared through a concurrent
//! cache so an ignored directory is decided once, not once per descendant.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use rayon::prelude::*;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::ignore::{MatchOutcome, RuleSet};

/// one selected file: where it lives on disk and where it goes in the archive
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextEntry {
    pub source: PathBuf,
    /// `/`-separated path relative to the root, no leading `./`
    pub target: String,
}

pub type IgnoreLineFilter = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// configuration for one selection run
pub struct Selector {
    root: PathBuf,
    ignore_file: Option<PathBuf>,
    pre_lines: Vec<String>,
    post_lines: Vec<String>,
    line_filter: Option<IgnoreLineFilter>,
    always_include: BTreeSet<String>,
}

impl Selector {
    pub fn new(root: impl Into<PathBuf>) -> Selector {
        Selector {
            root: root.into(),
            ignore_file: None,
            pre_lines: Vec::new(),
            post_lines: Vec::new(),
            line_filter: None,
            always_include: BTreeSet::new(),
        }
    }

    /// ignore file path relative to the root (usually `.gitignore`)
    pub fn ignore_file(mut self, path: impl Into<PathBuf>) -> Selector {
        self.ignore_file = Some(path.into());
        self
    }

    /// rules evaluated before the ignore file contents
    pub fn pre_lines<I, S>(mut self, lines: I) -> Selector
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pre_lines.extend(lines.into_iter().map(Into::into));
        self
    }

    /// rules evaluated after the ignore file contents (they win on conflict)
    pub fn post_lines<I, S>(mut self, lines: I) -> Selector
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.post_lines.extend(lines.into_iter().map(Into::into));
        self
    }

    /// keep only ignore-file lines the filter accepts
    pub fn line_filter(mut self, filter: impl Fn(&str) -> bool + Send + Sync + 'static) -> Selector {
        self.line_filter = Some(Box::new(filter));
        self
    }

    pub(crate) fn line_filter_boxed(mut self, filter: IgnoreLineFilter) -> Selector {
        self.line_filter = Some(filter);
        self
    }

    /// relative paths selected no matter what the rules say
    pub fn always_include<I, S>(mut self, paths: I) -> Selector
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.always_include.extend(paths.into_iter().map(Into::into));
        self
    }

    /// merge pre-lines, filtered ignore-file lines and post-lines, in that
    /// order, into one rule set
    pub fn rule_set(&self) -> RuleSet {
        let mut lines: Vec<String> = Vec::new();
        let push = |line: &str, lines: &mut Vec<String>| {
            if !lines.iter().any(|l| l == line) {
                lines.push(line.to_string());
            }
        };
        for line in &self.pre_lines {
            push(line, &mut lines);
        }
        if let Some(rel) = &self.ignore_file {
            let path = self.root.join(rel);
            match fs::read_to_string(&path) {
                Ok(content) => {
                    for line in content.lines() {
                        if self.line_filter.as_ref().map(|f| f(line)).unwrap_or(true) {
                            push(line, &mut lines);
                        }
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "ignore file unreadable, using no rules from it");
                }
            }
        }
        for line in &self.post_lines {
            push(line, &mut lines);
        }
        RuleSet::from_lines(lines)
    }

    /// run the selection, returning entries sorted by target path
    pub fn resolve(&self) -> Result<Vec<ContextEntry>> {
        let rules = self.rule_set();
        self.resolve_with(&rules)
    }

    /// like [`resolve`](Selector::resolve) but with a caller-provided rule
    /// set, so the evaluation can be observed or reused
    pub fn resolve_with(&self, rules: &RuleSet) -> Result<Vec<ContextEntry>> {
        let files = self.collect_files()?;
        let cache = RwLock::new(HashMap::new());
        let mut selected: Vec<ContextEntry> = files
            .par_iter()
            .filter_map(|(source, target)| {
                evaluate_file(rules, &self.always_include, &cache, source, target)
            })
            .collect();
        selected.sort_by(|a, b| a.target.cmp(&b.target));
        debug!(
            candidates = files.len(),
            selected = selected.len(),
            root = %self.root.display(),
            "build context resolved"
        );
        Ok(selected)
    }

    fn collect_files(&self) -> Result<Vec<(PathBuf, String)>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let not_found =
                        e.io_error().map(|io| io.kind() == ErrorKind::NotFound) == Some(true);
                    // a file vanishing between listing and stat is benign,
                    // a missing root is not
                    if not_found && e.depth() > 0 {
                        continue;
                    }
                    if not_found {
                        let source = e
                            .into_io_error()
                            .unwrap_or_else(|| io::Error::from(ErrorKind::NotFound));
                        return Err(Error::Io {
                            path: self.root.clone(),
                            source,
                        });
                    }
                    return Err(e.into());
                }
            };
            let file_type = entry.file_type();
            if !file_type.is_file() && !file_type.is_symlink() {
                continue;
            }
            let target = relative_target(&self.root, entry.path())?;
            files.push((entry.path().to_path_buf(), target));
        }
        Ok(files)
    }
}

/// `/`-separated path of `path` relative to `root`
pub fn relative_target(root: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| Error::OutsideRoot(path.to_path_buf()))?;
    let mut target = String::new();
    for component in rel.components() {
        let part = component
            .as_os_str()
            .to_str()
            .ok_or_else(|| Error::NonUtf8Path(path.to_path_buf()))?;
        if !target.is_empty() {
            target.push('/');
        }
        target.push_str(part);
    }
    Ok(target)
}

fn parent_dir(path: &str) -> Option<&str> {
    path.rfind('/').map(|idx| &path[..idx])
}

/// include / exclude / undecided for one path, with always-include on top
fn check(
    rules: &RuleSet,
    always_include: &BTreeSet<String>,
    path: &str,
    is_directory: bool,
) -> Option<bool> {
    if always_include.contains(path) {
        return Some(true);
    }
    match rules.evaluate(path, is_directory) {
        MatchOutcome::NotIgnored => Some(true),
        MatchOutcome::Ignored => Some(false),
        MatchOutcome::Undecided => None,
    }
}

/// decide one file: own path first, then ancestors nearest-to-root,
/// consulting and feeding the shared directory-outcome cache
pub(crate) fn evaluate_file(
    rules: &RuleSet,
    always_include: &BTreeSet<String>,
    cache: &RwLock<HashMap<String, bool>>,
    source: &Path,
    target: &str,
) -> Option<ContextEntry> {
    let entry = || ContextEntry {
        source: source.to_path_buf(),
        target: target.to_string(),
    };

    // an explicit file-level verdict overrides anything inherited
    match check(rules, always_include, target, false) {
        Some(true) => return Some(entry()),
        Some(false) => return None,
        None => {}
    }

    let mut processed: Vec<&str> = Vec::new();
    let mut outcome: Option<bool> = None;
    let mut dir = parent_dir(target);
    while let Some(d) = dir {
        let cached = cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(d)
            .copied();
        if let Some(include) = cached {
            outcome = Some(include);
            break;
        }
        processed.push(d);
        if let Some(include) = check(rules, always_include, d, true) {
            outcome = Some(include);
            break;
        }
        dir = parent_dir(d);
    }

    // nothing matched anywhere up to the root: include by default
    let include = outcome.unwrap_or(true);
    if !processed.is_empty() {
        let mut map = cache.write().unwrap_or_else(PoisonError::into_inner);
        for d in processed {
            map.insert(d.to_string(), include);
        }
    }
    include.then(entry)
}
