//! gitignore-compatible ignore rules.
//!
//! a [`RuleSet`] holds rules in declaration order and evaluates paths the
//! way git does: the last matching rule wins, a `!` prefix negates, a
//! trailing `/` restricts the rule to directories, and a path no rule
//! matches stays undecided so callers can consult parent directories.

pub mod matcher;
pub mod pattern;

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::warn;

use crate::error::{Error, Result};
use matcher::Matcher;
use pattern::{is_directory_pattern, strip_trailing, strip_trailing_whitespace};

/// result of evaluating one path against a rule set
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchOutcome {
    /// a negated rule matched, the path is explicitly kept
    NotIgnored,
    /// a rule matched, the path is excluded
    Ignored,
    /// no rule matched, the decision belongs to a parent directory
    Undecided,
}

/// one parsed ignore rule
#[derive(Debug)]
pub struct IgnoreRule {
    raw: String,
    negated: bool,
    dir_only: bool,
    matcher: Matcher,
}

impl IgnoreRule {
    /// parse one non-blank, non-comment gitignore line
    pub fn parse(line: &str) -> Result<IgnoreRule> {
        let raw = line.to_string();
        let mut pattern = line;
        let mut negated = false;
        if let Some(rest) = pattern.strip_prefix('!') {
            negated = true;
            pattern = rest;
        }
        // "\!name" and "\#name" are literal names
        if pattern.starts_with("\\!") || pattern.starts_with("\\#") {
            pattern = &pattern[1..];
        }
        let dir_only = is_directory_pattern(pattern);
        let mut owned;
        if dir_only {
            owned = strip_trailing_whitespace(pattern).to_string();
            owned = strip_trailing(&owned, '/').to_string();
            if owned.is_empty() {
                return Err(Error::InvalidPattern {
                    pattern: raw,
                    reason: "empty after stripping trailing slashes".to_string(),
                });
            }
            pattern = &owned;
            let matcher = Matcher::compile(pattern, dir_only)?;
            return Ok(IgnoreRule {
                raw,
                negated,
                dir_only,
                matcher,
            });
        }
        let matcher = Matcher::compile(pattern, dir_only)?;
        Ok(IgnoreRule {
            raw,
            negated,
            dir_only,
            matcher,
        })
    }

    pub fn is_match(&self, path: &str, is_directory: bool) -> bool {
        self.matcher.matches(path, is_directory)
    }

    pub fn negated(&self) -> bool {
        self.negated
    }

    pub fn dir_only(&self) -> bool {
        self.dir_only
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }
}

/// ordered set of ignore rules
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<IgnoreRule>,
    evaluations: AtomicUsize,
}

impl RuleSet {
    /// build a rule set from gitignore lines; blank lines, comments and
    /// duplicates are skipped, unparseable lines are dropped with a warning
    pub fn from_lines<I, S>(lines: I) -> RuleSet
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen: Vec<String> = Vec::new();
        let mut rules = Vec::new();
        for line in lines {
            let line = line.as_ref();
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            if seen.iter().any(|s| s == line) {
                continue;
            }
            seen.push(line.to_string());
            match IgnoreRule::parse(line) {
                Ok(rule) => rules.push(rule),
                Err(e) => warn!(line, error = %e, "dropping unparseable ignore rule"),
            }
        }
        RuleSet {
            rules,
            evaluations: AtomicUsize::new(0),
        }
    }

    /// evaluate a relative path; rules are checked in reverse so the last
    /// declared match wins
    pub fn evaluate(&self, path: &str, is_directory: bool) -> MatchOutcome {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        for rule in self.rules.iter().rev() {
            if rule.is_match(path, is_directory) {
                return if rule.negated() {
                    MatchOutcome::NotIgnored
                } else {
                    MatchOutcome::Ignored
                };
            }
        }
        MatchOutcome::Undecided
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// number of `evaluate` calls so far, a cheap diagnostic for verifying
    /// that directory outcomes are cached rather than recomputed
    pub fn evaluation_count(&self) -> usize {
        self.evaluations.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_negation() {
        let rule = IgnoreRule::parse("!keep.txt").unwrap();
        assert!(rule.negated());
        assert!(rule.is_match("keep.txt", false));
    }

    #[test]
    fn test_parse_escaped_bang_is_literal() {
        let rule = IgnoreRule::parse("\\!important").unwrap();
        assert!(!rule.negated());
        assert!(rule.is_match("!important", false));
    }

    #[test]
    fn test_parse_dir_only() {
        let rule = IgnoreRule::parse("build/").unwrap();
        assert!(rule.dir_only());
        assert!(rule.is_match("build", true));
        assert!(!rule.is_match("build", false));
    }

    #[test]
    fn test_last_rule_wins() {
        let rules = RuleSet::from_lines(["*.txt", "!keep.txt"]);
        assert_eq!(rules.evaluate("keep.txt", false), MatchOutcome::NotIgnored);
        assert_eq!(rules.evaluate("other.txt", false), MatchOutcome::Ignored);
        assert_eq!(rules.evaluate("main.rs", false), MatchOutcome::Undecided);
    }

    #[test]
    fn test_negation_then_reignore() {
        let rules = RuleSet::from_lines(["!keep.txt", "*.txt"]);
        // declared after the negation, the broad rule wins
        assert_eq!(rules.evaluate("keep.txt", false), MatchOutcome::Ignored);
    }

    #[test]
    fn test_comments_and_blanks_skipped() {
        let rules = RuleSet::from_lines(["# comment", "", "   ", "target/"]);
        assert_eq!(rules.len(), 1);
    }

    #[test]
    fn test_invalid_rule_dropped() {
        let rules = RuleSet::from_lines(["a[bc", "*.log"]);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules.evaluate("x.log", false), MatchOutcome::Ignored);
    }

    #[test]
    fn test_single_bracket_class_line_never_aborts() {
        // "[:alpha:]" without the outer bracket pair must not take the
        // rule set down with it
        let rules = RuleSet::from_lines(["[:alpha:]", "*.log"]);
        assert_eq!(rules.evaluate("x.log", false), MatchOutcome::Ignored);
    }

    #[test]
    fn test_duplicates_collapsed() {
        let rules = RuleSet::from_lines(["*.log", "*.log", "*.log"]);
        assert_eq!(rules.len(), 1);
    }

    #[test]
    fn test_file_named_like_ignored_directory() {
        let rules = RuleSet::from_lines(["build/"]);
        // a plain file named "build" is not covered by a directory rule
        assert_eq!(rules.evaluate("build", false), MatchOutcome::Undecided);
        assert_eq!(rules.evaluate("build", true), MatchOutcome::Ignored);
    }

    #[test]
    fn test_evaluation_count() {
        let rules = RuleSet::from_lines(["*.log"]);
        assert_eq!(rules.evaluation_count(), 0);
        rules.evaluate("a.log", false);
        rules.evaluate("b.log", false);
        assert_eq!(rules.evaluation_count(), 2);
    }
}
