//! path matchers compiled from single gitignore patterns.
//!
//! every pattern compiles to exactly one [`Matcher`] variant; the cheap
//! variants (exact / suffix / prefix compare) avoid regex entirely, and
//! multi-segment patterns get a segment-by-segment walk with linear
//! backtracking around `**`.

use regex::Regex;

use crate::error::Result;
use crate::ignore::pattern::{
    convert_glob, delete_backslash, is_wildcard, trim_trailing_spaces, wildcard_kind, WildcardKind,
};

/// a compiled ignore pattern
#[derive(Debug)]
pub enum Matcher {
    /// exact segment compare
    Name(NameMatcher),
    /// `*suffix`: suffix compare
    LeadingAsterisk(NameMatcher),
    /// `prefix*`: prefix compare
    TrailingAsterisk(NameMatcher),
    /// anything needing a real regex on one segment
    Wildcard(WildcardMatcher),
    /// `**`: matches zero or more whole segments
    Wild { dir_only: bool },
    /// multi-segment pattern
    Path(PathMatcher),
}

#[derive(Debug)]
pub struct NameMatcher {
    sub: String,
    beginning: bool,
    dir_only: bool,
}

#[derive(Debug)]
pub struct WildcardMatcher {
    beginning: bool,
    dir_only: bool,
    regex: Regex,
}

#[derive(Debug)]
enum PathKind {
    /// no wildcards anywhere: exact compare against the joined pattern
    Simple(String),
    Segments(Vec<Matcher>),
}

#[derive(Debug)]
pub struct PathMatcher {
    dir_only: bool,
    beginning: bool,
    kind: PathKind,
}

impl Matcher {
    /// compile a pattern (already stripped of `!`, comments and the
    /// trailing directory slash) into a matcher
    pub fn compile(pattern: &str, dir_only: bool) -> Result<Matcher> {
        let pattern = trim_trailing_spaces(pattern);
        // a slash that is neither leading nor trailing makes it a path pattern
        if let Some(idx) = pattern[pattern.len().min(1)..].find('/') {
            if idx + 1 < pattern.len() - 1 {
                return Ok(Matcher::Path(PathMatcher::compile(&pattern, dir_only)?));
            }
        }
        segment_matcher(&pattern, dir_only, true)
    }

    /// does this pattern match the whole relative path
    pub fn matches(&self, path: &str, assume_directory: bool) -> bool {
        if path.is_empty() {
            return false;
        }
        match self {
            Matcher::Name(m) => {
                name_full_match(path, m.beginning, m.dir_only, assume_directory, |s| {
                    s == m.sub
                })
            }
            Matcher::LeadingAsterisk(m) => {
                name_full_match(path, m.beginning, m.dir_only, assume_directory, |s| {
                    s.ends_with(&m.sub[1..])
                })
            }
            Matcher::TrailingAsterisk(m) => {
                name_full_match(path, m.beginning, m.dir_only, assume_directory, |s| {
                    s.starts_with(&m.sub[..m.sub.len() - 1])
                })
            }
            Matcher::Wildcard(m) => {
                name_full_match(path, m.beginning, m.dir_only, assume_directory, |s| {
                    m.regex.is_match(s)
                })
            }
            Matcher::Wild { dir_only } => !*dir_only || assume_directory,
            Matcher::Path(m) => m.matches(path, assume_directory),
        }
    }

    /// does this pattern match one path segment (used inside [`PathMatcher`])
    fn matches_segment(&self, segment: &str) -> bool {
        match self {
            Matcher::Name(m) => segment == m.sub,
            Matcher::LeadingAsterisk(m) => segment.ends_with(&m.sub[1..]),
            Matcher::TrailingAsterisk(m) => segment.starts_with(&m.sub[..m.sub.len() - 1]),
            Matcher::Wildcard(m) => m.regex.is_match(segment),
            Matcher::Wild { .. } => true,
            // never nested
            Matcher::Path(_) => false,
        }
    }

    fn is_wild(&self) -> bool {
        matches!(self, Matcher::Wild { .. })
    }
}

impl NameMatcher {
    fn new(pattern: &str, dir_only: bool) -> NameMatcher {
        let unescaped = delete_backslash(pattern);
        let (beginning, sub) = split_beginning(&unescaped);
        NameMatcher {
            sub,
            beginning,
            dir_only,
        }
    }
}

impl WildcardMatcher {
    fn new(pattern: &str, dir_only: bool) -> Result<WildcardMatcher> {
        let (beginning, sub) = split_beginning(pattern);
        Ok(WildcardMatcher {
            beginning,
            dir_only,
            regex: convert_glob(&sub)?,
        })
    }
}

fn split_beginning(pattern: &str) -> (bool, String) {
    match pattern.strip_prefix('/') {
        Some(rest) => (true, rest.to_string()),
        None => (false, pattern.to_string()),
    }
}

/// build a matcher for a single segment; `last_segment` controls whether
/// the pattern-level dir-only flag applies to a `**`
fn segment_matcher(segment: &str, dir_only: bool, last_segment: bool) -> Result<Matcher> {
    if segment == "**" || segment == "/**" {
        return Ok(Matcher::Wild {
            dir_only: dir_only && last_segment,
        });
    }
    Ok(match wildcard_kind(segment) {
        WildcardKind::None => Matcher::Name(NameMatcher::new(segment, dir_only)),
        WildcardKind::LeadingAsteriskOnly => {
            Matcher::LeadingAsterisk(NameMatcher::new(segment, dir_only))
        }
        WildcardKind::TrailingAsteriskOnly => {
            Matcher::TrailingAsterisk(NameMatcher::new(segment, dir_only))
        }
        WildcardKind::Complex => Matcher::Wildcard(WildcardMatcher::new(segment, dir_only)?),
    })
}

/// match a single-segment pattern against a full path: only the part after
/// the last slash can match, and anchored patterns refuse any slash at all
fn name_full_match(
    path: &str,
    beginning: bool,
    dir_only: bool,
    assume_directory: bool,
    seg_match: impl Fn(&str) -> bool,
) -> bool {
    let bytes = path.as_bytes();
    let start = usize::from(bytes[0] == b'/');
    let mut stop = path.len();
    let mut last_slash = last_index_of(bytes, b'/', stop as isize - 1);
    if last_slash == stop as isize - 1 {
        // trailing slash: the path names a directory
        last_slash = last_index_of(bytes, b'/', last_slash - 1);
        stop -= 1;
    }
    let matched = if last_slash < start as isize {
        stop > start && seg_match(&path[start..stop])
    } else {
        !beginning && seg_match(&path[(last_slash + 1) as usize..stop])
    };
    if matched && dir_only {
        assume_directory
    } else {
        matched
    }
}

fn last_index_of(bytes: &[u8], needle: u8, from: isize) -> isize {
    if from < 0 {
        return -1;
    }
    let upper = (from as usize).min(bytes.len().saturating_sub(1));
    for i in (0..=upper).rev() {
        if bytes[i] == needle {
            return i as isize;
        }
    }
    -1
}

fn index_of(bytes: &[u8], needle: u8, from: isize) -> isize {
    let start = from.max(0) as usize;
    if start >= bytes.len() {
        return -1;
    }
    for (i, b) in bytes.iter().enumerate().skip(start) {
        if *b == needle {
            return i as isize;
        }
    }
    -1
}

/// split a pattern on `/`, keeping a leading slash attached to the first
/// segment and a trailing slash attached to the last
fn split_pattern(pattern: &str) -> Vec<&str> {
    let bytes = pattern.as_bytes();
    let mut segments = Vec::new();
    let mut right = 0usize;
    loop {
        let left = right;
        let idx = index_of(bytes, b'/', right as isize);
        if idx < 0 {
            if left < pattern.len() {
                segments.push(&pattern[left..]);
            }
            break;
        }
        right = idx as usize;
        if right > left {
            if left == 1 {
                // leading slash stays with the first segment
                segments.push(&pattern[..right]);
            } else {
                segments.push(&pattern[left..right]);
            }
        }
        if right == pattern.len() - 1 {
            // trailing slash stays with the last segment
            if let Some(last) = segments.pop() {
                let joined_start = last.as_ptr() as usize - pattern.as_ptr() as usize;
                segments.push(&pattern[joined_start..]);
            }
            break;
        }
        right += 1;
    }
    segments
}

impl PathMatcher {
    fn compile(pattern: &str, dir_only: bool) -> Result<PathMatcher> {
        let beginning = pattern.starts_with('/');
        if !is_wildcard(pattern) && !pattern.contains('\\') {
            return Ok(PathMatcher {
                dir_only,
                beginning,
                kind: PathKind::Simple(pattern.to_string()),
            });
        }
        let segments = split_pattern(pattern);
        let mut matchers: Vec<Matcher> = Vec::with_capacity(segments.len());
        for (i, seg) in segments.iter().enumerate() {
            let m = segment_matcher(seg, dir_only, i == segments.len() - 1)?;
            // consecutive ** collapse into one, keeping the later flags
            if m.is_wild() && matchers.last().map(Matcher::is_wild).unwrap_or(false) {
                matchers.pop();
            }
            matchers.push(m);
        }
        Ok(PathMatcher {
            dir_only,
            beginning,
            kind: PathKind::Segments(matchers),
        })
    }

    fn matches(&self, path: &str, assume_directory: bool) -> bool {
        match &self.kind {
            PathKind::Simple(pattern) => self.simple_match(pattern, path, assume_directory),
            PathKind::Segments(matchers) => self.iterate(matchers, path, assume_directory),
        }
    }

    fn simple_match(&self, pattern: &str, path: &str, assume_directory: bool) -> bool {
        let has_slash = path.starts_with('/');
        let normalized: std::borrow::Cow<str> = if self.beginning && !has_slash {
            format!("/{}", path).into()
        } else if !self.beginning && has_slash {
            path[1..].into()
        } else {
            path.into()
        };
        if normalized == pattern {
            return !self.dir_only || assume_directory;
        }
        // a directory path may carry a trailing slash
        normalized.len() == pattern.len() + 1
            && normalized.starts_with(pattern)
            && normalized.ends_with('/')
            && (!self.dir_only || assume_directory)
    }

    /// segment-by-segment walk; a failed match after a `**` re-extends the
    /// `**` by exactly one segment and retries from there
    fn iterate(&self, matchers: &[Matcher], path: &str, assume_directory: bool) -> bool {
        let bytes = path.as_bytes();
        let n = matchers.len();
        let end = path.len() as isize;
        let mut matcher = 0usize;
        let mut right: isize = 0;
        let mut matched = false;
        let mut last_wildmatch: isize = -1;
        let mut backtrack_pos: isize = -1;
        loop {
            let left = right;
            right = index_of(bytes, b'/', right);
            if right == -1 {
                if left < end {
                    matched = self.matches_at(
                        matchers,
                        matcher,
                        &path[left as usize..],
                        assume_directory,
                    );
                } else {
                    // path ended with a slash; a trailing ** must not match
                    // the bare directory itself
                    matched = matched && !matchers[matcher].is_wild();
                }
                if matched {
                    if matcher < n - 1 && matchers[matcher].is_wild() {
                        // ** can match nothing; try the next matcher on the
                        // same segment
                        matcher += 1;
                        matched = self.matches_at(
                            matchers,
                            matcher,
                            &path[left as usize..],
                            assume_directory,
                        );
                    } else if self.dir_only && !assume_directory {
                        return false;
                    }
                }
                return matched && matcher + 1 == n;
            }
            if backtrack_pos < 0 {
                backtrack_pos = right;
            }
            if right > left {
                matched = self.matches_at(
                    matchers,
                    matcher,
                    &path[left as usize..right as usize],
                    assume_directory,
                );
            } else {
                // skip empty segment (leading slash)
                right += 1;
                continue;
            }
            if matched {
                let was_wild = matchers[matcher].is_wild();
                if was_wild {
                    last_wildmatch = matcher as isize;
                    backtrack_pos = -1;
                    // ** matches zero segments first; retry this segment
                    // with the next matcher
                    right = left - 1;
                }
                matcher += 1;
                if matcher == n {
                    if right == end - 1 {
                        // trailing slash consumed everything
                        return !self.dir_only || assume_directory;
                    }
                    if was_wild {
                        return true;
                    }
                    if last_wildmatch >= 0 {
                        // pattern exhausted but path is not: extend the **
                        matcher = last_wildmatch as usize + 1;
                        right = backtrack_pos;
                        backtrack_pos = -1;
                    } else {
                        return false;
                    }
                }
            } else if last_wildmatch != -1 {
                matcher = last_wildmatch as usize + 1;
                right = backtrack_pos;
                backtrack_pos = -1;
            } else {
                return false;
            }
            right += 1;
        }
    }

    fn matches_at(
        &self,
        matchers: &[Matcher],
        idx: usize,
        segment: &str,
        assume_directory: bool,
    ) -> bool {
        let matched = matchers[idx].matches_segment(segment);
        if !matched || idx < matchers.len() - 1 {
            return matched;
        }
        assume_directory || !self.dir_only
    }
}
