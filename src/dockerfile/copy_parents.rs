//! emulation of BuildKit's `COPY --parents` for daemons that do not ship
//! the labs frontend.
//!
//! the flag keeps the source directory structure below the target. the
//! emulation expands each `COPY ... --parents ...` line into plain `COPY`
//! lines against the files actually selected for the context, so the
//! resulting Dockerfile builds on a stock frontend.

use std::collections::BTreeSet;

use regex::Regex;

use crate::error::{Error, Result};
use crate::ignore::pattern::glob_to_regex_body;
use crate::modify::dockerfile::DockerfileLineRewriter;

/// glob over a whole relative path, tolerating an optional leading slash
pub struct GlobMatcher {
    regex: Regex,
}

impl GlobMatcher {
    pub fn new(pattern: &str) -> Result<GlobMatcher> {
        let body = glob_to_regex_body(pattern)?;
        let regex = Regex::new(&format!("(?s)^/?{}$", body)).map_err(|e| Error::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(GlobMatcher { regex })
    }

    pub fn matches(&self, path: &str) -> bool {
        if path.starts_with('/') {
            self.regex.is_match(path)
        } else {
            self.regex.is_match(&format!("/{}", path))
        }
    }
}

const SYNTAX_PREFIX: &str = "# syntax=docker/dockerfile:";
const LABS_SUFFIX: &str = "-labs";
const PARENTS_FLAG: &str = " --parents";

/// expands `COPY --parents` lines; active only when the file opts into a
/// labs frontend via its syntax directive
pub struct CopyParentsEmulator;

impl DockerfileLineRewriter for CopyParentsEmulator {
    fn rewrite(&self, lines: Vec<String>, relative_files: &BTreeSet<String>) -> Result<Vec<String>> {
        let trimmed: Vec<String> = lines.iter().map(|l| l.trim().to_string()).collect();
        let labs = trimmed
            .iter()
            .any(|l| l.starts_with(SYNTAX_PREFIX) && l.ends_with(LABS_SUFFIX));
        if !labs {
            return Ok(lines);
        }
        let mut out = Vec::with_capacity(trimmed.len());
        for line in trimmed {
            out.extend(expand_line(line, relative_files)?);
        }
        Ok(out)
    }
}

fn expand_line(line: String, relative_files: &BTreeSet<String>) -> Result<Vec<String>> {
    if !line.starts_with("COPY") {
        return Ok(vec![line]);
    }
    let Some(flag_idx) = line.find(PARENTS_FLAG) else {
        return Ok(vec![line]);
    };
    let before = &line[..flag_idx];
    let rest_start = flag_idx + PARENTS_FLAG.len() + 1;
    if rest_start > line.len() {
        return Ok(vec![line]);
    }
    let mut args_str = line[rest_start..].to_string();

    // the source list ends at the next flag or at the line end
    let mut after_flags = String::new();
    let mut target = String::new();
    let last_arg_is_target = !args_str.contains(" --");
    if !last_arg_is_target {
        let Some(next_flag) = args_str.find(" --") else {
            return Ok(vec![line]);
        };
        let mut after = args_str[next_flag + 1..].to_string();
        let Some(last_space) = after.rfind(' ') else {
            return Ok(vec![line]);
        };
        after.truncate(last_space);
        target = args_str[next_flag + after.len() + 2..].to_string();
        args_str.truncate(next_flag);
        after_flags = after;
    }

    let args: Vec<&str> = args_str.split(' ').collect();
    if last_arg_is_target {
        target = args.last().copied().unwrap_or_default().to_string();
    }
    let target_prefix = if target.ends_with('/') {
        target.clone()
    } else {
        format!("{}/", target)
    };

    let source_count = args.len() - usize::from(last_arg_is_target);
    let mut copies: Vec<(String, String)> = Vec::new();
    for source in &args[..source_count] {
        if !source.contains('*') && !source.contains('/') {
            // a bare filename keeps its place, no structure to preserve
            copies.push((source.to_string(), target.clone()));
        } else {
            let matcher = GlobMatcher::new(source)?;
            for file in relative_files {
                if matcher.matches(file) {
                    copies.push((file.clone(), format!("{}{}", target_prefix, file)));
                }
            }
        }
    }

    Ok(copies
        .into_iter()
        .map(|(source, dest)| {
            if after_flags.is_empty() {
                format!("{} {} {}", before, source, dest)
            } else {
                format!("{} {} {} {}", before, source, after_flags, dest)
            }
        })
        .collect())
}
