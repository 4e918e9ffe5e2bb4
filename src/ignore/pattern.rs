//! glob pattern helpers: trailing-space trimming, wildcard classification
//! and translation of gitignore globs into anchored regular expressions.

use regex::Regex;

use crate::error::{Error, Result};

/// how much wildcard machinery a single pattern segment needs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WildcardKind {
    /// no wildcard at all, exact string compare suffices
    None,
    /// exactly one `*` and it is the first character (suffix compare)
    LeadingAsteriskOnly,
    /// exactly one `*` and it is the last character (prefix compare)
    TrailingAsteriskOnly,
    /// anything else: `?`, `[...]`, escapes, or `*` in the middle
    Complex,
}

/// strip unescaped trailing spaces; a backslash-escaped trailing space
/// keeps exactly one space
pub fn trim_trailing_spaces(pattern: &str) -> String {
    let mut p = pattern.to_string();
    while p.ends_with(' ') {
        if p.len() > 1 && p.as_bytes()[p.len() - 2] == b'\\' {
            // escaped space, keep it but drop the backslash
            p.truncate(p.len() - 2);
            p.push(' ');
            return p;
        }
        p.truncate(p.len() - 1);
    }
    p
}

/// true if the last non-whitespace character is a slash
pub fn is_directory_pattern(pattern: &str) -> bool {
    pattern.trim_end().ends_with('/')
}

pub fn strip_trailing_whitespace(pattern: &str) -> &str {
    pattern.trim_end()
}

pub fn strip_trailing(pattern: &str, c: char) -> &str {
    pattern.trim_end_matches(c)
}

fn is_complex_wildcard(pattern: &str) -> bool {
    if pattern.contains('[') || pattern.contains('?') {
        return true;
    }
    // an escaped wildcard forces the regex path so the escape is honored
    if let Some(idx) = pattern.find('\\') {
        return matches!(
            pattern[idx + 1..].chars().next(),
            Some('?') | Some('*') | Some('[')
        );
    }
    false
}

/// classify a single segment, mirroring gitignore matcher selection
pub fn wildcard_kind(pattern: &str) -> WildcardKind {
    if is_complex_wildcard(pattern) {
        return WildcardKind::Complex;
    }
    match pattern.find('*') {
        None => WildcardKind::None,
        Some(idx) if idx == pattern.len() - 1 => WildcardKind::TrailingAsteriskOnly,
        Some(_) => {
            if pattern.rfind('*') == Some(0) {
                WildcardKind::LeadingAsteriskOnly
            } else {
                WildcardKind::Complex
            }
        }
    }
}

pub fn is_wildcard(pattern: &str) -> bool {
    pattern.contains('*') || is_complex_wildcard(pattern)
}

/// remove backslashes that only exist to escape glob metacharacters
pub fn delete_backslash(pattern: &str) -> String {
    if !pattern.contains('\\') {
        return pattern.to_string();
    }
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len());
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '\\' {
            if i + 1 == chars.len() {
                i += 1;
                continue;
            }
            let next = chars[i + 1];
            if next == '\\' {
                out.push(ch);
                i += 2;
                continue;
            }
            if !matches!(next, '?' | '*' | '[') {
                i += 1;
                continue;
            }
        }
        out.push(ch);
        i += 1;
    }
    out
}

const POSIX_CLASSES: [&str; 13] = [
    "alnum", "alpha", "blank", "cntrl", "digit", "graph", "lower", "print", "punct", "space",
    "upper", "word", "xdigit",
];

fn posix_class(name: &str) -> Option<String> {
    POSIX_CLASSES
        .iter()
        .find(|c| **c == name)
        .map(|c| format!("[:{}:]", c))
}

fn invalid(pattern: &str, reason: impl Into<String>) -> Error {
    Error::InvalidPattern {
        pattern: pattern.to_string(),
        reason: reason.into(),
    }
}

fn has_collating_construct(pattern: &str) -> bool {
    // [[.sym.]] and [[=equiv=]] have no regex translation
    for open in ["[[.", "[[="] {
        if let Some(idx) = pattern.find(open) {
            let close = if open.ends_with('.') { ".]]" } else { "=]]" };
            if pattern[idx..].contains(close) {
                return true;
            }
        }
    }
    false
}

/// translate a glob into an (unanchored) regex body via a single
/// left-to-right scan with bracket-expression state
pub fn glob_to_regex_body(pattern: &str) -> Result<String> {
    if has_collating_construct(pattern) {
        return Err(invalid(
            pattern,
            "collating symbols and equivalence classes are not supported",
        ));
    }
    let chars: Vec<char> = pattern.chars().collect();
    let mut sb = String::with_capacity(pattern.len() + 8);
    let mut in_brackets = 0i32;
    let mut seen_escape = false;
    let mut ignore_last_bracket = false;
    let mut in_char_class = false;
    let mut char_class = String::new();

    let look_ahead = |i: usize| chars.get(i + 1).copied();
    let last_char = |s: &String| s.chars().last();

    for i in 0..chars.len() {
        let c = chars[i];
        match c {
            '*' => {
                if seen_escape || in_brackets > 0 {
                    sb.push('*');
                } else {
                    sb.push_str(".*");
                }
            }
            '(' | ')' | '{' | '}' | '+' | '$' | '^' | '|' => {
                if seen_escape || in_brackets > 0 {
                    sb.push(c);
                } else {
                    sb.push('\\');
                    sb.push(c);
                }
            }
            '.' => {
                if seen_escape {
                    sb.push('.');
                } else {
                    sb.push_str("\\.");
                }
            }
            '?' => {
                if seen_escape || in_brackets > 0 {
                    sb.push('?');
                } else {
                    sb.push('.');
                }
            }
            ':' => {
                // a class only opens after an inner "[", never the outer one
                if in_brackets > 0
                    && sb.ends_with("\\[")
                    && look_ahead(i).map(|n| n.is_alphabetic()).unwrap_or(false)
                {
                    in_char_class = true;
                }
                sb.push(':');
            }
            '-' => {
                if in_brackets > 0 && look_ahead(i) == Some(']') {
                    sb.push_str("\\-");
                } else {
                    sb.push('-');
                }
            }
            '\\' => {
                if in_brackets > 0 {
                    if matches!(look_ahead(i), Some(']') | Some('[')) {
                        ignore_last_bracket = true;
                    }
                    sb.push('\\');
                } else if matches!(
                    look_ahead(i),
                    Some('\\') | Some('[') | Some('?') | Some('*') | Some(' ')
                ) || last_char(&sb) == Some('\\')
                {
                    sb.push('\\');
                }
                // otherwise the backslash only escaped a glob char, drop it
            }
            '[' => {
                if in_brackets > 0 {
                    if !seen_escape {
                        sb.push('\\');
                    }
                    sb.push('[');
                    ignore_last_bracket = true;
                } else {
                    if !seen_escape {
                        in_brackets += 1;
                        ignore_last_bracket = false;
                    }
                    sb.push('[');
                }
            }
            ']' => {
                if seen_escape || in_brackets <= 0 {
                    if !seen_escape {
                        sb.push('\\');
                    }
                    sb.push(']');
                    ignore_last_bracket = true;
                } else {
                    let lb = last_char(&sb);
                    if (lb == Some('[') && !ignore_last_bracket) || lb == Some('^') {
                        // first character of a bracket expression, literal
                        sb.push_str("\\]");
                        ignore_last_bracket = true;
                    } else {
                        ignore_last_bracket = false;
                        if !in_char_class {
                            in_brackets -= 1;
                            sb.push(']');
                        } else {
                            in_char_class = false;
                            if let Some(cls) = posix_class(&char_class) {
                                // drop the "\[::" the scanner emitted on the way in
                                sb.truncate(sb.len() - 4);
                                sb.push_str(&cls);
                            }
                            char_class.clear();
                        }
                    }
                }
            }
            '!' => {
                if in_brackets > 0 && last_char(&sb) == Some('[') {
                    sb.push('^');
                } else {
                    sb.push('!');
                }
            }
            _ => {
                if in_char_class {
                    char_class.push(c);
                } else {
                    sb.push(c);
                }
            }
        }
        seen_escape = c == '\\';
    }

    if in_brackets > 0 {
        return Err(invalid(pattern, "unterminated bracket expression"));
    }
    Ok(sb)
}

/// compile a glob to a regex matching the whole input
pub fn convert_glob(pattern: &str) -> Result<Regex> {
    let body = glob_to_regex_body(pattern)?;
    Regex::new(&format!("(?s)^{}$", body)).map_err(|e| invalid(pattern, e.to_string()))
}
