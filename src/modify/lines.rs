//! line-level content rewriting with unchanged-content suppression.

use std::fs;
use std::path::Path;

use crate::error::{IoResultExt, Result};
use crate::modify::ContentModifier;

type ApplyPredicate = Box<dyn Fn(&Path, &str) -> bool + Send + Sync>;
type LineRewrite = Box<dyn Fn(Vec<String>) -> Vec<String> + Send + Sync>;

#[derive(Clone, Copy)]
enum IdenticalCheck {
    Equality,
    /// cheaper check for rewrites that only remove lines, e.g. pruning
    /// modules from a build manifest
    LineCount,
}

/// reads a utf-8 file as lines, applies a rewrite, and suppresses the
/// replacement when the result counts as identical
pub struct LinesModifier {
    should_apply: ApplyPredicate,
    rewrite: LineRewrite,
    identical: IdenticalCheck,
}

impl LinesModifier {
    pub fn new(
        should_apply: impl Fn(&Path, &str) -> bool + Send + Sync + 'static,
        rewrite: impl Fn(Vec<String>) -> Vec<String> + Send + Sync + 'static,
    ) -> LinesModifier {
        LinesModifier {
            should_apply: Box::new(should_apply),
            rewrite: Box::new(rewrite),
            identical: IdenticalCheck::Equality,
        }
    }

    /// treat the rewrite as a no-op when the line count is unchanged
    pub fn identical_by_line_count(mut self) -> LinesModifier {
        self.identical = IdenticalCheck::LineCount;
        self
    }
}

impl ContentModifier for LinesModifier {
    fn apply(&self, source: &Path, target: &str) -> Result<Option<Vec<u8>>> {
        if !(self.should_apply)(source, target) {
            return Ok(None);
        }
        let content = fs::read_to_string(source).with_path(source)?;
        let original: Vec<String> = content.lines().map(str::to_owned).collect();
        let rewritten = (self.rewrite)(original.clone());
        let identical = match self.identical {
            IdenticalCheck::Equality => original == rewritten,
            IdenticalCheck::LineCount => original.len() == rewritten.len(),
        };
        if identical {
            return Ok(None);
        }
        Ok(Some(rewritten.join("\n").into_bytes()))
    }
}
