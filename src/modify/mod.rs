//! content modifiers: rewrite file contents on their way into the archive.
//!
//! modifiers are consulted in registration order; the first one returning
//! replacement bytes wins and the rest are skipped. `None` means "not mine,
//! pass through".

pub mod dockerfile;
pub mod lines;

use std::path::Path;

use crate::error::Result;

/// rewrites one entry's content, or declines
pub trait ContentModifier: Send + Sync {
    /// `Ok(Some(bytes))` replaces the file content, `Ok(None)` passes
    /// through; errors abort the archive (a half-rewritten context is worse
    /// than none)
    fn apply(&self, source: &Path, target: &str) -> Result<Option<Vec<u8>>>;
}

/// ordered chain of modifiers, first hit wins
#[derive(Default)]
pub struct ModifierPipeline {
    modifiers: Vec<Box<dyn ContentModifier>>,
}

impl ModifierPipeline {
    pub fn new() -> ModifierPipeline {
        ModifierPipeline::default()
    }

    pub fn push(&mut self, modifier: Box<dyn ContentModifier>) {
        self.modifiers.push(modifier);
    }

    pub fn is_empty(&self) -> bool {
        self.modifiers.is_empty()
    }

    pub fn apply(&self, source: &Path, target: &str) -> Result<Option<Vec<u8>>> {
        for modifier in &self.modifiers {
            if let Some(bytes) = modifier.apply(source, target)? {
                return Ok(Some(bytes));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str, Option<&'static [u8]>);

    impl ContentModifier for Fixed {
        fn apply(&self, _source: &Path, target: &str) -> Result<Option<Vec<u8>>> {
            Ok((target == self.0).then(|| self.1.map(<[u8]>::to_vec)).flatten())
        }
    }

    #[test]
    fn test_empty_pipeline_passes_through() {
        let pipeline = ModifierPipeline::new();
        assert!(pipeline
            .apply(Path::new("/x"), "a.txt")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_first_modifier_wins() {
        let mut pipeline = ModifierPipeline::new();
        pipeline.push(Box::new(Fixed("a.txt", Some(b"first"))));
        pipeline.push(Box::new(Fixed("a.txt", Some(b"second"))));
        assert_eq!(
            pipeline.apply(Path::new("/x"), "a.txt").unwrap(),
            Some(b"first".to_vec())
        );
    }

    #[test]
    fn test_declining_modifier_is_skipped() {
        let mut pipeline = ModifierPipeline::new();
        pipeline.push(Box::new(Fixed("other", Some(b"nope"))));
        pipeline.push(Box::new(Fixed("a.txt", Some(b"yes"))));
        assert_eq!(
            pipeline.apply(Path::new("/x"), "a.txt").unwrap(),
            Some(b"yes".to_vec())
        );
    }
}
