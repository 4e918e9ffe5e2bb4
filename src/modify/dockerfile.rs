//! the modifier that rewrites the Dockerfile itself.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{IoResultExt, Result};
use crate::modify::ContentModifier;

/// rewrites Dockerfile lines against the set of files selected for the
/// context (relative, `/`-separated)
pub trait DockerfileLineRewriter: Send + Sync {
    fn rewrite(&self, lines: Vec<String>, relative_files: &BTreeSet<String>) -> Result<Vec<String>>;
}

/// applies the registered line rewriters to exactly one entry: the
/// Dockerfile at the configured source path
pub struct DockerfileModifier {
    dockerfile: PathBuf,
    rewriters: Vec<Box<dyn DockerfileLineRewriter>>,
    relative_files: BTreeSet<String>,
}

impl DockerfileModifier {
    pub fn new(
        dockerfile: impl Into<PathBuf>,
        rewriters: Vec<Box<dyn DockerfileLineRewriter>>,
        relative_files: BTreeSet<String>,
    ) -> DockerfileModifier {
        DockerfileModifier {
            dockerfile: dockerfile.into(),
            rewriters,
            relative_files,
        }
    }
}

impl ContentModifier for DockerfileModifier {
    fn apply(&self, source: &Path, _target: &str) -> Result<Option<Vec<u8>>> {
        if source != self.dockerfile {
            return Ok(None);
        }
        let content = fs::read_to_string(source).with_path(source)?;
        let mut lines: Vec<String> = content.lines().map(str::to_owned).collect();
        for rewriter in &self.rewriters {
            lines = rewriter.rewrite(lines, &self.relative_files)?;
        }
        Ok(Some(lines.join("\n").into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct Upcase;

    impl DockerfileLineRewriter for Upcase {
        fn rewrite(
            &self,
            lines: Vec<String>,
            _relative_files: &BTreeSet<String>,
        ) -> Result<Vec<String>> {
            Ok(lines.into_iter().map(|l| l.to_uppercase()).collect())
        }
    }

    #[test]
    fn test_only_the_dockerfile_is_rewritten() {
        let dir = tempdir().unwrap();
        let dockerfile = dir.path().join("Dockerfile");
        fs::write(&dockerfile, "from alpine:3\n").unwrap();

        let modifier = DockerfileModifier::new(&dockerfile, vec![Box::new(Upcase)], BTreeSet::new());
        assert_eq!(
            modifier.apply(&dockerfile, "Dockerfile").unwrap(),
            Some(b"FROM ALPINE:3".to_vec())
        );
        assert!(modifier
            .apply(&dir.path().join("other"), "other")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_rewriters_chain_in_order() {
        struct Append(&'static str);
        impl DockerfileLineRewriter for Append {
            fn rewrite(
                &self,
                mut lines: Vec<String>,
                _relative_files: &BTreeSet<String>,
            ) -> Result<Vec<String>> {
                lines.push(self.0.to_string());
                Ok(lines)
            }
        }

        let dir = tempdir().unwrap();
        let dockerfile = dir.path().join("Dockerfile");
        fs::write(&dockerfile, "FROM alpine:3\n").unwrap();

        let modifier = DockerfileModifier::new(
            &dockerfile,
            vec![Box::new(Append("RUN a")), Box::new(Append("RUN b"))],
            BTreeSet::new(),
        );
        assert_eq!(
            modifier.apply(&dockerfile, "Dockerfile").unwrap(),
            Some(b"FROM alpine:3\nRUN a\nRUN b".to_vec())
        );
    }
}
