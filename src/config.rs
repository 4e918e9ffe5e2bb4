//! TOML-loadable context settings, for keeping selection rules and build
//! args in a file next to the Dockerfile.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IoResultExt, Result};

fn default_prefetch_concurrency() -> usize {
    4
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextOptions {
    /// ignore file relative to the root; `None` disables it
    #[serde(default)]
    pub ignore_file: Option<PathBuf>,

    /// rules evaluated before the ignore file contents
    #[serde(default)]
    pub pre_ignore_lines: Vec<String>,

    /// rules evaluated after the ignore file contents
    #[serde(default)]
    pub post_ignore_lines: Vec<String>,

    /// relative paths selected regardless of the rules
    #[serde(default)]
    pub always_include: Vec<String>,

    /// overrides for Dockerfile `ARG` defaults
    #[serde(default)]
    pub build_args: BTreeMap<String, String>,

    /// parallel image pre-fetch width
    #[serde(default = "default_prefetch_concurrency")]
    pub max_prefetch_concurrency: usize,
}

impl Default for ContextOptions {
    fn default() -> ContextOptions {
        ContextOptions {
            ignore_file: Some(PathBuf::from(".gitignore")),
            pre_ignore_lines: Vec::new(),
            post_ignore_lines: Vec::new(),
            always_include: Vec::new(),
            build_args: BTreeMap::new(),
            max_prefetch_concurrency: default_prefetch_concurrency(),
        }
    }
}

impl ContextOptions {
    /// load options from a TOML file
    pub fn load(path: &Path) -> Result<ContextOptions> {
        let content = fs::read_to_string(path).with_path(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// save options to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).with_path(path)?;
        Ok(())
    }
}
