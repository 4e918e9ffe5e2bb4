//! static Dockerfile analysis: enough `FROM`/`ARG` parsing to know which
//! base images a build will pull, nothing more.

pub mod copy_parents;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

/// one image referenced by a `FROM` line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DependencyImage {
    pub reference: String,
    /// the line names a build stage (`AS name`) or the reference is a
    /// stage defined elsewhere in the file; either way nothing external
    /// needs pulling for it
    pub is_internal_stage: bool,
}

#[derive(Debug, Default)]
pub struct ParsedDockerfile {
    images: Vec<DependencyImage>,
    stages: BTreeSet<String>,
    args: BTreeMap<String, Option<String>>,
}

fn from_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?i)FROM\s+(?:--\S+\s+)*(?P<image>\S+)(?:\s+AS\s+(?P<stage>\S+))?(?:\s.*)?$")
            .expect("hardcoded FROM pattern")
    })
}

impl ParsedDockerfile {
    /// parse a Dockerfile on disk; an unreadable file yields an empty
    /// analysis with a warning, never an error
    pub fn parse_file(path: &Path) -> ParsedDockerfile {
        match fs::read_to_string(path) {
            Ok(content) => Self::parse_lines(content.lines()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unable to read Dockerfile, skipping analysis");
                ParsedDockerfile::default()
            }
        }
    }

    pub fn parse_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> ParsedDockerfile {
        let re = from_line_regex();
        let mut raw: Vec<(String, bool)> = Vec::new();
        let mut stages = BTreeSet::new();
        let mut args = BTreeMap::new();
        for line in lines {
            if let Some(caps) = re.captures(line) {
                let image = caps["image"].to_string();
                let stage = caps.name("stage").map(|m| m.as_str().to_string());
                let has_stage = stage.is_some();
                if let Some(stage) = stage {
                    stages.insert(stage);
                }
                raw.push((image, has_stage));
            } else if let Some(rest) = line.strip_prefix("ARG ") {
                match rest.split_once('=') {
                    Some((name, default)) => {
                        args.insert(name.trim().to_string(), Some(default.trim().to_string()))
                    }
                    None => args.insert(rest.trim().to_string(), None),
                };
            }
        }
        let images = raw
            .into_iter()
            .map(|(reference, has_stage)| {
                let is_internal_stage = has_stage || stages.contains(&reference);
                DependencyImage {
                    reference,
                    is_internal_stage,
                }
            })
            .collect();
        let parsed = ParsedDockerfile {
            images,
            stages,
            args,
        };
        debug!(
            images = parsed.images.len(),
            stages = parsed.stages.len(),
            args = parsed.args.len(),
            "Dockerfile analyzed"
        );
        parsed
    }

    pub fn images(&self) -> &[DependencyImage] {
        &self.images
    }

    pub fn stages(&self) -> &BTreeSet<String> {
        &self.stages
    }

    /// declared `ARG` names with their optional defaults
    pub fn args(&self) -> &BTreeMap<String, Option<String>> {
        &self.args
    }

    /// image references that an external daemon would have to pull
    pub fn external_images(&self) -> BTreeSet<String> {
        self.images
            .iter()
            .filter(|i| !i.is_internal_stage)
            .map(|i| i.reference.clone())
            .collect()
    }

    /// external images with `$NAME` / `${NAME}` substituted; caller-provided
    /// build args override `ARG` defaults, unresolved tokens stay verbatim
    pub fn resolve_external_images(
        &self,
        build_args: &BTreeMap<String, String>,
    ) -> BTreeSet<String> {
        let mut resolved: BTreeMap<&str, &str> = BTreeMap::new();
        for (name, value) in build_args {
            resolved.insert(name, value);
        }
        for (name, default) in &self.args {
            if let Some(default) = default {
                resolved.entry(name).or_insert(default);
            }
        }
        self.external_images()
            .into_iter()
            .map(|image| substitute(&image, &resolved))
            .collect()
    }
}

fn substitute(image: &str, args: &BTreeMap<&str, &str>) -> String {
    if !image.contains('$') {
        return image.to_string();
    }
    let mut out = image.to_string();
    for (name, value) in args {
        out = out.replace(&format!("${{{}}}", name), value);
        out = out.replace(&format!("${}", name), value);
    }
    out
}
