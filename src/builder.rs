//! orchestration: wire the analyzer, the selector and the modifier
//! pipeline together, and hand the daemon boundary (image pulls, archive
//! streams) to the caller.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::archive::{self, ArchiveSummary};
use crate::config::ContextOptions;
use crate::dockerfile::ParsedDockerfile;
use crate::error::{Error, Result};
use crate::modify::dockerfile::{DockerfileLineRewriter, DockerfileModifier};
use crate::modify::{ContentModifier, ModifierPipeline};
use crate::select::{relative_target, ContextEntry, IgnoreLineFilter, Selector};

/// pulls images by reference; implemented by the external daemon client
pub trait ImagePuller: Send + Sync {
    fn pull(&self, reference: &str) -> std::result::Result<(), String>;
}

/// everything needed to assemble one build context
pub struct ContextBuilder {
    root: PathBuf,
    dockerfile: Option<PathBuf>,
    ignore_file: Option<PathBuf>,
    pre_lines: Vec<String>,
    post_lines: Vec<String>,
    line_filter: Option<IgnoreLineFilter>,
    always_include: BTreeSet<String>,
    always_include_dockerfile: bool,
    build_args: BTreeMap<String, String>,
    modifiers: Vec<Box<dyn ContentModifier>>,
    line_rewriters: Vec<Box<dyn DockerfileLineRewriter>>,
    max_prefetch_concurrency: usize,
}

impl ContextBuilder {
    pub fn new(root: impl Into<PathBuf>) -> ContextBuilder {
        ContextBuilder {
            root: root.into(),
            dockerfile: None,
            ignore_file: Some(PathBuf::from(".gitignore")),
            pre_lines: Vec::new(),
            post_lines: Vec::new(),
            line_filter: None,
            always_include: BTreeSet::new(),
            always_include_dockerfile: true,
            build_args: BTreeMap::new(),
            modifiers: Vec::new(),
            line_rewriters: Vec::new(),
            max_prefetch_concurrency: 4,
        }
    }

    /// apply options loaded from a config file
    pub fn from_options(root: impl Into<PathBuf>, options: &ContextOptions) -> ContextBuilder {
        let mut builder = ContextBuilder::new(root);
        builder.ignore_file = options.ignore_file.clone();
        builder.pre_lines = options.pre_ignore_lines.clone();
        builder.post_lines = options.post_ignore_lines.clone();
        builder.always_include = options.always_include.iter().cloned().collect();
        builder.build_args = options.build_args.clone();
        builder.max_prefetch_concurrency = options.max_prefetch_concurrency;
        builder
    }

    /// Dockerfile path, absolute (under the root) or relative to the root
    pub fn dockerfile(mut self, path: impl Into<PathBuf>) -> ContextBuilder {
        self.dockerfile = Some(path.into());
        self
    }

    /// ignore file relative to the root; default `.gitignore`
    pub fn ignore_file(mut self, path: impl Into<PathBuf>) -> ContextBuilder {
        self.ignore_file = Some(path.into());
        self
    }

    pub fn no_ignore_file(mut self) -> ContextBuilder {
        self.ignore_file = None;
        self
    }

    pub fn pre_ignore_lines<I, S>(mut self, lines: I) -> ContextBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pre_lines.extend(lines.into_iter().map(Into::into));
        self
    }

    pub fn post_ignore_lines<I, S>(mut self, lines: I) -> ContextBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.post_lines.extend(lines.into_iter().map(Into::into));
        self
    }

    pub fn ignore_line_filter(
        mut self,
        filter: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> ContextBuilder {
        self.line_filter = Some(Box::new(filter));
        self
    }

    pub fn always_include<I, S>(mut self, paths: I) -> ContextBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.always_include.extend(paths.into_iter().map(Into::into));
        self
    }

    /// whether the Dockerfile is forced into the context; default true
    pub fn always_include_dockerfile(mut self, yes: bool) -> ContextBuilder {
        self.always_include_dockerfile = yes;
        self
    }

    pub fn build_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> ContextBuilder {
        self.build_args.insert(name.into(), value.into());
        self
    }

    pub fn content_modifier(mut self, modifier: Box<dyn ContentModifier>) -> ContextBuilder {
        self.modifiers.push(modifier);
        self
    }

    pub fn dockerfile_line_rewriter(
        mut self,
        rewriter: Box<dyn DockerfileLineRewriter>,
    ) -> ContextBuilder {
        self.line_rewriters.push(rewriter);
        self
    }

    pub fn max_prefetch_concurrency(mut self, max: usize) -> ContextBuilder {
        self.max_prefetch_concurrency = max;
        self
    }

    fn dockerfile_paths(&self) -> Result<Option<(PathBuf, String)>> {
        let Some(configured) = &self.dockerfile else {
            return Ok(None);
        };
        let absolute = if configured.is_absolute() {
            configured.clone()
        } else {
            self.root.join(configured)
        };
        let target = relative_target(&self.root, &absolute)?;
        Ok(Some((absolute, target)))
    }

    /// run analysis and selection; the result can stream archives
    pub fn resolve(self) -> Result<ResolvedContext> {
        let dockerfile = self.dockerfile_paths()?;

        let external_images = match &dockerfile {
            Some((absolute, _)) => {
                ParsedDockerfile::parse_file(absolute).resolve_external_images(&self.build_args)
            }
            None => BTreeSet::new(),
        };

        let mut always_include = self.always_include.clone();
        if self.always_include_dockerfile {
            if let Some((_, target)) = &dockerfile {
                always_include.insert(target.clone());
            }
        }

        let mut selector = Selector::new(&self.root)
            .pre_lines(self.pre_lines.iter().cloned())
            .post_lines(self.post_lines.iter().cloned())
            .always_include(always_include);
        if let Some(ignore_file) = &self.ignore_file {
            selector = selector.ignore_file(ignore_file);
        }
        if let Some(filter) = self.line_filter {
            selector = selector.line_filter_boxed(filter);
        }
        let entries = selector.resolve()?;

        let mut pipeline = ModifierPipeline::new();
        if !self.line_rewriters.is_empty() {
            if let Some((absolute, _)) = &dockerfile {
                let relative_files: BTreeSet<String> =
                    entries.iter().map(|e| e.target.clone()).collect();
                pipeline.push(Box::new(DockerfileModifier::new(
                    absolute,
                    self.line_rewriters,
                    relative_files,
                )));
            }
        }
        for modifier in self.modifiers {
            pipeline.push(modifier);
        }

        debug!(
            entries = entries.len(),
            external_images = external_images.len(),
            "context ready"
        );
        Ok(ResolvedContext {
            entries,
            external_images,
            pipeline,
            max_prefetch_concurrency: self.max_prefetch_concurrency,
        })
    }

    /// resolve on a worker thread with a deadline; on timeout the work is
    /// abandoned and no partial result is surfaced
    pub fn resolve_with_timeout(self, timeout: Duration) -> Result<ResolvedContext>
    where
        Self: 'static,
    {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(self.resolve());
        });
        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(timeout)),
        }
    }
}

/// a resolved context: the file list, the images a daemon should pull, and
/// the modifier pipeline to run at archive time
pub struct ResolvedContext {
    entries: Vec<ContextEntry>,
    external_images: BTreeSet<String>,
    pipeline: ModifierPipeline,
    max_prefetch_concurrency: usize,
}

impl fmt::Debug for ResolvedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // the modifier pipeline holds closures and has no useful rendering
        f.debug_struct("ResolvedContext")
            .field("entries", &self.entries)
            .field("external_images", &self.external_images)
            .field("max_prefetch_concurrency", &self.max_prefetch_concurrency)
            .finish_non_exhaustive()
    }
}

impl ResolvedContext {
    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    pub fn external_images(&self) -> &BTreeSet<String> {
        &self.external_images
    }

    /// stream the gzip(TAR) archive into `sink`
    pub fn write_archive<W: Write>(&self, sink: W) -> Result<ArchiveSummary> {
        archive::write_archive(sink, &self.entries, &self.pipeline)
    }

    /// write the archive to an unlinked, rewound temp file
    pub fn archive_to_temp_file(&self) -> Result<(File, ArchiveSummary)> {
        archive::write_archive_to_temp_file(&self.entries, &self.pipeline)
    }

    /// pre-pull the external images so the build does not stall on them
    pub fn prefetch_images(&self, puller: &dyn ImagePuller) -> Vec<String> {
        prefetch_images(puller, &self.external_images, self.max_prefetch_concurrency)
    }
}

/// pull each image once, up to `max_concurrency` at a time. a failed pull
/// is logged and never cancels the others; the build may still succeed by
/// pulling lazily. returns the references that failed.
pub fn prefetch_images(
    puller: &dyn ImagePuller,
    images: &BTreeSet<String>,
    max_concurrency: usize,
) -> Vec<String> {
    let pullable: Vec<&String> = images.iter().filter(|i| i.as_str() != "scratch").collect();
    let failed = Mutex::new(Vec::new());
    for chunk in pullable.chunks(max_concurrency.max(1)) {
        thread::scope(|scope| {
            let failed = &failed;
            for &image in chunk {
                scope.spawn(move || {
                    debug!(image = %image, "pre-fetching dependency image");
                    if let Err(e) = puller.pull(image) {
                        warn!(image = %image, error = %e, "image pre-fetch failed, the build may pull it later");
                        failed
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(image.to_string());
                    }
                });
            }
        });
    }
    let mut failed = failed.into_inner().unwrap_or_else(PoisonError::into_inner);
    failed.sort();
    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dockerfile::copy_parents::CopyParentsEmulator;
    use crate::modify::lines::LinesModifier;
    use flate2::read::GzDecoder;
    use std::fs;
    use std::io::Read;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn unpack(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
        let mut archive = tar::Archive::new(GzDecoder::new(bytes));
        let mut out = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().to_string();
            let mut content = Vec::new();
            entry.read_to_end(&mut content).unwrap();
            out.push((path, content));
        }
        out
    }

    #[test]
    fn test_end_to_end_context() {
        let dir = tempdir().unwrap();
        write(dir.path(), "Dockerfile", "FROM alpine:3\nCOPY . .\n");
        write(dir.path(), ".gitignore", "*.log\n");
        write(dir.path(), "app.log", "noise");
        write(dir.path(), "src/main.rs", "fn main() {}");

        let context = ContextBuilder::new(dir.path())
            .dockerfile("Dockerfile")
            .resolve()
            .unwrap();

        let targets: Vec<&str> = context.entries().iter().map(|e| e.target.as_str()).collect();
        assert_eq!(targets, vec![".gitignore", "Dockerfile", "src/main.rs"]);
        assert_eq!(
            context.external_images(),
            &BTreeSet::from(["alpine:3".to_string()])
        );

        let mut sink = Vec::new();
        let summary = context.write_archive(&mut sink).unwrap();
        assert_eq!(summary.entries, 3);
        let names: Vec<String> = unpack(&sink).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec![".gitignore", "Dockerfile", "src/main.rs"]);
    }

    #[test]
    fn test_resolved_context_debug() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.txt", "");

        let context = ContextBuilder::new(dir.path()).resolve().unwrap();
        let rendered = format!("{:?}", context);
        assert!(rendered.contains("entries"));
        assert!(rendered.contains("external_images"));
    }

    #[test]
    fn test_dockerfile_always_included() {
        let dir = tempdir().unwrap();
        write(dir.path(), "Dockerfile", "FROM alpine:3\n");
        write(dir.path(), "other", "");

        let context = ContextBuilder::new(dir.path())
            .dockerfile("Dockerfile")
            .pre_ignore_lines(["*"])
            .resolve()
            .unwrap();
        let targets: Vec<&str> = context.entries().iter().map(|e| e.target.as_str()).collect();
        assert_eq!(targets, vec!["Dockerfile"]);
    }

    #[test]
    fn test_dockerfile_outside_root_rejected() {
        let dir = tempdir().unwrap();
        let err = ContextBuilder::new(dir.path().join("ctx"))
            .dockerfile(dir.path().join("elsewhere/Dockerfile"))
            .resolve()
            .unwrap_err();
        assert!(matches!(err, Error::OutsideRoot(_)));
    }

    #[test]
    fn test_copy_parents_rewrite_in_archive() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "Dockerfile",
            "# syntax=docker/dockerfile:1-labs\nFROM alpine:3\nCOPY --parents **/pom.xml ./\n",
        );
        write(dir.path(), "pom.xml", "<project/>");
        write(dir.path(), "a/pom.xml", "<project/>");

        let context = ContextBuilder::new(dir.path())
            .dockerfile("Dockerfile")
            .no_ignore_file()
            .dockerfile_line_rewriter(Box::new(CopyParentsEmulator))
            .resolve()
            .unwrap();

        let mut sink = Vec::new();
        context.write_archive(&mut sink).unwrap();
        let dockerfile = unpack(&sink)
            .into_iter()
            .find(|(n, _)| n == "Dockerfile")
            .unwrap()
            .1;
        assert_eq!(
            String::from_utf8(dockerfile).unwrap(),
            "# syntax=docker/dockerfile:1-labs\nFROM alpine:3\nCOPY a/pom.xml ./a/pom.xml\nCOPY pom.xml ./pom.xml"
        );
    }

    #[test]
    fn test_manifest_pruning_modifier() {
        let dir = tempdir().unwrap();
        write(dir.path(), "Dockerfile", "FROM alpine:3\n");
        write(
            dir.path(),
            "pom.xml",
            "<module>app</module>\n<module>tooling</module>\n",
        );

        let context = ContextBuilder::new(dir.path())
            .dockerfile("Dockerfile")
            .content_modifier(Box::new(
                LinesModifier::new(
                    |_, target| target == "pom.xml",
                    |lines| lines.into_iter().filter(|l| !l.contains("tooling")).collect(),
                )
                .identical_by_line_count(),
            ))
            .resolve()
            .unwrap();

        let mut sink = Vec::new();
        context.write_archive(&mut sink).unwrap();
        let pom = unpack(&sink)
            .into_iter()
            .find(|(n, _)| n == "pom.xml")
            .unwrap()
            .1;
        assert_eq!(String::from_utf8(pom).unwrap(), "<module>app</module>");
    }

    #[test]
    fn test_build_args_feed_resolution() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "Dockerfile",
            "ARG BASE_IMAGE=alpine:3\nFROM ${BASE_IMAGE}\n",
        );

        let context = ContextBuilder::new(dir.path())
            .dockerfile("Dockerfile")
            .build_arg("BASE_IMAGE", "debian:12")
            .resolve()
            .unwrap();
        assert_eq!(
            context.external_images(),
            &BTreeSet::from(["debian:12".to_string()])
        );
    }

    struct RecordingPuller {
        calls: AtomicUsize,
        fail: &'static str,
    }

    impl ImagePuller for RecordingPuller {
        fn pull(&self, reference: &str) -> std::result::Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if reference == self.fail {
                Err("no such image".to_string())
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_prefetch_bulkhead() {
        let puller = RecordingPuller {
            calls: AtomicUsize::new(0),
            fail: "broken:1",
        };
        let images = BTreeSet::from([
            "alpine:3".to_string(),
            "broken:1".to_string(),
            "debian:12".to_string(),
        ]);
        let failed = prefetch_images(&puller, &images, 2);
        // the failure never cancels the siblings
        assert_eq!(puller.calls.load(Ordering::SeqCst), 3);
        assert_eq!(failed, vec!["broken:1".to_string()]);
    }

    #[test]
    fn test_prefetch_skips_scratch() {
        let puller = RecordingPuller {
            calls: AtomicUsize::new(0),
            fail: "",
        };
        let images = BTreeSet::from(["scratch".to_string()]);
        assert!(prefetch_images(&puller, &images, 2).is_empty());
        assert_eq!(puller.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_resolve_with_generous_timeout() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.txt", "");

        let context = ContextBuilder::new(dir.path().to_path_buf())
            .resolve_with_timeout(Duration::from_secs(60))
            .unwrap();
        assert_eq!(context.entries().len(), 1);
    }

    #[test]
    fn test_zero_timeout_fails() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.txt", "");

        let err = ContextBuilder::new(dir.path().to_path_buf())
            .resolve_with_timeout(Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }
}
