//! buildctx - minimal container build contexts
//!
//! assembles the file set transferred to an image build daemon: a
//! gitignore-compatible rule engine decides which files under a project
//! root belong to the context, a content-modifier pipeline rewrites files
//! in transit (notably the Dockerfile itself), and the result streams out
//! as a gzip-compressed TAR archive.
//!
//! # Core concepts
//!
//! - **RuleSet**: ordered gitignore rules (negation, directory-only, `**`)
//! - **Selector**: parallel tree walk producing (source, target) entries
//! - **ModifierPipeline**: per-entry content rewrites at archive time
//! - **ArchiveWriter**: incremental gzip(TAR), symlink and exec-bit aware
//! - **ParsedDockerfile**: FROM/ARG analysis for base-image pre-fetching
//!
//! # Example usage
//!
//! ```no_run
//! use buildctx::ContextBuilder;
//! use std::path::Path;
//!
//! let context = ContextBuilder::new(Path::new("/path/to/project"))
//!     .dockerfile("Dockerfile")
//!     .post_ignore_lines([".git/**", "*.md"])
//!     .resolve()
//!     .unwrap();
//!
//! let mut sink = Vec::new();
//! context.write_archive(&mut sink).unwrap();
//! ```

mod archive;
mod builder;
mod config;
mod error;
mod select;

pub mod dockerfile;
pub mod ignore;
pub mod modify;

pub use archive::{write_archive, write_archive_to_temp_file, ArchiveSummary, ArchiveWriter};
pub use builder::{prefetch_images, ContextBuilder, ImagePuller, ResolvedContext};
pub use config::ContextOptions;
pub use dockerfile::copy_parents::{CopyParentsEmulator, GlobMatcher};
pub use dockerfile::{DependencyImage, ParsedDockerfile};
pub use error::{Error, IoResultExt, Result};
pub use ignore::{IgnoreRule, MatchOutcome, RuleSet};
pub use modify::dockerfile::{DockerfileLineRewriter, DockerfileModifier};
pub use modify::lines::LinesModifier;
pub use modify::{ContentModifier, ModifierPipeline};
pub use select::{ContextEntry, Selector};
