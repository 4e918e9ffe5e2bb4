//! gzip-compressed TAR output for the selected context.
//!
//! entries are appended in the order given and streamed: pass-through
//! files go through a buffered reader, only modifier-produced replacements
//! are held in memory. symlinks keep their literal target, regular files
//! keep the executable bit (normalized to 0755/0644).

use std::fs::{self, File};
use std::io::{self, BufReader, Seek, SeekFrom, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;

use crate::error::{Error, IoResultExt, Result};
use crate::modify::ModifierPipeline;
use crate::select::ContextEntry;

/// counts reported after a finished archive
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: u64,
    /// uncompressed content bytes
    pub bytes: u64,
}

/// incremental gzip(TAR) writer over any sink
pub struct ArchiveWriter<W: Write> {
    builder: tar::Builder<GzEncoder<W>>,
    summary: ArchiveSummary,
}

impl<W: Write> ArchiveWriter<W> {
    pub fn new(sink: W) -> ArchiveWriter<W> {
        let encoder = GzEncoder::new(sink, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.follow_symlinks(false);
        ArchiveWriter {
            builder,
            summary: ArchiveSummary::default(),
        }
    }

    /// append one entry, consulting the modifier pipeline for replacement
    /// content
    pub fn append(&mut self, entry: &ContextEntry, modifiers: &ModifierPipeline) -> Result<()> {
        let meta = fs::symlink_metadata(&entry.source).with_path(&entry.source)?;
        let file_type = meta.file_type();

        if file_type.is_symlink() {
            let link_target = fs::read_link(&entry.source).with_path(&entry.source)?;
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            header.set_mode(0o777);
            header.set_mtime(mtime(&meta));
            self.builder
                .append_link(&mut header, &entry.target, &link_target)
                .with_path(&entry.source)?;
            self.summary.entries += 1;
            return Ok(());
        }

        if !file_type.is_file() {
            // directories (or anything else odd) become a bare header
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            header.set_mode(0o755);
            header.set_mtime(mtime(&meta));
            self.builder
                .append_data(&mut header, format!("{}/", entry.target), io::empty())
                .with_path(&entry.source)?;
            self.summary.entries += 1;
            return Ok(());
        }

        let executable = meta.permissions().mode() & 0o111 != 0;
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(if executable { 0o755 } else { 0o644 });
        header.set_mtime(mtime(&meta));

        match modifiers.apply(&entry.source, &entry.target)? {
            Some(bytes) => {
                debug!(target = %entry.target, bytes = bytes.len(), "content replaced by modifier");
                header.set_size(bytes.len() as u64);
                self.builder
                    .append_data(&mut header, &entry.target, bytes.as_slice())
                    .with_path(&entry.source)?;
                self.summary.bytes += bytes.len() as u64;
            }
            None => {
                header.set_size(meta.len());
                let reader = BufReader::new(File::open(&entry.source).with_path(&entry.source)?);
                self.builder
                    .append_data(&mut header, &entry.target, reader)
                    .with_path(&entry.source)?;
                self.summary.bytes += meta.len();
            }
        }
        self.summary.entries += 1;
        Ok(())
    }

    /// flush the tar trailer and the gzip stream
    pub fn finish(self) -> Result<ArchiveSummary> {
        let encoder = self.builder.into_inner().map_err(Error::ArchiveFinish)?;
        encoder.finish().map_err(Error::ArchiveFinish)?;
        Ok(self.summary)
    }
}

fn mtime(meta: &fs::Metadata) -> u64 {
    meta.mtime().max(0) as u64
}

/// write a whole entry list to `sink` and finish the stream
pub fn write_archive<W: Write>(
    sink: W,
    entries: &[ContextEntry],
    modifiers: &ModifierPipeline,
) -> Result<ArchiveSummary> {
    let mut writer = ArchiveWriter::new(sink);
    for entry in entries {
        writer.append(entry, modifiers)?;
    }
    writer.finish()
}

/// write the archive to an unlinked temp file and rewind it, for callers
/// that need a seekable stream
pub fn write_archive_to_temp_file(
    entries: &[ContextEntry],
    modifiers: &ModifierPipeline,
) -> Result<(File, ArchiveSummary)> {
    let mut file = tempfile::tempfile().with_path(std::env::temp_dir())?;
    let summary = write_archive(&mut file, entries, modifiers)?;
    file.seek(SeekFrom::Start(0)).with_path(std::env::temp_dir())?;
    Ok((file, summary))
}

/// convenience for building entries by hand
pub fn entry(source: impl Into<std::path::PathBuf>, target: impl Into<String>) -> ContextEntry {
    ContextEntry {
        source: source.into(),
        target: target.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::collections::BTreeMap;
    use std::io::Read;
    use tempfile::tempdir;

    fn unpack(bytes: &[u8]) -> BTreeMap<String, (tar::EntryType, u32, Vec<u8>, Option<String>)> {
        let mut archive = tar::Archive::new(GzDecoder::new(bytes));
        let mut out = BTreeMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().to_string();
            let kind = entry.header().entry_type();
            let mode = entry.header().mode().unwrap();
            let link = entry
                .link_name()
                .unwrap()
                .map(|l| l.to_string_lossy().to_string());
            let mut content = Vec::new();
            entry.read_to_end(&mut content).unwrap();
            out.insert(path, (kind, mode, content, link));
        }
        out
    }

    #[test]
    fn test_round_trip_preserves_bytes() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hello world").unwrap();

        let mut sink = Vec::new();
        let entries = vec![entry(dir.path().join("a.txt"), "a.txt")];
        let summary = write_archive(&mut sink, &entries, &ModifierPipeline::new()).unwrap();
        assert_eq!(summary.entries, 1);
        assert_eq!(summary.bytes, 11);

        let unpacked = unpack(&sink);
        let (kind, mode, content, _) = &unpacked["a.txt"];
        assert_eq!(*kind, tar::EntryType::Regular);
        assert_eq!(*mode, 0o644);
        assert_eq!(content, b"hello world");
    }

    #[test]
    fn test_executable_bit() {
        let dir = tempdir().unwrap();
        let script = dir.path().join("run.sh");
        fs::write(&script, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o750)).unwrap();

        let mut sink = Vec::new();
        let entries = vec![entry(&script, "run.sh")];
        write_archive(&mut sink, &entries, &ModifierPipeline::new()).unwrap();

        let unpacked = unpack(&sink);
        assert_eq!(unpacked["run.sh"].1, 0o755);
    }

    #[test]
    fn test_symlink_keeps_literal_target() {
        let dir = tempdir().unwrap();
        std::os::unix::fs::symlink("../outside/real.txt", dir.path().join("link")).unwrap();

        let mut sink = Vec::new();
        let entries = vec![entry(dir.path().join("link"), "link")];
        write_archive(&mut sink, &entries, &ModifierPipeline::new()).unwrap();

        let unpacked = unpack(&sink);
        let (kind, _, content, link) = &unpacked["link"];
        assert_eq!(*kind, tar::EntryType::Symlink);
        assert!(content.is_empty());
        assert_eq!(link.as_deref(), Some("../outside/real.txt"));
    }

    #[test]
    fn test_directory_entry() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let mut sink = Vec::new();
        let entries = vec![entry(dir.path().join("sub"), "sub")];
        write_archive(&mut sink, &entries, &ModifierPipeline::new()).unwrap();

        let unpacked = unpack(&sink);
        assert_eq!(unpacked["sub/"].0, tar::EntryType::Directory);
    }

    #[test]
    fn test_modifier_replaces_content() {
        use crate::modify::lines::LinesModifier;

        let dir = tempdir().unwrap();
        fs::write(dir.path().join("pom.xml"), "a\nremove me\nb\n").unwrap();

        let mut pipeline = ModifierPipeline::new();
        pipeline.push(Box::new(
            LinesModifier::new(
                |_, target| target == "pom.xml",
                |lines| lines.into_iter().filter(|l| !l.contains("remove")).collect(),
            )
            .identical_by_line_count(),
        ));

        let mut sink = Vec::new();
        let entries = vec![entry(dir.path().join("pom.xml"), "pom.xml")];
        write_archive(&mut sink, &entries, &pipeline).unwrap();

        let unpacked = unpack(&sink);
        assert_eq!(unpacked["pom.xml"].2, b"a\nb");
    }

    #[test]
    fn test_long_entry_names() {
        let dir = tempdir().unwrap();
        let long = "a/".repeat(80) + "file.txt";
        let source = dir.path().join("file.txt");
        fs::write(&source, "x").unwrap();

        let mut sink = Vec::new();
        let entries = vec![entry(&source, long.clone())];
        write_archive(&mut sink, &entries, &ModifierPipeline::new()).unwrap();

        let unpacked = unpack(&sink);
        assert!(unpacked.contains_key(&long));
    }

    #[test]
    fn test_temp_file_is_rewound() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "x").unwrap();

        let entries = vec![entry(dir.path().join("a.txt"), "a.txt")];
        let (mut file, summary) =
            write_archive_to_temp_file(&entries, &ModifierPipeline::new()).unwrap();
        assert_eq!(summary.entries, 1);

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).unwrap();
        let unpacked = unpack(&bytes);
        assert!(unpacked.contains_key("a.txt"));
    }
}
