// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::{bail, Context, Result};
use bzip2::write::BzEncoder;
use flate2::write::GzEncoder;
use processes::ChildGuard;
use std::{
    fs::File,
    io::Write,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    process::{ChildStdin, Command, Stdio},
};
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::Compression;

enum Sink {
    Plain(File),
    Gzip(GzEncoder<File>),
    Bzip2(BzEncoder<File>),
    Zstd(zstd::stream::write::Encoder<'static, File>),
    Process(ChildStdin),
}

impl Sink {
    fn finish(self) -> Result<()> {
        match self {
            Sink::Plain(mut file) => file.flush()?,
            Sink::Gzip(encoder) => {
                encoder.finish()?;
            }
            Sink::Bzip2(encoder) => {
                encoder.finish()?;
            }
            Sink::Zstd(encoder) => {
                encoder.finish()?;
            }
            Sink::Process(stdin) => drop(stdin),
        }
        Ok(())
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Sink::Plain(w) => w.write(buf),
            Sink::Gzip(w) => w.write(buf),
            Sink::Bzip2(w) => w.write(buf),
            Sink::Zstd(w) => w.write(buf),
            Sink::Process(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Sink::Plain(w) => w.flush(),
            Sink::Gzip(w) => w.flush(),
            Sink::Bzip2(w) => w.flush(),
            Sink::Zstd(w) => w.flush(),
            Sink::Process(w) => w.flush(),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MemberKind {
    File,
    Dir,
    Symlink,
}

/// A filesystem entry about to be added to a tarball. A filter passed to
/// [`TarballWriter::append_tree`] may rewrite any of the public fields.
#[derive(Clone, Debug)]
pub struct Member {
    pub name: String,
    pub kind: MemberKind,
    pub mode: u32,
    pub mtime: u64,
    /// Only meaningful for symlinks.
    pub link_target: PathBuf,
    source: PathBuf,
}

impl Member {
    /// The filesystem path the member was read from.
    pub fn source(&self) -> &Path {
        &self.source
    }
}

/// Writes a tarball with reproducible ownership: members are added in
/// sorted order, owned by root:root, and symlinks are stored as symlinks.
pub struct TarballWriter {
    builder: tar::Builder<Sink>,
    compressor: Option<ChildGuard>,
    path: PathBuf,
}

impl TarballWriter {
    /// Creates `path`, compressed with `compression` (`None` for a plain
    /// tar).
    pub fn create(path: &Path, compression: Option<Compression>) -> Result<Self> {
        let file =
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        let mut compressor = None;
        let sink = match compression {
            None => Sink::Plain(file),
            Some(Compression::Gzip) => {
                Sink::Gzip(GzEncoder::new(file, flate2::Compression::default()))
            }
            Some(Compression::Bzip2) => {
                Sink::Bzip2(BzEncoder::new(file, bzip2::Compression::best()))
            }
            Some(Compression::Zstd) => Sink::Zstd(zstd::stream::write::Encoder::new(file, 0)?),
            Some(other) => {
                let tool = other
                    .external_tool()
                    .with_context(|| format!("No compressor for {other}"))?;
                let mut guard = ChildGuard::spawn(
                    Command::new(tool)
                        .stdin(Stdio::piped())
                        .stdout(Stdio::from(file)),
                )?;
                let stdin = guard.take_stdin()?;
                compressor = Some(guard);
                Sink::Process(stdin)
            }
        };

        let mut builder = tar::Builder::new(sink);
        builder.follow_symlinks(false);
        Ok(Self {
            builder,
            compressor,
            path: path.to_owned(),
        })
    }

    /// Adds the tree at `root` under the member name `prefix`.
    ///
    /// `filter` sees each member before it is written and returns false to
    /// leave it out. Leaving out a directory leaves out its contents too. An
    /// empty `prefix` leaves out the root itself.
    #[instrument(skip_all, fields(root = %root.display(), prefix = %prefix))]
    pub fn append_tree(
        &mut self,
        root: &Path,
        prefix: &str,
        mut filter: impl FnMut(&mut Member) -> bool,
    ) -> Result<()> {
        let mut walker = WalkDir::new(root).sort_by_file_name().into_iter();
        while let Some(entry) = walker.next() {
            let entry = entry?;
            let relative = entry.path().strip_prefix(root)?;
            let name = member_name(prefix, relative);
            if name.is_empty() {
                continue;
            }

            let metadata = entry
                .metadata()
                .with_context(|| format!("Failed to stat {}", entry.path().display()))?;
            let file_type = entry.file_type();
            let kind = if file_type.is_dir() {
                MemberKind::Dir
            } else if file_type.is_symlink() {
                MemberKind::Symlink
            } else if file_type.is_file() {
                MemberKind::File
            } else {
                bail!("Unsupported file type at {}", entry.path().display());
            };
            let link_target = if kind == MemberKind::Symlink {
                std::fs::read_link(entry.path())?
            } else {
                PathBuf::new()
            };

            let mut member = Member {
                name,
                kind,
                mode: metadata.mode() & 0o7777,
                mtime: metadata.mtime().max(0) as u64,
                link_target,
                source: entry.path().to_owned(),
            };
            if !filter(&mut member) {
                debug!(name = %member.name, "Filtered out");
                if kind == MemberKind::Dir {
                    walker.skip_current_dir();
                }
                continue;
            }
            self.append_member(&member)?;
        }
        Ok(())
    }

    fn append_member(&mut self, member: &Member) -> Result<()> {
        let mut header = tar::Header::new_gnu();
        header.set_mode(member.mode);
        header.set_mtime(member.mtime);
        header.set_uid(0);
        header.set_gid(0);
        header.set_username("root")?;
        header.set_groupname("root")?;

        match member.kind {
            MemberKind::File => {
                let file = File::open(&member.source)
                    .with_context(|| format!("Failed to open {}", member.source.display()))?;
                header.set_entry_type(tar::EntryType::Regular);
                header.set_size(file.metadata()?.len());
                self.builder.append_data(&mut header, &member.name, file)?;
            }
            MemberKind::Dir => {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_size(0);
                self.builder
                    .append_data(&mut header, &member.name, std::io::empty())?;
            }
            MemberKind::Symlink => {
                header.set_entry_type(tar::EntryType::Symlink);
                header.set_size(0);
                self.builder
                    .append_link(&mut header, &member.name, &member.link_target)?;
            }
        }
        Ok(())
    }

    /// Writes the end-of-archive marker, flushes the compressor and waits for
    /// it. Returns the path of the written tarball.
    pub fn finish(self) -> Result<PathBuf> {
        let Self {
            builder,
            compressor,
            path,
        } = self;
        let sink = builder.into_inner()?;
        sink.finish()?;
        if let Some(compressor) = compressor {
            compressor.wait_and_check()?;
        }
        Ok(path)
    }
}

fn member_name(prefix: &str, relative: &Path) -> String {
    let relative = relative.to_string_lossy();
    match (prefix.is_empty(), relative.is_empty()) {
        (true, _) => relative.into_owned(),
        (false, true) => prefix.to_owned(),
        (false, false) => format!("{}/{}", prefix.trim_end_matches('/'), relative),
    }
}
