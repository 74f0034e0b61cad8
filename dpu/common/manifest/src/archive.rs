// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::{fmt, io::Read};

use anyhow::{Context, Result};
use tar::EntryType as TarEntryType;

/// The kind of an archive member as found in the archive.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    HardLink,
    /// Device nodes, fifos and anything else; the name is for diagnostics.
    Other(String),
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::File => write!(f, "file"),
            EntryKind::Dir => write!(f, "dir"),
            EntryKind::Symlink => write!(f, "symlink"),
            EntryKind::HardLink => write!(f, "hardlink"),
            EntryKind::Other(name) => write!(f, "{name}"),
        }
    }
}

/// One member of an archive stream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArchiveEntry {
    /// Member name as stored in the archive, before normalization.
    pub name: String,
    pub kind: EntryKind,
    /// Permission bits. Meaningless for symlinks.
    pub mode: u32,
    /// Symlink target. Only set for symlinks.
    pub link_target: Option<String>,
}

impl ArchiveEntry {
    /// Converts a tar member. The mode is reduced to its permission bits.
    pub fn from_tar<R: Read>(entry: &tar::Entry<R>) -> Result<Self> {
        let header = entry.header();
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let kind = match header.entry_type() {
            TarEntryType::Regular | TarEntryType::Continuous | TarEntryType::GNUSparse => {
                EntryKind::File
            }
            TarEntryType::Directory => EntryKind::Dir,
            TarEntryType::Symlink => EntryKind::Symlink,
            TarEntryType::Link => EntryKind::HardLink,
            other => EntryKind::Other(format!("{other:?}").to_lowercase()),
        };
        let mode = header
            .mode()
            .with_context(|| format!("Invalid mode for {name}"))?
            & 0o7777;
        let link_target = if kind == EntryKind::Symlink {
            let target = entry
                .link_name_bytes()
                .with_context(|| format!("Symlink {name} has no target"))?;
            Some(String::from_utf8_lossy(&target).into_owned())
        } else {
            None
        };

        Ok(Self {
            name,
            kind,
            mode,
            link_target,
        })
    }
}

/// Iterates over the members of a tar archive in stream order.
///
/// The archive is read forward only, so this works on top of decompression
/// pipelines.
pub fn tar_entries<'a, R: Read + 'a>(
    archive: &'a mut tar::Archive<R>,
) -> Result<impl Iterator<Item = Result<ArchiveEntry>> + 'a> {
    Ok(archive
        .entries()
        .context("Failed to read tar archive")?
        .map(|entry| ArchiveEntry::from_tar(&entry.context("Failed to read tar entry")?)))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::testing::TarFixture;

    fn build_tar() -> Result<Vec<u8>> {
        let mut fixture = TarFixture::new();
        fixture
            .dir("./usr/", 0o40755)?
            .file("./usr/foo", 0o644)?
            .symlink("./usr/link", "foo")?
            .append("./usr/hard", tar::EntryType::Link, 0o644, Some("./usr/foo"))?
            .append("./usr/fifo", tar::EntryType::Fifo, 0o600, None)?;
        fixture.into_bytes()
    }

    #[test]
    fn converts_tar_members() -> Result<()> {
        let data = build_tar()?;
        let mut archive = tar::Archive::new(data.as_slice());
        let entries = tar_entries(&mut archive)?.collect::<Result<Vec<_>>>()?;

        assert_eq!(
            entries,
            vec![
                ArchiveEntry {
                    name: "./usr/".into(),
                    kind: EntryKind::Dir,
                    mode: 0o755,
                    link_target: None,
                },
                ArchiveEntry {
                    name: "./usr/foo".into(),
                    kind: EntryKind::File,
                    mode: 0o644,
                    link_target: None,
                },
                ArchiveEntry {
                    name: "./usr/link".into(),
                    kind: EntryKind::Symlink,
                    mode: 0o777,
                    link_target: Some("foo".into()),
                },
                ArchiveEntry {
                    name: "./usr/hard".into(),
                    kind: EntryKind::HardLink,
                    mode: 0o644,
                    link_target: None,
                },
                ArchiveEntry {
                    name: "./usr/fifo".into(),
                    kind: EntryKind::Other("fifo".into()),
                    mode: 0o600,
                    link_target: None,
                },
            ]
        );
        Ok(())
    }
}
