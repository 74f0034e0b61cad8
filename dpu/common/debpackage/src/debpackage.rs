// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

mod control;

use anyhow::{bail, ensure, Context, Result};
use manifest::{normalize_path, ArchiveEntry, EntryWalker, ManifestCheckError};
use std::{
    collections::BTreeMap,
    fs::File,
    io::SeekFrom::Start,
    io::{Read, Seek},
    path::{Path, PathBuf},
};
use tarball::{CompressedTarball, Compression};
use tracing::debug;

pub use crate::control::parse_control;

const AR_MAGIC: &[u8] = b"!<arch>\n";
const AR_HEADER_LEN: u64 = 60;
const CORRUPTED: &str = "Corrupted .deb file";

#[derive(Clone, Debug)]
struct Member {
    name: String,
    offset: u64,
    size: u64,
}

/// Works with Debian binary package files (.deb).
///
/// A .deb is an `ar` archive holding `debian-binary`, a control tarball and
/// a data tarball. See deb(5).
pub struct DebPackage {
    path: PathBuf,
    file: File,
    members: Vec<Member>,
}

impl DebPackage {
    /// Opens a Debian binary package file and indexes its members.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let size = file.metadata()?.len();

        expect_magic(&mut file, 0, AR_MAGIC).context(CORRUPTED)?;

        let mut members = Vec::new();
        let mut offset = AR_MAGIC.len() as u64;
        while offset < size {
            let member = read_member_header(&mut file, offset, size).context(CORRUPTED)?;
            debug!(name = %member.name, size = member.size, "Found ar member");
            // Member data is padded to an even length.
            offset = member.offset + member.size + member.size % 2;
            members.push(member);
        }

        ensure!(
            members.first().map(|m| m.name.as_str()) == Some("debian-binary"),
            "{} is not a Debian package: debian-binary must be the first member",
            path.display()
        );

        Ok(Self {
            path: path.to_owned(),
            file,
            members,
        })
    }

    /// Returns the names of the ar members, in archive order.
    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.name.as_str())
    }

    fn member_reader(&mut self, name: &str) -> Result<impl Sized + Read + '_> {
        let member = self
            .members
            .iter()
            .find(|m| m.name == name)
            .with_context(|| format!("{} has no member {}", self.path.display(), name))?
            .clone();
        self.file.seek(Start(member.offset))?;
        Ok((&mut self.file).take(member.size))
    }

    /// Returns the format version from `debian-binary`, e.g. "2.0".
    pub fn version(&mut self) -> Result<String> {
        let mut version = String::new();
        self.member_reader("debian-binary")?
            .read_to_string(&mut version)
            .context("debian-binary is not valid UTF-8")?;
        Ok(version.trim().to_string())
    }

    fn open_tarball(&mut self, stem: &str) -> Result<CompressedTarball<'_>> {
        let (name, compression) = self
            .members
            .iter()
            .find_map(|m| {
                let extension = m.name.strip_prefix(stem)?;
                if extension.is_empty() {
                    return Some((m.name.clone(), None));
                }
                let compression = Compression::from_extension(extension.strip_prefix('.')?)?;
                Some((m.name.clone(), Some(compression)))
            })
            .with_context(|| format!("{} has no {stem} member", self.path.display()))?;
        debug!(name = %name, ?compression, "Opening member tarball");
        CompressedTarball::from_reader(self.member_reader(&name)?, compression)
    }

    /// Opens the `data.tar` member, which holds the installed files.
    pub fn data_tarball(&mut self) -> Result<CompressedTarball<'_>> {
        self.open_tarball("data.tar")
    }

    /// Opens the `control.tar` member, which holds the package metadata.
    pub fn control_tarball(&mut self) -> Result<CompressedTarball<'_>> {
        self.open_tarball("control.tar")
    }

    /// Returns the fields of the `control` file, with lower-cased keys.
    pub fn control(&mut self) -> Result<BTreeMap<String, String>> {
        let mut tarball = self.control_tarball()?;
        let mut text = None;
        for entry in tarball.archive().entries()? {
            let mut entry = entry?;
            let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            if normalize_path(&name) == Some("control") {
                let mut contents = String::new();
                entry.read_to_string(&mut contents)?;
                text = Some(contents);
                break;
            }
        }
        drop(tarball);
        match text {
            Some(text) => parse_control(&text, true),
            None => bail!("{} has no control file", self.path.display()),
        }
    }
}

impl EntryWalker for DebPackage {
    /// Walks the members of the data tarball.
    fn walk(
        &mut self,
        visit: &mut dyn FnMut(&ArchiveEntry) -> Result<(), ManifestCheckError>,
    ) -> Result<(), ManifestCheckError> {
        let mut tarball = self.data_tarball()?;
        let result = tarball.archive().walk(visit);
        tarball.finish_with(result)
    }
}

fn expect_magic(file: &mut File, offset: u64, want: &[u8]) -> Result<()> {
    file.seek(Start(offset))?;
    let mut got = vec![0_u8; want.len()];
    file.read_exact(&mut got)?;
    if got != want {
        bail!(
            "Bad magic: got {:?}, want {:?}",
            String::from_utf8_lossy(&got),
            String::from_utf8_lossy(want)
        );
    }
    Ok(())
}

fn read_member_header(file: &mut File, offset: u64, size: u64) -> Result<Member> {
    file.seek(Start(offset))?;
    let mut header = [0_u8; AR_HEADER_LEN as usize];
    file.read_exact(&mut header)
        .with_context(|| format!("Truncated member header at offset {offset}"))?;
    ensure!(
        &header[58..60] == b"`\n",
        "Bad member header terminator at offset {offset}"
    );

    // GNU ar terminates names with '/'.
    let name = std::str::from_utf8(&header[0..16])?
        .trim_end()
        .trim_end_matches('/')
        .to_string();
    let field = std::str::from_utf8(&header[48..58])?.trim();
    let member_size: u64 = field
        .parse()
        .with_context(|| format!("Invalid size {field:?} for member {name}"))?;

    let data_offset = offset + AR_HEADER_LEN;
    ensure!(
        data_offset + member_size <= size,
        "Member {name} is truncated"
    );
    Ok(Member {
        name,
        offset: data_offset,
        size: member_size,
    })
}
