// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::{bail, Context, Result};
use bzip2::read::MultiBzDecoder;
use flate2::read::GzDecoder;
use processes::ChildGuard;
use std::{
    fs::File,
    io::{Read, Seek},
    path::Path,
    process::{Command, Stdio},
};
use tracing::debug;

use crate::Compression;

/// A tarball opened for a single forward pass, possibly through a
/// decompression pipeline.
///
/// Gzip, bzip2 and zstd are decoded in-process. xz and lzma are decoded by
/// an external program whose stdout feeds the archive; the program is owned
/// by the tarball and is terminated if the tarball is dropped before
/// [`CompressedTarball::finish`].
pub struct CompressedTarball<'a> {
    // Declared before `decompressor` so that the pipe is closed first on drop.
    archive: tar::Archive<Box<dyn Read + 'a>>,
    decompressor: Option<ChildGuard>,
}

impl CompressedTarball<'static> {
    /// Opens a tarball file. If `compression` is `None`, it is guessed from
    /// the file name.
    pub fn open(path: &Path, compression: Option<Compression>) -> Result<Self> {
        let compression = match compression {
            Some(compression) => Some(compression),
            None => Compression::guess_from_path(path)?,
        };
        debug!(path = %path.display(), ?compression, "Opening tarball");
        let file =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

        match compression.and_then(Compression::external_tool) {
            Some(tool) => Self::with_external_tool(tool, file),
            None => Self::decode(Box::new(file), compression),
        }
    }
}

impl<'a> CompressedTarball<'a> {
    /// Reads a tarball from an arbitrary stream. `None` means uncompressed.
    ///
    /// For compressions handled by an external program the stream is first
    /// spooled to an anonymous temporary file.
    pub fn from_reader<R: Read + 'a>(
        mut reader: R,
        compression: Option<Compression>,
    ) -> Result<Self> {
        match compression.and_then(Compression::external_tool) {
            Some(tool) => {
                let mut spool = tempfile::tempfile()?;
                std::io::copy(&mut reader, &mut spool).context("Failed to spool tarball")?;
                spool.rewind()?;
                Self::with_external_tool(tool, spool)
            }
            None => Self::decode(Box::new(reader), compression),
        }
    }

    fn decode(reader: Box<dyn Read + 'a>, compression: Option<Compression>) -> Result<Self> {
        let reader: Box<dyn Read + 'a> = match compression {
            None => reader,
            Some(Compression::Gzip) => Box::new(GzDecoder::new(reader)),
            Some(Compression::Bzip2) => Box::new(MultiBzDecoder::new(reader)),
            Some(Compression::Zstd) => Box::new(zstd::stream::read::Decoder::new(reader)?),
            Some(other) => bail!("{other} cannot be decoded in-process"),
        };
        Ok(Self {
            archive: tar::Archive::new(reader),
            decompressor: None,
        })
    }

    fn with_external_tool(tool: &str, input: File) -> Result<Self> {
        let mut decompressor = ChildGuard::spawn(
            Command::new(tool)
                .arg("-d")
                .stdin(Stdio::from(input))
                .stdout(Stdio::piped()),
        )?;
        let stdout = decompressor.take_stdout()?;
        Ok(Self {
            archive: tar::Archive::new(Box::new(stdout)),
            decompressor: Some(decompressor),
        })
    }

    pub fn archive(&mut self) -> &mut tar::Archive<Box<dyn Read + 'a>> {
        &mut self.archive
    }

    /// Drains the rest of the stream and checks that the decompressor, if
    /// any, exited successfully.
    pub fn finish(self) -> Result<()> {
        let Self {
            archive,
            decompressor,
        } = self;
        let mut reader = archive.into_inner();
        std::io::copy(&mut reader, &mut std::io::sink()).context("Failed to drain tarball")?;
        drop(reader);
        if let Some(decompressor) = decompressor {
            decompressor.wait_and_check()?;
        }
        Ok(())
    }

    /// Finishes a pass that ended with `result`.
    ///
    /// The decompressor is reaped even if the pass failed, and its failure
    /// takes precedence over `result`.
    pub fn finish_with<E: From<anyhow::Error>>(self, result: Result<(), E>) -> Result<(), E> {
        if result.is_ok() {
            return self.finish().map_err(E::from);
        }
        let Self {
            archive,
            decompressor,
        } = self;
        let mut reader = archive.into_inner();
        // A healthy decompressor must not die of SIGPIPE. Read errors show up
        // in its exit status.
        let _ = std::io::copy(&mut reader, &mut std::io::sink());
        drop(reader);
        if let Some(decompressor) = decompressor {
            decompressor.wait_and_check().map_err(E::from)?;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TarballWriter;
    use std::{fs, os::unix::fs::PermissionsExt};
    use strum::IntoEnumIterator;

    fn write_tree(dir: &Path) -> Result<()> {
        fs::create_dir_all(dir.join("test-1.0"))?;
        fs::write(dir.join("test-1.0/foo"), "bar")?;
        fs::set_permissions(dir.join("test-1.0/foo"), fs::Permissions::from_mode(0o644))?;
        Ok(())
    }

    fn read_members(tarball: &mut CompressedTarball) -> Result<Vec<(String, String)>> {
        let mut members = Vec::new();
        for entry in tarball.archive().entries()? {
            let mut entry = entry?;
            let name = entry
                .path()?
                .to_string_lossy()
                .trim_end_matches('/')
                .to_string();
            let mut contents = String::new();
            entry.read_to_string(&mut contents)?;
            members.push((name, contents));
        }
        Ok(members)
    }

    #[test]
    fn reads_every_compression() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_tree(dir.path())?;

        for compression in Compression::iter().filter(|c| c.is_available()) {
            let path = dir
                .path()
                .join(format!("out.tar.{}", compression.extension()));
            let mut writer = TarballWriter::create(&path, Some(compression))?;
            writer.append_tree(&dir.path().join("test-1.0"), "test-1.0", |_| true)?;
            writer.finish()?;

            let mut tarball = CompressedTarball::open(&path, None)?;
            assert_eq!(
                read_members(&mut tarball)?,
                vec![
                    ("test-1.0".to_string(), String::new()),
                    ("test-1.0/foo".to_string(), "bar".to_string()),
                ],
                "{compression}"
            );
            tarball.finish()?;

            let mut tarball =
                CompressedTarball::from_reader(File::open(&path)?, Some(compression))?;
            assert_eq!(read_members(&mut tarball)?.len(), 2, "{compression}");
            tarball.finish()?;
        }
        Ok(())
    }

    #[test]
    fn reads_uncompressed() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_tree(dir.path())?;
        let path = dir.path().join("out.tar");
        let mut writer = TarballWriter::create(&path, None)?;
        writer.append_tree(&dir.path().join("test-1.0"), "test-1.0", |_| true)?;
        writer.finish()?;

        let data = fs::read(&path)?;
        let mut tarball = CompressedTarball::from_reader(data.as_slice(), None)?;
        assert_eq!(read_members(&mut tarball)?.len(), 2);
        tarball.finish()?;
        Ok(())
    }

    #[test]
    fn reports_decompressor_failure() -> Result<()> {
        if !Compression::Xz.is_available() {
            return Ok(());
        }
        let data = b"this is not xz data".as_slice();
        let mut tarball = CompressedTarball::from_reader(data, Some(Compression::Xz))?;
        let _ = read_members(&mut tarball);
        assert!(tarball.finish().is_err());
        Ok(())
    }

    #[test]
    fn finish_with_prefers_decompressor_failure() -> Result<()> {
        if !Compression::Xz.is_available() {
            return Ok(());
        }
        let data = b"garbage that xz will refuse".as_slice();
        let tarball = CompressedTarball::from_reader(data, Some(Compression::Xz))?;
        let err = tarball
            .finish_with(Err(anyhow::anyhow!("nothing matched")))
            .unwrap_err();
        assert!(err.to_string().contains("xz exited"), "{err}");
        Ok(())
    }

    #[test]
    fn finish_with_keeps_pass_error_for_healthy_stream() -> Result<()> {
        if !Compression::Xz.is_available() {
            return Ok(());
        }
        let dir = tempfile::tempdir()?;
        write_tree(dir.path())?;
        let path = dir.path().join("out.tar.xz");
        let mut writer = TarballWriter::create(&path, Some(Compression::Xz))?;
        writer.append_tree(&dir.path().join("test-1.0"), "test-1.0", |_| true)?;
        writer.finish()?;

        let mut tarball = CompressedTarball::open(&path, None)?;
        tarball.archive().entries()?.next().transpose()?;
        let err = tarball
            .finish_with(Err(anyhow::anyhow!("nothing matched")))
            .unwrap_err();
        assert_eq!(err.to_string(), "nothing matched");
        Ok(())
    }

    #[test]
    fn dropping_unfinished_tarball_reaps_decompressor() -> Result<()> {
        if !Compression::Xz.is_available() {
            return Ok(());
        }
        let dir = tempfile::tempdir()?;
        write_tree(dir.path())?;
        let path = dir.path().join("out.tar.xz");
        let mut writer = TarballWriter::create(&path, Some(Compression::Xz))?;
        writer.append_tree(&dir.path().join("test-1.0"), "test-1.0", |_| true)?;
        writer.finish()?;

        let mut tarball = CompressedTarball::open(&path, None)?;
        let first = tarball
            .archive()
            .entries()?
            .next()
            .transpose()?
            .map(|e| e.header().mode().ok());
        assert!(first.is_some());
        drop(tarball);
        Ok(())
    }

    #[test]
    fn rejects_unknown_extension() {
        assert!(CompressedTarball::open(Path::new("/nonexistent/foo.rar"), None).is_err());
    }
}
