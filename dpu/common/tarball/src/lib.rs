// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

mod compression;
mod reader;
mod writer;

use anyhow::{ensure, Result};
use std::path::{Path, PathBuf};
use tracing::info;

pub use crate::compression::Compression;
pub use crate::reader::CompressedTarball;
pub use crate::writer::{Member, MemberKind, TarballWriter};

/// Packs `<rundir>/<upname>-<upversion>` into
/// `<upname>_<upversion>.orig.tar.<ext>`, the upstream tarball name Debian
/// source packages expect.
///
/// The tarball is written to `output_dir`, or to `rundir` if not given.
/// Returns the path of the tarball.
pub fn make_orig_tarball(
    rundir: &Path,
    upname: &str,
    upversion: &str,
    compression: Compression,
    output_dir: Option<&Path>,
) -> Result<PathBuf> {
    let unpacked_name = format!("{upname}-{upversion}");
    let source = rundir.join(&unpacked_name);
    ensure!(source.is_dir(), "{} is not a directory", source.display());

    let path = output_dir.unwrap_or(rundir).join(format!(
        "{upname}_{upversion}.orig.tar.{}",
        compression.extension()
    ));
    info!("Creating {}", path.display());

    let mut writer = TarballWriter::create(&path, Some(compression))?;
    writer.append_tree(&source, &unpacked_name, |_| true)?;
    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, io::Read};

    fn read_foo(path: &Path) -> Result<String> {
        let mut tarball = CompressedTarball::open(path, None)?;
        let mut contents = None;
        for entry in tarball.archive().entries()? {
            let mut entry = entry?;
            if entry.path()?.as_ref() == Path::new("test-1.0/foo") {
                let mut data = String::new();
                entry.read_to_string(&mut data)?;
                contents = Some(data);
            }
        }
        tarball.finish()?;
        Ok(contents.unwrap_or_default())
    }

    #[test]
    fn makes_orig_tarball() -> Result<()> {
        let rundir = tempfile::tempdir()?;
        fs::create_dir(rundir.path().join("test-1.0"))?;
        fs::write(rundir.path().join("test-1.0/foo"), "bar")?;

        let path = make_orig_tarball(rundir.path(), "test", "1.0", Compression::Gzip, None)?;
        assert_eq!(path, rundir.path().join("test_1.0.orig.tar.gz"));
        assert_eq!(read_foo(&path)?, "bar");

        let path = make_orig_tarball(rundir.path(), "test", "1.0", Compression::Bzip2, None)?;
        assert_eq!(path, rundir.path().join("test_1.0.orig.tar.bz2"));
        assert_eq!(read_foo(&path)?, "bar");
        Ok(())
    }

    #[test]
    fn writes_to_output_dir() -> Result<()> {
        let rundir = tempfile::tempdir()?;
        let output_dir = tempfile::tempdir()?;
        fs::create_dir(rundir.path().join("test-1.0"))?;
        fs::write(rundir.path().join("test-1.0/foo"), "bar")?;

        let path = make_orig_tarball(
            rundir.path(),
            "test",
            "1.0",
            Compression::Zstd,
            Some(output_dir.path()),
        )?;
        assert_eq!(path, output_dir.path().join("test_1.0.orig.tar.zst"));
        assert!(!rundir.path().join("test_1.0.orig.tar.zst").exists());
        assert_eq!(read_foo(&path)?, "bar");
        Ok(())
    }

    #[test]
    fn requires_unpacked_directory() -> Result<()> {
        let rundir = tempfile::tempdir()?;
        let err = make_orig_tarball(rundir.path(), "test", "1.0", Compression::Gzip, None)
            .unwrap_err();
        assert!(err.to_string().ends_with("test-1.0 is not a directory"), "{err}");
        Ok(())
    }
}
