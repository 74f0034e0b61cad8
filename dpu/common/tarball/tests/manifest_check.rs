// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::Result;
use manifest::{ManifestCheckError, ManifestModel};
use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};
use strum::IntoEnumIterator;
use tarball::{CompressedTarball, Compression, Member, TarballWriter};

const MANIFEST: &str = r#"
contains-file usr/bin/foo
perm 0755
contains-file usr/share/doc/foo/copyright
perm 0644
contains-symlink usr/share/doc/foo/README
link-target copyright
not-present usr/random/place
"#;

fn compressions() -> impl Iterator<Item = Compression> {
    Compression::iter().filter(|compression| compression.is_available())
}

fn write_file(path: &Path, mode: u32) -> Result<()> {
    fs::create_dir_all(path.parent().unwrap())?;
    fs::write(path, "contents\n")?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

/// Creates a tree that satisfies [`MANIFEST`].
fn make_tree(root: &Path) -> Result<()> {
    write_file(&root.join("usr/bin/foo"), 0o755)?;
    write_file(&root.join("usr/share/doc/foo/copyright"), 0o644)?;
    std::os::unix::fs::symlink("copyright", root.join("usr/share/doc/foo/README"))?;
    Ok(())
}

fn pack(
    dir: &Path,
    root: &Path,
    compression: Compression,
    filter: impl FnMut(&mut Member) -> bool,
) -> Result<PathBuf> {
    let path = dir.join(format!("out.tar.{}", compression.extension()));
    let mut writer = TarballWriter::create(&path, Some(compression))?;
    writer.append_tree(root, "", filter)?;
    writer.finish()
}

fn check(path: &Path) -> Result<(), ManifestCheckError> {
    let model: ManifestModel = MANIFEST.parse().unwrap();
    let mut tarball = CompressedTarball::open(path, None)?;
    let result = model.check_tarball(tarball.archive());
    tarball.finish_with(result)
}

#[test]
fn matching_tarball_passes() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let root = dir.path().join("root");
    make_tree(&root)?;

    for compression in compressions() {
        let path = pack(dir.path(), &root, compression, |_| true)?;
        check(&path).map_err(|err| anyhow::anyhow!("{compression}: {err}"))?;
    }
    Ok(())
}

#[test]
fn detects_broken_symlink() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let root = dir.path().join("root");
    make_tree(&root)?;

    for compression in compressions() {
        let path = pack(dir.path(), &root, compression, |member| {
            if member.name == "usr/share/doc/foo/README" {
                member.link_target = "debian/rules".into();
            }
            true
        })?;
        let err = check(&path).unwrap_err();
        assert!(
            matches!(
                &err,
                ManifestCheckError::SymlinkTarget { actual, .. } if actual == "debian/rules"
            ),
            "{compression}: {err}"
        );
    }
    Ok(())
}

#[test]
fn detects_wrong_mode() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let root = dir.path().join("root");
    make_tree(&root)?;

    for compression in compressions() {
        let path = pack(dir.path(), &root, compression, |member| {
            if member.name == "usr/share/doc/foo/copyright" {
                member.mode = 0o777;
            }
            true
        })?;
        let err = check(&path).unwrap_err();
        assert_eq!(
            err.to_string(),
            "usr/share/doc/foo/copyright is mode 0777 instead of 0644",
            "{compression}"
        );
    }
    Ok(())
}

#[test]
fn detects_missing_and_unexpected_entries() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let root = dir.path().join("root");
    make_tree(&root)?;

    let path = pack(dir.path(), &root, Compression::Gzip, |member| {
        member.name != "usr/bin/foo"
    })?;
    let err = check(&path).unwrap_err();
    assert!(matches!(err, ManifestCheckError::EntryPresent { .. }), "{err}");
    assert_eq!(err.path(), Some("usr/bin/foo"));

    write_file(&root.join("usr/random/place"), 0o644)?;
    let path = pack(dir.path(), &root, Compression::Gzip, |_| true)?;
    let err = check(&path).unwrap_err();
    assert!(
        matches!(&err, ManifestCheckError::EntryNotPresent { path } if path == "usr/random/place"),
        "{err}"
    );
    Ok(())
}

#[test]
fn detects_wrong_type() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let root = dir.path().join("root");
    make_tree(&root)?;
    fs::remove_file(root.join("usr/bin/foo"))?;
    fs::create_dir(root.join("usr/bin/foo"))?;

    let path = pack(dir.path(), &root, Compression::Bzip2, |_| true)?;
    let err = check(&path).unwrap_err();
    assert_eq!(
        err.to_string(),
        "entry usr/bin/foo is supposed to be a file but is a dir"
    );
    Ok(())
}

#[test]
fn reports_undecodable_xz_as_source_error() -> Result<()> {
    if !Compression::Xz.is_available() {
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("broken.tar.xz");
    fs::write(&path, b"this is not xz data at all")?;

    let err = check(&path).unwrap_err();
    assert!(matches!(err, ManifestCheckError::Source(_)), "{err:?}");
    assert!(err.to_string().contains("xz exited"), "{err}");
    Ok(())
}
