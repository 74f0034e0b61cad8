// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::{Context, Result};
use clap::Parser;
use debpackage::DebPackage;
use manifest::ManifestModel;
use std::path::PathBuf;
use tarball::{CompressedTarball, Compression};
use tracing::info;

/// Parses and validates a manifest without checking any archive.
#[derive(Parser, Debug, PartialEq, Eq)]
pub struct CheckManifestArgs {
    /// Manifest file.
    #[arg()]
    pub manifest: PathBuf,
}

/// Checks a tarball against a manifest.
#[derive(Parser, Debug, PartialEq, Eq)]
pub struct CheckTarballArgs {
    /// Manifest file.
    #[arg(long)]
    pub manifest: PathBuf,

    /// Compression of the tarball. Guessed from the file name if omitted.
    #[arg(long)]
    pub compression: Option<Compression>,

    /// Tarball to check.
    #[arg()]
    pub tarball: PathBuf,
}

/// Checks the data of a Debian binary package against a manifest.
#[derive(Parser, Debug, PartialEq, Eq)]
pub struct CheckDebArgs {
    /// Manifest file.
    #[arg(long)]
    pub manifest: PathBuf,

    /// Debian binary package (.deb) to check.
    #[arg()]
    pub deb: PathBuf,
}

pub fn do_check_manifest(args: CheckManifestArgs) -> Result<()> {
    let model = ManifestModel::from_path(&args.manifest)?;
    println!("{}: {} entries", args.manifest.display(), model.len());
    Ok(())
}

pub fn do_check_tarball(args: CheckTarballArgs) -> Result<()> {
    let model = ManifestModel::from_path(&args.manifest)?;
    let mut tarball = CompressedTarball::open(&args.tarball, args.compression)?;
    let result = model.check_tarball(tarball.archive());
    tarball
        .finish_with(result)
        .with_context(|| format!("{} does not match the manifest", args.tarball.display()))?;
    info!("{} matches {}", args.tarball.display(), args.manifest.display());
    println!("{}: OK", args.tarball.display());
    Ok(())
}

pub fn do_check_deb(args: CheckDebArgs) -> Result<()> {
    let model = ManifestModel::from_path(&args.manifest)?;
    let mut deb = DebPackage::open(&args.deb)?;
    let version = deb.version()?;
    info!("Checking {} (format {version})", args.deb.display());
    model
        .check_walker(&mut deb)
        .with_context(|| format!("{} does not match the manifest", args.deb.display()))?;
    println!("{}: OK", args.deb.display());
    Ok(())
}
