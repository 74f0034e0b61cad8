// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

mod build;
mod check;

use anyhow::Result;
use clap::{Parser, Subcommand};
use cliutil::{cli_main, handle_top_level_result, Config};
use std::{path::PathBuf, process::ExitCode};
use tarball::{make_orig_tarball, Compression};

use crate::build::Builder;
use crate::check::{
    do_check_deb, do_check_manifest, do_check_tarball, CheckDebArgs, CheckManifestArgs,
    CheckTarballArgs,
};

#[derive(Parser, Debug)]
#[command()]
struct Cli {
    #[clap(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    CheckManifest(CheckManifestArgs),
    CheckTarball(CheckTarballArgs),
    CheckDeb(CheckDebArgs),
    MakeOrigTarball(MakeOrigTarballArgs),
    Build(BuildArgs),
}

/// Packs `<rundir>/<name>-<version>` into `<name>_<version>.orig.tar.<ext>`.
#[derive(Parser, Debug, PartialEq, Eq)]
struct MakeOrigTarballArgs {
    /// Directory holding the unpacked upstream tree.
    #[arg(long)]
    rundir: PathBuf,

    /// Upstream name.
    #[arg(long)]
    name: String,

    /// Upstream version.
    #[arg(long)]
    version: String,

    #[arg(long, default_value_t = Compression::Gzip)]
    compression: Compression,

    /// Where to write the tarball. Defaults to the run directory.
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

/// Builds a package tree.
#[derive(Parser, Debug, PartialEq, Eq)]
struct BuildArgs {
    /// One of make, dpkg-buildpackage or none.
    #[arg(long)]
    builder: Builder,

    #[arg()]
    workdir: PathBuf,
}

fn do_main() -> Result<()> {
    let cli = Cli::try_parse()?;
    match cli.commands {
        Commands::CheckManifest(args) => do_check_manifest(args),
        Commands::CheckTarball(args) => do_check_tarball(args),
        Commands::CheckDeb(args) => do_check_deb(args),
        Commands::MakeOrigTarball(args) => do_make_orig_tarball(args),
        Commands::Build(args) => args.builder.run(&args.workdir),
    }
}

fn do_make_orig_tarball(args: MakeOrigTarballArgs) -> Result<()> {
    let path = make_orig_tarball(
        &args.rundir,
        &args.name,
        &args.version,
        args.compression,
        args.output_dir.as_deref(),
    )?;
    println!("{}", path.display());
    Ok(())
}

fn main() -> ExitCode {
    match Config::from_env() {
        Ok(config) => cli_main(do_main, config),
        Err(error) => handle_top_level_result::<(), _>(Err(error)),
    }
}
