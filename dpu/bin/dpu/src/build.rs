// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::Result;
use processes::run_and_check;
use std::{path::Path, process::Command};
use tracing::{info, instrument};

/// Ways of building a package tree before its artifacts are checked.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum_macros::Display, strum_macros::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum Builder {
    /// `make -C <workdir>`.
    Make,
    /// `dpkg-buildpackage`, run inside the work directory.
    DpkgBuildpackage,
    /// Does nothing.
    None,
}

impl Builder {
    fn command(self, workdir: &Path) -> Option<Command> {
        match self {
            Builder::Make => {
                let mut command = Command::new("make");
                command.arg("-C").arg(workdir);
                Some(command)
            }
            Builder::DpkgBuildpackage => {
                let mut command = Command::new("dpkg-buildpackage");
                command.current_dir(workdir);
                Some(command)
            }
            Builder::None => None,
        }
    }

    #[instrument(skip_all, fields(builder = %self, workdir = %workdir.display()))]
    pub fn run(self, workdir: &Path) -> Result<()> {
        match self.command(workdir) {
            Some(mut command) => run_and_check(&mut command),
            None => {
                info!("Nothing to build");
                Ok(())
            }
        }
    }
}
