// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::{bail, Result};
use std::{io::Write, process::ExitCode};

fn do_main() -> Result<()> {
    println!("stdout");
    // Ensure that stdout comes before stderr, so that the merged stream is deterministic.
    std::io::stdout().flush()?;

    eprintln!("stderr");
    tracing::debug!("log at level debug");
    tracing::info!("log at level info");

    if let Ok(value) = std::env::var("ERROR") {
        bail!("{}", value);
    }

    Ok(())
}

fn main() -> ExitCode {
    let config = match cliutil::Config::from_env() {
        Ok(config) => config.without_command_line(),
        Err(error) => return cliutil::handle_top_level_result::<(), _>(Err(error)),
    };
    cliutil::cli_main(do_main, config)
}
