// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::{bail, Result};
use std::{
    path::Path,
    process::{Command, Stdio},
};

/// Compression methods for tarballs.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    strum_macros::Display,
    strum_macros::EnumIter,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum Compression {
    Gzip,
    Bzip2,
    Xz,
    Lzma,
    Zstd,
}

impl Compression {
    /// The file name extension, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            Compression::Gzip => "gz",
            Compression::Bzip2 => "bz2",
            Compression::Xz => "xz",
            Compression::Lzma => "lzma",
            Compression::Zstd => "zst",
        }
    }

    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "gz" | "tgz" => Some(Compression::Gzip),
            "bz2" | "tbz2" => Some(Compression::Bzip2),
            "xz" => Some(Compression::Xz),
            "lzma" => Some(Compression::Lzma),
            "zst" => Some(Compression::Zstd),
            _ => None,
        }
    }

    /// Guesses the compression from a file name. Returns `None` for an
    /// uncompressed `.tar`.
    pub fn guess_from_path(path: &Path) -> Result<Option<Self>> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy())
            .unwrap_or_default();
        if extension == "tar" {
            return Ok(None);
        }
        match Compression::from_extension(&extension) {
            Some(compression) => Ok(Some(compression)),
            None => bail!("Cannot guess compression for {}", path.display()),
        }
    }

    /// The external program that implements this compression, for methods
    /// that are not handled in-process.
    ///
    /// The program compresses stdin to stdout, and decompresses with `-d`.
    pub(crate) fn external_tool(self) -> Option<&'static str> {
        match self {
            Compression::Xz => Some("xz"),
            Compression::Lzma => Some("lzma"),
            Compression::Gzip | Compression::Bzip2 | Compression::Zstd => None,
        }
    }

    /// Whether this compression can be used on this machine. In-process
    /// methods always can; the others need their program on `PATH`.
    pub fn is_available(self) -> bool {
        let Some(tool) = self.external_tool() else {
            return true;
        };
        Command::new(tool)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }
}
