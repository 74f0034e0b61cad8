// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Declarative manifests describing the expected contents of an archive,
//! and a verifier that checks archive streams against them.
//!
//! A manifest is line-oriented:
//!
//! ```text
//! # Comments start with "#".
//! contains-file usr/share/doc/foo/copyright
//! perm 0644
//! contains-symlink usr/share/doc/foo/README
//! link-target ../bar/README
//! not-present usr/share/doc/foo/.git
//! ```
//!
//! `perm` and `link-target` without an explicit path apply to the entry
//! named by the preceding command. Declaring a path present also declares
//! all of its ancestors as directories.

mod archive;
mod error;
mod model;
mod parser;
#[cfg(test)]
mod testing;
mod verify;

use std::path::Path;

use anyhow::{Context, Result};

pub use crate::archive::{tar_entries, ArchiveEntry, EntryKind};
pub use crate::error::{InvalidManifestError, ManifestCheckError, ManifestError, ManifestParseError};
pub use crate::model::{normalize_path, EntryRecord, EntryType, ManifestBuilder, ManifestModel};
pub use crate::parser::{parse_permission_string, split_user_group, Command};
pub use crate::verify::{EntryWalker, Verifier};

impl ManifestModel {
    /// Reads and parses a manifest file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid manifest {}", path.display()))
    }
}
