// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Helpers to build in-memory tarballs with exact member names.

use anyhow::{ensure, Result};
use tar::EntryType;

pub struct TarFixture {
    builder: tar::Builder<Vec<u8>>,
}

impl TarFixture {
    pub fn new() -> Self {
        Self {
            builder: tar::Builder::new(Vec::new()),
        }
    }

    /// Appends a member. The name is stored verbatim, unlike
    /// [`tar::Header::set_path`] which normalizes it.
    pub fn append(
        &mut self,
        name: &str,
        entry_type: EntryType,
        mode: u32,
        link_target: Option<&str>,
    ) -> Result<&mut Self> {
        let mut header = tar::Header::new_gnu();
        let slot = &mut header.as_old_mut().name;
        ensure!(name.len() <= slot.len(), "name too long: {name}");
        slot[..name.len()].copy_from_slice(name.as_bytes());
        header.set_entry_type(entry_type);
        header.set_mode(mode);
        header.set_size(0);
        if let Some(target) = link_target {
            header.set_link_name(target)?;
        }
        header.set_cksum();
        self.builder.append(&header, std::io::empty())?;
        Ok(self)
    }

    pub fn dir(&mut self, name: &str, mode: u32) -> Result<&mut Self> {
        self.append(name, EntryType::Directory, mode, None)
    }

    pub fn file(&mut self, name: &str, mode: u32) -> Result<&mut Self> {
        self.append(name, EntryType::Regular, mode, None)
    }

    pub fn symlink(&mut self, name: &str, target: &str) -> Result<&mut Self> {
        self.append(name, EntryType::Symlink, 0o777, Some(target))
    }

    pub fn into_bytes(self) -> Result<Vec<u8>> {
        Ok(self.builder.into_inner()?)
    }
}
