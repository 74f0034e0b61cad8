// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::{collections::BTreeSet, io::Read};

use anyhow::Result;
use tracing::{debug, info};

use crate::{
    archive::tar_entries, model::normalize_path, ArchiveEntry, EntryKind, EntryRecord, EntryType,
    ManifestCheckError, ManifestModel,
};

/// A source of archive entries that drives iteration itself and calls back
/// for every member, in archive order.
pub trait EntryWalker {
    fn walk(
        &mut self,
        visit: &mut dyn FnMut(&ArchiveEntry) -> Result<(), ManifestCheckError>,
    ) -> Result<(), ManifestCheckError>;
}

/// State of one verification pass over one archive.
///
/// The model is only borrowed; the set of entries that have not been seen
/// yet is private to the pass.
pub struct Verifier<'a> {
    model: &'a ManifestModel,
    missing: BTreeSet<&'a str>,
}

impl<'a> Verifier<'a> {
    pub fn new(model: &'a ManifestModel) -> Self {
        let missing = model
            .iter()
            .filter(|record| record.present())
            .map(|record| record.path())
            .collect();
        Self { model, missing }
    }

    /// Checks a single archive member against the manifest.
    pub fn check_entry(&mut self, entry: &ArchiveEntry) -> Result<(), ManifestCheckError> {
        let Some(name) = normalize_path(&entry.name) else {
            return Ok(());
        };
        let Some(record) = self.model.get(name) else {
            return Ok(());
        };
        debug!(name, kind = %entry.kind, mode = entry.mode, "checking entry");
        check_record(record, entry)?;
        self.missing.remove(name);
        Ok(())
    }

    /// Fails with the first missing path, in lexicographic order.
    pub fn finish(self) -> Result<(), ManifestCheckError> {
        match self.missing.first() {
            Some(path) => Err(ManifestCheckError::EntryPresent {
                path: path.to_string(),
            }),
            None => Ok(()),
        }
    }
}

fn check_record(record: &EntryRecord, entry: &ArchiveEntry) -> Result<(), ManifestCheckError> {
    let path = record.path();

    if !record.present() {
        return Err(ManifestCheckError::EntryNotPresent {
            path: path.to_string(),
        });
    }

    if let Some(expected) = record.entry_type() {
        let ok = match (&entry.kind, expected) {
            (EntryKind::Other(_), _) => {
                return Err(ManifestCheckError::UnsupportedEntryKind {
                    path: path.to_string(),
                    kind: entry.kind.clone(),
                    expected,
                });
            }
            // Hard links are regular files that share their data.
            (EntryKind::File | EntryKind::HardLink, EntryType::File) => true,
            (EntryKind::Dir, EntryType::Dir) => true,
            (EntryKind::Symlink, EntryType::Symlink) => true,
            _ => false,
        };
        if !ok {
            return Err(ManifestCheckError::EntryWrongType {
                path: path.to_string(),
                expected,
                actual: entry.kind.clone(),
            });
        }
    }

    if let Some(expected) = record.link_target() {
        let Some(actual) = entry.link_target.as_deref() else {
            return Err(ManifestCheckError::EntryWrongType {
                path: path.to_string(),
                expected: EntryType::Symlink,
                actual: entry.kind.clone(),
            });
        };
        if expected != actual {
            return Err(ManifestCheckError::SymlinkTarget {
                path: path.to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
    }

    if let Some(expected) = record.permission_bits() {
        if entry.kind == EntryKind::Symlink {
            return Err(ManifestCheckError::PermissionOnSymlink {
                path: path.to_string(),
            });
        }
        if expected != entry.mode {
            return Err(ManifestCheckError::EntryPermission {
                path: path.to_string(),
                expected,
                actual: entry.mode,
            });
        }
    }

    Ok(())
}

impl ManifestModel {
    /// Checks a stream of entries, stopping at the first violation.
    pub fn check_entries<I>(&self, entries: I) -> Result<(), ManifestCheckError>
    where
        I: IntoIterator<Item = Result<ArchiveEntry>>,
    {
        let mut verifier = Verifier::new(self);
        for entry in entries {
            verifier.check_entry(&entry?)?;
        }
        verifier.finish()
    }

    /// Checks the members of a tar archive, reading it exactly once in order.
    pub fn check_tarball<R: Read>(
        &self,
        archive: &mut tar::Archive<R>,
    ) -> Result<(), ManifestCheckError> {
        self.check_entries(tar_entries(archive)?)?;
        info!("Tarball matches the manifest ({} entries)", self.len());
        Ok(())
    }

    /// Checks the entries produced by a callback-driven walker.
    pub fn check_walker(&self, walker: &mut dyn EntryWalker) -> Result<(), ManifestCheckError> {
        let mut verifier = Verifier::new(self);
        walker.walk(&mut |entry| verifier.check_entry(entry))?;
        verifier.finish()
    }
}

impl<R: Read> EntryWalker for tar::Archive<R> {
    fn walk(
        &mut self,
        visit: &mut dyn FnMut(&ArchiveEntry) -> Result<(), ManifestCheckError>,
    ) -> Result<(), ManifestCheckError> {
        for entry in tar_entries(self)? {
            visit(&entry?)?;
        }
        Ok(())
    }
}
