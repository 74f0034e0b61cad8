// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::{btree_map, BTreeMap};

use crate::InvalidManifestError;

/// The kind of filesystem object a manifest expects at a path.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Hash, strum_macros::Display, strum_macros::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum EntryType {
    File,
    Dir,
    Symlink,
}

/// Expected attributes of a single path.
///
/// Records are only mutated through [`ManifestBuilder`], which rejects any
/// change that would contradict what was declared before.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EntryRecord {
    path: String,
    present: bool,
    entry_type: Option<EntryType>,
    permission_bits: Option<u32>,
    link_target: Option<String>,
}

impl EntryRecord {
    fn new(path: &str, present: bool) -> Self {
        Self {
            path: path.to_string(),
            present,
            entry_type: None,
            permission_bits: None,
            link_target: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn present(&self) -> bool {
        self.present
    }

    pub fn entry_type(&self) -> Option<EntryType> {
        self.entry_type
    }

    pub fn permission_bits(&self) -> Option<u32> {
        self.permission_bits
    }

    pub fn link_target(&self) -> Option<&str> {
        self.link_target.as_deref()
    }
}

/// Normalizes an archive member name or a manifest path.
///
/// Returns `None` for names that refer to the archive root (`.`, `./`).
/// Leading `./` components and trailing slashes are removed; a leading `/`
/// is kept because absolute member names are possible, if unusual.
pub fn normalize_path(name: &str) -> Option<&str> {
    let mut name = name;
    if !name.starts_with('/') {
        while let Some(rest) = name.strip_prefix("./") {
            name = rest;
        }
        if name == "." {
            return None;
        }
    }
    let trimmed = name.trim_end_matches('/');
    match trimmed {
        "" if name.starts_with('/') => Some("/"),
        "" => None,
        _ => Some(trimmed),
    }
}

/// Returns the parent directory of a normalized path, or `None` when the
/// parent is the root.
fn parent_path(path: &str) -> Option<&str> {
    match path.rsplit_once('/') {
        Some(("", _)) | None => None,
        Some((parent, _)) => Some(parent),
    }
}

/// The validated mapping from normalized path to [`EntryRecord`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ManifestModel {
    records: BTreeMap<String, EntryRecord>,
}

impl ManifestModel {
    /// Returns the record for a normalized path.
    pub fn get(&self, path: &str) -> Option<&EntryRecord> {
        self.records.get(path)
    }

    /// Iterates over all records in path order.
    pub fn iter(&self) -> impl Iterator<Item = &EntryRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Accumulates records while a manifest is being parsed.
///
/// Every mutation enforces the record invariants and fails with an
/// [`InvalidManifestError`] instead of overwriting earlier declarations.
#[derive(Debug, Default)]
pub struct ManifestBuilder {
    records: BTreeMap<String, EntryRecord>,
}

impl ManifestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(self) -> ManifestModel {
        ManifestModel {
            records: self.records,
        }
    }

    /// Declares that `path` exists, deriving its ancestor directories.
    pub fn mark_present(&mut self, path: &str) -> Result<&mut EntryRecord, InvalidManifestError> {
        self.derive_parents(path)?;
        self.set_presence(path, true)
    }

    /// Declares that `path` must not exist.
    pub fn mark_absent(&mut self, path: &str) -> Result<(), InvalidManifestError> {
        self.set_presence(path, false)?;
        Ok(())
    }

    pub fn set_type(
        &mut self,
        path: &str,
        entry_type: EntryType,
    ) -> Result<(), InvalidManifestError> {
        let record = self.mark_present(path)?;
        match record.entry_type {
            Some(existing) if existing != entry_type => {
                return Err(InvalidManifestError::ConflictingType {
                    path: path.to_string(),
                    existing,
                    requested: entry_type,
                });
            }
            _ => record.entry_type = Some(entry_type),
        }
        if entry_type == EntryType::Symlink && record.permission_bits.is_some() {
            return Err(InvalidManifestError::PermOnSymlink {
                path: path.to_string(),
            });
        }
        Ok(())
    }

    pub fn set_permission_bits(
        &mut self,
        path: &str,
        mode: u32,
    ) -> Result<(), InvalidManifestError> {
        let record = self.mark_present(path)?;
        if record.entry_type == Some(EntryType::Symlink) {
            return Err(InvalidManifestError::PermOnSymlink {
                path: path.to_string(),
            });
        }
        match record.permission_bits {
            Some(existing) if existing != mode => Err(InvalidManifestError::ConflictingPermission {
                path: path.to_string(),
                existing,
                requested: mode,
            }),
            _ => {
                record.permission_bits = Some(mode);
                Ok(())
            }
        }
    }

    /// Sets the symlink target of `path`, which also makes it a symlink.
    pub fn set_link_target(
        &mut self,
        path: &str,
        target: &str,
    ) -> Result<(), InvalidManifestError> {
        self.set_type(path, EntryType::Symlink)?;
        let record = self.set_presence(path, true)?;
        match &record.link_target {
            Some(existing) if existing != target => {
                Err(InvalidManifestError::ConflictingLinkTarget {
                    path: path.to_string(),
                    existing: existing.clone(),
                    requested: target.to_string(),
                })
            }
            _ => {
                record.link_target = Some(target.to_string());
                Ok(())
            }
        }
    }

    /// Marks every ancestor of `path` as a present directory, up to but
    /// not including the root.
    fn derive_parents(&mut self, path: &str) -> Result<(), InvalidManifestError> {
        let mut current = path;
        while let Some(parent) = parent_path(current) {
            let record = self.set_presence(parent, true)?;
            match record.entry_type {
                // Ancestors of a known directory have been derived already.
                Some(EntryType::Dir) => break,
                Some(existing) => {
                    return Err(InvalidManifestError::ConflictingType {
                        path: parent.to_string(),
                        existing,
                        requested: EntryType::Dir,
                    });
                }
                None => record.entry_type = Some(EntryType::Dir),
            }
            current = parent;
        }
        Ok(())
    }

    fn set_presence(
        &mut self,
        path: &str,
        present: bool,
    ) -> Result<&mut EntryRecord, InvalidManifestError> {
        match self.records.entry(path.to_string()) {
            btree_map::Entry::Vacant(entry) => Ok(entry.insert(EntryRecord::new(path, present))),
            btree_map::Entry::Occupied(entry) if entry.get().present != present => {
                Err(InvalidManifestError::ConflictingPresence {
                    path: path.to_string(),
                })
            }
            btree_map::Entry::Occupied(entry) => Ok(entry.into_mut()),
        }
    }
}
