// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use thiserror::Error;

use crate::{EntryKind, EntryType};

/// A manifest that contradicts itself or is malformed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InvalidManifestError {
    #[error("{path} cannot be present and not-present at the same time")]
    ConflictingPresence { path: String },

    #[error("{path} cannot be a {existing} and a {requested} at the same time")]
    ConflictingType {
        path: String,
        existing: EntryType,
        requested: EntryType,
    },

    #[error("conflicting perm mode for {path}: 0{existing:o} and 0{requested:o}")]
    ConflictingPermission {
        path: String,
        existing: u32,
        requested: u32,
    },

    #[error("{path} cannot point to {existing} and {requested} at the same time")]
    ConflictingLinkTarget {
        path: String,
        existing: String,
        requested: String,
    },

    #[error("{path} is expected to be a symlink, but has perm information")]
    PermOnSymlink { path: String },

    #[error("{command} takes at least {min} and at most {max} arguments")]
    WrongArgumentCount {
        command: String,
        min: usize,
        max: usize,
    },

    #[error("{command} has no path argument and no preceding entry to apply to")]
    MissingEntry { command: String },

    #[error("{command} cannot name the archive root {path:?}")]
    RootPath { command: String, path: String },

    #[error("invalid permission mode {value:?}")]
    MalformedMode { value: String },

    #[error("invalid permission string {value:?}: {reason}")]
    MalformedPermissionString { value: String, reason: String },

    #[error("invalid user:group {value:?}: {reason}")]
    MalformedUserGroup { value: String, reason: String },
}

/// An error found while interpreting a single manifest command.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ManifestError {
    #[error("unknown command {command}")]
    UnknownCommand { command: String },

    #[error("invalid manifest: {0}")]
    Invalid(#[from] InvalidManifestError),

    /// The manifest uses a recognized feature that is not supported.
    #[error("{feature} is not implemented")]
    NotImplemented { feature: String },
}

/// A [`ManifestError`] together with the manifest line it was found on.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("manifest line {line}: {kind}")]
pub struct ManifestParseError {
    /// 1-based line number.
    pub line: usize,
    pub kind: ManifestError,
}

/// A violation found while checking an archive against a manifest.
///
/// Every variant except [`ManifestCheckError::Source`] names the offending
/// path.
#[derive(Debug, Error)]
pub enum ManifestCheckError {
    #[error("expected entry {path} is missing")]
    EntryPresent { path: String },

    #[error("entry {path} is present, but should not be")]
    EntryNotPresent { path: String },

    #[error("entry {path} is supposed to be a {expected} but is a {actual}")]
    EntryWrongType {
        path: String,
        expected: EntryType,
        actual: EntryKind,
    },

    #[error("{path} is a symlink but it is pointing to {actual} instead of {expected}")]
    SymlinkTarget {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("{path} is mode 0{actual:o} instead of 0{expected:o}")]
    EntryPermission {
        path: String,
        expected: u32,
        actual: u32,
    },

    #[error("{path} has a permission assertion but is a symlink")]
    PermissionOnSymlink { path: String },

    /// Device nodes, fifos and sockets cannot be matched against a type.
    #[error("{path} is present, but not a known type: {kind} (expected: {expected})")]
    UnsupportedEntryKind {
        path: String,
        kind: EntryKind,
        expected: EntryType,
    },

    /// The archive could not be read.
    #[error(transparent)]
    Source(#[from] anyhow::Error),
}

impl ManifestCheckError {
    /// Returns the path the violation is about, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::EntryPresent { path }
            | Self::EntryNotPresent { path }
            | Self::EntryWrongType { path, .. }
            | Self::SymlinkTarget { path, .. }
            | Self::EntryPermission { path, .. }
            | Self::PermissionOnSymlink { path }
            | Self::UnsupportedEntryKind { path, .. } => Some(path),
            Self::Source(_) => None,
        }
    }
}
