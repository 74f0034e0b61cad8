// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::str::FromStr;

use tracing::debug;

use crate::{
    model::normalize_path, EntryType, InvalidManifestError, ManifestBuilder, ManifestError,
    ManifestModel, ManifestParseError,
};

/// A manifest command keyword.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum_macros::Display, strum_macros::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum Command {
    ContainsFile,
    ContainsDir,
    ContainsSymlink,
    NotPresent,
    LinkTarget,
    Perm,
    ContainsEntry,
    SameContent,
    Hardlinks,
}

impl Command {
    /// Applies the command to `builder`.
    ///
    /// `last` is the path established by the preceding command. Returns the
    /// path that a following attribute-only command should apply to.
    pub fn apply(
        self,
        builder: &mut ManifestBuilder,
        last: Option<String>,
        arg: Option<&str>,
    ) -> Result<Option<String>, ManifestError> {
        let args: Vec<&str> = arg.map(|a| a.split_whitespace().collect()).unwrap_or_default();
        match self {
            Command::ContainsFile => self.contains(builder, &args, EntryType::File),
            Command::ContainsDir => self.contains(builder, &args, EntryType::Dir),
            Command::ContainsSymlink => self.contains(builder, &args, EntryType::Symlink),
            Command::NotPresent => {
                let [path] = self.arity::<1>(&args)?;
                builder.mark_absent(&self.manifest_path(path)?)?;
                Ok(None)
            }
            Command::LinkTarget => {
                self.check_arity(&args, 1, 2)?;
                let path = self.resolve(args.get(1).copied(), last)?;
                builder.set_link_target(&path, args[0])?;
                Ok(Some(path))
            }
            Command::Perm => {
                let (mode, user_group, path) = match args[..] {
                    [mode] => (mode, None, None),
                    [mode, second] if second.contains(':') => (mode, Some(second), None),
                    [mode, second] => (mode, None, Some(second)),
                    [mode, user_group, path] => (mode, Some(user_group), Some(path)),
                    _ => {
                        return Err(InvalidManifestError::WrongArgumentCount {
                            command: self.to_string(),
                            min: 1,
                            max: 3,
                        }
                        .into())
                    }
                };
                let mode = parse_mode(mode)?;
                let path = self.resolve(path, last)?;
                builder.set_permission_bits(&path, mode)?;
                if let Some(user_group) = user_group {
                    reject_user_group(user_group)?;
                }
                Ok(Some(path))
            }
            Command::ContainsEntry => {
                self.check_arity(&args, 2, 3)?;
                let (entry_type, mode) = parse_permission_string(args[0])?;
                let path = self.manifest_path(args[args.len() - 1])?;
                builder.set_type(&path, entry_type)?;
                if entry_type != EntryType::Symlink {
                    builder.set_permission_bits(&path, mode)?;
                }
                if args.len() == 3 {
                    reject_user_group(args[1])?;
                }
                Ok(Some(path))
            }
            Command::SameContent | Command::Hardlinks => Err(ManifestError::NotImplemented {
                feature: self.to_string(),
            }),
        }
    }

    fn contains(
        self,
        builder: &mut ManifestBuilder,
        args: &[&str],
        entry_type: EntryType,
    ) -> Result<Option<String>, ManifestError> {
        let [path] = self.arity::<1>(args)?;
        let path = self.manifest_path(path)?;
        builder.set_type(&path, entry_type)?;
        Ok(Some(path))
    }

    fn check_arity(
        self,
        args: &[&str],
        min: usize,
        max: usize,
    ) -> Result<(), InvalidManifestError> {
        if args.len() < min || args.len() > max {
            return Err(InvalidManifestError::WrongArgumentCount {
                command: self.to_string(),
                min,
                max,
            });
        }
        Ok(())
    }

    fn arity<'a, const N: usize>(
        self,
        args: &[&'a str],
    ) -> Result<[&'a str; N], InvalidManifestError> {
        self.check_arity(args, N, N)?;
        args.try_into()
            .map_err(|_| InvalidManifestError::WrongArgumentCount {
                command: self.to_string(),
                min: N,
                max: N,
            })
    }

    /// Picks the explicit path argument, falling back to the last entry.
    fn resolve(
        self,
        explicit: Option<&str>,
        last: Option<String>,
    ) -> Result<String, InvalidManifestError> {
        match explicit {
            Some(path) => self.manifest_path(path),
            None => last.ok_or_else(|| InvalidManifestError::MissingEntry {
                command: self.to_string(),
            }),
        }
    }

    /// Normalizes a path argument. The archive root has no member of its
    /// own, so no command may name it.
    fn manifest_path(self, path: &str) -> Result<String, InvalidManifestError> {
        match normalize_path(path) {
            Some(path) => Ok(path.to_string()),
            None => Err(InvalidManifestError::RootPath {
                command: self.to_string(),
                path: path.to_string(),
            }),
        }
    }
}

fn parse_mode(value: &str) -> Result<u32, InvalidManifestError> {
    let malformed = || InvalidManifestError::MalformedMode {
        value: value.to_string(),
    };
    // from_str_radix alone would let a sign through.
    if value.is_empty() || !value.bytes().all(|b| matches!(b, b'0'..=b'7')) {
        return Err(malformed());
    }
    match u32::from_str_radix(value, 8) {
        Ok(mode) if mode <= 0o7777 => Ok(mode),
        _ => Err(malformed()),
    }
}

/// Splits a `user:group` specification.
pub fn split_user_group(value: &str) -> Result<(&str, &str), InvalidManifestError> {
    let malformed = |reason: &str| InvalidManifestError::MalformedUserGroup {
        value: value.to_string(),
        reason: reason.to_string(),
    };
    let mut parts = value.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(user), Some(group), None) if !user.is_empty() && !group.is_empty() => {
            Ok((user, group))
        }
        (_, _, Some(_)) => Err(malformed("too many colons")),
        _ => Err(malformed("expected user and group")),
    }
}

/// Owner and group are parsed so that malformed values are reported, but
/// they cannot be verified against archive members.
fn reject_user_group(value: &str) -> Result<(), ManifestError> {
    split_user_group(value)?;
    Err(ManifestError::NotImplemented {
        feature: "user:group setting".to_string(),
    })
}

/// Parses a 10-character `ls -l` permission string such as `-rw-r--r--`.
pub fn parse_permission_string(value: &str) -> Result<(EntryType, u32), ManifestError> {
    let malformed = |reason: String| {
        ManifestError::from(InvalidManifestError::MalformedPermissionString {
            value: value.to_string(),
            reason,
        })
    };

    let chars: Vec<char> = value.chars().collect();
    if chars.len() != 10 {
        return Err(malformed(format!("expected 10 characters, got {}", chars.len())));
    }

    let entry_type = match chars[0] {
        '-' => EntryType::File,
        'd' => EntryType::Dir,
        'l' => EntryType::Symlink,
        'c' | 'b' | 'p' | 's' => {
            return Err(ManifestError::NotImplemented {
                feature: format!("contains-entry with type {:?}", chars[0]),
            })
        }
        other => return Err(malformed(format!("unknown entry type {other:?}"))),
    };

    // (shift of the rwx triplet, special bit, special character)
    const CLASSES: [(u32, u32, char); 3] = [(6, 0o4000, 's'), (3, 0o2000, 's'), (0, 0o1000, 't')];

    let mut mode = 0;
    for (index, (shift, special, special_char)) in CLASSES.into_iter().enumerate() {
        let triplet = &chars[1 + index * 3..4 + index * 3];
        let mut bits = 0;
        match triplet[0] {
            'r' => bits |= 0o4,
            '-' => {}
            other => return Err(malformed(format!("unexpected {other:?} in read position"))),
        }
        match triplet[1] {
            'w' => bits |= 0o2,
            '-' => {}
            other => return Err(malformed(format!("unexpected {other:?} in write position"))),
        }
        match triplet[2] {
            'x' => bits |= 0o1,
            '-' => {}
            c if c == special_char => {
                bits |= 0o1;
                mode |= special;
            }
            c if c == special_char.to_ascii_uppercase() => mode |= special,
            other => return Err(malformed(format!("unexpected {other:?} in execute position"))),
        }
        mode |= bits << shift;
    }

    Ok((entry_type, mode))
}

impl FromStr for ManifestModel {
    type Err = ManifestParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        ManifestModel::parse(text)
    }
}

impl ManifestModel {
    /// Parses manifest text.
    ///
    /// Blank lines and lines starting with `#` are skipped. Every other line
    /// is a command keyword followed by its arguments.
    pub fn parse(text: &str) -> Result<Self, ManifestParseError> {
        let mut builder = ManifestBuilder::new();
        let mut last: Option<String> = None;

        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (keyword, arg) = match line.split_once(char::is_whitespace) {
                Some((keyword, rest)) => (keyword, Some(rest.trim_start())),
                None => (line, None),
            };
            let at_line = |kind: ManifestError| ManifestParseError {
                line: index + 1,
                kind,
            };

            let command = Command::from_str(keyword).map_err(|_| {
                at_line(ManifestError::UnknownCommand {
                    command: keyword.to_string(),
                })
            })?;
            last = command.apply(&mut builder, last, arg).map_err(at_line)?;
            debug!(line = index + 1, %command, last = ?last, "manifest command");
        }

        Ok(builder.build())
    }
}
