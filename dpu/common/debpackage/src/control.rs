// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;

/// Parses a control file in the deb822 style.
///
/// Each field starts with `Key: value`. Lines starting with a space continue
/// the previous field, joined with a newline; a continuation line of just
/// ` .` stands for an empty line. Blank lines are ignored. Keys are
/// lower-cased if `ignore_case` is set.
pub fn parse_control(text: &str, ignore_case: bool) -> Result<BTreeMap<String, String>> {
    let mut fields: BTreeMap<String, String> = BTreeMap::new();
    let mut current: Option<String> = None;

    for (index, line) in text.lines().enumerate() {
        let lineno = index + 1;
        if line.trim().is_empty() {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            let key = current
                .as_ref()
                .with_context(|| format!("line {lineno}: continuation without a field"))?;
            let continuation = match line.trim() {
                "." => "",
                other => other,
            };
            let value = fields.entry(key.clone()).or_default();
            value.push('\n');
            value.push_str(continuation);
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            bail!("line {lineno}: expected \"Key: value\", got {line:?}");
        };
        let key = if ignore_case {
            key.trim().to_lowercase()
        } else {
            key.trim().to_string()
        };
        fields.insert(key.clone(), value.trim().to_string());
        current = Some(key);
    }
    Ok(fields)
}
