// Copyright (c) 2023 Jake Swensen
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Classical `.config` files: parsing, canonical emission and
//! order-independent comparison.
//!
//! The canonical format is the kernel's own: one `CONFIG_<NAME>=value` or
//! `# CONFIG_<NAME> is not set` per line, newline terminated. Gzipped
//! inputs (`/proc/config.gz`) are inflated transparently.

use crate::error::{AutokernelError, AutokernelResult};
use crate::expr::Tristate;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

/// The value a `.config` line assigns.
#[derive(Clone, Debug, PartialEq)]
pub enum KconfigValue {
    /// `# CONFIG_X is not set`
    NotSet,
    Tristate(Tristate),
    /// A quoted string, stored unescaped.
    String(String),
    /// An int or hex literal, stored verbatim.
    Literal(String),
}

impl KconfigValue {
    /// The right-hand side as it appears in a config file; `None` for the
    /// `is not set` form.
    pub fn render(&self) -> Option<String> {
        match self {
            KconfigValue::NotSet | KconfigValue::Tristate(Tristate::No) => None,
            KconfigValue::Tristate(t) => Some(t.as_str().to_string()),
            KconfigValue::String(s) => Some(format!("\"{}\"", escape(s))),
            KconfigValue::Literal(l) => Some(l.clone()),
        }
    }
}

impl std::fmt::Display for KconfigValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.render() {
            Some(text) => write!(f, "{text}"),
            None => write!(f, "n"),
        }
    }
}

/// One symbol's difference between two config files.
#[derive(Clone, Debug, PartialEq)]
pub struct KconfigDiff {
    pub name: String,
    pub ours: Option<KconfigValue>,
    pub theirs: Option<KconfigValue>,
}

/// An ordered set of config assignments, indexed by symbol name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KconfigFile {
    entries: Vec<(String, KconfigValue)>,
    index: HashMap<String, usize>,
}

static SET_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^CONFIG_([A-Za-z0-9_]+)=(.*)$").unwrap());
static NOT_SET_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^# CONFIG_([A-Za-z0-9_]+) is not set$").unwrap());

impl KconfigFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an assignment. Names are stored without the
    /// `CONFIG_` prefix.
    pub fn push(&mut self, name: &str, value: KconfigValue) {
        let name = name.strip_prefix("CONFIG_").unwrap_or(name);
        match self.index.get(name) {
            Some(idx) => self.entries[*idx].1 = value,
            None => {
                self.index.insert(name.to_string(), self.entries.len());
                self.entries.push((name.to_string(), value));
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&KconfigValue> {
        let name = name.strip_prefix("CONFIG_").unwrap_or(name);
        self.index.get(name).map(|idx| &self.entries[*idx].1)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &KconfigValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn parse_str(contents: &str) -> AutokernelResult<Self> {
        let mut file = KconfigFile::new();
        for (lineno, line) in contents.lines().enumerate() {
            let line = line.trim_end();
            if let Some(caps) = NOT_SET_LINE.captures(line) {
                file.push(&caps[1], KconfigValue::NotSet);
                continue;
            }
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some(caps) = SET_LINE.captures(line) else {
                return Err(AutokernelError::KernelConfigParseError(format!(
                    "line {}: not a config assignment: {line:?}",
                    lineno + 1
                )));
            };
            file.push(&caps[1], parse_value(&caps[2])?);
        }
        Ok(file)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> AutokernelResult<Self> {
        let bytes = crate::util::file_contents_as_bytes(path.as_ref())?;
        let contents = if bytes.starts_with(&[0x1f, 0x8b]) {
            crate::util::inflate_gzip_file(path.as_ref())?
        } else {
            String::from_utf8(bytes).map_err(|e| {
                AutokernelError::KernelConfigParseError(format!(
                    "{}: {e}",
                    path.as_ref().display()
                ))
            })?
        };
        Self::parse_str(&contents)
    }

    /// Canonical text, newline terminated.
    pub fn to_config_string(&self) -> String {
        let mut out = String::new();
        out.push_str("#\n# Automatically generated file; DO NOT EDIT.\n#\n");
        for (name, value) in &self.entries {
            match value.render() {
                Some(text) => out.push_str(&format!("CONFIG_{name}={text}\n")),
                None => out.push_str(&format!("# CONFIG_{name} is not set\n")),
            }
        }
        out
    }

    pub fn write_to_path<P: AsRef<Path>>(&self, path: P) -> AutokernelResult<()> {
        std::fs::write(path.as_ref(), self.to_config_string())?;
        Ok(())
    }

    /// Order-independent comparison; `NotSet` and an absent entry are
    /// different observations and reported as such.
    pub fn diff(&self, other: &KconfigFile) -> Vec<KconfigDiff> {
        let mut diffs = Vec::new();
        for (name, value) in &self.entries {
            match other.get(name) {
                Some(theirs) if theirs == value => {}
                theirs => diffs.push(KconfigDiff {
                    name: name.clone(),
                    ours: Some(value.clone()),
                    theirs: theirs.cloned(),
                }),
            }
        }
        let mut extra: Vec<&(String, KconfigValue)> = other
            .entries
            .iter()
            .filter(|(name, _)| self.get(name).is_none())
            .collect();
        extra.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, value) in extra {
            diffs.push(KconfigDiff {
                name: name.clone(),
                ours: None,
                theirs: Some(value.clone()),
            });
        }
        diffs
    }

    /// Whether both files assign exactly the same values, in any order.
    pub fn same_assignments(&self, other: &KconfigFile) -> bool {
        self.diff(other).is_empty()
    }
}

fn parse_value(raw: &str) -> AutokernelResult<KconfigValue> {
    Ok(match raw {
        "y" => KconfigValue::Tristate(Tristate::Yes),
        "m" => KconfigValue::Tristate(Tristate::Mod),
        "n" => KconfigValue::NotSet,
        quoted if quoted.starts_with('"') => {
            KconfigValue::String(unescape(quoted)?)
        }
        other => KconfigValue::Literal(other.to_string()),
    })
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

pub(crate) fn unescape(quoted: &str) -> AutokernelResult<String> {
    let inner = quoted
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(|| {
            AutokernelError::KernelConfigParseError(format!("unterminated string: {quoted}"))
        })?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(escaped @ ('\\' | '"' | '\'')) => out.push(escaped),
            Some(other) => {
                // The kernel only ever emits \\ and \"; keep anything else
                // verbatim the way its loader does.
                out.push('\\');
                out.push(other);
            }
            None => {
                return Err(AutokernelError::KernelConfigParseError(format!(
                    "dangling escape in {quoted}"
                )))
            }
        }
    }
    Ok(out)
}
