// Copyright (c) 2023 Jake Swensen
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Assignment history: an append-only log of every value written through
//! the validator, with enough origin information to cite both sides of a
//! conflict.

use crate::error::{AutokernelError, AutokernelResult};
use crate::symbol::SymbolId;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::SystemTime;

/// A stack frame captured at a script call site.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub name: String,
    pub file: PathBuf,
    pub line: u32,
}

/// Where an assignment came from.
#[derive(Clone, Debug, PartialEq)]
pub struct Origin {
    pub file: PathBuf,
    pub line: u32,
    pub traceback: Vec<Frame>,
}

impl Origin {
    pub fn new(file: impl Into<PathBuf>, line: u32) -> Self {
        Origin {
            file: file.into(),
            line,
            traceback: Vec::new(),
        }
    }

    /// Origin for writes the evaluator performs on its own behalf
    /// (choice demotion, unchecked merges).
    pub fn internal(reason: &str) -> Self {
        Origin::new(format!("<{reason}>"), 0)
    }

    pub fn site(&self) -> String {
        format!("{}:{}", self.file.display(), self.line)
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.site())?;
        for frame in self.traceback.iter().rev() {
            write!(
                f,
                "\n  in {} at {}:{}",
                frame.name,
                frame.file.display(),
                frame.line
            )?;
        }
        Ok(())
    }
}

/// How committed the evaluator is to a symbol's value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PinState {
    #[default]
    Unset,
    /// Written by a merge or by recalculation; does not conflict with a
    /// later explicit assignment.
    Implicit,
    /// Explicitly assigned through the validator; a later explicit
    /// assignment must agree.
    Explicit,
}

/// One assignment event.
#[derive(Clone, Debug)]
pub struct ValueRecord {
    pub symbol: SymbolId,
    pub value: String,
    pub origin: Origin,
    pub timestamp: SystemTime,
    /// Whether the user asked for this exact write (as opposed to a write
    /// the evaluator derived, such as a choice demotion).
    pub direct: bool,
}

/// Append-only assignment log plus the per-symbol pin state machine
/// `Unset -> Implicit -> Explicit`.
#[derive(Debug, Default)]
pub struct ValueTracker {
    records: Vec<ValueRecord>,
    pins: HashMap<SymbolId, (PinState, usize)>,
}

impl ValueTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, id: SymbolId) -> PinState {
        self.pins.get(&id).map(|(s, _)| *s).unwrap_or_default()
    }

    /// The record an explicit pin points at, if the symbol is pinned.
    pub fn pinned(&self, id: SymbolId) -> Option<&ValueRecord> {
        match self.pins.get(&id) {
            Some((PinState::Explicit, idx)) => Some(&self.records[*idx]),
            _ => None,
        }
    }

    pub fn records(&self) -> &[ValueRecord] {
        &self.records
    }

    /// Record an explicit, validated assignment.
    ///
    /// A repeated assignment with the same value is allowed and logged as a
    /// warning; a different value is a conflict citing both sites.
    pub fn record_explicit(
        &mut self,
        id: SymbolId,
        name: &str,
        value: &str,
        origin: Origin,
        direct: bool,
    ) -> AutokernelResult<()> {
        if let Some(prev) = self.pinned(id) {
            if prev.value != value {
                return Err(AutokernelError::ConflictingAssignment {
                    symbol: name.to_string(),
                    first_value: prev.value.clone(),
                    first_site: prev.origin.site(),
                    second_value: value.to_string(),
                    second_site: origin.site(),
                });
            }
            log::warn!(
                "duplicate assignment {name}={value} at {} (first at {})",
                origin.site(),
                prev.origin.site()
            );
        }
        let idx = self.push(id, value, origin, direct);
        self.pins.insert(id, (PinState::Explicit, idx));
        Ok(())
    }

    /// Record a non-pinning write (merge, recalculation fallout, choice
    /// demotion). Never conflicts; never downgrades an explicit pin.
    pub fn record_implicit(&mut self, id: SymbolId, value: &str, origin: Origin) {
        let idx = self.push(id, value, origin, false);
        match self.pins.get(&id) {
            Some((PinState::Explicit, _)) => {}
            _ => {
                self.pins.insert(id, (PinState::Implicit, idx));
            }
        }
    }

    fn push(&mut self, id: SymbolId, value: &str, origin: Origin, direct: bool) -> usize {
        self.records.push(ValueRecord {
            symbol: id,
            value: value.to_string(),
            origin,
            timestamp: SystemTime::now(),
            direct,
        });
        self.records.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u32) -> SymbolId {
        SymbolId(n)
    }

    #[test]
    fn unset_to_implicit_to_explicit() {
        let mut t = ValueTracker::new();
        assert_eq!(t.state(id(0)), PinState::Unset);

        t.record_implicit(id(0), "y", Origin::internal("merge"));
        assert_eq!(t.state(id(0)), PinState::Implicit);

        t.record_explicit(id(0), "NET", "y", Origin::new("a.config", 3), true)
            .unwrap();
        assert_eq!(t.state(id(0)), PinState::Explicit);
    }

    #[test]
    fn implicit_never_downgrades_explicit() {
        let mut t = ValueTracker::new();
        t.record_explicit(id(0), "NET", "y", Origin::new("a.config", 3), true)
            .unwrap();
        t.record_implicit(id(0), "n", Origin::internal("recalc"));
        assert_eq!(t.state(id(0)), PinState::Explicit);
        assert_eq!(t.pinned(id(0)).unwrap().value, "y");
    }

    #[test]
    fn conflicting_explicit_values_cite_both_sites() {
        let mut t = ValueTracker::new();
        t.record_explicit(id(0), "NET", "y", Origin::new("a.lua", 1), true)
            .unwrap();
        let err = t
            .record_explicit(id(0), "NET", "n", Origin::new("a.lua", 2), true)
            .unwrap_err();
        assert_eq!(
            err,
            AutokernelError::ConflictingAssignment {
                symbol: "NET".into(),
                first_value: "y".into(),
                first_site: "a.lua:1".into(),
                second_value: "n".into(),
                second_site: "a.lua:2".into(),
            }
        );
    }

    #[test]
    fn duplicate_same_value_is_not_a_conflict() {
        let mut t = ValueTracker::new();
        t.record_explicit(id(0), "NET", "y", Origin::new("a.lua", 1), true)
            .unwrap();
        t.record_explicit(id(0), "NET", "y", Origin::new("a.lua", 9), true)
            .unwrap();
        assert_eq!(t.records().len(), 2);
    }

    #[test]
    fn merge_then_same_explicit_is_not_a_conflict() {
        let mut t = ValueTracker::new();
        t.record_implicit(id(0), "y", Origin::internal("merge"));
        t.record_explicit(id(0), "NET", "y", Origin::new("a.lua", 1), true)
            .unwrap();
        // A different explicit value after a mere merge is fine too; only
        // explicit-vs-explicit disagreements conflict.
        t.record_implicit(id(1), "m", Origin::internal("merge"));
        t.record_explicit(id(1), "WLAN", "n", Origin::new("a.lua", 2), true)
            .unwrap();
    }
}
