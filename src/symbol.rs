// Copyright (c) 2023 Jake Swensen
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The typed symbol table built once from the bridge after Kconfig parses.
//!
//! Symbols are created exactly once and live for the duration of the
//! process; only their cached `value`/`visibility` fields change, and only
//! as a result of a completed recalculation.

use crate::expr::{Expr, Tristate};
use std::collections::HashMap;

/// Stable handle for a symbol in the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymbolId(pub(crate) u32);

impl SymbolId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SymbolType {
    #[default]
    Unknown,
    Boolean,
    Tristate,
    Int,
    Hex,
    String,
}

impl SymbolType {
    pub fn is_tristate_like(&self) -> bool {
        matches!(self, SymbolType::Boolean | SymbolType::Tristate)
    }
}

impl std::fmt::Display for SymbolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            SymbolType::Unknown => "unknown",
            SymbolType::Boolean => "boolean",
            SymbolType::Tristate => "tristate",
            SymbolType::Int => "int",
            SymbolType::Hex => "hex",
            SymbolType::String => "string",
        };
        write!(f, "{text}")
    }
}

/// A prompt and the expression guarding its visibility.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Prompt {
    pub text: String,
    pub visibility: Option<Expr>,
}

/// A `range lo hi [if guard]` property. Bounds reference constant symbols.
#[derive(Clone, Debug, PartialEq)]
pub struct NumericRange {
    pub low: SymbolId,
    pub high: SymbolId,
    pub guard: Option<Expr>,
}

#[derive(Clone, Debug, Default)]
pub struct SymbolInfo {
    /// `None` for anonymous choice groups and unnamed menu symbols.
    pub name: Option<String>,
    pub typ: SymbolType,
    /// Current value as reported after the last completed recalc.
    pub value: String,
    /// Current prompt visibility after the last completed recalc.
    pub visibility: Tristate,
    /// The `depends on` expression.
    pub direct_dep: Option<Expr>,
    /// OR of all `select` statements targeting this symbol.
    pub rev_dep: Option<Expr>,
    /// OR of all `imply` statements targeting this symbol.
    pub implied: Option<Expr>,
    pub prompts: Vec<Prompt>,
    pub ranges: Vec<NumericRange>,
    /// The choice group this symbol belongs to, if any.
    pub choice_group: Option<SymbolId>,
    /// Members, when this symbol is a choice group.
    pub choice_members: Vec<SymbolId>,
    pub is_choice: bool,
    pub is_const: bool,
    pub help: Option<String>,
}

impl SymbolInfo {
    /// Whether a user can ever assign this symbol directly: it needs at
    /// least one prompt.
    pub fn has_prompt(&self) -> bool {
        !self.prompts.is_empty()
    }
}

/// Symbol table indexed by id and by name.
#[derive(Clone, Debug, Default)]
pub struct SymbolRegistry {
    symbols: Vec<SymbolInfo>,
    by_name: HashMap<String, SymbolId>,
    consts: HashMap<String, SymbolId>,
}

impl SymbolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, info: SymbolInfo) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        if let Some(name) = &info.name {
            if info.is_const {
                self.consts.insert(name.clone(), id);
            } else {
                self.by_name.insert(name.clone(), id);
            }
        }
        self.symbols.push(info);
        id
    }

    /// Convenience for building registries by hand (bridge import fills
    /// the remaining metadata in a second pass).
    pub fn push_named(&mut self, name: &str, typ: SymbolType) -> SymbolId {
        self.push(SymbolInfo {
            name: Some(name.to_string()),
            typ,
            value: match typ {
                SymbolType::Boolean | SymbolType::Tristate => "n".to_string(),
                _ => String::new(),
            },
            ..Default::default()
        })
    }

    /// Get or create the constant symbol for a literal.
    pub fn intern_const(&mut self, literal: &str) -> SymbolId {
        if let Some(id) = self.consts.get(literal) {
            return *id;
        }
        self.push(SymbolInfo {
            name: Some(literal.to_string()),
            is_const: true,
            ..Default::default()
        })
    }

    pub fn get(&self, id: SymbolId) -> &SymbolInfo {
        &self.symbols[id.index()]
    }

    pub fn get_mut(&mut self, id: SymbolId) -> &mut SymbolInfo {
        &mut self.symbols[id.index()]
    }

    /// Look a symbol up by name, accepting both `FOO` and `CONFIG_FOO`.
    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        let stripped = name.strip_prefix("CONFIG_").unwrap_or(name);
        self.by_name.get(stripped).copied()
    }

    pub fn display_name(&self, id: SymbolId) -> &str {
        self.get(id).name.as_deref().unwrap_or("<choice>")
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &SymbolInfo)> {
        self.symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (SymbolId(i as u32), s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_accepts_both_prefixed_and_bare_names() {
        let mut reg = SymbolRegistry::new();
        let id = reg.push_named("USB_ACM", SymbolType::Tristate);
        assert_eq!(reg.lookup("USB_ACM"), Some(id));
        assert_eq!(reg.lookup("CONFIG_USB_ACM"), Some(id));
        assert_eq!(reg.lookup("CONFIG_MISSING"), None);
    }

    #[test]
    fn const_symbols_are_interned_once() {
        let mut reg = SymbolRegistry::new();
        let a = reg.intern_const("y");
        let b = reg.intern_const("y");
        let c = reg.intern_const("0x20");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(reg.get(a).is_const);
        // Constants never shadow real symbols.
        assert_eq!(reg.lookup("y"), None);
    }

    #[test]
    fn anonymous_symbols_render_as_choice() {
        let mut reg = SymbolRegistry::new();
        let id = reg.push(SymbolInfo {
            is_choice: true,
            typ: SymbolType::Boolean,
            ..Default::default()
        });
        assert_eq!(reg.display_name(id), "<choice>");
    }
}
