// Copyright (c) 2023 Jake Swensen
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Language-neutral representation of Kconfig dependency and visibility
//! expressions.
//!
//! Expressions are owned trees; leaves carry [`SymbolId`] handles into the
//! registry, never references to symbol objects. Boolean evaluation follows
//! Kconfig's tristate lattice: `n < m < y`, `and` is `min`, `or` is `max`,
//! `not` mirrors across the lattice.

use crate::error::{AutokernelError, AutokernelResult};
use crate::symbol::{SymbolId, SymbolRegistry, SymbolType};
use std::str::FromStr;

/// A Kconfig tristate value, ordered `No < Mod < Yes`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tristate {
    #[default]
    No,
    Mod,
    Yes,
}

impl Tristate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tristate::No => "n",
            Tristate::Mod => "m",
            Tristate::Yes => "y",
        }
    }

    /// `min` on the lattice.
    pub fn and(self, other: Tristate) -> Tristate {
        self.min(other)
    }

    /// `max` on the lattice.
    pub fn or(self, other: Tristate) -> Tristate {
        self.max(other)
    }

    /// `y - self` on the `n/m/y = 0/1/2` lattice.
    pub fn invert(self) -> Tristate {
        match self {
            Tristate::No => Tristate::Yes,
            Tristate::Mod => Tristate::Mod,
            Tristate::Yes => Tristate::No,
        }
    }
}

impl std::fmt::Display for Tristate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Tristate {
    type Err = AutokernelError;

    fn from_str(s: &str) -> AutokernelResult<Self> {
        match s {
            "n" => Ok(Tristate::No),
            "m" => Ok(Tristate::Mod),
            "y" => Ok(Tristate::Yes),
            _ => Err(AutokernelError::KernelConfigParseError(format!(
                "not a tristate value: {s:?}"
            ))),
        }
    }
}

/// A dependency or visibility expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// A constant symbol leaf; its name is the literal text.
    Const(SymbolId),
    Symbol(SymbolId),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Neq(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    Le(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    Ge(Box<Expr>, Box<Expr>),
    Range(Box<Expr>, Box<Expr>),
    List(Vec<Expr>),
}

impl Expr {
    pub fn sym(id: SymbolId) -> Expr {
        Expr::Symbol(id)
    }

    pub fn not(e: Expr) -> Expr {
        Expr::Not(Box::new(e))
    }

    pub fn and(l: Expr, r: Expr) -> Expr {
        Expr::And(Box::new(l), Box::new(r))
    }

    pub fn or(l: Expr, r: Expr) -> Expr {
        Expr::Or(Box::new(l), Box::new(r))
    }

    pub fn eq(l: Expr, r: Expr) -> Expr {
        Expr::Eq(Box::new(l), Box::new(r))
    }

    /// Evaluate to a tristate against the registry's current values.
    pub fn eval(&self, reg: &SymbolRegistry) -> Tristate {
        match self {
            Expr::Const(id) => truth_of(reg.get(*id).name.as_deref().unwrap_or("")),
            Expr::Symbol(id) => {
                let info = reg.get(*id);
                match info.typ {
                    SymbolType::Boolean | SymbolType::Tristate => {
                        info.value.parse().unwrap_or(Tristate::No)
                    }
                    _ => truth_of(&info.value),
                }
            }
            Expr::Not(e) => e.eval(reg).invert(),
            Expr::And(l, r) => l.eval(reg).and(r.eval(reg)),
            Expr::Or(l, r) => l.eval(reg).or(r.eval(reg)),
            Expr::Eq(l, r) => to_tri(compare(reg, l, r) == Some(std::cmp::Ordering::Equal)),
            Expr::Neq(l, r) => {
                to_tri(matches!(compare(reg, l, r), Some(o) if o != std::cmp::Ordering::Equal))
            }
            Expr::Lt(l, r) => to_tri(compare(reg, l, r) == Some(std::cmp::Ordering::Less)),
            Expr::Le(l, r) => to_tri(matches!(
                compare(reg, l, r),
                Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
            )),
            Expr::Gt(l, r) => to_tri(compare(reg, l, r) == Some(std::cmp::Ordering::Greater)),
            Expr::Ge(l, r) => to_tri(matches!(
                compare(reg, l, r),
                Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
            )),
            // Ranges and lists only appear inside properties, never in a
            // boolean position.
            Expr::Range(_, _) | Expr::List(_) => Tristate::No,
        }
    }

    /// The literal text a leaf contributes to comparisons: a symbol's
    /// current value, or a constant's name.
    pub fn leaf_text<'r>(&self, reg: &'r SymbolRegistry) -> Option<&'r str> {
        match self {
            Expr::Symbol(id) => Some(reg.get(*id).value.as_str()),
            Expr::Const(id) => reg.get(*id).name.as_deref(),
            _ => None,
        }
    }

    /// Human-readable rendering, `scripts/kconfig` style.
    pub fn render(&self, reg: &SymbolRegistry) -> String {
        match self {
            Expr::Const(id) | Expr::Symbol(id) => reg.display_name(*id).to_string(),
            Expr::Not(e) => format!("!{}", e.render_grouped(reg)),
            Expr::And(l, r) => {
                format!("{} && {}", l.render_grouped(reg), r.render_grouped(reg))
            }
            Expr::Or(l, r) => format!("{} || {}", l.render_grouped(reg), r.render_grouped(reg)),
            Expr::Eq(l, r) => format!("{}={}", l.render(reg), r.render(reg)),
            Expr::Neq(l, r) => format!("{}!={}", l.render(reg), r.render(reg)),
            Expr::Lt(l, r) => format!("{}<{}", l.render(reg), r.render(reg)),
            Expr::Le(l, r) => format!("{}<={}", l.render(reg), r.render(reg)),
            Expr::Gt(l, r) => format!("{}>{}", l.render(reg), r.render(reg)),
            Expr::Ge(l, r) => format!("{}>={}", l.render(reg), r.render(reg)),
            Expr::Range(l, r) => format!("[{} {}]", l.render(reg), r.render(reg)),
            Expr::List(items) => items
                .iter()
                .map(|e| e.render(reg))
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    fn render_grouped(&self, reg: &SymbolRegistry) -> String {
        match self {
            Expr::And(_, _) | Expr::Or(_, _) => format!("({})", self.render(reg)),
            _ => self.render(reg),
        }
    }

    /// Collect the smallest currently-false sub-clauses, for diagnostics.
    pub fn false_clauses(&self, reg: &SymbolRegistry, out: &mut Vec<String>) {
        if self.eval(reg) != Tristate::No {
            return;
        }
        match self {
            Expr::And(l, r) | Expr::Or(l, r) => {
                l.false_clauses(reg, out);
                r.false_clauses(reg, out);
            }
            other => out.push(other.render(reg)),
        }
    }

    /// All non-constant symbols mentioned by the expression.
    pub fn symbols(&self, out: &mut Vec<SymbolId>) {
        match self {
            Expr::Const(_) => {}
            Expr::Symbol(id) => {
                if !out.contains(id) {
                    out.push(*id);
                }
            }
            Expr::Not(e) => e.symbols(out),
            Expr::And(l, r)
            | Expr::Or(l, r)
            | Expr::Eq(l, r)
            | Expr::Neq(l, r)
            | Expr::Lt(l, r)
            | Expr::Le(l, r)
            | Expr::Gt(l, r)
            | Expr::Ge(l, r)
            | Expr::Range(l, r) => {
                l.symbols(out);
                r.symbols(out);
            }
            Expr::List(items) => {
                for e in items {
                    e.symbols(out);
                }
            }
        }
    }
}

fn to_tri(b: bool) -> Tristate {
    if b {
        Tristate::Yes
    } else {
        Tristate::No
    }
}

/// Truth of a raw value in a boolean position: `n` iff empty or zero.
fn truth_of(value: &str) -> Tristate {
    if value.is_empty() || value == "n" {
        return Tristate::No;
    }
    if value == "m" {
        return Tristate::Mod;
    }
    if let Some(n) = parse_number(value) {
        return to_tri(n != 0);
    }
    Tristate::Yes
}

pub(crate) fn parse_number(s: &str) -> Option<i64> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

/// Kconfig comparison: tristate on the lattice, numbers numerically,
/// everything else lexicographically.
fn compare(reg: &SymbolRegistry, l: &Expr, r: &Expr) -> Option<std::cmp::Ordering> {
    let lv = l.leaf_text(reg)?;
    let rv = r.leaf_text(reg)?;
    if let (Ok(lt), Ok(rt)) = (lv.parse::<Tristate>(), rv.parse::<Tristate>()) {
        return Some(lt.cmp(&rt));
    }
    if let (Some(ln), Some(rn)) = (parse_number(lv), parse_number(rv)) {
        return Some(ln.cmp(&rn));
    }
    Some(lv.cmp(rv))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolRegistry;

    fn registry() -> (SymbolRegistry, SymbolId, SymbolId, SymbolId) {
        let mut reg = SymbolRegistry::new();
        let net = reg.push_named("NET", SymbolType::Boolean);
        let wlan = reg.push_named("WLAN", SymbolType::Tristate);
        let level = reg.push_named("LOGLEVEL", SymbolType::Int);
        reg.get_mut(net).value = "y".into();
        reg.get_mut(wlan).value = "m".into();
        reg.get_mut(level).value = "7".into();
        (reg, net, wlan, level)
    }

    #[test]
    fn lattice_operations() {
        assert_eq!(Tristate::Mod.and(Tristate::Yes), Tristate::Mod);
        assert_eq!(Tristate::Mod.or(Tristate::No), Tristate::Mod);
        assert_eq!(Tristate::Mod.invert(), Tristate::Mod);
        assert_eq!(Tristate::No.invert(), Tristate::Yes);
        assert!(Tristate::No < Tristate::Mod && Tristate::Mod < Tristate::Yes);
    }

    #[test]
    fn and_is_min_or_is_max() {
        let (reg, net, wlan, _) = registry();
        let e = Expr::and(Expr::sym(net), Expr::sym(wlan));
        assert_eq!(e.eval(&reg), Tristate::Mod);
        let e = Expr::or(Expr::sym(net), Expr::sym(wlan));
        assert_eq!(e.eval(&reg), Tristate::Yes);
    }

    #[test]
    fn numeric_comparison() {
        let (mut reg, _, _, level) = registry();
        let ten = reg.intern_const("10");
        let e = Expr::Lt(Box::new(Expr::sym(level)), Box::new(Expr::Const(ten)));
        assert_eq!(e.eval(&reg), Tristate::Yes);
    }

    #[test]
    fn int_symbol_truthiness() {
        let (mut reg, _, _, level) = registry();
        assert_eq!(Expr::sym(level).eval(&reg), Tristate::Yes);
        reg.get_mut(level).value = "0".into();
        assert_eq!(Expr::sym(level).eval(&reg), Tristate::No);
    }

    #[test]
    fn render_and_false_clauses() {
        let (mut reg, net, wlan, _) = registry();
        reg.get_mut(net).value = "n".into();
        reg.get_mut(wlan).value = "n".into();
        let e = Expr::and(Expr::sym(net), Expr::sym(wlan));
        assert_eq!(e.render(&reg), "NET && WLAN");

        let mut false_parts = Vec::new();
        e.false_clauses(&reg, &mut false_parts);
        assert_eq!(false_parts, vec!["NET".to_string(), "WLAN".to_string()]);
    }

    #[test]
    fn nested_rendering_groups_subexpressions() {
        let (reg, net, wlan, level) = registry();
        let e = Expr::and(
            Expr::sym(net),
            Expr::or(Expr::sym(wlan), Expr::not(Expr::sym(level))),
        );
        insta::assert_snapshot!(e.render(&reg), @"NET && (WLAN || !LOGLEVEL)");
    }

    #[test]
    fn false_clauses_skip_satisfied_subtrees() {
        let (mut reg, net, wlan, _) = registry();
        reg.get_mut(wlan).value = "n".into();
        let e = Expr::and(Expr::sym(net), Expr::sym(wlan));

        let mut false_parts = Vec::new();
        e.false_clauses(&reg, &mut false_parts);
        assert_eq!(false_parts, vec!["WLAN".to_string()]);
    }
}
