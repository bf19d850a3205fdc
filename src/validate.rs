// Copyright (c) 2023 Jake Swensen
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The assignment validator: the single entry point every user write goes
//! through.
//!
//! Order of checks: symbol existence and type, value coercion (with range
//! checks for numeric symbols), visibility, choice-group exclusivity, the
//! actual write plus recalculation, read-back verification, and finally the
//! assignment record.

use crate::error::{AutokernelError, AutokernelResult};
use crate::expr::{parse_number, Expr, Tristate};
use crate::model::Model;
use crate::symbol::{SymbolId, SymbolType};
use crate::track::Origin;

impl Model {
    /// Validated set. Any failure leaves the configuration as it was.
    pub fn set(&mut self, id: SymbolId, raw: &str, origin: Origin) -> AutokernelResult<()> {
        let info = self.registry.get(id);
        let name = self.registry.display_name(id).to_string();
        let typ = info.typ;
        let visibility = info.visibility;
        let has_prompt = info.has_prompt();
        let choice_group = info.choice_group;

        if typ == SymbolType::Unknown {
            return Err(AutokernelError::UnknownSymbol(name));
        }

        let value = self.coerce(id, &name, typ, raw)?;

        // Detect a contradicting re-assignment before touching Kconfig
        // state, so a failing statement leaves the configuration as-is.
        if let Some(prev) = self.tracker.pinned(id) {
            if prev.value != value {
                return Err(AutokernelError::ConflictingAssignment {
                    symbol: name,
                    first_value: prev.value.clone(),
                    first_site: prev.origin.site(),
                    second_value: value,
                    second_site: origin.site(),
                });
            }
        }

        if has_prompt {
            let too_high = match typ {
                SymbolType::Boolean | SymbolType::Tristate => {
                    let candidate: Tristate = value.parse().expect("coerced tristate");
                    candidate > visibility
                }
                _ => visibility == Tristate::No,
            };
            if too_high {
                return Err(self.unmet_dependencies(id, &name, &value));
            }
        }

        // Within a choice group, setting one member to `y` first demotes
        // whichever member currently holds `y`. The demotion is undone if
        // the write does not stick.
        let mut demoted: Option<SymbolId> = None;
        if value == "y" {
            if let Some(group) = choice_group {
                let members = self.registry.get(group).choice_members.clone();
                for member in members {
                    if member != id && self.registry.get(member).value == "y" {
                        self.backend.set_symbol(member, "n")?;
                        self.tracker
                            .record_implicit(member, "n", Origin::internal("choice"));
                        demoted = Some(member);
                    }
                }
            }
        }

        let accepted = self.backend.set_symbol(id, &value)?;
        if !accepted {
            self.undo_demotion(demoted)?;
            let observed = self.registry.get(id).value.clone();
            let reason = if !has_prompt {
                "the symbol has no prompt; it is set by select from its reverse dependencies"
                    .to_string()
            } else {
                "the value is outside the symbol's assignable range".to_string()
            };
            return Err(AutokernelError::AssignmentRejected {
                symbol: name,
                requested: value,
                observed,
                reason,
            });
        }

        self.backend.recalc();
        self.refresh();

        let observed = self.registry.get(id).value.clone();
        if observed != value {
            self.undo_demotion(demoted)?;
            let reason = match &self.registry.get(id).rev_dep {
                Some(rev) if rev.eval(&self.registry) > Tristate::No => format!(
                    "reverse dependencies ({}) hold the value up",
                    rev.render(&self.registry)
                ),
                _ => "Kconfig recalculation overrode the value".to_string(),
            };
            return Err(AutokernelError::AssignmentRejected {
                symbol: name,
                requested: value,
                observed,
                reason,
            });
        }

        self.tracker
            .record_explicit(id, &name, &value, origin, true)?;
        log::debug!("{name} = {value}");
        Ok(())
    }

    /// Resolve a symbol by name and set it. Convenience for the script
    /// dialects.
    pub fn set_by_name(&mut self, name: &str, raw: &str, origin: Origin) -> AutokernelResult<()> {
        let id = self.lookup(name)?;
        self.set(id, raw, origin)
    }

    fn undo_demotion(&mut self, demoted: Option<SymbolId>) -> AutokernelResult<()> {
        if let Some(member) = demoted {
            self.backend.set_symbol(member, "y")?;
            self.tracker
                .record_implicit(member, "y", Origin::internal("choice"));
            self.backend.recalc();
            self.refresh();
        }
        Ok(())
    }

    /// Coerce a raw value to the symbol's type, enforcing numeric ranges
    /// whose guards currently hold.
    fn coerce(
        &self,
        id: SymbolId,
        name: &str,
        typ: SymbolType,
        raw: &str,
    ) -> AutokernelResult<String> {
        let invalid = |reason: String| AutokernelError::InvalidValue {
            symbol: name.to_string(),
            value: raw.to_string(),
            reason,
        };

        match typ {
            SymbolType::Unknown => unreachable!("checked by the caller"),
            SymbolType::Boolean => match raw {
                "y" | "n" => Ok(raw.to_string()),
                _ => Err(invalid("allowed values are n, y".to_string())),
            },
            SymbolType::Tristate => match raw {
                "y" | "m" | "n" => Ok(raw.to_string()),
                _ => Err(invalid("allowed values are n, m, y".to_string())),
            },
            SymbolType::Int => {
                let parsed: i64 = raw
                    .parse()
                    .map_err(|_| invalid("not a base-10 integer".to_string()))?;
                self.check_ranges(id, parsed, raw, name)?;
                Ok(raw.to_string())
            }
            SymbolType::Hex => {
                let digits = raw
                    .strip_prefix("0x")
                    .or_else(|| raw.strip_prefix("0X"))
                    .ok_or_else(|| invalid("hex values must start with 0x".to_string()))?;
                let parsed = i64::from_str_radix(digits, 16)
                    .map_err(|_| invalid("not a hexadecimal number".to_string()))?;
                self.check_ranges(id, parsed, raw, name)?;
                Ok(raw.to_string())
            }
            SymbolType::String => Ok(raw.to_string()),
        }
    }

    /// Every `range` property whose guard evaluates true applies.
    fn check_ranges(&self, id: SymbolId, parsed: i64, raw: &str, name: &str) -> AutokernelResult<()> {
        for range in &self.registry.get(id).ranges {
            let active = range
                .guard
                .as_ref()
                .map(|g| g.eval(&self.registry) > Tristate::No)
                .unwrap_or(true);
            if !active {
                continue;
            }
            let low = self.bound_value(range.low);
            let high = self.bound_value(range.high);
            let (Some(lo), Some(hi)) = (parse_number(&low), parse_number(&high)) else {
                continue;
            };
            if parsed < lo || parsed > hi {
                return Err(AutokernelError::InvalidValue {
                    symbol: name.to_string(),
                    value: raw.to_string(),
                    reason: format!("out of range [{low}, {high}]"),
                });
            }
        }
        Ok(())
    }

    /// A range bound is a constant symbol (its name is the literal) or a
    /// regular symbol (its current value applies).
    fn bound_value(&self, id: SymbolId) -> String {
        let info = self.registry.get(id);
        if info.is_const {
            info.name.clone().unwrap_or_default()
        } else {
            info.value.clone()
        }
    }

    /// The expression gating user assignment: direct dependencies AND'd
    /// with the union of prompt guards.
    pub(crate) fn effective_dependency(&self, id: SymbolId) -> Option<Expr> {
        let info = self.registry.get(id);
        let mut guards: Option<Expr> = None;
        for prompt in &info.prompts {
            match &prompt.visibility {
                // An unguarded prompt makes the union unconditional.
                None => {
                    guards = None;
                    break;
                }
                Some(expr) => {
                    guards = Some(match guards {
                        None => expr.clone(),
                        Some(acc) => Expr::or(acc, expr.clone()),
                    });
                }
            }
        }
        match (info.direct_dep.clone(), guards) {
            (Some(dep), Some(g)) => Some(Expr::and(dep, g)),
            (Some(dep), None) => Some(dep),
            (None, Some(g)) => Some(g),
            (None, None) => None,
        }
    }

    fn unmet_dependencies(&self, id: SymbolId, name: &str, value: &str) -> AutokernelError {
        let (expression, unmet) = match self.effective_dependency(id) {
            Some(expr) => {
                let mut unmet = Vec::new();
                expr.false_clauses(&self.registry, &mut unmet);
                (expr.render(&self.registry), unmet)
            }
            None => ("n".to_string(), Vec::new()),
        };
        AutokernelError::UnmetDirectDependencies {
            symbol: name.to_string(),
            value: value.to_string(),
            expression,
            unmet,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fake::wireless_fixture;
    use crate::track::PinState;

    fn here(line: u32) -> Origin {
        Origin::new("test.lua", line)
    }

    #[test]
    fn tristate_value_on_boolean_symbol_is_invalid() {
        let (mut model, fx) = wireless_fixture();
        let err = model.set(fx.net, "m", here(1)).unwrap_err();
        assert_eq!(
            err,
            AutokernelError::InvalidValue {
                symbol: "NET".into(),
                value: "m".into(),
                reason: "allowed values are n, y".into(),
            }
        );
    }

    #[test]
    fn visible_boolean_assignment_sticks_and_pins() {
        let (mut model, fx) = wireless_fixture();
        model.set(fx.net, "y", here(1)).unwrap();
        assert_eq!(model.value_of(fx.net), "y");
        assert_eq!(model.tracker().state(fx.net), PinState::Explicit);
    }

    #[test]
    fn unmet_dependencies_enumerate_false_clauses() {
        let (mut model, fx) = wireless_fixture();
        let err = model.set(fx.realtek, "y", here(2)).unwrap_err();
        match err {
            AutokernelError::UnmetDirectDependencies {
                symbol,
                expression,
                unmet,
                ..
            } => {
                assert_eq!(symbol, "WLAN_VENDOR_REALTEK");
                assert_eq!(expression, "WLAN && NETDEVICES");
                assert!(unmet.contains(&"WLAN".to_string()));
                assert!(unmet.contains(&"NETDEVICES".to_string()));
            }
            other => panic!("expected UnmetDirectDependencies, got {other:?}"),
        }
    }

    #[test]
    fn conflicting_reassignment_cites_both_sites() {
        let (mut model, fx) = wireless_fixture();
        model.set(fx.net, "y", here(1)).unwrap();
        let err = model.set(fx.net, "n", here(2)).unwrap_err();
        match err {
            AutokernelError::ConflictingAssignment {
                first_site,
                second_site,
                ..
            } => {
                assert_eq!(first_site, "test.lua:1");
                assert_eq!(second_site, "test.lua:2");
            }
            other => panic!("expected ConflictingAssignment, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_assignment_is_a_warning_not_an_error() {
        let (mut model, fx) = wireless_fixture();
        model.set(fx.net, "y", here(1)).unwrap();
        model.set(fx.net, "y", here(7)).unwrap();
    }

    #[test]
    fn int_range_is_enforced() {
        let (mut model, fx) = wireless_fixture();
        let err = model.set(fx.loglevel, "9", here(1)).unwrap_err();
        assert_eq!(
            err,
            AutokernelError::InvalidValue {
                symbol: "CONSOLE_LOGLEVEL_DEFAULT".into(),
                value: "9".into(),
                reason: "out of range [0, 7]".into(),
            }
        );
        model.set(fx.loglevel, "7", here(2)).unwrap();
        assert_eq!(model.value_of(fx.loglevel), "7");
    }

    #[test]
    fn int_rejects_non_numeric() {
        let (mut model, fx) = wireless_fixture();
        let err = model.set(fx.loglevel, "seven", here(1)).unwrap_err();
        assert!(matches!(err, AutokernelError::InvalidValue { .. }));
    }

    #[test]
    fn hex_requires_prefix() {
        let (mut model, fx) = wireless_fixture();
        let err = model.set(fx.base_addr, "1000", here(1)).unwrap_err();
        assert_eq!(
            err,
            AutokernelError::InvalidValue {
                symbol: "PHYS_OFFSET".into(),
                value: "1000".into(),
                reason: "hex values must start with 0x".into(),
            }
        );
        model.set(fx.base_addr, "0x1000", here(2)).unwrap();
    }

    #[test]
    fn string_assignment_is_free_form() {
        let (mut model, fx) = wireless_fixture();
        model.set(fx.hostname, "buildhost", here(1)).unwrap();
        assert_eq!(model.value_of(fx.hostname), "buildhost");
    }

    #[test]
    fn promptless_symbol_cannot_be_assigned_directly() {
        let (mut model, fx) = wireless_fixture();
        let err = model.set(fx.rtlwifi_usb, "y", here(1)).unwrap_err();
        match err {
            AutokernelError::AssignmentRejected { symbol, reason, .. } => {
                assert_eq!(symbol, "RTLWIFI_USB");
                assert!(reason.contains("select"));
            }
            other => panic!("expected AssignmentRejected, got {other:?}"),
        }
    }

    #[test]
    fn choice_member_set_demotes_previous_winner() {
        let (mut model, fx) = wireless_fixture();
        let (_, o2, os) = fx.cc_opt;
        // The fake picks the first member as the group default.
        assert_eq!(model.value_of(o2), "y");

        model.set(os, "y", here(1)).unwrap();
        assert_eq!(model.value_of(os), "y");
        assert_eq!(model.value_of(o2), "n");
    }

    #[test]
    fn dependent_chain_assigns_in_order() {
        let (mut model, fx) = wireless_fixture();
        model.set(fx.net, "y", here(1)).unwrap();
        model.set(fx.netdevices, "y", here(2)).unwrap();
        model.set(fx.wlan, "y", here(3)).unwrap();
        model.set(fx.realtek, "y", here(4)).unwrap();
        assert_eq!(model.value_of(fx.realtek), "y");
    }

    #[test]
    fn select_driven_symbol_follows_its_selector() {
        let (mut model, fx) = wireless_fixture();
        for (id, line) in [
            (fx.net, 1),
            (fx.netdevices, 2),
            (fx.wlan, 3),
            (fx.realtek, 4),
        ] {
            model.set(id, "y", here(line)).unwrap();
        }
        model.set(fx.rtl8192cu, "y", here(5)).unwrap();
        assert_eq!(model.value_of(fx.rtlwifi_usb), "y");
    }
}
