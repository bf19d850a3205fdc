// Copyright (c) 2023 Jake Swensen
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The dependency satisfier: given a target assignment whose dependencies
//! are currently unmet, compute an ordered list of prerequisite
//! assignments that makes it legal.
//!
//! The solver works bottom-up over the target's effective visibility
//! expression. Conjunctions require all children; disjunctions take the
//! cheapest branch and refuse to guess between equally-cheap distinct
//! branches. Output order is topological: a prerequisite always precedes
//! the assignments that need it. Promptless symbols are reached through
//! their selectors, never assigned directly.

use crate::error::{AutokernelError, AutokernelResult};
use crate::expr::{parse_number, Expr, Tristate};
use crate::model::Model;
use crate::symbol::{SymbolId, SymbolType};

/// One step of a satisfier plan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assignment {
    pub symbol: SymbolId,
    pub value: String,
}

impl Model {
    /// Compute the ordered assignments that make `target = want` legal.
    ///
    /// With `recursive` unset, only the direct leaves of the dependency
    /// expression are emitted; the caller sees what must be enabled one
    /// level up without the solver walking further.
    pub fn satisfy(
        &self,
        target: SymbolId,
        want: Tristate,
        recursive: bool,
    ) -> AutokernelResult<Vec<Assignment>> {
        if want == Tristate::No {
            return Err(AutokernelError::InvalidValue {
                symbol: self.registry.display_name(target).to_string(),
                value: want.to_string(),
                reason: "satisfy targets m or y".to_string(),
            });
        }
        let mut solver = Solver {
            model: self,
            recursive,
            root: target,
            in_progress: Vec::new(),
        };
        solver.solve_symbol(target, want)
    }
}

struct Solver<'a> {
    model: &'a Model,
    recursive: bool,
    root: SymbolId,
    in_progress: Vec<SymbolId>,
}

impl<'a> Solver<'a> {
    fn name(&self, id: SymbolId) -> String {
        self.model.registry().display_name(id).to_string()
    }

    fn current(&self, id: SymbolId) -> Tristate {
        Expr::sym(id).eval(self.model.registry())
    }

    fn solve_symbol(&mut self, id: SymbolId, want: Tristate) -> AutokernelResult<Vec<Assignment>> {
        if self.in_progress.contains(&id) {
            let chain: Vec<String> = self
                .in_progress
                .iter()
                .map(|s| self.name(*s))
                .chain(std::iter::once(self.name(id)))
                .collect();
            return Err(AutokernelError::CycleDetected {
                chain: chain.join(" -> "),
            });
        }
        if self.current(id) >= want {
            return Ok(Vec::new());
        }

        self.in_progress.push(id);
        let result = self.solve_symbol_inner(id, want);
        self.in_progress.pop();
        result
    }

    fn solve_symbol_inner(
        &mut self,
        id: SymbolId,
        want: Tristate,
    ) -> AutokernelResult<Vec<Assignment>> {
        let info = self.model.registry().get(id);

        if !info.has_prompt() {
            // Only a select can raise this symbol; emit its selectors.
            let Some(rev) = info.rev_dep.clone() else {
                return Err(AutokernelError::UnsupportedExpression {
                    symbol: self.name(id),
                    expression: "symbol has neither a prompt nor reverse dependencies".to_string(),
                });
            };
            return self.solve_expr(&normalize(rev), want);
        }

        let mut plan = if info.visibility >= want {
            Vec::new()
        } else {
            match self.model.effective_dependency(id) {
                Some(expr) => self.solve_expr(&normalize(expr), want)?,
                None => Vec::new(),
            }
        };
        merge_into(
            &mut plan,
            Assignment {
                symbol: id,
                value: want.as_str().to_string(),
            },
            self.model,
        )?;
        Ok(plan)
    }

    /// Make a symbol hold an exact literal (int/hex/string comparisons).
    fn solve_symbol_literal(
        &mut self,
        id: SymbolId,
        literal: &str,
    ) -> AutokernelResult<Vec<Assignment>> {
        if self.model.value_of(id) == literal {
            return Ok(Vec::new());
        }
        let assignment = Assignment {
            symbol: id,
            value: literal.to_string(),
        };
        if !self.recursive {
            return Ok(vec![assignment]);
        }
        let info = self.model.registry().get(id);
        if !info.has_prompt() {
            return Err(AutokernelError::UnsupportedExpression {
                symbol: self.name(id),
                expression: format!("{} has no prompt", self.name(id)),
            });
        }
        let mut plan = if info.visibility > Tristate::No {
            Vec::new()
        } else {
            match self.model.effective_dependency(id) {
                Some(expr) => self.solve_expr(&normalize(expr), Tristate::Yes)?,
                None => Vec::new(),
            }
        };
        merge_into(&mut plan, assignment, self.model)?;
        Ok(plan)
    }

    fn solve_expr(&mut self, e: &Expr, want: Tristate) -> AutokernelResult<Vec<Assignment>> {
        if e.eval(self.model.registry()) >= want {
            return Ok(Vec::new());
        }
        match e {
            Expr::Const(_) => Err(self.unsupported(e)),
            Expr::Symbol(s) => {
                if self.recursive {
                    self.solve_symbol(*s, want)
                } else {
                    Ok(vec![Assignment {
                        symbol: *s,
                        value: want.as_str().to_string(),
                    }])
                }
            }
            Expr::Not(inner) => match inner.as_ref() {
                Expr::Symbol(s) => Ok(vec![Assignment {
                    symbol: *s,
                    value: "n".to_string(),
                }]),
                _ => Err(self.unsupported(e)),
            },
            Expr::And(l, r) => {
                let mut plan = self.solve_expr(l, want)?;
                for step in self.solve_expr(r, want)? {
                    merge_into(&mut plan, step, self.model)?;
                }
                Ok(plan)
            }
            Expr::Or(_, _) => self.solve_disjunction(e, want),
            Expr::Eq(l, r) => self.solve_comparison(e, l, r, Comparison::Eq, want),
            Expr::Neq(l, r) => self.solve_comparison(e, l, r, Comparison::Neq, want),
            Expr::Lt(l, r) => self.solve_comparison(e, l, r, Comparison::Lt, want),
            Expr::Le(l, r) => self.solve_comparison(e, l, r, Comparison::Le, want),
            Expr::Gt(l, r) => self.solve_comparison(e, l, r, Comparison::Gt, want),
            Expr::Ge(l, r) => self.solve_comparison(e, l, r, Comparison::Ge, want),
            Expr::Range(_, _) | Expr::List(_) => Err(self.unsupported(e)),
        }
    }

    /// Pick the cheapest viable branch of a disjunction; refuse to guess
    /// between equally-cheap distinct alternatives.
    fn solve_disjunction(&mut self, e: &Expr, want: Tristate) -> AutokernelResult<Vec<Assignment>> {
        let mut branches = Vec::new();
        collect_or(e, &mut branches);

        let mut solved: Vec<Vec<Assignment>> = Vec::new();
        let mut first_error = None;
        for branch in &branches {
            match self.solve_expr(branch, want) {
                Ok(plan) => solved.push(plan),
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        if solved.is_empty() {
            return Err(first_error.unwrap_or_else(|| self.unsupported(e)));
        }

        let best_cost = solved.iter().map(Vec::len).min().expect("non-empty");
        let mut best: Vec<Vec<Assignment>> = solved
            .into_iter()
            .filter(|p| p.len() == best_cost)
            .collect();
        best.dedup();
        if best.len() > 1 {
            let mut rendered: Vec<String> = best
                .iter()
                .map(|plan| {
                    plan.iter()
                        .map(|a| format!("{}={}", self.name(a.symbol), a.value))
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .collect();
            rendered.sort();
            rendered.dedup();
            if rendered.len() > 1 {
                return Err(AutokernelError::AmbiguousChoice {
                    symbol: self.name(self.root),
                    branches: rendered,
                });
            }
        }
        Ok(best.swap_remove(0))
    }

    fn solve_comparison(
        &mut self,
        whole: &Expr,
        l: &Expr,
        r: &Expr,
        op: Comparison,
        want: Tristate,
    ) -> AutokernelResult<Vec<Assignment>> {
        // Orient as <symbol> <op> <constant>.
        let (sym, lit, op) = match (l, r) {
            (Expr::Symbol(s), Expr::Const(c)) => (*s, *c, op),
            (Expr::Const(c), Expr::Symbol(s)) => (*s, *c, op.mirror()),
            _ => return Err(self.unsupported(whole)),
        };
        let literal = self
            .model
            .registry()
            .get(lit)
            .name
            .clone()
            .unwrap_or_default();
        let typ = self.model.registry().get(sym).typ;

        match op {
            Comparison::Eq => {
                if typ.is_tristate_like() {
                    match literal.parse::<Tristate>() {
                        Ok(Tristate::No) => Ok(vec![Assignment {
                            symbol: sym,
                            value: "n".to_string(),
                        }]),
                        Ok(tri) => {
                            if self.recursive {
                                self.solve_symbol(sym, tri)
                            } else {
                                Ok(vec![Assignment {
                                    symbol: sym,
                                    value: tri.as_str().to_string(),
                                }])
                            }
                        }
                        Err(_) => Err(self.unsupported(whole)),
                    }
                } else {
                    self.solve_symbol_literal(sym, &literal)
                }
            }
            Comparison::Neq => {
                // Only the `!= n` shape has a deterministic answer.
                if typ.is_tristate_like() && literal == "n" {
                    if self.recursive {
                        self.solve_symbol(sym, want.max(Tristate::Mod))
                    } else {
                        Ok(vec![Assignment {
                            symbol: sym,
                            value: "y".to_string(),
                        }])
                    }
                } else {
                    Err(self.unsupported(whole))
                }
            }
            Comparison::Lt | Comparison::Le | Comparison::Gt | Comparison::Ge => {
                if !matches!(typ, SymbolType::Int | SymbolType::Hex) {
                    return Err(self.unsupported(whole));
                }
                let Some(bound) = parse_number(&literal) else {
                    return Err(self.unsupported(whole));
                };
                let value = match op {
                    Comparison::Le | Comparison::Ge => bound,
                    Comparison::Lt => bound - 1,
                    Comparison::Gt => bound + 1,
                    Comparison::Eq | Comparison::Neq => unreachable!(),
                };
                let text = match typ {
                    SymbolType::Hex => format!("{value:#x}"),
                    _ => value.to_string(),
                };
                self.solve_symbol_literal(sym, &text)
            }
        }
    }

    fn unsupported(&self, e: &Expr) -> AutokernelError {
        AutokernelError::UnsupportedExpression {
            symbol: self.name(self.root),
            expression: e.render(self.model.registry()),
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Comparison {
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn mirror(self) -> Self {
        match self {
            Comparison::Lt => Comparison::Gt,
            Comparison::Le => Comparison::Ge,
            Comparison::Gt => Comparison::Lt,
            Comparison::Ge => Comparison::Le,
            other => other,
        }
    }
}

/// Append a step unless an equal one is already planned; two different
/// values for the same symbol make the expression unsatisfiable for us.
fn merge_into(plan: &mut Vec<Assignment>, step: Assignment, model: &Model) -> AutokernelResult<()> {
    if let Some(existing) = plan.iter().find(|a| a.symbol == step.symbol) {
        if existing.value == step.value {
            return Ok(());
        }
        return Err(AutokernelError::UnsupportedExpression {
            symbol: model.registry().display_name(step.symbol).to_string(),
            expression: format!(
                "requires both {value1} and {value2}",
                value1 = existing.value,
                value2 = step.value
            ),
        });
    }
    plan.push(step);
    Ok(())
}

/// Negation-normal form: push `!` down to the leaves.
fn normalize(e: Expr) -> Expr {
    match e {
        Expr::Not(inner) => negate(*inner),
        Expr::And(l, r) => Expr::and(normalize(*l), normalize(*r)),
        Expr::Or(l, r) => Expr::or(normalize(*l), normalize(*r)),
        other => other,
    }
}

fn negate(e: Expr) -> Expr {
    match e {
        Expr::Not(inner) => normalize(*inner),
        Expr::And(l, r) => Expr::or(negate(*l), negate(*r)),
        Expr::Or(l, r) => Expr::and(negate(*l), negate(*r)),
        Expr::Eq(l, r) => Expr::Neq(l, r),
        Expr::Neq(l, r) => Expr::Eq(l, r),
        Expr::Lt(l, r) => Expr::Ge(l, r),
        Expr::Le(l, r) => Expr::Gt(l, r),
        Expr::Gt(l, r) => Expr::Le(l, r),
        Expr::Ge(l, r) => Expr::Lt(l, r),
        other => Expr::not(other),
    }
}

fn collect_or<'e>(e: &'e Expr, out: &mut Vec<&'e Expr>) {
    match e {
        Expr::Or(l, r) => {
            collect_or(l, out);
            collect_or(r, out);
        }
        other => out.push(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fake::wireless_fixture;
    use crate::symbol::{Prompt, SymbolRegistry};
    use crate::track::Origin;

    fn names(model: &Model, plan: &[Assignment]) -> Vec<String> {
        plan.iter()
            .map(|a| format!("{}={}", model.registry().display_name(a.symbol), a.value))
            .collect()
    }

    #[test]
    fn satisfied_target_needs_nothing() {
        let (mut model, fx) = wireless_fixture();
        model.set(fx.net, "y", Origin::new("t", 1)).unwrap();
        let plan = model.satisfy(fx.net, Tristate::Yes, true).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn recursive_plan_is_topologically_ordered() {
        let (model, fx) = wireless_fixture();
        let plan = model.satisfy(fx.realtek, Tristate::Yes, true).unwrap();
        assert_eq!(
            names(&model, &plan),
            vec![
                "NET=y",
                "NETDEVICES=y",
                "WLAN=y",
                "WLAN_VENDOR_REALTEK=y"
            ]
        );
    }

    #[test]
    fn non_recursive_plan_emits_direct_leaves_only() {
        let (model, fx) = wireless_fixture();
        let plan = model.satisfy(fx.realtek, Tristate::Yes, false).unwrap();
        assert_eq!(
            names(&model, &plan),
            vec!["WLAN=y", "NETDEVICES=y", "WLAN_VENDOR_REALTEK=y"]
        );
    }

    #[test]
    fn promptless_target_emits_selectors_not_the_leaf() {
        let (model, fx) = wireless_fixture();
        let plan = model.satisfy(fx.rtlwifi_usb, Tristate::Yes, true).unwrap();
        let rendered = names(&model, &plan);
        assert_eq!(
            rendered,
            vec![
                "NET=y",
                "NETDEVICES=y",
                "WLAN=y",
                "WLAN_VENDOR_REALTEK=y",
                "RTL8192CU=y"
            ]
        );
        assert!(!rendered.iter().any(|s| s.starts_with("RTLWIFI_USB")));
    }

    #[test]
    fn want_n_is_rejected() {
        let (model, fx) = wireless_fixture();
        assert!(matches!(
            model.satisfy(fx.net, Tristate::No, true),
            Err(AutokernelError::InvalidValue { .. })
        ));
    }

    fn two_path_registry(equal_cost: bool) -> (Model, crate::symbol::SymbolId) {
        use crate::model::fake::FakeKernel;
        use crate::model::Model;
        use std::path::PathBuf;

        let mut reg = SymbolRegistry::new();
        let prompt = |text: &str| Prompt {
            text: text.to_string(),
            visibility: None,
        };

        let a = reg.push_named("ALPHA", crate::symbol::SymbolType::Boolean);
        reg.get_mut(a).prompts.push(prompt("a"));
        let b = reg.push_named("BETA", crate::symbol::SymbolType::Boolean);
        reg.get_mut(b).prompts.push(prompt("b"));
        if !equal_cost {
            // BETA costs one extra enable.
            let pre = reg.push_named("BETA_DEP", crate::symbol::SymbolType::Boolean);
            reg.get_mut(pre).prompts.push(prompt("pre"));
            reg.get_mut(b).direct_dep = Some(Expr::sym(pre));
        }
        let target = reg.push_named("TARGET", crate::symbol::SymbolType::Boolean);
        reg.get_mut(target).prompts.push(prompt("t"));
        reg.get_mut(target).direct_dep = Some(Expr::or(Expr::sym(a), Expr::sym(b)));

        let backend = Box::new(FakeKernel::new(&reg));
        let model = Model::new(
            reg,
            backend,
            PathBuf::from("/usr/src/linux"),
            crate::kernel::KernelVersion::new(5, 19, 0),
        );
        (model, target)
    }

    #[test]
    fn cheaper_disjunction_branch_wins() {
        let (model, target) = two_path_registry(false);
        let id = model.lookup("ALPHA").unwrap();
        let plan = model.satisfy(target, Tristate::Yes, true).unwrap();
        assert_eq!(plan[0].symbol, id);
        assert_eq!(names(&model, &plan), vec!["ALPHA=y", "TARGET=y"]);
    }

    #[test]
    fn equally_cheap_branches_are_ambiguous() {
        let (model, target) = two_path_registry(true);
        let err = model.satisfy(target, Tristate::Yes, true).unwrap_err();
        match err {
            AutokernelError::AmbiguousChoice { symbol, branches } => {
                assert_eq!(symbol, "TARGET");
                assert_eq!(branches, vec!["ALPHA=y".to_string(), "BETA=y".to_string()]);
            }
            other => panic!("expected AmbiguousChoice, got {other:?}"),
        }
    }

    #[test]
    fn dependency_cycles_are_detected() {
        use crate::model::fake::FakeKernel;
        use std::path::PathBuf;

        let mut reg = SymbolRegistry::new();
        let prompt = |text: &str| Prompt {
            text: text.to_string(),
            visibility: None,
        };
        let a = reg.push_named("LOOP_A", crate::symbol::SymbolType::Boolean);
        reg.get_mut(a).prompts.push(prompt("a"));
        let b = reg.push_named("LOOP_B", crate::symbol::SymbolType::Boolean);
        reg.get_mut(b).prompts.push(prompt("b"));
        reg.get_mut(a).direct_dep = Some(Expr::sym(b));
        reg.get_mut(b).direct_dep = Some(Expr::sym(a));

        let backend = Box::new(FakeKernel::new(&reg));
        let model = Model::new(
            reg,
            backend,
            PathBuf::from("/usr/src/linux"),
            crate::kernel::KernelVersion::new(5, 19, 0),
        );

        let err = model.satisfy(a, Tristate::Yes, true).unwrap_err();
        match err {
            AutokernelError::CycleDetected { chain } => {
                assert_eq!(chain, "LOOP_A -> LOOP_B -> LOOP_A");
            }
            other => panic!("expected CycleDetected, got {other:?}"),
        }
    }

    #[test]
    fn negated_leaf_requests_n() {
        use crate::model::fake::FakeKernel;
        use std::path::PathBuf;

        let mut reg = SymbolRegistry::new();
        let prompt = |text: &str| Prompt {
            text: text.to_string(),
            visibility: None,
        };
        let legacy = reg.push_named("LEGACY_DRIVER", crate::symbol::SymbolType::Boolean);
        reg.get_mut(legacy).prompts.push(prompt("legacy"));
        let target = reg.push_named("MODERN_DRIVER", crate::symbol::SymbolType::Boolean);
        reg.get_mut(target).prompts.push(prompt("modern"));
        reg.get_mut(target).direct_dep = Some(Expr::not(Expr::sym(legacy)));

        let mut backend = FakeKernel::new(&reg);
        use crate::model::KconfigBackend;
        backend.set_symbol(legacy, "y").unwrap();
        backend.recalc();
        let model = Model::new(
            reg,
            Box::new(backend),
            PathBuf::from("/usr/src/linux"),
            crate::kernel::KernelVersion::new(5, 19, 0),
        );

        let plan = model.satisfy(target, Tristate::Yes, true).unwrap();
        assert_eq!(
            names(&model, &plan),
            vec!["LEGACY_DRIVER=n", "MODERN_DRIVER=y"]
        );
    }
}
