// Copyright (c) 2023 Jake Swensen
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tree-walking evaluator for the scripted dialect.
//!
//! Unknown global lookups resolve to symbol handles bound by name; the
//! handle only touches the registry when an operation runs, so guarded
//! references to symbols absent from this kernel never fail. Every
//! validator call carries the script file and line.

use super::ast::{BinOp, Block, Expr, LValue, Stat, UnOp};
use super::value::{Builtin, SymbolRef, Table, Value};
use crate::error::{AutokernelError, AutokernelResult};
use crate::expr::Tristate;
use crate::model::Model;
use crate::symbol::SymbolType;
use crate::track::Origin;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

enum Flow {
    Normal,
    Break,
    Return,
}

pub struct Interp<'m> {
    model: &'m mut Model,
    file: PathBuf,
    file_text: String,
    globals: HashMap<String, Value>,
    scopes: Vec<HashMap<String, Value>>,
    loop_depth: u32,
}

impl<'m> Interp<'m> {
    pub fn new(model: &'m mut Model, file: &Path) -> Self {
        let mut globals = HashMap::new();
        globals.insert("y".to_string(), Value::Tristate(Tristate::Yes));
        globals.insert("m".to_string(), Value::Tristate(Tristate::Mod));
        globals.insert("n".to_string(), Value::Tristate(Tristate::No));
        globals.insert("print".to_string(), Value::Builtin(Builtin::Print));
        globals.insert("tostring".to_string(), Value::Builtin(Builtin::ToString));
        globals.insert("error".to_string(), Value::Builtin(Builtin::Error));
        globals.insert("assert".to_string(), Value::Builtin(Builtin::Assert));
        globals.insert("ver".to_string(), Value::Builtin(Builtin::Ver));
        globals.insert("kernel_env".to_string(), Value::Builtin(Builtin::KernelEnv));
        globals.insert(
            "load_kconfig".to_string(),
            Value::Builtin(Builtin::LoadKconfig),
        );
        globals.insert(
            "load_kconfig_unchecked".to_string(),
            Value::Builtin(Builtin::LoadKconfigUnchecked),
        );
        globals.insert(
            "kernel_dir".to_string(),
            Value::Str(model.kernel_dir().display().to_string()),
        );
        globals.insert(
            "kernel_version".to_string(),
            Value::Version(model.kernel_version()),
        );

        Interp {
            file: file.to_path_buf(),
            file_text: file.display().to_string(),
            model,
            globals,
            scopes: Vec::new(),
            loop_depth: 0,
        }
    }

    pub fn run(&mut self, chunk: &Block) -> AutokernelResult<()> {
        self.exec_block(chunk)?;
        Ok(())
    }

    fn err(&self, line: u32, message: impl Into<String>) -> AutokernelError {
        AutokernelError::Script {
            file: self.file_text.clone(),
            line,
            message: message.into(),
        }
    }

    fn positioned(&self, e: AutokernelError, line: u32) -> AutokernelError {
        e.at(&self.file_text, line)
    }

    fn origin(&self, line: u32) -> Origin {
        Origin::new(&self.file, line)
    }

    // ---------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------

    fn exec_block(&mut self, block: &Block) -> AutokernelResult<Flow> {
        self.scopes.push(HashMap::new());
        let result = self.exec_stats(&block.stats);
        self.scopes.pop();
        result
    }

    fn exec_stats(&mut self, stats: &[Stat]) -> AutokernelResult<Flow> {
        for stat in stats {
            match self.exec_stat(stat)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stat(&mut self, stat: &Stat) -> AutokernelResult<Flow> {
        match stat {
            Stat::Local { names, exprs, .. } => {
                let mut values = Vec::with_capacity(names.len());
                for (idx, name) in names.iter().enumerate() {
                    let value = match exprs.get(idx) {
                        Some(e) => self.eval(e)?,
                        None => Value::Nil,
                    };
                    values.push((name.clone(), value));
                }
                let scope = self.scopes.last_mut().expect("block scope");
                for (name, value) in values {
                    scope.insert(name, value);
                }
                Ok(Flow::Normal)
            }
            Stat::Assign { targets, exprs, .. } => {
                let mut values = Vec::with_capacity(targets.len());
                for (idx, _) in targets.iter().enumerate() {
                    values.push(match exprs.get(idx) {
                        Some(e) => self.eval(e)?,
                        None => Value::Nil,
                    });
                }
                for (target, value) in targets.iter().zip(values) {
                    self.assign(target, value)?;
                }
                Ok(Flow::Normal)
            }
            Stat::ExprStat { expr, .. } => {
                self.eval(expr)?;
                Ok(Flow::Normal)
            }
            Stat::If { arms, else_block } => {
                for (cond, body) in arms {
                    if self.eval(cond)?.truthy() {
                        return self.exec_block(body);
                    }
                }
                if let Some(body) = else_block {
                    return self.exec_block(body);
                }
                Ok(Flow::Normal)
            }
            Stat::While { cond, body } => {
                self.loop_depth += 1;
                let result = loop {
                    match self.eval(cond) {
                        Ok(v) if v.truthy() => {}
                        Ok(_) => break Ok(Flow::Normal),
                        Err(e) => break Err(e),
                    }
                    match self.exec_block(body) {
                        Ok(Flow::Normal) => {}
                        Ok(Flow::Break) => break Ok(Flow::Normal),
                        Ok(Flow::Return) => break Ok(Flow::Return),
                        Err(e) => break Err(e),
                    }
                };
                self.loop_depth -= 1;
                result
            }
            Stat::NumericFor {
                var,
                start,
                stop,
                step,
                body,
            } => {
                let line = start.line();
                let start = self.int_operand(start)?;
                let stop = self.int_operand(stop)?;
                let step = match step {
                    Some(e) => self.int_operand(e)?,
                    None => 1,
                };
                if step == 0 {
                    return Err(self.err(line, "for step must not be zero"));
                }

                self.loop_depth += 1;
                let mut result = Ok(Flow::Normal);
                let mut i = start;
                while (step > 0 && i <= stop) || (step < 0 && i >= stop) {
                    self.scopes.push(HashMap::new());
                    self.scopes
                        .last_mut()
                        .expect("loop scope")
                        .insert(var.clone(), Value::Int(i));
                    let flow = self.exec_stats(&body.stats);
                    self.scopes.pop();
                    match flow {
                        Ok(Flow::Normal) => {}
                        Ok(Flow::Break) => break,
                        Ok(Flow::Return) => {
                            result = Ok(Flow::Return);
                            break;
                        }
                        Err(e) => {
                            result = Err(e);
                            break;
                        }
                    }
                    i += step;
                }
                self.loop_depth -= 1;
                result
            }
            Stat::Break { line } => {
                if self.loop_depth == 0 {
                    return Err(self.err(*line, "break outside a loop"));
                }
                Ok(Flow::Break)
            }
            Stat::Return { expr, .. } => {
                if let Some(e) = expr {
                    self.eval(e)?;
                }
                Ok(Flow::Return)
            }
        }
    }

    fn int_operand(&mut self, e: &Expr) -> AutokernelResult<i64> {
        let line = e.line();
        match self.eval(e)? {
            Value::Int(v) => Ok(v),
            other => Err(self.err(
                line,
                format!("for bounds must be integers, found {}", other.type_name()),
            )),
        }
    }

    fn assign(&mut self, target: &LValue, value: Value) -> AutokernelResult<()> {
        match target {
            LValue::Name(name, _) => {
                for scope in self.scopes.iter_mut().rev() {
                    if let Some(slot) = scope.get_mut(name) {
                        *slot = value;
                        return Ok(());
                    }
                }
                self.globals.insert(name.clone(), value);
                Ok(())
            }
            LValue::Index { obj, key, line } => {
                let obj = self.eval(obj)?;
                let key = self.eval(key)?;
                let Value::Table(table) = &obj else {
                    return Err(self.err(*line, format!("cannot index a {}", obj.type_name())));
                };
                set_index(table, key, value).map_err(|message| self.err(*line, message))
            }
        }
    }

    // ---------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------

    fn eval(&mut self, expr: &Expr) -> AutokernelResult<Value> {
        match expr {
            Expr::Nil => Ok(Value::Nil),
            Expr::True => Ok(Value::Bool(true)),
            Expr::False => Ok(Value::Bool(false)),
            Expr::Int(v) => Ok(Value::Int(*v)),
            Expr::Float(v) => Ok(Value::Float(*v)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Name(name, _) => Ok(self.resolve_name(name)),
            Expr::Index { obj, key, line } => {
                let obj = self.eval(obj)?;
                let key = self.eval(key)?;
                let Value::Table(table) = &obj else {
                    return Err(self.err(*line, format!("cannot index a {}", obj.type_name())));
                };
                Ok(get_index(table, &key))
            }
            Expr::Table { array, fields } => {
                let mut table = Table::default();
                for item in array {
                    let value = self.eval(item)?;
                    table.array.push(value);
                }
                for (name, item) in fields {
                    let value = self.eval(item)?;
                    table.fields.insert(name.clone(), value);
                }
                Ok(Value::Table(Rc::new(RefCell::new(table))))
            }
            Expr::Unary { op, expr, line } => {
                let value = self.eval(expr)?;
                match op {
                    UnOp::Not => Ok(Value::Bool(!value.truthy())),
                    UnOp::Neg => match value {
                        Value::Int(v) => Ok(Value::Int(-v)),
                        Value::Float(v) => Ok(Value::Float(-v)),
                        other => Err(self.err(
                            *line,
                            format!("cannot negate a {}", other.type_name()),
                        )),
                    },
                }
            }
            Expr::Binary { op, lhs, rhs, line } => self.eval_binary(*op, lhs, rhs, *line),
            Expr::Call { callee, args, line } => {
                let callee = self.eval(callee)?;
                let args = self.eval_args(args)?;
                self.call(callee, args, *line)
            }
            Expr::Method {
                obj,
                name,
                args,
                line,
            } => {
                let obj = self.eval(obj)?;
                let args = self.eval_args(args)?;
                match obj {
                    Value::Symbol(sref) => self.symbol_method(&sref, name, args, *line),
                    other => Err(self.err(
                        *line,
                        format!("a {} has no method {name:?}", other.type_name()),
                    )),
                }
            }
        }
    }

    fn eval_args(&mut self, args: &[Expr]) -> AutokernelResult<Vec<Value>> {
        args.iter().map(|a| self.eval(a)).collect()
    }

    /// Scopes, then globals, then a symbol handle bound to the name.
    fn resolve_name(&self, name: &str) -> Value {
        for scope in self.scopes.iter().rev() {
            if let Some(value) = scope.get(name) {
                return value.clone();
            }
        }
        if let Some(value) = self.globals.get(name) {
            return value.clone();
        }
        Value::Symbol(SymbolRef {
            name: name.to_string(),
        })
    }

    fn eval_binary(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        line: u32,
    ) -> AutokernelResult<Value> {
        // and/or must stay lazy: the unevaluated side may mention symbols
        // that do not exist on this kernel.
        match op {
            BinOp::And => {
                let l = self.eval(lhs)?;
                return if l.truthy() { self.eval(rhs) } else { Ok(l) };
            }
            BinOp::Or => {
                let l = self.eval(lhs)?;
                return if l.truthy() { Ok(l) } else { self.eval(rhs) };
            }
            _ => {}
        }

        let l = self.eval(lhs)?;
        let r = self.eval(rhs)?;
        match op {
            BinOp::Eq => Ok(Value::Bool(l.eq(&r))),
            BinOp::Ne => Ok(Value::Bool(!l.eq(&r))),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let Some(ordering) = l.compare(&r) else {
                    return Err(self.err(
                        line,
                        format!("cannot compare {} and {}", l.type_name(), r.type_name()),
                    ));
                };
                let result = match op {
                    BinOp::Lt => ordering.is_lt(),
                    BinOp::Le => ordering.is_le(),
                    BinOp::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                };
                Ok(Value::Bool(result))
            }
            BinOp::Concat => {
                for v in [&l, &r] {
                    if matches!(v, Value::Nil | Value::Bool(_) | Value::Table(_)) {
                        return Err(self.err(
                            line,
                            format!("cannot concatenate a {}", v.type_name()),
                        ));
                    }
                }
                Ok(Value::Str(format!("{}{}", l.display(), r.display())))
            }
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                self.arith(op, l, r, line)
            }
            BinOp::And | BinOp::Or => unreachable!("handled above"),
        }
    }

    fn arith(&self, op: BinOp, l: Value, r: Value, line: u32) -> AutokernelResult<Value> {
        let pair = match (&l, &r) {
            (Value::Int(a), Value::Int(b)) => Ok((*a as f64, *b as f64, true)),
            (Value::Int(a), Value::Float(b)) => Ok((*a as f64, *b, false)),
            (Value::Float(a), Value::Int(b)) => Ok((*a, *b as f64, false)),
            (Value::Float(a), Value::Float(b)) => Ok((*a, *b, false)),
            _ => Err(self.err(
                line,
                format!(
                    "arithmetic on {} and {}",
                    l.type_name(),
                    r.type_name()
                ),
            )),
        };
        let (a, b, ints) = pair?;
        if matches!(op, BinOp::Div | BinOp::Mod) && b == 0.0 {
            return Err(self.err(line, "division by zero"));
        }
        let result = match op {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => a / b,
            BinOp::Mod => a % b,
            _ => unreachable!(),
        };
        // Integer arithmetic stays integral except for division.
        if ints && op != BinOp::Div {
            Ok(Value::Int(result as i64))
        } else {
            Ok(Value::Float(result))
        }
    }

    // ---------------------------------------------------------------
    // Calls
    // ---------------------------------------------------------------

    fn call(&mut self, callee: Value, args: Vec<Value>, line: u32) -> AutokernelResult<Value> {
        match callee {
            Value::Builtin(builtin) => self.call_builtin(builtin, args, line),
            // `SYM(value)` is a validated set.
            Value::Symbol(sref) => {
                let value = args
                    .into_iter()
                    .next()
                    .ok_or_else(|| self.err(line, format!("{} needs a value", sref.name)))?;
                self.symbol_set(&sref, value, line)?;
                Ok(Value::Nil)
            }
            other => Err(self.err(line, format!("cannot call a {}", other.type_name()))),
        }
    }

    fn call_builtin(
        &mut self,
        builtin: Builtin,
        args: Vec<Value>,
        line: u32,
    ) -> AutokernelResult<Value> {
        match builtin {
            Builtin::Print => {
                let text: Vec<String> = args.iter().map(Value::display).collect();
                println!("{}", text.join("\t"));
                Ok(Value::Nil)
            }
            Builtin::ToString => Ok(Value::Str(
                args.first().unwrap_or(&Value::Nil).display(),
            )),
            Builtin::Error => Err(self.err(
                line,
                args.first().unwrap_or(&Value::Nil).display(),
            )),
            Builtin::Assert => {
                let value = args.first().cloned().unwrap_or(Value::Nil);
                if value.truthy() {
                    Ok(value)
                } else {
                    let message = args
                        .get(1)
                        .map(Value::display)
                        .unwrap_or_else(|| "assertion failed!".to_string());
                    Err(self.err(line, message))
                }
            }
            Builtin::Ver => {
                let text = self.string_arg(&args, 0, "ver", line)?;
                let version = text
                    .parse()
                    .map_err(|_| self.err(line, format!("not a kernel version: {text:?}")))?;
                Ok(Value::Version(version))
            }
            Builtin::KernelEnv => {
                let name = self.string_arg(&args, 0, "kernel_env", line)?;
                Ok(match self.model.env(&name) {
                    Some(value) => Value::Str(value),
                    None => Value::Nil,
                })
            }
            Builtin::LoadKconfig => {
                let path = self.string_arg(&args, 0, "load_kconfig", line)?;
                self.model
                    .load_config(Path::new(&path))
                    .map_err(|e| self.positioned(e, line))?;
                Ok(Value::Nil)
            }
            Builtin::LoadKconfigUnchecked => {
                let path = self.string_arg(&args, 0, "load_kconfig_unchecked", line)?;
                self.model
                    .load_config_unchecked(Path::new(&path))
                    .map_err(|e| self.positioned(e, line))?;
                Ok(Value::Nil)
            }
        }
    }

    fn string_arg(
        &self,
        args: &[Value],
        idx: usize,
        what: &str,
        line: u32,
    ) -> AutokernelResult<String> {
        match args.get(idx) {
            Some(Value::Str(s)) => Ok(s.clone()),
            Some(other) => Err(self.err(
                line,
                format!("{what} expects a string, found {}", other.type_name()),
            )),
            None => Err(self.err(line, format!("{what} expects an argument"))),
        }
    }

    // ---------------------------------------------------------------
    // Symbols
    // ---------------------------------------------------------------

    fn resolve_symbol(&self, sref: &SymbolRef, line: u32) -> AutokernelResult<crate::symbol::SymbolId> {
        self.model
            .lookup(&sref.name)
            .map_err(|e| self.positioned(e, line))
    }

    fn raw_value(&self, value: &Value, line: u32) -> AutokernelResult<String> {
        match value {
            Value::Str(s) => Ok(s.clone()),
            Value::Tristate(t) => Ok(t.as_str().to_string()),
            Value::Int(v) => Ok(v.to_string()),
            other => Err(self.err(
                line,
                format!("a {} is not a symbol value", other.type_name()),
            )),
        }
    }

    fn symbol_set(&mut self, sref: &SymbolRef, value: Value, line: u32) -> AutokernelResult<()> {
        let id = self.resolve_symbol(sref, line)?;
        let raw = self.raw_value(&value, line)?;
        let origin = self.origin(line);
        self.model
            .set(id, &raw, origin)
            .map_err(|e| self.positioned(e, line))
    }

    /// The current value as a script value, typed by the symbol.
    fn symbol_value(&self, id: crate::symbol::SymbolId) -> Value {
        let info = self.model.registry().get(id);
        match info.typ {
            SymbolType::Boolean | SymbolType::Tristate => {
                Value::Tristate(info.value.parse().unwrap_or(Tristate::No))
            }
            SymbolType::Int => match info.value.parse() {
                Ok(v) => Value::Int(v),
                Err(_) => Value::Str(info.value.clone()),
            },
            _ => Value::Str(info.value.clone()),
        }
    }

    fn symbol_method(
        &mut self,
        sref: &SymbolRef,
        method: &str,
        args: Vec<Value>,
        line: u32,
    ) -> AutokernelResult<Value> {
        match method {
            "set" => {
                let value = args
                    .into_iter()
                    .next()
                    .ok_or_else(|| self.err(line, format!("{}:set needs a value", sref.name)))?;
                self.symbol_set(sref, value, line)?;
                Ok(Value::Nil)
            }
            "value" => {
                let id = self.resolve_symbol(sref, line)?;
                Ok(self.symbol_value(id))
            }
            "is" => {
                let id = self.resolve_symbol(sref, line)?;
                let expected = args
                    .first()
                    .ok_or_else(|| self.err(line, format!("{}:is needs a value", sref.name)))?;
                Ok(Value::Bool(self.symbol_value(id).eq(expected)))
            }
            "type" => {
                let id = self.resolve_symbol(sref, line)?;
                Ok(Value::Str(self.model.registry().get(id).typ.to_string()))
            }
            "satisfy" => {
                let id = self.resolve_symbol(sref, line)?;
                let (value, recursive) = self.satisfy_args(args, line)?;
                let want: Tristate = value
                    .parse()
                    .map_err(|_| self.err(line, format!("not a tristate value: {value:?}")))?;
                let plan = self
                    .model
                    .satisfy(id, want, recursive)
                    .map_err(|e| self.positioned(e, line))?;
                for step in plan {
                    let origin = self.origin(line);
                    self.model
                        .set(step.symbol, &step.value, origin)
                        .map_err(|e| self.positioned(e, line))?;
                }
                Ok(Value::Nil)
            }
            other => Err(self.err(
                line,
                format!("symbol {} has no method {other:?}", sref.name),
            )),
        }
    }

    /// `satisfy{value, recursive=bool}` or `satisfy(value)`.
    fn satisfy_args(&self, args: Vec<Value>, line: u32) -> AutokernelResult<(String, bool)> {
        match args.into_iter().next() {
            Some(Value::Table(table)) => {
                let table = table.borrow();
                let value = match table.array.first() {
                    Some(v) => self.raw_value(v, line)?,
                    None => "y".to_string(),
                };
                let recursive = table
                    .fields
                    .get("recursive")
                    .map(Value::truthy)
                    .unwrap_or(false);
                Ok((value, recursive))
            }
            Some(other) => Ok((self.raw_value(&other, line)?, false)),
            None => Ok(("y".to_string(), false)),
        }
    }
}

fn get_index(table: &Rc<RefCell<Table>>, key: &Value) -> Value {
    let table = table.borrow();
    match key {
        Value::Int(i) if *i >= 1 => table
            .array
            .get((*i - 1) as usize)
            .cloned()
            .unwrap_or(Value::Nil),
        Value::Str(s) => table.fields.get(s).cloned().unwrap_or(Value::Nil),
        _ => Value::Nil,
    }
}

fn set_index(table: &Rc<RefCell<Table>>, key: Value, value: Value) -> Result<(), String> {
    let mut table = table.borrow_mut();
    match key {
        Value::Int(i) if i >= 1 => {
            let idx = (i - 1) as usize;
            if idx < table.array.len() {
                table.array[idx] = value;
            } else if idx == table.array.len() {
                table.array.push(value);
            } else {
                return Err(format!("index {i} is out of range"));
            }
            Ok(())
        }
        Value::Str(s) => {
            table.fields.insert(s, value);
            Ok(())
        }
        other => Err(format!("cannot use a {} as a table key", other.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::super::run_str;
    use crate::error::AutokernelError;
    use crate::model::fake::wireless_fixture;
    use crate::model::Model;
    use std::path::Path;

    fn run(model: &mut Model, src: &str) -> crate::error::AutokernelResult<()> {
        run_str(model, Path::new("config.lua"), src)
    }

    #[test]
    fn bare_call_sets_a_symbol() {
        let (mut model, fx) = wireless_fixture();
        run(&mut model, "NET(\"y\")\n").unwrap();
        assert_eq!(model.value_of(fx.net), "y");
    }

    #[test]
    fn tristate_constants_work_as_values() {
        let (mut model, fx) = wireless_fixture();
        run(&mut model, "NET(y)\nNETDEVICES:set(y)\n").unwrap();
        assert_eq!(model.value_of(fx.netdevices), "y");
    }

    #[test]
    fn config_prefix_is_accepted() {
        let (mut model, fx) = wireless_fixture();
        run(&mut model, "CONFIG_NET(\"y\")\n").unwrap();
        assert_eq!(model.value_of(fx.net), "y");
    }

    #[test]
    fn invalid_tristate_on_boolean_is_positioned() {
        let (mut model, _) = wireless_fixture();
        let err = run(&mut model, "-- comment\nNET(\"m\")\n").unwrap_err();
        match err {
            AutokernelError::At { file, line, source } => {
                assert_eq!(file, "config.lua");
                assert_eq!(line, 2);
                match *source {
                    AutokernelError::InvalidValue { reason, .. } => {
                        assert_eq!(reason, "allowed values are n, y");
                    }
                    other => panic!("expected InvalidValue, got {other:?}"),
                }
            }
            other => panic!("expected positioned error, got {other:?}"),
        }
    }

    #[test]
    fn unmet_dependencies_surface_as_script_errors() {
        let (mut model, _) = wireless_fixture();
        let err = run(&mut model, "WLAN_VENDOR_REALTEK(\"y\")\n").unwrap_err();
        match err {
            AutokernelError::At { source, .. } => {
                assert!(matches!(
                    *source,
                    AutokernelError::UnmetDirectDependencies { .. }
                ));
            }
            other => panic!("expected positioned error, got {other:?}"),
        }
    }

    #[test]
    fn conflicting_assignments_cite_script_lines() {
        let (mut model, _) = wireless_fixture();
        let err = run(&mut model, "NET(\"y\")\nNET(\"n\")\n").unwrap_err();
        match err {
            AutokernelError::At { line, source, .. } => {
                assert_eq!(line, 2);
                match *source {
                    AutokernelError::ConflictingAssignment {
                        first_site,
                        second_site,
                        ..
                    } => {
                        assert_eq!(first_site, "config.lua:1");
                        assert_eq!(second_site, "config.lua:2");
                    }
                    other => panic!("expected ConflictingAssignment, got {other:?}"),
                }
            }
            other => panic!("expected positioned error, got {other:?}"),
        }
    }

    #[test]
    fn satisfy_applies_the_whole_chain() {
        let (mut model, fx) = wireless_fixture();
        run(
            &mut model,
            "WLAN_VENDOR_REALTEK:satisfy{\"y\", recursive=true}\n",
        )
        .unwrap();
        for id in [fx.net, fx.netdevices, fx.wlan, fx.realtek] {
            assert_eq!(model.value_of(id), "y");
        }
    }

    #[test]
    fn satisfy_reaches_select_driven_symbols_via_selectors() {
        let (mut model, fx) = wireless_fixture();
        run(&mut model, "RTLWIFI_USB:satisfy{\"y\", recursive=true}\n").unwrap();
        assert_eq!(model.value_of(fx.rtl8192cu), "y");
        assert_eq!(model.value_of(fx.rtlwifi_usb), "y");
    }

    #[test]
    fn introspection_methods() {
        let (mut model, _) = wireless_fixture();
        run(
            &mut model,
            "NET(\"y\")\n\
             assert(NET:value() == y)\n\
             assert(NET:is(\"y\"))\n\
             assert(NET:type() == \"boolean\")\n\
             assert(WLAN:value() == n)\n",
        )
        .unwrap();
    }

    #[test]
    fn version_conditionals_pick_the_right_branch() {
        // The fixture kernel is 5.19.
        let (mut model, fx) = wireless_fixture();
        run(
            &mut model,
            "if kernel_version >= ver(\"5.6\") then NET(\"y\") else NETDEVICES(\"y\") end\n",
        )
        .unwrap();
        assert_eq!(model.value_of(fx.net), "y");
        assert_eq!(model.value_of(fx.netdevices), "n");
    }

    #[test]
    fn short_circuit_never_resolves_guarded_symbols() {
        let (mut model, _) = wireless_fixture();
        // NO_SUCH_SYMBOL only exists on newer kernels; the guard must keep
        // it from being resolved at all.
        run(
            &mut model,
            "if kernel_version >= ver(\"99.0\") then NO_SUCH_SYMBOL(\"y\") end\n\
             local x = kernel_version >= ver(\"99.0\") and NO_SUCH_SYMBOL:value()\n",
        )
        .unwrap();
    }

    #[test]
    fn loops_and_locals() {
        let (mut model, fx) = wireless_fixture();
        run(
            &mut model,
            "local total = 0\n\
             for i = 1, 7 do total = total + i end\n\
             if total == 28 then NET(\"y\") end\n\
             while NETDEVICES:is(n) do NETDEVICES(\"y\") end\n",
        )
        .unwrap();
        assert_eq!(model.value_of(fx.net), "y");
        assert_eq!(model.value_of(fx.netdevices), "y");
    }

    #[test]
    fn break_exits_a_loop() {
        let (mut model, _) = wireless_fixture();
        run(
            &mut model,
            "local i = 0\n\
             while true do i = i + 1 if i == 3 then break end end\n\
             assert(i == 3)\n",
        )
        .unwrap();
        let err = run(&mut model, "break\n").unwrap_err();
        assert!(matches!(err, AutokernelError::Script { line: 1, .. }));
    }

    #[test]
    fn kernel_globals_are_available() {
        let (mut model, _) = wireless_fixture();
        run(
            &mut model,
            "assert(kernel_dir == \"/usr/src/linux\")\n\
             assert(kernel_env(\"KERNELVERSION\") == \"5.19.0\")\n\
             assert(kernel_env(\"MISSING\") == nil)\n",
        )
        .unwrap();
    }

    #[test]
    fn unchecked_load_then_same_explicit_value_is_no_conflict() {
        let (mut model, fx) = wireless_fixture();
        crate::util::run_with_tmpfile("defconfig", "CONFIG_NET=y\n", |path| {
            let src = format!(
                "load_kconfig_unchecked(\"{}\")\nNET(\"y\")\n",
                path.display()
            );
            run(&mut model, &src).unwrap();
            assert_eq!(model.value_of(fx.net), "y");
        });
    }

    #[test]
    fn unchecked_load_then_different_explicit_value_conflicts_only_when_pinned() {
        let (mut model, fx) = wireless_fixture();
        crate::util::run_with_tmpfile("defconfig", "CONFIG_NET=y\n", |path| {
            // The merge does not pin, so overriding it is fine...
            let src = format!(
                "load_kconfig_unchecked(\"{}\")\nNET(\"n\")\n",
                path.display()
            );
            run(&mut model, &src).unwrap();
            assert_eq!(model.value_of(fx.net), "n");
        });
        // ...but contradicting the explicit override is not.
        let err = run(&mut model, "NET(\"y\")\n").unwrap_err();
        match err {
            AutokernelError::At { source, .. } => {
                assert!(matches!(
                    *source,
                    AutokernelError::ConflictingAssignment { .. }
                ));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn validated_load_routes_through_the_validator() {
        let (mut model, _) = wireless_fixture();
        crate::util::run_with_tmpfile("frag.config", "CONFIG_NET=m\n", |path| {
            let src = format!("load_kconfig(\"{}\")\n", path.display());
            let err = run(&mut model, &src).unwrap_err();
            match err {
                AutokernelError::At { source, .. } => {
                    assert!(matches!(*source, AutokernelError::InvalidValue { .. }));
                }
                other => panic!("expected InvalidValue, got {other:?}"),
            }
        });
    }

    #[test]
    fn error_builtin_aborts_with_position() {
        let (mut model, _) = wireless_fixture();
        let err = run(&mut model, "error(\"unsupported machine\")\n").unwrap_err();
        assert_eq!(
            err,
            AutokernelError::Script {
                file: "config.lua".into(),
                line: 1,
                message: "unsupported machine".into(),
            }
        );
    }

    #[test]
    fn tables_hold_values() {
        let (mut model, fx) = wireless_fixture();
        run(
            &mut model,
            "local wanted = {\"NET\", level = 7}\n\
             assert(wanted[1] == \"NET\")\n\
             assert(wanted.level == 7)\n\
             wanted.level = 5\n\
             assert(wanted[\"level\"] == 5)\n\
             CONSOLE_LOGLEVEL_DEFAULT(wanted.level)\n",
        )
        .unwrap();
        assert_eq!(model.value_of(fx.loglevel), "5");
    }

    #[test]
    fn string_concat_builds_values() {
        let (mut model, fx) = wireless_fixture();
        run(&mut model, "DEFAULT_HOSTNAME(\"host-\" .. 3)\n").unwrap();
        assert_eq!(model.value_of(fx.hostname), "host-3");
    }
}
