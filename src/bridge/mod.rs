// Copyright (c) 2023 Jake Swensen
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The native Kconfig bridge: a shared object built from the kernel's own
//! `scripts/kconfig` sources plus an injected shim, loaded in-process.
//!
//! Kconfig keeps process-global mutable C state, so the bridge is treated
//! as a singleton with explicit init and teardown; all access is
//! serialized by the single-threaded evaluator. The environment snapshot
//! captured at init is owned by the bridge for its lifetime; later changes
//! to the ambient process environment do not reach it.

mod compile;
pub mod ffi;

use crate::error::{AutokernelError, AutokernelResult};
use crate::expr::{Expr, Tristate};
use crate::kernel::KernelVersion;
use crate::model::KconfigBackend;
use crate::symbol::{NumericRange, Prompt, SymbolId, SymbolInfo, SymbolRegistry, SymbolType};
use ffi::{BridgeVTable, ExprHandle, PropHandle, SymbolHandle};
use libloading::Library;
use std::collections::HashMap;
use std::ffi::CString;
use std::path::{Path, PathBuf};

pub struct Bridge {
    vt: BridgeVTable,
    // Keeps the vtable's function pointers alive; must outlive every call.
    _lib: Library,
    /// `SymbolId.index() -> struct symbol *`, grown in lockstep with the
    /// registry during import.
    handles: Vec<SymbolHandle>,
    by_handle: HashMap<usize, SymbolId>,
    env: HashMap<String, String>,
    kernel_dir: PathBuf,
    version: KernelVersion,
}

impl Bridge {
    /// Build (or reuse) the bridge library for a kernel tree, capture the
    /// Makefile environment, load the library and parse Kconfig.
    pub fn new<P: AsRef<Path>>(kernel_dir: P) -> AutokernelResult<Self> {
        let kernel_dir = kernel_dir.as_ref().to_path_buf();
        let version = KernelVersion::from_kernel_dir(&kernel_dir)?;
        version.ensure_supported()?;

        let so_path = compile::ensure_bridge(&kernel_dir, version)?;
        let env = compile::capture_environment(&kernel_dir)?;

        let lib = unsafe { Library::new(&so_path) }
            .map_err(|e| AutokernelError::Bridge(format!("cannot load {}: {e}", so_path.display())))?;
        let vt = unsafe { BridgeVTable::load(&lib) }?;

        let mut bridge = Bridge {
            vt,
            _lib: lib,
            handles: Vec::new(),
            by_handle: HashMap::new(),
            env,
            kernel_dir,
            version,
        };
        bridge.init()?;
        Ok(bridge)
    }

    fn init(&mut self) -> AutokernelResult<()> {
        let keys: Vec<CString> = self
            .env
            .keys()
            .filter_map(|k| CString::new(k.as_str()).ok())
            .collect();
        let values: Vec<CString> = keys
            .iter()
            .map(|k| {
                let key = k.to_str().expect("constructed from str");
                CString::new(self.env[key].as_str()).unwrap_or_default()
            })
            .collect();
        let key_ptrs: Vec<*const std::os::raw::c_char> =
            keys.iter().map(|k| k.as_ptr()).collect();
        let value_ptrs: Vec<*const std::os::raw::c_char> =
            values.iter().map(|v| v.as_ptr()).collect();

        let rc = unsafe { (self.vt.init)(key_ptrs.as_ptr(), value_ptrs.as_ptr(), keys.len()) };
        if rc != 0 {
            return Err(AutokernelError::Bridge(format!("bridge init failed ({rc})")));
        }

        let root = CString::new("Kconfig").expect("static");
        let count = unsafe { (self.vt.parse)(root.as_ptr()) };
        if count <= 0 {
            return Err(AutokernelError::Bridge(
                "Kconfig parse produced an empty symbol table".to_string(),
            ));
        }
        log::info!(
            "parsed Kconfig for kernel {} ({count} symbols)",
            self.version
        );
        Ok(())
    }

    pub fn kernel_dir(&self) -> &Path {
        &self.kernel_dir
    }

    pub fn version(&self) -> KernelVersion {
        self.version
    }

    /// Walk the bridge's symbol list into a typed registry. Called once;
    /// the handle table it builds backs all later value reads and writes.
    pub fn build_registry(&mut self) -> AutokernelResult<SymbolRegistry> {
        let mut registry = SymbolRegistry::new();

        // First pass: identity, so expressions can reference any symbol.
        let count = unsafe { (self.vt.symbol_count)() };
        for idx in 0..count {
            let handle = unsafe { (self.vt.symbol_at)(idx) };
            if handle.is_null() {
                continue;
            }
            self.intern_handle(&mut registry, handle);
        }

        // Second pass: metadata and expression import.
        for idx in 0..self.handles.len() {
            let id = SymbolId(idx as u32);
            let handle = self.handles[idx];

            let direct_dep = self.import_expr(&mut registry, unsafe {
                (self.vt.symbol_direct_dep)(handle)
            });
            let rev_dep =
                self.import_expr(&mut registry, unsafe { (self.vt.symbol_rev_dep)(handle) });
            let implied =
                self.import_expr(&mut registry, unsafe { (self.vt.symbol_implied)(handle) });
            let help = unsafe { ffi::owned_string((self.vt.symbol_help)(handle)) };

            let mut prompts = Vec::new();
            let mut ranges = Vec::new();
            let mut members = Vec::new();
            let prop_count = unsafe { (self.vt.symbol_prop_count)(handle) };
            for pidx in 0..prop_count {
                let prop = unsafe { (self.vt.symbol_prop_at)(handle, pidx) };
                if prop.is_null() {
                    continue;
                }
                match unsafe { (self.vt.prop_type)(prop) } {
                    ffi::AK_PROP_PROMPT | ffi::AK_PROP_MENU => {
                        prompts.push(self.import_prompt(&mut registry, prop));
                    }
                    ffi::AK_PROP_RANGE => {
                        if let Some(range) = self.import_range(&mut registry, prop) {
                            ranges.push(range);
                        }
                    }
                    ffi::AK_PROP_CHOICE => {
                        members.extend(self.import_choice_members(&mut registry, prop));
                    }
                    _ => {}
                }
            }

            let info = registry.get_mut(id);
            info.direct_dep = direct_dep;
            info.rev_dep = rev_dep;
            info.implied = implied;
            info.help = help;
            info.prompts = prompts;
            info.ranges = ranges;
            if info.is_choice {
                info.choice_members = members.clone();
                for member in members {
                    registry.get_mut(member).choice_group = Some(id);
                }
            }
        }

        Ok(registry)
    }

    /// Get-or-create the registry entry for a native handle.
    fn intern_handle(&mut self, registry: &mut SymbolRegistry, handle: SymbolHandle) -> SymbolId {
        if let Some(id) = self.by_handle.get(&(handle as usize)) {
            return *id;
        }
        let name = unsafe { ffi::owned_string((self.vt.symbol_name)(handle)) };
        let flags = unsafe { (self.vt.symbol_flags)(handle) };
        let typ = ffi::symbol_type_from_code(unsafe { (self.vt.symbol_type)(handle) });

        let id = registry.push(SymbolInfo {
            name,
            typ,
            is_const: flags & ffi::AK_FLAG_CONST != 0,
            is_choice: flags & ffi::AK_FLAG_CHOICE != 0,
            ..Default::default()
        });
        self.handles.push(handle);
        debug_assert_eq!(self.handles.len(), registry.len());
        self.by_handle.insert(handle as usize, id);
        id
    }

    fn leaf(&mut self, registry: &mut SymbolRegistry, handle: SymbolHandle) -> Option<Expr> {
        if handle.is_null() {
            return None;
        }
        let id = self.intern_handle(registry, handle);
        if registry.get(id).is_const {
            Some(Expr::Const(id))
        } else {
            Some(Expr::Symbol(id))
        }
    }

    fn import_expr(&mut self, registry: &mut SymbolRegistry, e: ExprHandle) -> Option<Expr> {
        if e.is_null() {
            return None;
        }
        let typ = unsafe { (self.vt.expr_type)(e) };
        let left_expr = unsafe { (self.vt.expr_left_expr)(e) };
        let right_expr = unsafe { (self.vt.expr_right_expr)(e) };
        let left_sym = unsafe { (self.vt.expr_left_sym)(e) };
        let right_sym = unsafe { (self.vt.expr_right_sym)(e) };

        let build: fn(Box<Expr>, Box<Expr>) -> Expr = match typ {
            ffi::AK_EXPR_SYMBOL => return self.leaf(registry, left_sym),
            ffi::AK_EXPR_NOT => {
                let inner = self.import_expr(registry, left_expr)?;
                return Some(Expr::not(inner));
            }
            ffi::AK_EXPR_LIST => {
                let mut items = Vec::new();
                self.import_list(registry, e, &mut items);
                return Some(Expr::List(items));
            }
            ffi::AK_EXPR_AND => Expr::And,
            ffi::AK_EXPR_OR => Expr::Or,
            ffi::AK_EXPR_EQUAL => Expr::Eq,
            ffi::AK_EXPR_UNEQUAL => Expr::Neq,
            ffi::AK_EXPR_LTH => Expr::Lt,
            ffi::AK_EXPR_LEQ => Expr::Le,
            ffi::AK_EXPR_GTH => Expr::Gt,
            ffi::AK_EXPR_GEQ => Expr::Ge,
            ffi::AK_EXPR_RANGE => Expr::Range,
            _ => return None,
        };

        // and/or nest sub-expressions; every comparison (and range) holds
        // two symbol leaves.
        let (l, r) = match typ {
            ffi::AK_EXPR_AND | ffi::AK_EXPR_OR => (
                self.import_expr(registry, left_expr)?,
                self.import_expr(registry, right_expr)?,
            ),
            _ => (
                self.leaf(registry, left_sym)?,
                self.leaf(registry, right_sym)?,
            ),
        };
        Some(build(Box::new(l), Box::new(r)))
    }

    /// E_LIST chains nest through the left side; items hang off the right.
    fn import_list(&mut self, registry: &mut SymbolRegistry, e: ExprHandle, out: &mut Vec<Expr>) {
        if e.is_null() {
            return;
        }
        match unsafe { (self.vt.expr_type)(e) } {
            ffi::AK_EXPR_LIST => {
                let rest = unsafe { (self.vt.expr_left_expr)(e) };
                self.import_list(registry, rest, out);
                let item = unsafe { (self.vt.expr_right_sym)(e) };
                if let Some(leaf) = self.leaf(registry, item) {
                    out.push(leaf);
                }
            }
            ffi::AK_EXPR_SYMBOL => {
                let item = unsafe { (self.vt.expr_left_sym)(e) };
                if let Some(leaf) = self.leaf(registry, item) {
                    out.push(leaf);
                }
            }
            _ => {}
        }
    }

    fn import_prompt(&mut self, registry: &mut SymbolRegistry, prop: PropHandle) -> Prompt {
        let text =
            unsafe { ffi::owned_string((self.vt.prop_text)(prop)) }.unwrap_or_default();
        let visibility = self.import_expr(registry, unsafe { (self.vt.prop_visible)(prop) });
        Prompt { text, visibility }
    }

    fn import_range(
        &mut self,
        registry: &mut SymbolRegistry,
        prop: PropHandle,
    ) -> Option<NumericRange> {
        let expr = unsafe { (self.vt.prop_expr)(prop) };
        if expr.is_null() || unsafe { (self.vt.expr_type)(expr) } != ffi::AK_EXPR_RANGE {
            return None;
        }
        let low = self.intern_handle(registry, unsafe { (self.vt.expr_left_sym)(expr) });
        let high = self.intern_handle(registry, unsafe { (self.vt.expr_right_sym)(expr) });
        let guard = self.import_expr(registry, unsafe { (self.vt.prop_visible)(prop) });
        Some(NumericRange { low, high, guard })
    }

    fn import_choice_members(
        &mut self,
        registry: &mut SymbolRegistry,
        prop: PropHandle,
    ) -> Vec<SymbolId> {
        let mut members = Vec::new();
        if let Some(Expr::List(items)) =
            self.import_expr(registry, unsafe { (self.vt.prop_expr)(prop) })
        {
            for item in items {
                if let Expr::Symbol(id) | Expr::Const(id) = item {
                    members.push(id);
                }
            }
        }
        members
    }
}

impl KconfigBackend for Bridge {
    fn set_symbol(&mut self, id: SymbolId, value: &str) -> AutokernelResult<bool> {
        let handle = self.handles[id.index()];
        let value = CString::new(value)
            .map_err(|_| AutokernelError::Bridge("NUL byte in value".to_string()))?;
        let accepted = unsafe { (self.vt.symbol_set_str)(handle, value.as_ptr()) };
        Ok(accepted != 0)
    }

    fn recalc(&mut self) {
        unsafe { (self.vt.recalc_all)() }
    }

    fn read_value(&self, id: SymbolId) -> String {
        let handle = self.handles[id.index()];
        let typ = ffi::symbol_type_from_code(unsafe { (self.vt.symbol_type)(handle) });
        match typ {
            // The tristate accessor avoids a round-trip through Kconfig's
            // string formatting.
            SymbolType::Boolean | SymbolType::Tristate => {
                let tri = ffi::tristate_from_code(unsafe { (self.vt.symbol_tri_value)(handle) });
                tri.as_str().to_string()
            }
            _ => unsafe { ffi::owned_string((self.vt.symbol_str_value)(handle)) }
                .unwrap_or_default(),
        }
    }

    fn read_visibility(&self, id: SymbolId) -> Tristate {
        let handle = self.handles[id.index()];
        ffi::tristate_from_code(unsafe { (self.vt.symbol_visible)(handle) })
    }

    fn load_config(&mut self, path: &Path) -> AutokernelResult<()> {
        let c_path = CString::new(path.to_string_lossy().as_bytes())
            .map_err(|_| AutokernelError::Bridge("NUL byte in path".to_string()))?;
        let rc = unsafe { (self.vt.load_config)(c_path.as_ptr()) };
        if rc != 0 {
            return Err(AutokernelError::Bridge(format!(
                "kernel loader failed on {} ({rc})",
                path.display()
            )));
        }
        Ok(())
    }

    fn env(&self, name: &str) -> Option<String> {
        // Read the bridge-owned snapshot, not the capture we seeded it
        // from: the isolated environment is authoritative after init.
        let c_name = CString::new(name).ok()?;
        unsafe { ffi::owned_string((self.vt.env_get)(c_name.as_ptr())) }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        // Release bridge-allocated memory so a later bridge in the same
        // process starts clean.
        unsafe { (self.vt.shutdown)() }
    }
}
