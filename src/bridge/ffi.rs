// Copyright (c) 2023 Jake Swensen
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The C ABI of the bridge shared object.
//!
//! The bridge translates the kernel's internal enums (which move around
//! between releases) into the stable `AK_*` codes below, so the Rust side
//! never depends on a particular kernel's header layout. Only plain
//! pointers and integers cross the boundary; strings are copied into owned
//! buffers immediately after each call.

use crate::error::{AutokernelError, AutokernelResult};
use crate::expr::Tristate;
use crate::symbol::SymbolType;
use libloading::Library;
use std::os::raw::{c_char, c_int};

/// Opaque `struct symbol *` owned by the bridge.
pub type SymbolHandle = *mut std::os::raw::c_void;
/// Opaque `struct expr *` owned by the bridge.
pub type ExprHandle = *mut std::os::raw::c_void;
/// Opaque `struct property *` owned by the bridge.
pub type PropHandle = *mut std::os::raw::c_void;

// Symbol types (mirrors `enum ak_symbol_type` in bridge.c).
pub const AK_SYM_UNKNOWN: c_int = 0;
pub const AK_SYM_BOOLEAN: c_int = 1;
pub const AK_SYM_TRISTATE: c_int = 2;
pub const AK_SYM_INT: c_int = 3;
pub const AK_SYM_HEX: c_int = 4;
pub const AK_SYM_STRING: c_int = 5;

// Expression kinds (mirrors `enum ak_expr_type`).
pub const AK_EXPR_NONE: c_int = 0;
pub const AK_EXPR_OR: c_int = 1;
pub const AK_EXPR_AND: c_int = 2;
pub const AK_EXPR_NOT: c_int = 3;
pub const AK_EXPR_EQUAL: c_int = 4;
pub const AK_EXPR_UNEQUAL: c_int = 5;
pub const AK_EXPR_LTH: c_int = 6;
pub const AK_EXPR_LEQ: c_int = 7;
pub const AK_EXPR_GTH: c_int = 8;
pub const AK_EXPR_GEQ: c_int = 9;
pub const AK_EXPR_LIST: c_int = 10;
pub const AK_EXPR_SYMBOL: c_int = 11;
pub const AK_EXPR_RANGE: c_int = 12;

// Property kinds (mirrors `enum ak_prop_type`).
pub const AK_PROP_UNKNOWN: c_int = 0;
pub const AK_PROP_PROMPT: c_int = 1;
pub const AK_PROP_COMMENT: c_int = 2;
pub const AK_PROP_MENU: c_int = 3;
pub const AK_PROP_DEFAULT: c_int = 4;
pub const AK_PROP_CHOICE: c_int = 5;
pub const AK_PROP_SELECT: c_int = 6;
pub const AK_PROP_IMPLY: c_int = 7;
pub const AK_PROP_RANGE: c_int = 8;
pub const AK_PROP_SYMBOL: c_int = 9;

// Symbol flag bits (mirrors the `AK_FLAG_*` defines).
pub const AK_FLAG_CONST: c_int = 1 << 0;
pub const AK_FLAG_CHOICE: c_int = 1 << 1;
pub const AK_FLAG_CHOICE_VALUE: c_int = 1 << 2;

pub fn symbol_type_from_code(code: c_int) -> SymbolType {
    match code {
        AK_SYM_BOOLEAN => SymbolType::Boolean,
        AK_SYM_TRISTATE => SymbolType::Tristate,
        AK_SYM_INT => SymbolType::Int,
        AK_SYM_HEX => SymbolType::Hex,
        AK_SYM_STRING => SymbolType::String,
        _ => SymbolType::Unknown,
    }
}

pub fn tristate_from_code(code: c_int) -> Tristate {
    match code {
        2 => Tristate::Yes,
        1 => Tristate::Mod,
        _ => Tristate::No,
    }
}

/// Every C entry point of the bridge, resolved once at load time.
///
/// The function pointers stay valid for as long as the [`Library`] they
/// were resolved from is kept alive; `Bridge` owns both.
pub struct BridgeVTable {
    pub init:
        unsafe extern "C" fn(*const *const c_char, *const *const c_char, usize) -> c_int,
    pub parse: unsafe extern "C" fn(*const c_char) -> c_int,
    pub shutdown: unsafe extern "C" fn(),

    pub symbol_count: unsafe extern "C" fn() -> usize,
    pub symbol_at: unsafe extern "C" fn(usize) -> SymbolHandle,
    pub symbol_name: unsafe extern "C" fn(SymbolHandle) -> *const c_char,
    pub symbol_type: unsafe extern "C" fn(SymbolHandle) -> c_int,
    pub symbol_flags: unsafe extern "C" fn(SymbolHandle) -> c_int,
    pub symbol_str_value: unsafe extern "C" fn(SymbolHandle) -> *const c_char,
    pub symbol_tri_value: unsafe extern "C" fn(SymbolHandle) -> c_int,
    pub symbol_visible: unsafe extern "C" fn(SymbolHandle) -> c_int,
    pub symbol_set_str: unsafe extern "C" fn(SymbolHandle, *const c_char) -> c_int,
    pub symbol_help: unsafe extern "C" fn(SymbolHandle) -> *const c_char,

    pub symbol_direct_dep: unsafe extern "C" fn(SymbolHandle) -> ExprHandle,
    pub symbol_rev_dep: unsafe extern "C" fn(SymbolHandle) -> ExprHandle,
    pub symbol_implied: unsafe extern "C" fn(SymbolHandle) -> ExprHandle,

    pub symbol_prop_count: unsafe extern "C" fn(SymbolHandle) -> usize,
    pub symbol_prop_at: unsafe extern "C" fn(SymbolHandle, usize) -> PropHandle,
    pub prop_type: unsafe extern "C" fn(PropHandle) -> c_int,
    pub prop_text: unsafe extern "C" fn(PropHandle) -> *const c_char,
    pub prop_expr: unsafe extern "C" fn(PropHandle) -> ExprHandle,
    pub prop_visible: unsafe extern "C" fn(PropHandle) -> ExprHandle,

    pub expr_type: unsafe extern "C" fn(ExprHandle) -> c_int,
    pub expr_left_expr: unsafe extern "C" fn(ExprHandle) -> ExprHandle,
    pub expr_right_expr: unsafe extern "C" fn(ExprHandle) -> ExprHandle,
    pub expr_left_sym: unsafe extern "C" fn(ExprHandle) -> SymbolHandle,
    pub expr_right_sym: unsafe extern "C" fn(ExprHandle) -> SymbolHandle,

    pub recalc_all: unsafe extern "C" fn(),
    pub load_config: unsafe extern "C" fn(*const c_char) -> c_int,
    pub env_get: unsafe extern "C" fn(*const c_char) -> *const c_char,
}

macro_rules! resolve {
    ($lib:expr, $name:literal) => {
        *$lib
            .get(concat!($name, "\0").as_bytes())
            .map_err(|e| {
                AutokernelError::Bridge(format!("bridge export {} missing: {e}", $name))
            })?
    };
}

impl BridgeVTable {
    /// Resolve the full vtable from a freshly loaded bridge library.
    ///
    /// # Safety
    ///
    /// The library must be a bridge built from this crate's embedded
    /// `bridge.c`; the signatures above are trusted, not checked.
    pub unsafe fn load(lib: &Library) -> AutokernelResult<Self> {
        Ok(BridgeVTable {
            init: resolve!(lib, "ak_init"),
            parse: resolve!(lib, "ak_parse"),
            shutdown: resolve!(lib, "ak_shutdown"),

            symbol_count: resolve!(lib, "ak_symbol_count"),
            symbol_at: resolve!(lib, "ak_symbol_at"),
            symbol_name: resolve!(lib, "ak_symbol_name"),
            symbol_type: resolve!(lib, "ak_symbol_type"),
            symbol_flags: resolve!(lib, "ak_symbol_flags"),
            symbol_str_value: resolve!(lib, "ak_symbol_str_value"),
            symbol_tri_value: resolve!(lib, "ak_symbol_tri_value"),
            symbol_visible: resolve!(lib, "ak_symbol_visible"),
            symbol_set_str: resolve!(lib, "ak_symbol_set_str"),
            symbol_help: resolve!(lib, "ak_symbol_help"),

            symbol_direct_dep: resolve!(lib, "ak_symbol_direct_dep"),
            symbol_rev_dep: resolve!(lib, "ak_symbol_rev_dep"),
            symbol_implied: resolve!(lib, "ak_symbol_implied"),

            symbol_prop_count: resolve!(lib, "ak_symbol_prop_count"),
            symbol_prop_at: resolve!(lib, "ak_symbol_prop_at"),
            prop_type: resolve!(lib, "ak_prop_type"),
            prop_text: resolve!(lib, "ak_prop_text"),
            prop_expr: resolve!(lib, "ak_prop_expr"),
            prop_visible: resolve!(lib, "ak_prop_visible"),

            expr_type: resolve!(lib, "ak_expr_type"),
            expr_left_expr: resolve!(lib, "ak_expr_left_expr"),
            expr_right_expr: resolve!(lib, "ak_expr_right_expr"),
            expr_left_sym: resolve!(lib, "ak_expr_left_sym"),
            expr_right_sym: resolve!(lib, "ak_expr_right_sym"),

            recalc_all: resolve!(lib, "ak_recalc_all"),
            load_config: resolve!(lib, "ak_load_config"),
            env_get: resolve!(lib, "ak_env_get"),
        })
    }
}

/// Copy a bridge-owned C string into an owned `String`.
///
/// # Safety
///
/// `ptr` must be null or a valid NUL-terminated string that outlives the
/// call.
pub unsafe fn owned_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(
        std::ffi::CStr::from_ptr(ptr)
            .to_string_lossy()
            .into_owned(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_codes_map_to_symbol_types() {
        assert_eq!(symbol_type_from_code(AK_SYM_BOOLEAN), SymbolType::Boolean);
        assert_eq!(symbol_type_from_code(AK_SYM_TRISTATE), SymbolType::Tristate);
        assert_eq!(symbol_type_from_code(AK_SYM_HEX), SymbolType::Hex);
        assert_eq!(symbol_type_from_code(99), SymbolType::Unknown);
    }

    #[test]
    fn tristate_codes_follow_the_lattice() {
        assert_eq!(tristate_from_code(0), Tristate::No);
        assert_eq!(tristate_from_code(1), Tristate::Mod);
        assert_eq!(tristate_from_code(2), Tristate::Yes);
        assert_eq!(tristate_from_code(-1), Tristate::No);
    }
}
