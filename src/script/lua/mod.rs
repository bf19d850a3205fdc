// Copyright (c) 2023 Jake Swensen
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The scripted dialect: Lua syntax, executed by a small tree-walking
//! interpreter.
//!
//! Kernel symbols are first-class values addressable by bare name (with or
//! without the `CONFIG_` prefix); `y`, `m`, `n` are tristate constants
//! ordered `n < m < y`; `ver("5.6")` builds a comparable kernel version.
//! `and`/`or` evaluate left-to-right and lazily, which is observable: a
//! guarded reference to a symbol that does not exist on this kernel is
//! never resolved.

mod ast;
mod interp;
mod lexer;
mod parser;
mod value;

use crate::error::{AutokernelError, AutokernelResult};
use crate::model::Model;
use std::path::Path;

/// A lex or parse failure, positioned but not yet bound to a file.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct LuaError {
    pub line: u32,
    pub message: String,
}

impl LuaError {
    pub(crate) fn new(line: u32, message: impl Into<String>) -> Self {
        LuaError {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn into_error(self, file: &str) -> AutokernelError {
        AutokernelError::Script {
            file: file.to_string(),
            line: self.line,
            message: self.message,
        }
    }
}

pub fn run_file(model: &mut Model, path: &Path) -> AutokernelResult<()> {
    let contents = crate::util::file_contents_as_string(path)?;
    run_str(model, path, &contents)
}

pub(crate) fn run_str(model: &mut Model, file: &Path, source: &str) -> AutokernelResult<()> {
    let file_text = file.display().to_string();
    let tokens = lexer::Lexer::new(source)
        .tokenize()
        .map_err(|e| e.into_error(&file_text))?;
    let chunk = parser::Parser::new(tokens)
        .parse_chunk()
        .map_err(|e| e.into_error(&file_text))?;
    interp::Interp::new(model, file).run(&chunk)
}
