// Copyright (c) 2023 Jake Swensen
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Configuration programs: the flat kconfig-like dialect and the scripted
//! dialect, dispatched on file extension.
//!
//! Both dialects route every assignment through the validator with the
//! source file and line captured, so diagnostics point at user code.

pub mod flat;
pub mod lua;

use crate::error::{AutokernelError, AutokernelResult};
use crate::model::Model;
use std::ffi::OsStr;
use std::path::Path;

/// Run a configuration program against the model.
///
/// `.lua` selects the scripted dialect; `.txt` and `.config` (including a
/// bare `.config` file name) select the flat dialect.
pub fn run_path<P: AsRef<Path>>(model: &mut Model, path: P) -> AutokernelResult<()> {
    let path = path.as_ref();
    if path.file_name() == Some(OsStr::new(".config")) {
        return flat::run_file(model, path);
    }
    match path.extension().and_then(OsStr::to_str) {
        Some("lua") => lua::run_file(model, path),
        Some("txt") | Some("config") => flat::run_file(model, path),
        Some(other) => Err(AutokernelError::UnknownFileType(other.to_string())),
        None => Err(AutokernelError::MissingFileExtension),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fake::wireless_fixture;

    #[test]
    fn unknown_extensions_are_rejected() {
        let (mut model, _) = wireless_fixture();
        crate::util::run_with_tmpfile("config.py", "", |path| {
            assert_eq!(
                run_path(&mut model, &path),
                Err(AutokernelError::UnknownFileType("py".to_string()))
            );
        });
    }

    #[test]
    fn bare_dot_config_uses_the_flat_dialect() {
        let (mut model, fx) = wireless_fixture();
        crate::util::run_with_tmpfile(".config", "CONFIG_NET=y\n", |path| {
            run_path(&mut model, &path).unwrap();
            assert_eq!(model.value_of(fx.net), "y");
        });
    }
}
