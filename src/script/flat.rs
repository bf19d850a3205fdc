// Copyright (c) 2023 Jake Swensen
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The flat dialect: one statement per line, `#` comments, no control
//! flow. Exactly the classical kconfig file format, but every assignment
//! is validated instead of merged blindly.

use crate::error::AutokernelResult;
use crate::kconfig;
use crate::model::Model;
use crate::track::Origin;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

static SET_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^CONFIG_([A-Za-z0-9_]+)=(.*)$").unwrap());
static NOT_SET_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^# CONFIG_([A-Za-z0-9_]+) is not set$").unwrap());

pub fn run_file(model: &mut Model, path: &Path) -> AutokernelResult<()> {
    let contents = crate::util::file_contents_as_string(path)?;
    run_str(model, path, &contents)
}

pub(crate) fn run_str(model: &mut Model, file: &Path, contents: &str) -> AutokernelResult<()> {
    let file_text = file.display().to_string();
    for (idx, line) in contents.lines().enumerate() {
        let lineno = (idx + 1) as u32;
        let line = line.trim();

        if let Some(caps) = NOT_SET_LINE.captures(line) {
            model
                .set_by_name(&caps[1], "n", Origin::new(file, lineno))
                .map_err(|e| e.at(&file_text, lineno))?;
            continue;
        }
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(caps) = SET_LINE.captures(line) else {
            return Err(crate::error::AutokernelError::Script {
                file: file_text,
                line: lineno,
                message: format!("not a config statement: {line:?}"),
            });
        };

        let raw = &caps[2];
        let value = if raw.starts_with('"') {
            kconfig::unescape(raw).map_err(|e| e.at(&file_text, lineno))?
        } else {
            raw.to_string()
        };
        model
            .set_by_name(&caps[1], &value, Origin::new(file, lineno))
            .map_err(|e| e.at(&file_text, lineno))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AutokernelError;
    use crate::model::fake::wireless_fixture;

    fn run(model: &mut Model, contents: &str) -> AutokernelResult<()> {
        run_str(model, Path::new("frag.config"), contents)
    }

    #[test]
    fn assignments_and_comments() {
        let (mut model, fx) = wireless_fixture();
        run(
            &mut model,
            "# enable networking\n\nCONFIG_NET=y\nCONFIG_NETDEVICES=y\nCONFIG_DEFAULT_HOSTNAME=\"bu\\\"ild\"\n",
        )
        .unwrap();
        assert_eq!(model.value_of(fx.net), "y");
        assert_eq!(model.value_of(fx.hostname), "bu\"ild");
    }

    #[test]
    fn is_not_set_lines_assign_n() {
        let (mut model, fx) = wireless_fixture();
        run(&mut model, "# CONFIG_NET is not set\n").unwrap();
        assert_eq!(model.value_of(fx.net), "n");
        assert_eq!(
            model.tracker().state(fx.net),
            crate::track::PinState::Explicit
        );
    }

    #[test]
    fn errors_carry_the_line_number() {
        let (mut model, _) = wireless_fixture();
        let err = run(&mut model, "CONFIG_NET=y\nCONFIG_NET=m\n").unwrap_err();
        match err {
            AutokernelError::At { file, line, source } => {
                assert_eq!(file, "frag.config");
                assert_eq!(line, 2);
                assert!(matches!(*source, AutokernelError::InvalidValue { .. }));
            }
            other => panic!("expected positioned error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_symbols_abort_the_statement() {
        let (mut model, _) = wireless_fixture();
        let err = run(&mut model, "CONFIG_NO_SUCH_THING=y\n").unwrap_err();
        match err {
            AutokernelError::At { source, .. } => {
                assert_eq!(*source, AutokernelError::UnknownSymbol("NO_SUCH_THING".into()));
            }
            other => panic!("expected positioned error, got {other:?}"),
        }
    }

    #[test]
    fn malformed_lines_are_rejected() {
        let (mut model, _) = wireless_fixture();
        let err = run(&mut model, "CONFIG_NET\n").unwrap_err();
        assert!(matches!(err, AutokernelError::Script { line: 1, .. }));
    }
}
