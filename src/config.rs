// Copyright (c) 2023 Jake Swensen
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The top-level `autokernel.toml` configuration.
//!
//! Only `[config].script` is required for config generation; everything
//! else has a sensible default or a CLI override.

use crate::error::{AutokernelError, AutokernelResult};
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/autokernel/autokernel.toml";

/// `[config]` section.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ConfigSection {
    /// The configuration program to run (`.lua`, `.txt` or `.config`).
    pub script: PathBuf,
    /// Kernel source tree; defaults to the CLI's `--kernel-dir`.
    pub kernel_dir: Option<PathBuf>,
    /// Where `generate-config` writes its output.
    pub output: Option<PathBuf>,
}

/// A parsed `autokernel.toml`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct AutokernelConfig {
    pub config: ConfigSection,
}

impl AutokernelConfig {
    pub fn try_from_file<P: AsRef<Path>>(path: P) -> AutokernelResult<Self> {
        let contents = crate::util::file_contents_as_string(path.as_ref())?;

        let cfg: AutokernelConfig = match path.as_ref().extension().and_then(OsStr::to_str) {
            Some("toml") => toml::from_str(&contents)?,
            Some(f) => return Err(AutokernelError::UnknownFileType(f.to_string())),
            None => return Err(AutokernelError::MissingFileExtension),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> AutokernelResult<()> {
        if self.config.script.as_os_str().is_empty() {
            return Err(AutokernelError::KernelConfigParseError(
                "[config].script must name a configuration script".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_minimal_config() {
        crate::util::run_with_tmpfile(
            "autokernel.toml",
            "[config]\nscript = \"config.lua\"\n",
            |path| {
                let cfg = AutokernelConfig::try_from_file(path).unwrap();
                assert_eq!(cfg.config.script, PathBuf::from("config.lua"));
                assert_eq!(cfg.config.kernel_dir, None);
            },
        );
    }

    #[test]
    fn success_full_config() {
        crate::util::run_with_tmpfile(
            "autokernel.toml",
            "[config]\nscript = \"config.lua\"\nkernel_dir = \"/usr/src/linux\"\noutput = \".config\"\n",
            |path| {
                let cfg = AutokernelConfig::try_from_file(path).unwrap();
                assert_eq!(cfg.config.kernel_dir, Some(PathBuf::from("/usr/src/linux")));
                assert_eq!(cfg.config.output, Some(PathBuf::from(".config")));
            },
        );
    }

    #[test]
    fn empty_script_is_rejected() {
        crate::util::run_with_tmpfile("autokernel.toml", "[config]\nscript = \"\"\n", |path| {
            assert!(AutokernelConfig::try_from_file(path).is_err());
        });
    }

    #[test]
    fn wrong_extension_is_rejected() {
        crate::util::run_with_tmpfile("autokernel.json", "{}", |path| {
            assert_eq!(
                AutokernelConfig::try_from_file(path),
                Err(AutokernelError::UnknownFileType("json".to_string()))
            );
        });
    }
}
