// Copyright (c) 2023 Jake Swensen
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Kernel tree probing: version discovery from the top-level Makefile and
//! the usual locations of a running system's config file.

use crate::error::{AutokernelError, AutokernelResult};
use nix::sys::utsname::uname;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

/// Oldest kernel the bridge build understands.
pub const MINIMUM_KERNEL: KernelVersion = KernelVersion {
    major: 4,
    minor: 2,
    patch: 0,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KernelVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl KernelVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        KernelVersion {
            major,
            minor,
            patch,
        }
    }

    /// Read `VERSION`/`PATCHLEVEL`/`SUBLEVEL` from `<kernel_dir>/Makefile`.
    pub fn from_kernel_dir<P: AsRef<Path>>(kernel_dir: P) -> AutokernelResult<Self> {
        static FIELD: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"^(VERSION|PATCHLEVEL|SUBLEVEL)\s*=\s*(\d*)").unwrap()
        });

        let makefile = kernel_dir.as_ref().join("Makefile");
        let contents = crate::util::file_contents_as_string(&makefile)?;

        let mut version = KernelVersion::default();
        let mut seen = 0;
        for line in contents.lines() {
            let Some(caps) = FIELD.captures(line) else {
                continue;
            };
            let value: u32 = caps[2].parse().unwrap_or(0);
            match &caps[1] {
                "VERSION" => version.major = value,
                "PATCHLEVEL" => version.minor = value,
                _ => version.patch = value,
            }
            seen += 1;
            if seen == 3 {
                break;
            }
        }

        if seen < 2 {
            return Err(AutokernelError::Bridge(format!(
                "could not read kernel version from {}",
                makefile.display()
            )));
        }
        Ok(version)
    }

    /// Reject kernels the bridge cannot build against.
    pub fn ensure_supported(&self) -> AutokernelResult<()> {
        if *self < MINIMUM_KERNEL {
            return Err(AutokernelError::UnsupportedKernel {
                version: self.to_string(),
                minimum: MINIMUM_KERNEL.to_string(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for KernelVersion {
    type Err = AutokernelError;

    /// Accepts `5.6`, `5.6.3` and release strings like `5.6.3-arch1`.
    fn from_str(s: &str) -> AutokernelResult<Self> {
        let numeric: String = s
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        let mut parts = numeric.split('.').filter(|p| !p.is_empty());

        let mut next = |required: bool| -> AutokernelResult<u32> {
            match parts.next() {
                Some(p) => p.parse().map_err(|_| invalid_version(s)),
                None if required => Err(invalid_version(s)),
                None => Ok(0),
            }
        };

        let major = next(true)?;
        let minor = next(true)?;
        let patch = next(false)?;
        Ok(KernelVersion::new(major, minor, patch))
    }
}

fn invalid_version(s: &str) -> AutokernelError {
    AutokernelError::KernelConfigParseError(format!("not a kernel version: {s:?}"))
}

/// The running system's kernel config file.
///
/// Looks in the same places the config is conventionally installed:
/// - /proc/config.gz
/// - /boot/config
/// - /boot/config-$(uname -r)
pub fn system_config_path() -> AutokernelResult<PathBuf> {
    let proc_config_gz = PathBuf::from("/proc/config.gz");
    let boot_config = PathBuf::from("/boot/config");
    let boot_config_release = PathBuf::from(format!(
        "/boot/config-{}",
        uname()
            .map_err(|e| AutokernelError::IoError(e.to_string()))?
            .release()
            .to_string_lossy()
    ));

    for candidate in [proc_config_gz, boot_config, boot_config_release] {
        if candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(AutokernelError::KernelConfigNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_and_full_versions() {
        assert_eq!("5.6".parse::<KernelVersion>().unwrap(), KernelVersion::new(5, 6, 0));
        assert_eq!(
            "5.6.3".parse::<KernelVersion>().unwrap(),
            KernelVersion::new(5, 6, 3)
        );
        assert_eq!(
            "6.1.0-rc2".parse::<KernelVersion>().unwrap(),
            KernelVersion::new(6, 1, 0)
        );
        assert!("five".parse::<KernelVersion>().is_err());
        assert!("5".parse::<KernelVersion>().is_err());
    }

    #[test]
    fn ordering_matches_release_order() {
        let old: KernelVersion = "4.1.52".parse().unwrap();
        let new: KernelVersion = "5.10.0".parse().unwrap();
        assert!(old < new);
        assert!(old < MINIMUM_KERNEL);
        assert!(old.ensure_supported().is_err());
        assert!(new.ensure_supported().is_ok());
    }

    #[test]
    fn reads_version_from_makefile() {
        crate::util::run_with_tmpfile(
            "Makefile",
            "# SPDX-License-Identifier: GPL-2.0\nVERSION = 5\nPATCHLEVEL = 19\nSUBLEVEL = 0\nEXTRAVERSION =\n",
            |path| {
                let dir = path.parent().unwrap();
                let version = KernelVersion::from_kernel_dir(dir).unwrap();
                assert_eq!(version, KernelVersion::new(5, 19, 0));
            },
        );
    }
}
