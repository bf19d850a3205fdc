// Copyright (c) 2023 Jake Swensen
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Building the bridge shared object out of the kernel's own
//! `scripts/kconfig` sources, and capturing the environment the kernel
//! Makefile would have handed to `scripts/kconfig/conf`.

use crate::error::{AutokernelError, AutokernelResult};
use crate::kernel::KernelVersion;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

pub(crate) const BRIDGE_SOURCE: &str = include_str!("bridge.c");

pub(crate) const SO_NAME: &str = "autokernel_bridge.so";
const SOURCE_NAME: &str = "autokernel_bridge.c";
const TAG_NAME: &str = "autokernel_bridge.sha256";

const ENV_START: &str = "@AUTOKERNEL_ENV_START@";
const ENV_END: &str = "@AUTOKERNEL_ENV_END@";

/// Stands in for `$(SHELL)` during the capture run: the line that would
/// execute `scripts/kconfig/conf` instead dumps the environment between
/// sentinels; everything else runs unchanged.
const INTERCEPTOR: &str = "#!/bin/sh\n\
case \"$*\" in\n\
  *scripts/kconfig/conf*)\n\
    echo \"@AUTOKERNEL_ENV_START@\"\n\
    env -0\n\
    echo \"\"\n\
    echo \"@AUTOKERNEL_ENV_END@\"\n\
    exit 0\n\
    ;;\n\
esac\n\
exec /bin/sh \"$@\"\n";

// Release thresholds for kconfig build quirks; see DESIGN.md for their
// derivation.
const COMMON_OBJS_SINCE: KernelVersion = KernelVersion::new(5, 2, 0);
const GNU11_SINCE: KernelVersion = KernelVersion::new(4, 19, 0);
const PLAIN_MSG_CALLBACK_SINCE: KernelVersion = KernelVersion::new(5, 8, 0);
const IMPLIED_SINCE: KernelVersion = KernelVersion::new(4, 10, 0);
const RELATIONAL_SINCE: KernelVersion = KernelVersion::new(4, 4, 0);
const FOR_ALL_SYMBOLS_ONE_ARG_SINCE: KernelVersion = KernelVersion::new(6, 9, 0);

/// sha256 over the embedded bridge source, as lowercase hex.
pub(crate) fn source_fingerprint() -> String {
    let digest = Sha256::digest(BRIDGE_SOURCE.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

pub(crate) fn c_standard(version: KernelVersion) -> &'static str {
    if version < GNU11_SINCE {
        "gnu89"
    } else {
        "gnu11"
    }
}

fn version_defines(version: KernelVersion) -> Vec<&'static str> {
    let mut defines = Vec::new();
    if version >= PLAIN_MSG_CALLBACK_SINCE {
        defines.push("-DAK_MSG_CB_PLAIN");
    }
    if version >= IMPLIED_SINCE {
        defines.push("-DAK_HAS_IMPLIED");
    }
    if version >= RELATIONAL_SINCE {
        defines.push("-DAK_HAS_RELATIONAL");
    }
    if version >= FOR_ALL_SYMBOLS_ONE_ARG_SINCE {
        defines.push("-DAK_FOR_ALL_SYMBOLS_NO_INDEX");
    }
    defines
}

/// The kconfig C files the bridge links against.
///
/// From 5.2 on the list is discovered from the `common-objs` variable in
/// the kconfig Makefile; older kernels use the fixed conf/zconf.tab pair
/// (zconf.tab.c pulls the lexer and hash tables in via #include).
pub(crate) fn discover_sources(
    kernel_dir: &Path,
    version: KernelVersion,
) -> AutokernelResult<Vec<String>> {
    if version < COMMON_OBJS_SINCE {
        return Ok(vec!["conf.c".to_string(), "zconf.tab.c".to_string()]);
    }
    let makefile = kernel_dir.join("scripts/kconfig/Makefile");
    let contents = crate::util::file_contents_as_string(&makefile)?;
    let mut sources = parse_common_objs(&contents);
    if sources.is_empty() {
        return Err(AutokernelError::Bridge(format!(
            "no common-objs found in {}",
            makefile.display()
        )));
    }
    sources.insert(0, "conf.c".to_string());
    Ok(sources)
}

/// Pull the object list out of `common-objs := a.o b.o \` continuations.
pub(crate) fn parse_common_objs(makefile: &str) -> Vec<String> {
    static ASSIGN: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^common-objs\s*[:+]?=\s*(.*)$").unwrap());

    let mut sources = Vec::new();
    let mut collecting = false;
    for line in makefile.lines() {
        let body = if collecting {
            line
        } else if let Some(caps) = ASSIGN.captures(line) {
            // Regex captures cannot borrow past the iteration; re-slice.
            let start = line.len() - caps[1].len();
            &line[start..]
        } else {
            continue;
        };

        let trimmed = body.trim_end_matches('\\').trim();
        for token in trimmed.split_whitespace() {
            if let Some(stem) = token.strip_suffix(".o") {
                sources.push(format!("{stem}.c"));
            }
        }
        collecting = body.trim_end().ends_with('\\');
        if !collecting {
            break;
        }
    }
    sources
}

/// Pre-5.x trees ship generated parser sources as `*_shipped`; copy them
/// next to their expected names before compiling.
fn prepare_shipped_sources(kconfig_dir: &Path) -> AutokernelResult<()> {
    for entry in std::fs::read_dir(kconfig_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(stem) = name.strip_suffix("_shipped") else {
            continue;
        };
        let target = kconfig_dir.join(stem);
        if !target.exists() {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Compile (or reuse) the bridge shared object under
/// `<kernel_dir>/scripts/kconfig/`, guarded by a sha256 of the embedded C
/// source.
pub(crate) fn ensure_bridge(
    kernel_dir: &Path,
    version: KernelVersion,
) -> AutokernelResult<PathBuf> {
    let kconfig_dir = kernel_dir.join("scripts/kconfig");
    let so_path = kconfig_dir.join(SO_NAME);
    let tag_path = kconfig_dir.join(TAG_NAME);
    let fingerprint = source_fingerprint();

    if so_path.exists() {
        if let Ok(tag) = std::fs::read_to_string(&tag_path) {
            if tag.trim() == fingerprint {
                log::debug!("bridge up to date at {}", so_path.display());
                return Ok(so_path);
            }
        }
    }

    log::info!("building bridge for kernel {version}");
    prepare_shipped_sources(&kconfig_dir)?;
    let bridge_c = kconfig_dir.join(SOURCE_NAME);
    std::fs::write(&bridge_c, BRIDGE_SOURCE)?;

    let cc = std::env::var("CC").unwrap_or_else(|_| "cc".to_string());
    let std_flag = format!("-std={}", c_standard(version));
    let defines = version_defines(version);

    let mut objects = Vec::new();
    for source in discover_sources(kernel_dir, version)? {
        let object = compile_object(
            &cc,
            &kconfig_dir,
            &kconfig_dir.join(&source),
            &std_flag,
            // Redirect getenv inside copied kconfig code only.
            &["-Dgetenv=ak_bridge_getenv", "-DKBUILD_NO_NLS"],
        )?;
        objects.push(object);
    }
    objects.push(compile_object(
        &cc,
        &kconfig_dir,
        &bridge_c,
        &std_flag,
        &defines,
    )?);

    let mut link = Command::new(&cc);
    link.arg("-shared").arg("-o").arg(&so_path).args(&objects);
    run_cc(link)?;

    std::fs::write(&tag_path, &fingerprint)?;
    Ok(so_path)
}

fn compile_object(
    cc: &str,
    kconfig_dir: &Path,
    source: &Path,
    std_flag: &str,
    extra: &[&str],
) -> AutokernelResult<PathBuf> {
    let object = source.with_extension("ak.o");
    let mut cmd = Command::new(cc);
    cmd.arg("-c")
        .arg("-fPIC")
        .arg(std_flag)
        .arg("-I")
        .arg(kconfig_dir)
        .args(extra)
        .arg("-o")
        .arg(&object)
        .arg(source);
    run_cc(cmd)?;
    Ok(object)
}

fn run_cc(mut cmd: Command) -> AutokernelResult<()> {
    log::debug!("running {cmd:?}");
    let output = cmd
        .output()
        .map_err(|e| AutokernelError::Bridge(format!("failed to run {cmd:?}: {e}")))?;
    if !output.status.success() {
        return Err(AutokernelError::Bridge(format!(
            "compiler failed ({}): {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

/// Run the kernel Makefile with the SHELL interceptor and collect the
/// environment it would have handed to `scripts/kconfig/conf`.
pub(crate) fn capture_environment(
    kernel_dir: &Path,
) -> AutokernelResult<HashMap<String, String>> {
    use std::os::unix::fs::PermissionsExt;

    let workdir = tempfile::tempdir()?;
    let script = workdir.path().join("conf-interceptor.sh");
    std::fs::write(&script, INTERCEPTOR)?;
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))?;

    let output = Command::new("make")
        .arg("-C")
        .arg(kernel_dir)
        .arg(format!("SHELL={}", script.display()))
        .arg("-s")
        .arg("oldconfig")
        .output()
        .map_err(|e| AutokernelError::Bridge(format!("failed to run make: {e}")))?;

    let env = parse_env_dump(&output.stdout).ok_or_else(|| {
        AutokernelError::Bridge(format!(
            "make did not reach the conf invocation: {}",
            String::from_utf8_lossy(&output.stderr)
        ))
    })?;

    // The capture is handed around as JSON from here on; keep a rendering
    // in the debug log for bug reports.
    log::debug!(
        "captured environment: {}",
        serde_json::to_string(&env).unwrap_or_default()
    );
    Ok(env)
}

/// Extract the NUL-separated `KEY=VALUE` dump between the sentinels.
pub(crate) fn parse_env_dump(stdout: &[u8]) -> Option<HashMap<String, String>> {
    let text = String::from_utf8_lossy(stdout);
    let start = text.find(ENV_START)? + ENV_START.len();
    let end = text[start..].find(ENV_END)? + start;
    let dump = &text[start..end];

    let mut env = HashMap::new();
    for entry in dump.split('\0') {
        let entry = entry.strip_prefix('\n').unwrap_or(entry);
        let entry = entry.strip_suffix('\n').unwrap_or(entry);
        if entry.is_empty() {
            continue;
        }
        if let Some((key, value)) = entry.split_once('=') {
            env.insert(key.to_string(), value.to_string());
        }
    }
    Some(env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_hex() {
        let fp = source_fingerprint();
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp, source_fingerprint());
    }

    #[test]
    fn c_standard_tracks_kernel_age() {
        assert_eq!(c_standard(KernelVersion::new(4, 2, 0)), "gnu89");
        assert_eq!(c_standard(KernelVersion::new(4, 18, 0)), "gnu89");
        assert_eq!(c_standard(KernelVersion::new(5, 19, 0)), "gnu11");
    }

    #[test]
    fn old_kernels_use_the_fixed_source_list() {
        let sources =
            discover_sources(Path::new("/nonexistent"), KernelVersion::new(4, 9, 0)).unwrap();
        assert_eq!(sources, vec!["conf.c", "zconf.tab.c"]);
    }

    #[test]
    fn common_objs_parsing_handles_continuations() {
        let makefile = "\
# SPDX-License-Identifier: GPL-2.0\n\
common-objs	:= confdata.o expr.o lexer.o menu.o parser.o \\\n\
  preprocess.o symbol.o util.o\n\
\n\
hostprogs	+= conf\n\
conf-objs	:= conf.o $(common-objs)\n";
        assert_eq!(
            parse_common_objs(makefile),
            vec![
                "confdata.c",
                "expr.c",
                "lexer.c",
                "menu.c",
                "parser.c",
                "preprocess.c",
                "symbol.c",
                "util.c"
            ]
        );
    }

    #[test]
    fn common_objs_parsing_handles_single_line() {
        let makefile = "common-objs := confdata.o expr.o\n";
        assert_eq!(parse_common_objs(makefile), vec!["confdata.c", "expr.c"]);
    }

    #[test]
    fn env_dump_parsing_extracts_pairs() {
        let stdout = format!(
            "make[1]: Entering directory\n{ENV_START}\nKERNELVERSION=5.19.0\0ARCH=x86\0abs_objtree=/usr/src/linux\0\n{ENV_END}\n"
        );
        let env = parse_env_dump(stdout.as_bytes()).unwrap();
        assert_eq!(env.get("KERNELVERSION").map(String::as_str), Some("5.19.0"));
        assert_eq!(env.get("ARCH").map(String::as_str), Some("x86"));
        assert_eq!(env.len(), 3);
    }

    #[test]
    fn env_dump_requires_both_sentinels() {
        assert!(parse_env_dump(b"no markers here").is_none());
        assert!(parse_env_dump(format!("{ENV_START}\nA=b\0").as_bytes()).is_none());
    }

    #[test]
    fn env_values_may_contain_newlines() {
        let stdout = format!("{ENV_START}\nMULTI=line one\nline two\0SIMPLE=x\0\n{ENV_END}\n");
        let env = parse_env_dump(stdout.as_bytes()).unwrap();
        assert_eq!(
            env.get("MULTI").map(String::as_str),
            Some("line one\nline two")
        );
    }
}
