// Copyright (c) 2023 Jake Swensen
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A library for authoring Linux kernel configurations with semantic
//! guarantees.
//!
//! Problem statement:
//! - The kernel's own tools silently discard invalid or unsatisfiable
//!   `.config` assignments.
//! - A user wants every assignment type-checked, range-checked and
//!   dependency-checked at the point it is written.
//! - A user wants to know *what else* must be enabled for an assignment
//!   to become legal, in the right order.
//! - Configuration programs should be able to branch on kernel versions
//!   without breaking on symbols that do not exist yet.
//!
//! The crate reuses the kernel's native Kconfig parser through an
//! in-process bridge ([`bridge::Bridge`]), mirrors the parsed symbols into
//! a typed registry, and mediates every assignment through a validating
//! evaluator ([`model::Model::set`]). The dependency satisfier
//! ([`model::Model::satisfy`]) computes ordered prerequisite assignments
//! for a target. Configuration programs come in two dialects
//! ([`script::run_path`]): a flat kconfig-like file and a Lua-syntax
//! scripted program.

pub mod bridge;
pub mod config;
pub mod error;
pub mod expr;
pub mod kconfig;
pub mod kernel;
pub mod model;
pub mod satisfy;
pub mod script;
pub mod symbol;
pub mod track;
mod util;
mod validate;

pub use bridge::Bridge;
pub use config::AutokernelConfig;
pub use error::{AutokernelError, AutokernelResult};
pub use expr::{Expr, Tristate};
pub use kconfig::{KconfigFile, KconfigValue};
pub use kernel::KernelVersion;
pub use model::Model;
pub use satisfy::Assignment;
pub use symbol::{SymbolId, SymbolType};
pub use track::Origin;

use std::path::{Path, PathBuf};

/// The tool's top-level flow: configuration file, bridge, model, script.
pub struct Autokernel {
    config: AutokernelConfig,
    model: Model,
}

impl Autokernel {
    /// Load `autokernel.toml` (explicit path or the system default),
    /// bring up the bridge for the configured kernel tree and build the
    /// model.
    pub fn new(
        config_path: Option<&Path>,
        kernel_dir: Option<&Path>,
    ) -> AutokernelResult<Self> {
        let config = AutokernelConfig::try_from_file(
            config_path.unwrap_or_else(|| Path::new(config::DEFAULT_CONFIG_PATH)),
        )?;

        let kernel_dir = kernel_dir
            .map(Path::to_path_buf)
            .or_else(|| config.config.kernel_dir.clone())
            .ok_or_else(|| {
                AutokernelError::KernelConfigParseError(
                    "no kernel directory configured; set [config].kernel_dir or pass --kernel-dir"
                        .to_string(),
                )
            })?;

        let bridge = Bridge::new(&kernel_dir)?;
        let model = Model::from_bridge(bridge)?;
        Ok(Autokernel { config, model })
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut Model {
        &mut self.model
    }

    /// Run the configured script against the model.
    pub fn run_script(&mut self) -> AutokernelResult<()> {
        let script = self.config.config.script.clone();
        script::run_path(&mut self.model, script)
    }

    /// Where `generate-config` writes unless overridden on the command
    /// line.
    pub fn output_path(&self) -> PathBuf {
        self.config
            .config
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(".config"))
    }

    pub fn write_config<P: AsRef<Path>>(&self, path: P) -> AutokernelResult<()> {
        self.model.to_kconfig_file().write_to_path(path)
    }
}
