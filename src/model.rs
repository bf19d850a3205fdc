// Copyright (c) 2023 Jake Swensen
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The live configuration model: symbol registry, assignment history and
//! the backend that owns the real Kconfig state.
//!
//! All mutation funnels through [`Model::set`] (the validator, see
//! `validate.rs`); readers observe values consistent with the last
//! completed recalculation.

use crate::error::{AutokernelError, AutokernelResult};
use crate::expr::Tristate;
use crate::kconfig::{KconfigFile, KconfigValue};
use crate::kernel::KernelVersion;
use crate::symbol::{SymbolId, SymbolRegistry, SymbolType};
use crate::track::{Origin, ValueTracker};
use std::path::{Path, PathBuf};

/// The operations the evaluator needs from the entity that owns Kconfig
/// state. Implemented by the native bridge, and by an in-memory fake for
/// tests.
pub trait KconfigBackend {
    /// Write a raw value. Returns whether Kconfig accepted it.
    fn set_symbol(&mut self, id: SymbolId, value: &str) -> AutokernelResult<bool>;

    /// Recompute all symbol values after writes.
    fn recalc(&mut self);

    /// Current value, valid as of the last recalc.
    fn read_value(&self, id: SymbolId) -> String;

    /// Current prompt visibility, valid as of the last recalc.
    fn read_visibility(&self, id: SymbolId) -> Tristate;

    /// Merge a classical config file using the native loader.
    fn load_config(&mut self, path: &Path) -> AutokernelResult<()>;

    /// Read the isolated environment captured at bridge init.
    fn env(&self, name: &str) -> Option<String>;
}

pub struct Model {
    pub(crate) registry: SymbolRegistry,
    pub(crate) tracker: ValueTracker,
    pub(crate) backend: Box<dyn KconfigBackend>,
    kernel_dir: PathBuf,
    kernel_version: KernelVersion,
}

impl Model {
    pub fn new(
        registry: SymbolRegistry,
        backend: Box<dyn KconfigBackend>,
        kernel_dir: PathBuf,
        kernel_version: KernelVersion,
    ) -> Self {
        let mut model = Model {
            registry,
            tracker: ValueTracker::new(),
            backend,
            kernel_dir,
            kernel_version,
        };
        model.refresh();
        model
    }

    /// Build the model on top of a freshly initialized native bridge.
    pub fn from_bridge(mut bridge: crate::bridge::Bridge) -> AutokernelResult<Self> {
        let registry = bridge.build_registry()?;
        let kernel_dir = bridge.kernel_dir().to_path_buf();
        let kernel_version = bridge.version();
        Ok(Model::new(
            registry,
            Box::new(bridge),
            kernel_dir,
            kernel_version,
        ))
    }

    pub fn registry(&self) -> &SymbolRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &ValueTracker {
        &self.tracker
    }

    pub fn kernel_dir(&self) -> &Path {
        &self.kernel_dir
    }

    pub fn kernel_version(&self) -> KernelVersion {
        self.kernel_version
    }

    pub fn env(&self, name: &str) -> Option<String> {
        self.backend.env(name)
    }

    pub fn lookup(&self, name: &str) -> AutokernelResult<SymbolId> {
        self.registry
            .lookup(name)
            .ok_or_else(|| AutokernelError::UnknownSymbol(name.to_string()))
    }

    pub fn value_of(&self, id: SymbolId) -> &str {
        &self.registry.get(id).value
    }

    /// Pull value and visibility for every symbol from the backend.
    /// Called after every completed recalc.
    pub(crate) fn refresh(&mut self) {
        for idx in 0..self.registry.len() {
            let id = SymbolId(idx as u32);
            if self.registry.get(id).is_const {
                continue;
            }
            let value = self.backend.read_value(id);
            let visibility = self.backend.read_visibility(id);
            let info = self.registry.get_mut(id);
            info.value = value;
            info.visibility = visibility;
        }
    }

    /// Merge a config file through the kernel's own loader. Assignments
    /// arriving this way do not pin: they are recorded as implicit and do
    /// not conflict with later explicit sets.
    pub fn load_config_unchecked<P: AsRef<Path>>(&mut self, path: P) -> AutokernelResult<()> {
        let path = path.as_ref();
        let before: Vec<String> = self
            .registry
            .iter()
            .map(|(_, info)| info.value.clone())
            .collect();

        self.backend.load_config(path)?;
        self.backend.recalc();
        self.refresh();

        let origin = Origin::new(path, 0);
        let changed: Vec<(SymbolId, String)> = self
            .registry
            .iter()
            .filter(|(id, info)| !info.is_const && info.value != before[id.index()])
            .map(|(id, info)| (id, info.value.clone()))
            .collect();
        log::debug!(
            "merged {} ({} symbols changed)",
            path.display(),
            changed.len()
        );
        for (id, value) in changed {
            self.tracker.record_implicit(id, &value, origin.clone());
        }
        Ok(())
    }

    /// Merge a config file line by line through the validator.
    pub fn load_config<P: AsRef<Path>>(&mut self, path: P) -> AutokernelResult<()> {
        crate::script::flat::run_file(self, path.as_ref())
    }

    /// Render the current configuration in the kernel's canonical format.
    pub fn to_kconfig_file(&self) -> KconfigFile {
        let mut file = KconfigFile::new();
        for (_, info) in self.registry.iter() {
            let Some(name) = &info.name else { continue };
            if info.is_const || info.is_choice {
                continue;
            }
            let value = match info.typ {
                SymbolType::Unknown => continue,
                SymbolType::Boolean | SymbolType::Tristate => {
                    if info.visibility == Tristate::No && info.value != "y" && info.value != "m" {
                        continue;
                    }
                    match info.value.as_str() {
                        "y" => KconfigValue::Tristate(Tristate::Yes),
                        "m" => KconfigValue::Tristate(Tristate::Mod),
                        _ => KconfigValue::NotSet,
                    }
                }
                SymbolType::String => {
                    if info.visibility == Tristate::No {
                        continue;
                    }
                    KconfigValue::String(info.value.clone())
                }
                SymbolType::Int | SymbolType::Hex => {
                    if info.visibility == Tristate::No || info.value.is_empty() {
                        continue;
                    }
                    KconfigValue::Literal(info.value.clone())
                }
            };
            file.push(name, value);
        }
        file
    }
}


#[cfg(test)]
mod tests {
    use super::fake::wireless_fixture;
    use super::*;

    #[test]
    fn fresh_model_has_everything_off() {
        let (model, fx) = wireless_fixture();
        assert_eq!(model.value_of(fx.net), "n");
        assert_eq!(model.value_of(fx.wlan), "n");
        assert_eq!(model.registry().get(fx.net).visibility, Tristate::Yes);
        // WLAN's prompt is gated behind NETDEVICES.
        assert_eq!(model.registry().get(fx.wlan).visibility, Tristate::No);
    }

    #[test]
    fn unknown_symbol_lookup_fails() {
        let (model, _) = wireless_fixture();
        assert_eq!(
            model.lookup("CONFIG_DOES_NOT_EXIST"),
            Err(AutokernelError::UnknownSymbol("CONFIG_DOES_NOT_EXIST".into()))
        );
    }

    #[test]
    fn generated_config_round_trips_through_a_merge() {
        use crate::track::Origin;

        let (mut model, fx) = wireless_fixture();
        for (id, value) in [(fx.net, "y"), (fx.netdevices, "y"), (fx.loglevel, "4")] {
            model.set(id, value, Origin::new("gen", 1)).unwrap();
        }
        let written = model.to_kconfig_file();

        let (mut fresh, _) = wireless_fixture();
        crate::util::run_with_tmpfile("generated.config", &written.to_config_string(), |path| {
            fresh.load_config_unchecked(&path).unwrap();
        });
        let reloaded = fresh.to_kconfig_file();
        assert!(written.same_assignments(&reloaded));
    }

    #[test]
    fn unchecked_merge_records_implicit_changes() {
        let (mut model, fx) = wireless_fixture();
        crate::util::run_with_tmpfile("defconfig", "CONFIG_NET=y\n", |path| {
            model.load_config_unchecked(&path).unwrap();
            assert_eq!(model.value_of(fx.net), "y");
            assert_eq!(
                model.tracker().state(fx.net),
                crate::track::PinState::Implicit
            );
        });
    }
}
