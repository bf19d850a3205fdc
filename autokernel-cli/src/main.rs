// Copyright (c) 2023 Jake Swensen
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use autokernel::{Autokernel, AutokernelError, AutokernelResult, KconfigFile, Tristate};
use clap::{Parser, Subcommand};
use cli_table::{CellStruct, Color, Style, Table, WithTitle};
use colored::Colorize;
use std::path::PathBuf;

/// A tool for authoring Linux kernel configurations with semantic guarantees.
#[derive(Debug, Parser)]
#[command(name = "autokernel", version, about, long_about = None)]
struct Args {
    /// Path to the autokernel config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Kernel source tree; overrides [config].kernel_dir.
    #[arg(short, long)]
    kernel_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the configuration script and write a .config file.
    GenerateConfig {
        /// Output path; defaults to [config].output or ./.config.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run the script, then print the ordered assignments that would make
    /// SYMBOL[=VALUE] legal (VALUE defaults to y).
    Satisfy {
        /// Walk the dependency tree instead of stopping one level up.
        #[arg(long)]
        recursive: bool,
        symbol: String,
    },
    /// Show a symbol's type, value, dependencies and help text.
    Info { symbol: String },
    /// Compare the generated config against another config file.
    Check {
        /// Config to compare with; defaults to the running system's.
        #[arg(short = 'c', long)]
        compare: Option<PathBuf>,
    },
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("{} {e}", "error:".red().bold());
        std::process::exit(e.exit_code());
    }
}

fn run(args: Args) -> AutokernelResult<()> {
    let mut ak = Autokernel::new(args.config.as_deref(), args.kernel_dir.as_deref())?;

    match args.command {
        Command::GenerateConfig { output } => {
            ak.run_script()?;
            let path = output.unwrap_or_else(|| ak.output_path());
            ak.write_config(&path)?;
            println!("{} {}", "wrote".green().bold(), path.display());
            Ok(())
        }
        Command::Satisfy { recursive, symbol } => {
            ak.run_script()?;
            satisfy(&ak, &symbol, recursive)
        }
        Command::Info { symbol } => info(&ak, &symbol),
        Command::Check { compare } => {
            ak.run_script()?;
            check(&ak, compare)
        }
    }
}

/// Print the plan as a pasteable scripted-dialect module, grouped into
/// dependency-ordered sections.
fn satisfy(ak: &Autokernel, spec: &str, recursive: bool) -> AutokernelResult<()> {
    let (name, value) = match spec.split_once('=') {
        Some((name, value)) => (name, value),
        None => (spec, "y"),
    };
    let want: Tristate = value
        .parse()
        .map_err(|_| AutokernelError::InvalidValue {
            symbol: name.to_string(),
            value: value.to_string(),
            reason: "satisfy takes a tristate value".to_string(),
        })?;

    let model = ak.model();
    let target = model.lookup(name)?;
    let plan = model.satisfy(target, want, recursive)?;

    if plan.is_empty() {
        println!("-- {name}={value} is already satisfiable; nothing to do");
        return Ok(());
    }

    println!(
        "-- Generated by autokernel on {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    println!("-- satisfy CONFIG_{}={}", display_name(model, target), want);

    let (prerequisites, targets): (Vec<_>, Vec<_>) =
        plan.iter().partition(|a| a.symbol != target);
    if !prerequisites.is_empty() {
        println!("\n-- prerequisites");
        for step in &prerequisites {
            println!("{}(\"{}\")", display_name(model, step.symbol), step.value);
        }
    }
    if !targets.is_empty() {
        println!("\n-- target");
        for step in &targets {
            println!("{}(\"{}\")", display_name(model, step.symbol), step.value);
        }
    }
    Ok(())
}

fn display_name(model: &autokernel::Model, id: autokernel::SymbolId) -> String {
    model.registry().display_name(id).to_string()
}

fn info(ak: &Autokernel, name: &str) -> AutokernelResult<()> {
    let model = ak.model();
    let id = model.lookup(name)?;
    let reg = model.registry();
    let info = reg.get(id);

    println!("{} {}", "symbol".bold(), reg.display_name(id));
    println!("{}   {}", "type".bold(), info.typ);
    println!("{}  {:?}", "value".bold(), info.value);
    println!("{} {}", "visible".bold(), info.visibility);

    for prompt in &info.prompts {
        match &prompt.visibility {
            Some(guard) => println!("{} {:?} if {}", "prompt".bold(), prompt.text, guard.render(reg)),
            None => println!("{} {:?}", "prompt".bold(), prompt.text),
        }
    }
    if let Some(dep) = &info.direct_dep {
        println!("{} {}", "depends".bold(), dep.render(reg));
    }
    if let Some(rev) = &info.rev_dep {
        println!("{} {}", "selected by".bold(), rev.render(reg));
    }
    if let Some(implied) = &info.implied {
        println!("{} {}", "implied by".bold(), implied.render(reg));
    }
    for range in &info.ranges {
        let text = format!(
            "[{}, {}]",
            reg.display_name(range.low),
            reg.display_name(range.high)
        );
        match &range.guard {
            Some(guard) => println!("{}  {} if {}", "range".bold(), text, guard.render(reg)),
            None => println!("{}  {}", "range".bold(), text),
        }
    }
    if let Some(group) = info.choice_group {
        println!("{} member of {}", "choice".bold(), reg.display_name(group));
    }
    if let Some(help) = &info.help {
        println!("\n{}", "help".bold());
        for line in help.lines() {
            println!("  {line}");
        }
    }
    Ok(())
}

#[derive(Clone, Debug, Default, PartialEq)]
enum CheckResult {
    Pass,
    #[default]
    Fail,
}

impl From<bool> for CheckResult {
    fn from(b: bool) -> Self {
        if b {
            CheckResult::Pass
        } else {
            CheckResult::Fail
        }
    }
}

impl std::fmt::Display for CheckResult {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            CheckResult::Pass => write!(f, "Pass"),
            CheckResult::Fail => write!(f, "Fail"),
        }
    }
}

#[derive(Clone, Debug, Table)]
struct CheckRow {
    #[table(title = "Config Option")]
    name: String,
    #[table(title = "Generated")]
    generated: String,
    #[table(title = "Compared")]
    compared: String,
    #[table(title = "Result")]
    #[table(customize_fn = "convert_check_result")]
    result: CheckResult,
}

fn convert_check_result(cell: CellStruct, result: &CheckResult) -> CellStruct {
    match result {
        CheckResult::Pass => cell.foreground_color(Some(Color::Green)),
        CheckResult::Fail => cell.foreground_color(Some(Color::Red)),
    }
}

fn check(ak: &Autokernel, compare: Option<PathBuf>) -> AutokernelResult<()> {
    let generated = ak.model().to_kconfig_file();
    let other_path = match compare {
        Some(path) => path,
        None => autokernel::kernel::system_config_path()?,
    };
    let other = KconfigFile::from_path(&other_path)?;

    // Every generated option, then options only the compared config sets.
    let mut rows: Vec<CheckRow> = generated
        .entries()
        .map(|(name, value)| CheckRow {
            name: format!("CONFIG_{name}"),
            generated: value.to_string(),
            compared: match other.get(name) {
                Some(theirs) => theirs.to_string(),
                None => "-".to_string(),
            },
            result: (other.get(name) == Some(value)).into(),
        })
        .collect();
    let mut extra: Vec<(&str, &autokernel::KconfigValue)> = other
        .entries()
        .filter(|(name, _)| generated.get(name).is_none())
        .collect();
    extra.sort_by(|a, b| a.0.cmp(b.0));
    rows.extend(extra.into_iter().map(|(name, value)| CheckRow {
        name: format!("CONFIG_{name}"),
        generated: "-".to_string(),
        compared: value.to_string(),
        result: CheckResult::Fail,
    }));

    let failed = rows.iter().filter(|r| r.result == CheckResult::Fail).count();
    let total = rows.len();

    let table = rows.with_title().display().expect("table rendering");
    println!("{table}");
    if failed == 0 {
        println!(
            "{} {total} options match {}",
            "ok:".green().bold(),
            other_path.display()
        );
        return Ok(());
    }
    println!(
        "{} {failed} of {total} options differ from {}",
        "mismatch:".red().bold(),
        other_path.display()
    );
    std::process::exit(1);
}
