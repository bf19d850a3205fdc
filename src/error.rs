// Copyright (c) 2023 Jake Swensen
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

pub type AutokernelResult<T> = Result<T, AutokernelError>;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum AutokernelError {
    #[error("Bridge error: {0}")]
    Bridge(String),
    #[error("Unsupported kernel version {version} (minimum supported is {minimum})")]
    UnsupportedKernel { version: String, minimum: String },
    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),
    #[error("Invalid value {value:?} for {symbol}: {reason}")]
    InvalidValue {
        symbol: String,
        value: String,
        reason: String,
    },
    #[error("Cannot set {symbol}={value}: unmet dependencies, {expression} evaluates to n{}", render_unmet(.unmet))]
    UnmetDirectDependencies {
        symbol: String,
        value: String,
        expression: String,
        /// Sub-clauses of the dependency expression that currently evaluate
        /// to `n`.
        unmet: Vec<String>,
    },
    #[error("Assignment {symbol}={requested} was rejected (observed value {observed:?}): {reason}")]
    AssignmentRejected {
        symbol: String,
        requested: String,
        observed: String,
        reason: String,
    },
    #[error(
        "Conflicting assignment for {symbol}: {first_value:?} at {first_site} vs {second_value:?} at {second_site}"
    )]
    ConflictingAssignment {
        symbol: String,
        first_value: String,
        first_site: String,
        second_value: String,
        second_site: String,
    },
    #[error("Ambiguous choice while satisfying {symbol}; equally good alternatives:{}", render_branches(.branches))]
    AmbiguousChoice {
        symbol: String,
        branches: Vec<String>,
    },
    #[error("Dependency cycle detected: {chain}")]
    CycleDetected { chain: String },
    #[error("Cannot automatically satisfy {symbol}: unsupported expression {expression}")]
    UnsupportedExpression { symbol: String, expression: String },
    #[error("{file}:{line}: {message}")]
    Script {
        file: String,
        line: u32,
        message: String,
    },
    #[error("{file}:{line}: {source}")]
    At {
        file: String,
        line: u32,
        source: Box<AutokernelError>,
    },
    #[error("File does not exist: {0}")]
    FileDoesNotExist(String),
    #[error("No file extension found")]
    MissingFileExtension,
    #[error("Unknown file type: {0}")]
    UnknownFileType(String),
    #[error("Kernel config parse error: {0}")]
    KernelConfigParseError(String),
    #[error("Kernel config not found")]
    KernelConfigNotFound,
    #[error("IO Error: {0}")]
    IoError(String),
    #[error("Error parsing json: {0}")]
    JsonParseError(String),
    #[error("Error parsing toml file: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

impl AutokernelError {
    /// Attach a script position to an error that does not carry one yet.
    pub fn at(self, file: &str, line: u32) -> Self {
        match self {
            AutokernelError::Script { .. } | AutokernelError::At { .. } => self,
            other => AutokernelError::At {
                file: file.to_string(),
                line,
                source: Box::new(other),
            },
        }
    }

    /// Process exit code for this error kind.
    ///
    /// `0` is reserved for success; generic failures exit with `1`.
    pub fn exit_code(&self) -> i32 {
        match self {
            AutokernelError::Bridge(_) => 2,
            AutokernelError::UnsupportedKernel { .. } => 3,
            AutokernelError::UnknownSymbol(_) => 4,
            AutokernelError::InvalidValue { .. } => 5,
            AutokernelError::UnmetDirectDependencies { .. } => 6,
            AutokernelError::AssignmentRejected { .. } => 7,
            AutokernelError::ConflictingAssignment { .. } => 8,
            AutokernelError::AmbiguousChoice { .. } => 9,
            AutokernelError::CycleDetected { .. } => 10,
            AutokernelError::UnsupportedExpression { .. } => 11,
            AutokernelError::At { source, .. } => source.exit_code(),
            _ => 1,
        }
    }
}

fn render_unmet(unmet: &[String]) -> String {
    if unmet.is_empty() {
        String::new()
    } else {
        format!(" (false: {})", unmet.join(", "))
    }
}

fn render_branches(branches: &[String]) -> String {
    branches
        .iter()
        .map(|b| format!("\n  - {b}"))
        .collect::<String>()
}

impl From<std::io::Error> for AutokernelError {
    fn from(e: std::io::Error) -> Self {
        AutokernelError::IoError(e.to_string())
    }
}

impl From<serde_json::Error> for AutokernelError {
    fn from(e: serde_json::Error) -> Self {
        AutokernelError::JsonParseError(e.to_string())
    }
}
