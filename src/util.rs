// Copyright (c) 2023 Jake Swensen
// SPDX-License-Identifier: MPL-2.0
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use crate::error::{AutokernelError, AutokernelResult};
use flate2::read::GzDecoder;
use std::{io::Read, path::Path};

/// Create a temporary file with the given contents and run a function with the file path.
#[cfg(test)]
pub(crate) fn run_with_tmpfile<F>(filename: &str, contents: &str, f: F)
where
    F: FnOnce(std::path::PathBuf),
{
    use std::io::Write;
    let tmpdir = tempfile::tempdir().expect("Failed to create temp dir");

    let file_path = tmpdir.as_ref().join(filename);
    std::fs::File::create(&file_path)
        .expect("Failed to create temp file")
        .write_all(contents.as_bytes())
        .expect("Failed to write to temp file");

    f(file_path);
}

/// Inflate a gzip'd file into a string.
pub fn inflate_gzip_file<P: AsRef<Path>>(path: P) -> AutokernelResult<String> {
    let contents = file_contents_as_bytes(path)?;
    let mut gz = GzDecoder::new(&contents[..]);
    let mut s = String::new();
    gz.read_to_string(&mut s)?;
    Ok(s)
}

/// Open a file.
///
/// Function that provides basic file opening and error handling.
pub fn open_file<P: AsRef<Path>>(path: P) -> AutokernelResult<std::fs::File> {
    if !path.as_ref().exists() {
        let path_string: String = path.as_ref().to_string_lossy().to_string();
        return Err(AutokernelError::FileDoesNotExist(path_string));
    }

    let file = std::fs::File::open(path)?;
    Ok(file)
}

/// Parse file contents into a vector of bytes.
pub fn file_contents_as_bytes<P: AsRef<Path>>(path: P) -> AutokernelResult<Vec<u8>> {
    let mut file = open_file(path)?;
    let mut contents = Vec::<u8>::new();
    file.read_to_end(&mut contents)?;
    Ok(contents)
}

/// Parse file contents into a string.
pub fn file_contents_as_string<P: AsRef<Path>>(path: P) -> AutokernelResult<String> {
    let mut file = open_file(path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    Ok(contents)
}
