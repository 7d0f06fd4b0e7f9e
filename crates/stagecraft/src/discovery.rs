// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Finding the configuration document for a working directory.

use std::path::{Path, PathBuf};

use crate::{CONFIG_FILENAME, Error, Result};

#[cfg(test)]
#[path = "./discovery_test.rs"]
mod discovery_test;

/// Locate the configuration document.
///
/// An explicit file is used as is. For a directory, the directory and then
/// each of its parents is searched for `stagecraft.yaml`, nearest first.
pub fn locate_config<P: AsRef<Path>>(start: P) -> Result<PathBuf> {
    let start = resolve_start_path(start.as_ref());
    if start.is_file() {
        return Ok(start);
    }

    let mut current = start.clone();
    loop {
        let candidate = current.join(CONFIG_FILENAME);
        if candidate.is_file() {
            tracing::debug!(path = %candidate.display(), "found configuration");
            return Ok(candidate);
        }
        if !current.pop() {
            break;
        }
    }
    Err(Error::NotFoundInTree(start))
}

/// The project directory of a configuration document: its parent.
pub fn project_dir_of(config_path: &Path) -> PathBuf {
    let dir = config_path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    dunce::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf())
}

/// Resolve starting path, preferring $PWD to preserve symlinks.
fn resolve_start_path(start_path: &Path) -> PathBuf {
    if start_path.is_absolute() {
        start_path.to_owned()
    } else {
        match std::env::var("PWD").ok() {
            Some(pwd) => PathBuf::from(pwd).join(start_path),
            None => std::env::current_dir()
                .unwrap_or_default()
                .join(start_path),
        }
    }
}
