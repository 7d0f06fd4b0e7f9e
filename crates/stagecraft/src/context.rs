// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Explicit inputs shared by every pipeline stage.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// How the compiled configuration will be consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// A compose file plus generated helper files; compose performs its
    /// own interpolation when the file is used.
    #[default]
    Compose,

    /// A single self-contained build script that never passes through
    /// compose, so compose-time markers cannot be honored.
    SingleArtifact,
}

/// Everything the pipeline needs from the outside world.
///
/// Variable lookups go through [`ResolveContext::var`] rather than
/// `std::env`, so tests can inject any environment they like.
#[derive(Debug, Clone)]
pub struct ResolveContext {
    env: BTreeMap<String, String>,

    /// Directory holding the config document; artifacts are written here
    /// and relative paths are resolved against it.
    pub project_dir: PathBuf,

    /// Directory searched when a key file is given as the `~` token.
    /// Defaults to `~/.ssh`.
    pub ssh_dir: Option<PathBuf>,

    /// Reject host mounts that point outside `project_dir`.
    pub strict_host_paths: bool,

    /// Requested emission mode.
    pub mode: OutputMode,
}

impl ResolveContext {
    /// Create a context with an empty environment.
    pub fn new<P: Into<PathBuf>>(project_dir: P) -> Self {
        Self {
            env: BTreeMap::new(),
            project_dir: project_dir.into(),
            ssh_dir: dirs::home_dir().map(|home| home.join(".ssh")),
            strict_host_paths: false,
            mode: OutputMode::default(),
        }
    }

    /// Create a context holding a snapshot of the current process environment.
    pub fn from_process_env<P: Into<PathBuf>>(project_dir: P) -> Self {
        Self::new(project_dir).with_env(std::env::vars())
    }

    /// Replace the variable environment.
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// Set a single variable.
    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.env.insert(name.into(), value.into());
    }

    /// Look up a config-time variable.
    pub fn var(&self, name: &str) -> Option<&str> {
        self.env.get(name).map(String::as_str)
    }

    pub fn with_ssh_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.ssh_dir = Some(dir.into());
        self
    }

    pub fn with_mode(mut self, mode: OutputMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_strict_host_paths(mut self, strict: bool) -> Self {
        self.strict_host_paths = strict;
        self
    }

    /// Resolve a user supplied path: `~/` is home-relative, absolute paths
    /// are kept and anything else is relative to the project directory.
    pub fn resolve_user_path(&self, raw: &str) -> Option<PathBuf> {
        if let Some(rest) = raw.strip_prefix("~/") {
            return dirs::home_dir().map(|home| home.join(rest));
        }
        if raw == "~" {
            return dirs::home_dir();
        }
        let path = Path::new(raw);
        if path.is_absolute() {
            Some(path.to_path_buf())
        } else {
            Some(self.project_dir.join(path))
        }
    }
}
