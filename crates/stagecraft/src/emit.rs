// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Rendering the compiled configuration into files.
//!
//! Every artifact is produced in memory first. Nothing touches the disk
//! until [`Artifacts::write`] is called, and each file is then replaced
//! atomically.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde_yaml::Value;
use sha2::{Digest, Sha256};

use crate::context::OutputMode;
use crate::environment::generate_profile_script;
use crate::merge::StageView;
use crate::pipeline::Compilation;
use crate::spec::{Hook, StageId};
use crate::template::ResolvedTree;
use crate::{
    COMPOSE_FILENAME, CONTAINER_ROOT, Error, GENERATED_DIR, MERGED_BUILD_SCRIPT, Result,
};

#[cfg(test)]
#[path = "./emit_test.rs"]
mod emit_test;

const GENERATED_HEADER: &str = "Generated by stagecraft, do not edit.";

/// Permissions an artifact is written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Regular,
    Executable,
    /// Readable by the owner only, for private keys.
    Secret,
}

impl FileMode {
    pub fn bits(self) -> u32 {
        match self {
            Self::Regular => 0o644,
            Self::Executable => 0o755,
            Self::Secret => 0o600,
        }
    }
}

/// A single generated file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Path relative to the project directory.
    pub path: PathBuf,
    pub contents: String,
    pub mode: FileMode,
}

impl Artifact {
    pub fn digest(&self) -> String {
        sha256_hex(self.contents.as_bytes())
    }
}

/// How a generated file compares with what is on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftState {
    Missing,
    Changed,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDrift {
    pub path: PathBuf,
    pub state: DriftState,
}

/// The ordered set of files produced by one compilation.
#[derive(Debug, Clone, Default)]
pub struct Artifacts {
    items: Vec<Artifact>,
}

impl Artifacts {
    /// Add a file, replacing any earlier artifact at the same path.
    pub fn push(&mut self, path: impl Into<PathBuf>, contents: impl Into<String>, mode: FileMode) {
        let artifact = Artifact {
            path: path.into(),
            contents: contents.into(),
            mode,
        };
        match self.items.iter_mut().find(|a| a.path == artifact.path) {
            Some(existing) => *existing = artifact,
            None => self.items.push(artifact),
        }
    }

    pub fn get<P: AsRef<Path>>(&self, path: P) -> Option<&Artifact> {
        let path = path.as_ref();
        self.items.iter().find(|a| a.path == path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Write every artifact below `root`, returning the written paths.
    pub fn write(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(self.items.len());
        for artifact in &self.items {
            let dest = root.join(&artifact.path);
            write_atomic(&dest, artifact.contents.as_bytes(), artifact.mode)?;
            tracing::debug!(path = %dest.display(), "wrote artifact");
            written.push(dest);
        }
        tracing::info!(count = written.len(), root = %root.display(), "artifacts written");
        Ok(written)
    }

    /// Compare every artifact with the file currently on disk.
    pub fn diff_against_disk(&self, root: &Path) -> Result<Vec<ArtifactDrift>> {
        let mut drift = Vec::with_capacity(self.items.len());
        for artifact in &self.items {
            let dest = root.join(&artifact.path);
            let state = match std::fs::read(&dest) {
                Ok(bytes) if sha256_hex(&bytes) == artifact.digest() => DriftState::Unchanged,
                Ok(_) => DriftState::Changed,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => DriftState::Missing,
                Err(error) => return Err(Error::ReadFailed { path: dest, error }),
            };
            drift.push(ArtifactDrift {
                path: artifact.path.clone(),
                state,
            });
        }
        Ok(drift)
    }
}

/// Produce every artifact of a compilation.
pub fn emit(compiled: &Compilation, tree: &ResolvedTree) -> Result<Artifacts> {
    let mut artifacts = Artifacts::default();

    let compose = format!("# {GENERATED_HEADER}\n{}", tree.to_yaml()?);
    artifacts.push(COMPOSE_FILENAME, compose, FileMode::Regular);

    for stage in StageId::ALL {
        let view = compiled.view(stage);
        let dir = generated_dir(stage);

        for hook in Hook::WRAPPED {
            artifacts.push(
                dir.join(wrapper_name(hook)),
                wrapper_script(&view, hook),
                FileMode::Executable,
            );
        }

        let (path, args) = match view.entry_point() {
            Some(entry) => {
                let (script, args) = split_entry(entry);
                (container_script_path(script), args.to_string())
            }
            None => (String::new(), String::new()),
        };
        artifacts.push(dir.join("_custom-on-entry-path"), path, FileMode::Regular);
        artifacts.push(dir.join("_custom-on-entry-args"), args, FileMode::Regular);

        if view.bake_environment {
            artifacts.push(
                dir.join("_baked-env.sh"),
                generate_profile_script(view.environment),
                FileMode::Regular,
            );
        }
    }

    for user in &compiled.users {
        for key in user.authorized_keys.iter() {
            artifacts.push(&key.rel_path, key.contents.clone(), FileMode::Regular);
        }
        for key in user.private_key.iter().chain(&user.host_private_key) {
            artifacts.push(&key.rel_path, key.contents.clone(), FileMode::Secret);
        }
    }

    if compiled.mode == OutputMode::SingleArtifact {
        artifacts.push(
            MERGED_BUILD_SCRIPT,
            merged_build_script(tree)?,
            FileMode::Executable,
        );
    }

    Ok(artifacts)
}

/// `stage-N/generated`, relative to the project directory.
pub fn generated_dir(stage: StageId) -> PathBuf {
    Path::new(stage.label()).join(GENERATED_DIR)
}

/// File name of the wrapper script for a hook, e.g. `_custom-on-build.sh`.
pub fn wrapper_name(hook: Hook) -> String {
    format!("_custom-{}.sh", hook.key().replace('_', "-"))
}

fn wrapper_script(view: &StageView<'_>, hook: Hook) -> String {
    // login scripts are sourced so that they can change the session
    let runner = if hook == Hook::OnUserLogin {
        "source"
    } else {
        "bash"
    };
    let mut out = format!(
        "#!/bin/bash\n# {} scripts of {}. {GENERATED_HEADER}\nset -e\n",
        hook.key(),
        view.stage
    );
    for entry in view.custom.entries(hook) {
        let (script, args) = split_entry(entry);
        let script = shell_words::quote(&container_script_path(script)).into_owned();
        if args.is_empty() {
            out.push_str(&format!("{runner} {script}\n"));
        } else {
            out.push_str(&format!("{runner} {script} {args}\n"));
        }
    }
    out
}

/// Split a hook entry into the script path and its arguments, which are
/// kept exactly as written.
pub fn split_entry(entry: &str) -> (&str, &str) {
    let entry = entry.trim();
    match entry.split_once(char::is_whitespace) {
        Some((script, args)) => (script, args.trim_start()),
        None => (entry, ""),
    }
}

/// Where a project relative script path is found inside the image.
pub fn container_script_path(script: &str) -> String {
    if script.starts_with('/') {
        script.to_string()
    } else {
        format!("{CONTAINER_ROOT}/{}", script.trim_start_matches("./"))
    }
}

fn merged_build_script(tree: &ResolvedTree) -> Result<String> {
    let mut out = format!(
        "#!/bin/sh\n# Builds both stages without compose. {GENERATED_HEADER}\nset -e\ncd \"$(dirname \"$0\")\"\n"
    );
    for stage in StageId::ALL {
        let service = format!("services.{}", stage.label());
        let field = |name: &str| tree.get(&format!("{service}.{name}"));
        let text = |name: &str| -> Result<String> {
            field(name).and_then(scalar_text).ok_or_else(|| {
                Error::schema(
                    format!("{service}.{name}"),
                    "the rendered compose file lacks a value needed to build the stage",
                    "Check image.base and image.output of both stages",
                )
            })
        };

        let mut words = vec![
            "docker".to_string(),
            "build".to_string(),
            "--file".to_string(),
            text("build.dockerfile")?,
            "--tag".to_string(),
            text("image")?,
        ];
        if let Some(Value::Mapping(args)) = field("build.args") {
            for (key, value) in args {
                if let (Some(key), Some(value)) = (scalar_text(key), scalar_text(value)) {
                    words.push("--build-arg".to_string());
                    words.push(format!("{key}={value}"));
                }
            }
        }
        words.push(text("build.context")?);

        out.push('\n');
        out.push_str(&shell_words::join(&words));
        out.push('\n');
    }
    Ok(out)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn write_atomic(dest: &Path, contents: &[u8], mode: FileMode) -> Result<()> {
    let failed = |error: std::io::Error| Error::WriteFailed {
        path: dest.to_path_buf(),
        error,
    };
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(failed)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(failed)?;
    tmp.write_all(contents).map_err(failed)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(mode.bits()))
            .map_err(failed)?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    tmp.persist(dest).map_err(|err| failed(err.error))?;
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
