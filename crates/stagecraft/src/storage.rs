// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Storage and mount declarations, resolved into named volumes and binds.

use std::path::{Component, Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::context::ResolveContext;
use crate::spec::{slug, ProjectIdentity, StageConfig, StageId};
use crate::vars::contains_compose_marker;
use crate::{Error, Result};

#[cfg(test)]
#[path = "./storage_test.rs"]
mod storage_test;

/// Fixed storage categories every stage may declare under `storage:`.
pub const STORAGE_CATEGORIES: [&str; 3] = ["app", "data", "workspace"];

/// Container directory that volume-backed storage is mounted under.
pub const VOLUME_ROOT: &str = "/hard/volume";

/// Container directory that in-image storage lives under.
pub const IMAGE_ROOT: &str = "/hard/image";

/// Names compose accepts as keys of the top-level `volumes:` section.
static VOLUME_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("static regex is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageKind {
    AutoVolume,
    ManualVolume,
    Host,
    Image,
}

/// A `storage:` or `mount:` entry as written in the document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageOption {
    #[serde(rename = "type")]
    pub kind: StorageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_path: Option<String>,
}

/// Which map a declaration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountScope {
    /// One of the fixed `storage:` categories.
    Storage,
    /// An arbitrary `mount:` entry.
    Mount,
}

impl MountScope {
    fn key(self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::Mount => "mount",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountSource {
    AutoVolume,
    ManualVolume { name: String },
    Host { path: String },
    Image,
}

/// A validated storage declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub key: String,
    pub scope: MountScope,
    pub source: MountSource,
    pub dst: String,
}

impl MountSpec {
    /// Check the fields `option` needs for its type.
    pub fn from_option(
        key: &str,
        option: &StorageOption,
        scope: MountScope,
        path: &str,
    ) -> Result<Self> {
        let source = match option.kind {
            StorageKind::AutoVolume => MountSource::AutoVolume,
            StorageKind::ManualVolume => MountSource::ManualVolume {
                name: required(&option.volume_name, path, "volume_name", "manual-volume")?,
            },
            StorageKind::Host => MountSource::Host {
                path: required(&option.host_path, path, "host_path", "host")?,
            },
            StorageKind::Image => match scope {
                MountScope::Storage => MountSource::Image,
                MountScope::Mount => {
                    return Err(Error::ImageMountNotAllowed {
                        path: path.to_string(),
                    });
                }
            },
        };

        let dst = match (&option.dst_path, scope, &source) {
            (Some(dst), _, _) if !dst.trim().is_empty() => dst.clone(),
            (_, MountScope::Storage, MountSource::Image) => format!("{IMAGE_ROOT}/{key}"),
            (_, MountScope::Storage, _) => format!("{VOLUME_ROOT}/{key}"),
            (_, MountScope::Mount, _) => {
                return Err(Error::MissingField {
                    path: path.to_string(),
                    field: "dst_path",
                    kind: "mount",
                });
            }
        };

        Ok(Self {
            key: key.to_string(),
            scope,
            source,
            dst,
        })
    }
}

fn required(
    value: &Option<String>,
    path: &str,
    field: &'static str,
    kind: &'static str,
) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(Error::MissingField {
            path: path.to_string(),
            field,
            kind,
        }),
    }
}

/// Where a resolved declaration lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountTarget {
    /// Named volume; `external` volumes are managed by the user.
    ///
    /// `key` identifies the volume inside the compose file and `name` is
    /// the volume's real name, which may differ when the name is not a
    /// valid compose key or is only known once compose interpolates it.
    Volume {
        key: String,
        name: String,
        external: bool,
    },
    Bind { host_path: String },
    /// Kept inside the image, nothing to mount.
    InImage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMount {
    pub key: String,
    pub scope: MountScope,
    pub target: MountTarget,
    pub dst: String,
}

impl ResolvedMount {
    /// Short-syntax compose volume entry, if this needs mounting at all.
    pub fn compose_entry(&self) -> Option<String> {
        match &self.target {
            MountTarget::Volume { key, .. } => Some(format!("{key}:{}", self.dst)),
            MountTarget::Bind { host_path } => Some(format!("{host_path}:{}", self.dst)),
            MountTarget::InImage => None,
        }
    }
}

/// Deterministic, collision-free volume name for an `auto-volume`.
///
/// Keys that do not survive slugging unchanged get a short hash suffix so
/// that `my.data` and `my-data` never share a volume.
pub fn auto_volume_name(
    project: &ProjectIdentity,
    stage: StageId,
    scope: MountScope,
    key: &str,
) -> String {
    let key_slug = slug(key);
    let mut name = format!(
        "{}-{}-{}-{}",
        project.name,
        stage.label(),
        scope.key(),
        key_slug
    );
    if key_slug != key {
        let digest = Sha256::digest(key.as_bytes());
        name.push('-');
        name.push_str(&format!("{digest:x}")[..8]);
    }
    name
}

/// Compose key for a user-named volume: the name itself when compose
/// accepts it as a key, otherwise a key derived like an auto-volume name.
fn manual_volume_key(
    name: &str,
    project: &ProjectIdentity,
    stage: StageId,
    scope: MountScope,
    key: &str,
) -> String {
    if VOLUME_KEY_RE.is_match(name) {
        name.to_string()
    } else {
        auto_volume_name(project, stage, scope, key)
    }
}

/// Resolve every `storage:` and `mount:` declaration of one stage, in
/// declaration order, storage first.
pub fn resolve_mounts(
    config: &StageConfig,
    stage: StageId,
    project: &ProjectIdentity,
    ctx: &ResolveContext,
) -> Result<Vec<ResolvedMount>> {
    let declared = config
        .storage
        .iter()
        .map(|(key, opt)| (key, opt, MountScope::Storage))
        .chain(
            config
                .mount
                .iter()
                .map(|(key, opt)| (key, opt, MountScope::Mount)),
        );

    let mut resolved = Vec::new();
    for (key, option, scope) in declared {
        let path = format!("{}.{}.{key}", stage.key(), scope.key());
        let spec = MountSpec::from_option(key, option, scope, &path)?;
        let target = match &spec.source {
            MountSource::AutoVolume => {
                let name = auto_volume_name(project, stage, scope, key);
                MountTarget::Volume {
                    key: name.clone(),
                    name,
                    external: false,
                }
            }
            MountSource::ManualVolume { name } => MountTarget::Volume {
                key: manual_volume_key(name, project, stage, scope, key),
                name: name.clone(),
                external: true,
            },
            MountSource::Host { path: raw } => MountTarget::Bind {
                host_path: resolve_host_path(raw, &path, ctx)?,
            },
            MountSource::Image => MountTarget::InImage,
        };
        tracing::debug!(%stage, key = %key, ?target, "resolved storage");
        resolved.push(ResolvedMount {
            key: spec.key,
            scope,
            target,
            dst: spec.dst,
        });
    }
    Ok(resolved)
}

fn resolve_host_path(raw: &str, path: &str, ctx: &ResolveContext) -> Result<String> {
    if contains_compose_marker(raw) {
        if ctx.strict_host_paths {
            return Err(Error::schema(
                path,
                "host path uses a compose-time marker, which cannot be checked against the project directory",
                "Use a literal path or configure without --strict-host-paths",
            ));
        }
        // resolved by compose, relative paths are relative to the compose file
        return Ok(raw.to_string());
    }

    let joined = ctx.resolve_user_path(raw).ok_or_else(|| {
        Error::schema(path, "cannot resolve ~ without HOME", "Use an absolute host path")
    })?;
    let host = real_path(&joined);

    if ctx.strict_host_paths {
        let boundary = real_path(&ctx.project_dir);
        if !host.starts_with(&boundary) {
            return Err(Error::HostPathEscapes {
                path: path.to_string(),
                host_path: host,
                boundary,
            });
        }
    }
    Ok(host.to_string_lossy().into_owned())
}

/// Canonical path when it exists on disk, lexically normalized otherwise.
fn real_path(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| normalize_lexically(path))
}

/// Fold `.` and `..` components without touching the filesystem.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other),
        }
    }
    out
}
