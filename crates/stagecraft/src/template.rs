// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Merging the compiled configuration into the compose template.
//!
//! The template carries an `x-cfg` section with defaults. The compiled
//! configuration is merged over it, then every `${x-cfg.path}` reference
//! in the template is resolved against the merged section:
//!
//! - a string that is exactly one reference is replaced by the referenced
//!   node, whatever its type
//! - references embedded in a longer string are interpolated and must
//!   point at scalars
//!
//! Entries that end up null are dropped, `x-cfg` is removed, and finally
//! compose-time markers are rewritten into compose's own syntax.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_yaml::{Mapping, Value};

use crate::credentials::ResolvedUser;
use crate::merge::StageView;
use crate::pipeline::Compilation;
use crate::spec::{DeviceKind, ImageConfig, ProjectIdentity, StageId};
use crate::storage::{MountTarget, ResolvedMount};
use crate::vars::{child_path, index_path, key_label, rewrite_compose_markers};
use crate::{CONTAINER_ROOT, Error, GENERATED_DIR, Result};

#[cfg(test)]
#[path = "./template_test.rs"]
mod template_test;

/// Name of the structural context section.
pub const CONTEXT_KEY: &str = "x-cfg";

/// The built-in compose layout.
pub const COMPOSE_TEMPLATE: &str = include_str!("./compose-template.yaml");

static REFERENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{x-cfg((?:\.[A-Za-z0-9_-]+)+)\}").expect("static regex is valid")
});

/// A plain tree with every reference and marker resolved, ready to write.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTree(Value);

impl ResolvedTree {
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Look up a node by dotted path, e.g. `services.stage-2.image`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.0, path.split('.'))
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(&self.0).map_err(|error| Error::SerializeFailed {
            artifact: "compose file".to_string(),
            error,
        })
    }
}

/// Everything the template can reference under `x-cfg`.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateContext {
    pub project: ProjectIdentity,
    pub stage_1: StageContext,
    pub stage_2: StageContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volumes: Option<IndexMap<String, VolumeDecl>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StageContext {
    pub image: ImageConfig,
    pub build_args: IndexMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploy: Option<String>,
}

/// Top-level named volume declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VolumeDecl {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub external: bool,
    /// Real volume name, when it differs from the key it is declared under.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl TemplateContext {
    pub fn new(compiled: &Compilation) -> Self {
        let mut volumes = IndexMap::new();
        for stage in StageId::ALL {
            for mount in compiled.mounts(stage) {
                if let MountTarget::Volume {
                    key,
                    name,
                    external,
                } = &mount.target
                {
                    volumes.insert(
                        key.clone(),
                        VolumeDecl {
                            external: *external,
                            name: (name != key).then(|| name.clone()),
                        },
                    );
                }
            }
        }
        Self {
            project: compiled.spec.project.clone(),
            stage_1: stage_context(compiled, StageId::One),
            stage_2: stage_context(compiled, StageId::Two),
            volumes: non_empty_map(volumes),
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        serde_yaml::to_value(self).map_err(|error| Error::SerializeFailed {
            artifact: CONTEXT_KEY.to_string(),
            error,
        })
    }
}

fn stage_context(compiled: &Compilation, stage: StageId) -> StageContext {
    let view = compiled.view(stage);
    let mounts = compiled.mounts(stage);
    let volumes = mounts
        .iter()
        .filter_map(ResolvedMount::compose_entry)
        .collect();
    StageContext {
        image: view.image.clone(),
        build_args: build_args(&view, &compiled.users, mounts),
        environment: non_empty(view.environment.to_assignments()),
        ports: non_empty(view.ports.clone()),
        volumes: non_empty(volumes),
        deploy: (view.device == DeviceKind::Gpu)
            .then(|| format!("${{{CONTEXT_KEY}.gpu_deploy}}")),
    }
}

/// Arguments handed to the stage's image build.
pub fn build_args(
    view: &StageView<'_>,
    users: &[ResolvedUser],
    mounts: &[ResolvedMount],
) -> IndexMap<String, String> {
    let mut args = IndexMap::new();
    let mut set = |key: &str, value: String| {
        args.insert(key.to_string(), value);
    };

    let generated = format!("{CONTAINER_ROOT}/{}/{GENERATED_DIR}", view.stage.label());
    set("STAGE_DIR", format!("{CONTAINER_ROOT}/{}", view.stage.label()));
    set("GENERATED_DIR", generated.clone());

    if let Some(url) = view.proxy.url() {
        set("PROXY_URL", url);
    }
    if let Some(flag) = view.proxy.enable_globally {
        set("PROXY_ENABLE_GLOBALLY", flag.to_string());
    }
    if let Some(flag) = view.proxy.remove_after_build {
        set("PROXY_REMOVE_AFTER_BUILD", flag.to_string());
    }
    if let Some(source) = &view.apt.repo_source {
        set("APT_REPO_SOURCE", source.clone());
    }
    if let Some(flag) = view.apt.keep_repo_after_build {
        set("APT_KEEP_REPO_AFTER_BUILD", flag.to_string());
    }
    if let Some(flag) = view.apt.use_proxy {
        set("APT_USE_PROXY", flag.to_string());
    }
    if let Some(flag) = view.apt.keep_proxy_after_build {
        set("APT_KEEP_PROXY_AFTER_BUILD", flag.to_string());
    }

    if let Some(ssh) = view.ssh.filter(|ssh| ssh.enable) {
        set("SSH_PORT", ssh.port.to_string());
        set("SSH_USER_COUNT", users.len().to_string());
        for (i, user) in users.iter().enumerate() {
            let prefix = format!("SSH_USER_{i}");
            set(&format!("{prefix}_NAME"), user.name.clone());
            if let Some(password) = &user.password {
                set(&format!("{prefix}_PASSWORD"), password.clone());
            }
            if let Some(uid) = user.uid {
                set(&format!("{prefix}_UID"), uid.to_string());
            }
            if let Some(gid) = user.gid {
                set(&format!("{prefix}_GID"), gid.to_string());
            }
            let authorized: Vec<&str> = user
                .authorized_keys
                .iter()
                .map(|key| key.container_path.as_str())
                .collect();
            if !authorized.is_empty() {
                set(&format!("{prefix}_PUBKEY_FILES"), authorized.join(","));
            }
            if let Some(key) = &user.private_key {
                set(&format!("{prefix}_PRIVKEY_FILE"), key.container_path.clone());
            }
        }
    }

    if view.bake_environment {
        set("BAKED_ENV_FILE", format!("{generated}/_baked-env.sh"));
    }

    let in_image: Vec<&str> = mounts
        .iter()
        .filter(|mount| mount.target == MountTarget::InImage)
        .map(|mount| mount.dst.as_str())
        .collect();
    if !in_image.is_empty() {
        set("IMAGE_STORAGE_DIRS", in_image.join(","));
    }

    args
}

/// Render the built-in template with the compiled configuration.
pub fn render(compiled: &Compilation) -> Result<ResolvedTree> {
    render_template(COMPOSE_TEMPLATE, TemplateContext::new(compiled).to_value()?)
}

/// Merge `context` into the template's `x-cfg` section and resolve.
pub fn render_template(template: &str, context: Value) -> Result<ResolvedTree> {
    let mut root: Value =
        serde_yaml::from_str(template).map_err(|error| Error::InvalidYaml { error })?;
    let Value::Mapping(map) = &mut root else {
        return Err(Error::schema(
            "<template>",
            "the compose template is not a mapping",
            "The template must be a YAML mapping with an x-cfg section",
        ));
    };

    let mut cfg = map
        .shift_remove(CONTEXT_KEY)
        .unwrap_or_else(|| Value::Mapping(Mapping::new()));
    merge_into(&mut cfg, context);

    let resolver = Resolver { cfg: &cfg };
    let mut resolved = resolver.resolve(&root, "", &mut Vec::new())?;
    drop_nulls(&mut resolved);
    rewrite_compose_markers(&mut resolved)?;
    tracing::debug!("rendered compose template");
    Ok(ResolvedTree(resolved))
}

/// Recursively merge `overlay` into `base`. Mappings merge key by key,
/// nulls leave the base alone and anything else replaces it.
pub fn merge_into(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_into(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

struct Resolver<'a> {
    cfg: &'a Value,
}

impl Resolver<'_> {
    fn resolve(&self, value: &Value, path: &str, chain: &mut Vec<String>) -> Result<Value> {
        match value {
            Value::String(s) => self.resolve_str(s, path, chain),
            Value::Sequence(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| self.resolve(item, &index_path(path, i), chain))
                .collect::<Result<Vec<_>>>()
                .map(Value::Sequence),
            Value::Mapping(map) => {
                let mut out = Mapping::with_capacity(map.len());
                for (key, item) in map {
                    let resolved = self.resolve(item, &child_path(path, &key_label(key)), chain)?;
                    out.insert(key.clone(), resolved);
                }
                Ok(Value::Mapping(out))
            }
            other => Ok(other.clone()),
        }
    }

    fn resolve_str(&self, s: &str, path: &str, chain: &mut Vec<String>) -> Result<Value> {
        if let Some(caps) = REFERENCE_RE.captures(s) {
            if caps.get(0).map(|m| m.as_str().len()) == Some(s.len()) {
                return self.follow(&caps[1], path, chain);
            }
        } else {
            return Ok(Value::String(s.to_string()));
        }

        let mut out = String::with_capacity(s.len());
        let mut last = 0;
        for caps in REFERENCE_RE.captures_iter(s) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&s[last..whole.start()]);
            match self.follow(&caps[1], path, chain)? {
                Value::String(text) => out.push_str(&text),
                Value::Number(n) => out.push_str(&n.to_string()),
                Value::Bool(b) => out.push_str(&b.to_string()),
                Value::Null => {}
                _ => {
                    return Err(Error::TemplateReference {
                        path: path.to_string(),
                        reference: format!("{} (not a scalar)", whole.as_str()),
                    });
                }
            }
            last = whole.end();
        }
        out.push_str(&s[last..]);
        Ok(Value::String(out))
    }

    /// Resolve the node at `x-cfg<suffix>`, following further references.
    fn follow(&self, suffix: &str, path: &str, chain: &mut Vec<String>) -> Result<Value> {
        let reference = format!("{CONTEXT_KEY}{suffix}");
        if chain.contains(&reference) {
            chain.push(reference);
            return Err(Error::TemplateCycle(chain.join(" -> ")));
        }
        let node = lookup(self.cfg, suffix.trim_start_matches('.').split('.')).ok_or_else(|| {
            Error::TemplateReference {
                path: path.to_string(),
                reference: reference.clone(),
            }
        })?;
        chain.push(reference.clone());
        let resolved = self.resolve(node, &reference, chain);
        chain.pop();
        resolved
    }
}

fn lookup<'a, 'p>(root: &'a Value, mut keys: impl Iterator<Item = &'p str>) -> Option<&'a Value> {
    keys.try_fold(root, |node, key| match node {
        Value::Mapping(map) => map.get(key),
        Value::Sequence(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Remove null mapping entries and sequence items, depth first.
fn drop_nulls(value: &mut Value) {
    match value {
        Value::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                drop_nulls(item);
            }
            *map = std::mem::take(map)
                .into_iter()
                .filter(|(_, item)| !item.is_null())
                .collect();
        }
        Value::Sequence(items) => {
            for item in items.iter_mut() {
                drop_nulls(item);
            }
            items.retain(|item| !item.is_null());
        }
        _ => {}
    }
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    (!items.is_empty()).then_some(items)
}

fn non_empty_map<K, V>(map: IndexMap<K, V>) -> Option<IndexMap<K, V>> {
    (!map.is_empty()).then_some(map)
}
