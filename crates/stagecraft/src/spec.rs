// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Config document parsing and the typed build specification.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::context::ResolveContext;
use crate::environment::{EnvList, EnvironmentDoc};
use crate::merge::normalize_port;
use crate::ssh::{SshConfig, SshSettings};
use crate::storage::{StorageOption, STORAGE_CATEGORIES};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./spec_test.rs"]
mod spec_test;

/// API version for config documents.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum ApiVersion {
    #[default]
    #[serde(rename = "stagecraft/v0")]
    V0,
}

/// Helper for two-stage deserialization to determine API version first.
#[derive(Deserialize)]
struct ApiVersionMapping {
    #[serde(default)]
    api: ApiVersion,
}

/// One of the two images described by a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum StageId {
    #[serde(rename = "stage-1")]
    One,
    #[serde(rename = "stage-2")]
    Two,
}

impl StageId {
    pub const ALL: [StageId; 2] = [StageId::One, StageId::Two];

    /// Key used in the config document.
    pub fn key(self) -> &'static str {
        match self {
            Self::One => "stage_1",
            Self::Two => "stage_2",
        }
    }

    /// Name used for services, directories and volumes.
    pub fn label(self) -> &'static str {
        match self {
            Self::One => "stage-1",
            Self::Two => "stage-2",
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// `project:` section.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ImageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// `proxy:` section. Every field is optional so stage-2 can override
/// stage-1 one field at a time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(
        default,
        deserialize_with = "numeric::opt_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_globally: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_after_build: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_https: Option<bool>,
}

impl ProxyConfig {
    /// Proxy URL, when both address and port are known.
    pub fn url(&self) -> Option<String> {
        let address = self.address.as_deref()?;
        let port = self.port?;
        let scheme = if self.use_https.unwrap_or(false) {
            "https"
        } else {
            "http"
        };
        Some(format!("{scheme}://{address}:{port}"))
    }
}

/// `apt:` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AptConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_repo_after_build: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_proxy: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_proxy_after_build: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Cpu,
    Gpu,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    #[serde(rename = "type")]
    pub kind: DeviceKind,
}

/// Lifecycle hooks a stage can attach scripts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    OnBuild,
    OnFirstRun,
    OnEveryRun,
    OnUserLogin,
    OnEntry,
}

impl Hook {
    /// Hooks that get a generated wrapper script.
    pub const WRAPPED: [Hook; 4] = [
        Hook::OnBuild,
        Hook::OnFirstRun,
        Hook::OnEveryRun,
        Hook::OnUserLogin,
    ];

    pub const ALL: [Hook; 5] = [
        Hook::OnBuild,
        Hook::OnFirstRun,
        Hook::OnEveryRun,
        Hook::OnUserLogin,
        Hook::OnEntry,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::OnBuild => "on_build",
            Self::OnFirstRun => "on_first_run",
            Self::OnEveryRun => "on_every_run",
            Self::OnUserLogin => "on_user_login",
            Self::OnEntry => "on_entry",
        }
    }

    /// Runs while the image is being built rather than in a container.
    pub fn is_build_time(self) -> bool {
        matches!(self, Self::OnBuild)
    }
}

/// `custom:` section: script invocations per hook, each entry being a
/// path followed by optional arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CustomScripts {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_build: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_first_run: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_every_run: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_user_login: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_entry: Vec<String>,
}

impl CustomScripts {
    pub fn entries(&self, hook: Hook) -> &[String] {
        match hook {
            Hook::OnBuild => &self.on_build,
            Hook::OnFirstRun => &self.on_first_run,
            Hook::OnEveryRun => &self.on_every_run,
            Hook::OnUserLogin => &self.on_user_login,
            Hook::OnEntry => &self.on_entry,
        }
    }

    pub fn entries_mut(&mut self, hook: Hook) -> &mut Vec<String> {
        match hook {
            Hook::OnBuild => &mut self.on_build,
            Hook::OnFirstRun => &mut self.on_first_run,
            Hook::OnEveryRun => &mut self.on_every_run,
            Hook::OnUserLogin => &mut self.on_user_login,
            Hook::OnEntry => &mut self.on_entry,
        }
    }

    pub fn is_empty(&self) -> bool {
        Hook::ALL.iter().all(|hook| self.entries(*hook).is_empty())
    }
}

/// A stage section as written in the document.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StageDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh: Option<SshConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apt: Option<AptConfig>,
    #[serde(default)]
    pub environment: EnvironmentDoc,
    /// Also write the environment into a profile script inside the image.
    #[serde(default)]
    pub bake_environment: bool,
    #[serde(default, deserialize_with = "numeric::string_list")]
    pub ports: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceConfig>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub storage: IndexMap<String, StorageOption>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub mount: IndexMap<String, StorageOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<CustomScripts>,
}

/// The whole config document.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UserConfig {
    #[serde(default)]
    pub api: ApiVersion,

    #[serde(default)]
    pub project: ProjectConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_1: Option<StageDoc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_2: Option<StageDoc>,

    /// Document tree after config-time resolution (not serialized).
    #[serde(skip)]
    pub document: Value,

    /// Path to the file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl UserConfig {
    /// Parse a document, resolving config-time variables from `ctx`.
    pub fn from_yaml<S: AsRef<str>>(yaml: S, ctx: &ResolveContext) -> Result<Self> {
        // Stage 1: Parse to a tree and determine the API version
        let mut value: Value = serde_yaml::from_str(yaml.as_ref())
            .map_err(|error| Error::InvalidYaml { error })?;
        if value.is_null() {
            value = Value::Mapping(Default::default());
        }

        let with_version: ApiVersionMapping = serde_yaml::from_value(value.clone())
            .map_err(|error| Error::InvalidYaml { error })?;

        // Stage 2: Resolve config-time markers across the whole tree
        crate::vars::resolve_document(&mut value, ctx)?;

        // Stage 3: Deserialize based on version
        let mut config: Self = match with_version.api {
            ApiVersion::V0 => serde_yaml::from_value(value.clone())
                .map_err(|error| Error::InvalidYaml { error })?,
        };
        config.document = value;
        Ok(config)
    }

    /// Load a document from file path.
    pub fn load<P: AsRef<Path>>(path: P, ctx: &ResolveContext) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|error| Error::ReadFailed {
            path: path.to_path_buf(),
            error,
        })?;

        let mut config = Self::from_yaml(yaml, ctx)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Validate structural invariants and build the typed specification.
    pub fn into_build_spec(self, project_dir: &Path) -> Result<BuildSpec> {
        let project = ProjectIdentity::new(self.project.name.as_deref(), project_dir);

        let stage_1_doc = self.stage_1.ok_or_else(|| {
            Error::schema(
                "stage_1",
                "the base stage is missing",
                "Add a stage_1 section with at least image.base",
            )
        })?;
        let mut stage_1 = StageConfig::from_doc(stage_1_doc, StageId::One)?;
        let mut stage_2 = match self.stage_2 {
            Some(doc) => StageConfig::from_doc(doc, StageId::Two)?,
            None => StageConfig::default(),
        };

        if stage_1.image.base.is_none() {
            return Err(Error::schema(
                "stage_1.image.base",
                "the base stage needs a base image",
                "Set stage_1.image.base, e.g. ubuntu:24.04",
            ));
        }
        stage_1
            .image
            .output
            .get_or_insert_with(|| project.default_image(StageId::One));
        stage_2
            .image
            .output
            .get_or_insert_with(|| project.default_image(StageId::Two));

        Ok(BuildSpec {
            project,
            stage_1,
            stage_2,
            document: self.document,
            source_path: self.source_path,
        })
    }
}

/// Name the project is known by in volume names, image tags and compose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectIdentity {
    pub name: String,
}

impl ProjectIdentity {
    pub fn new(configured: Option<&str>, project_dir: &Path) -> Self {
        let raw = configured
            .map(str::to_string)
            .or_else(|| {
                project_dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_default();
        let name = slug(&raw);
        Self {
            name: if name.is_empty() {
                "stagecraft".to_string()
            } else {
                name
            },
        }
    }

    pub fn default_image(&self, stage: StageId) -> String {
        format!("{}:{}", self.name, stage.label())
    }
}

/// Lowercase `s` and squash anything outside `[a-z0-9_-]` into `-`.
pub fn slug(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

/// A validated stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageConfig {
    pub image: ImageConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh: Option<SshSettings>,
    pub proxy: ProxyConfig,
    pub apt: AptConfig,
    pub environment: EnvList,
    pub bake_environment: bool,
    pub ports: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceKind>,
    pub storage: IndexMap<String, StorageOption>,
    pub mount: IndexMap<String, StorageOption>,
    pub custom: CustomScripts,
}

impl StageConfig {
    fn from_doc(doc: StageDoc, stage: StageId) -> Result<Self> {
        let key = stage.key();

        let ssh = doc
            .ssh
            .map(|ssh| ssh.into_settings(&format!("{key}.ssh")))
            .transpose()?;
        let environment = doc
            .environment
            .into_env_list(&format!("{key}.environment"))?;

        for name in doc.storage.keys() {
            if !STORAGE_CATEGORIES.contains(&name.as_str()) {
                return Err(Error::schema(
                    format!("{key}.storage.{name}"),
                    format!("'{name}' is not a storage category"),
                    format!(
                        "Storage categories are {}; declare other volumes under mount",
                        STORAGE_CATEGORIES.join(", ")
                    ),
                ));
            }
        }

        let mut ports = Vec::with_capacity(doc.ports.len());
        for (i, entry) in doc.ports.iter().enumerate() {
            if let Some(port) = normalize_port(entry, &format!("{key}.ports[{i}]"))? {
                ports.push(port);
            }
        }

        let custom = doc.custom.unwrap_or_default();
        if custom.on_entry.len() > 1 {
            return Err(Error::schema(
                format!("{key}.custom.on_entry"),
                format!("{} entry points declared", custom.on_entry.len()),
                "A stage can have at most one on_entry script",
            ));
        }

        Ok(Self {
            image: doc.image.unwrap_or_default(),
            ssh,
            proxy: doc.proxy.unwrap_or_default(),
            apt: doc.apt.unwrap_or_default(),
            environment,
            bake_environment: doc.bake_environment,
            ports,
            device: doc.device.map(|d| d.kind),
            storage: doc.storage,
            mount: doc.mount,
            custom,
        })
    }
}

/// Root of the typed configuration: one project, two stages.
#[derive(Debug, Clone)]
pub struct BuildSpec {
    pub project: ProjectIdentity,
    pub stage_1: StageConfig,
    pub stage_2: StageConfig,
    /// Resolved document tree, kept for path-wide checks.
    pub document: Value,
    pub source_path: Option<PathBuf>,
}

impl BuildSpec {
    pub fn stage(&self, id: StageId) -> &StageConfig {
        match id {
            StageId::One => &self.stage_1,
            StageId::Two => &self.stage_2,
        }
    }
}

/// Deserializers for fields that accept numbers written as strings, which
/// is what a substituted `${PORT}` marker produces.
pub(crate) mod numeric {
    use std::str::FromStr;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Text(String),
    }

    fn convert<T, E>(raw: Raw) -> Result<T, E>
    where
        T: TryFrom<u64> + FromStr,
        E: Error,
    {
        match raw {
            Raw::Int(n) => T::try_from(n).map_err(|_| E::custom(format!("{n} is out of range"))),
            Raw::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("expected a number, found '{s}'"))),
        }
    }

    pub fn number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: TryFrom<u64> + FromStr,
    {
        convert(Raw::deserialize(deserializer)?)
    }

    pub fn opt_number<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: TryFrom<u64> + FromStr,
    {
        Option::<Raw>::deserialize(deserializer)?
            .map(convert::<T, D::Error>)
            .transpose()
    }

    /// A list of strings where plain integers are also accepted.
    pub fn string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Item {
            Int(i64),
            Text(String),
        }

        let items = Option::<Vec<Item>>::deserialize(deserializer)?.unwrap_or_default();
        Ok(items
            .into_iter()
            .map(|item| match item {
                Item::Int(n) => n.to_string(),
                Item::Text(s) => s,
            })
            .collect())
    }
}
