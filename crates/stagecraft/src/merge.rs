// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Merging the base and derived stages into what actually runs.

use serde::Serialize;

use crate::environment::EnvList;
use crate::spec::{
    AptConfig, BuildSpec, CustomScripts, DeviceKind, Hook, ImageConfig, ProxyConfig, StageConfig,
    StageId,
};
use crate::ssh::SshSettings;
use crate::{Error, Result};

#[cfg(test)]
#[path = "./merge_test.rs"]
mod merge_test;

/// SSH settings in effect, and the stage that installs them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergedSsh {
    pub stage: StageId,
    #[serde(flatten)]
    pub settings: SshSettings,
}

/// The merged view of both stages.
///
/// Mounts are deliberately absent: each stage keeps its own.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergedStage {
    /// Image of the derived stage.
    pub image: ImageConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh: Option<MergedSsh>,

    /// Field-by-field merge, stage-2 values win when set.
    pub proxy: ProxyConfig,

    /// Field-by-field merge, stage-2 values win when set.
    pub apt: AptConfig,

    /// Stage-1 exports followed by stage-2 exports.
    pub environment: EnvList,

    /// Stage-1 ports, stage-2 ports, then the SSH mapping.
    pub ports: Vec<String>,

    pub device: DeviceKind,

    /// Per hook, stage-1 entries followed by stage-2 entries.
    pub custom: CustomScripts,
}

impl MergedStage {
    pub fn has_ssh(&self) -> bool {
        self.ssh.as_ref().is_some_and(|ssh| ssh.settings.enable)
    }
}

/// What a single stage's image and service are built from.
///
/// Stage-1 sees only its own settings. Stage-2 is built on top of stage-1,
/// so it sees the merged settings, except that its build-time scripts are
/// its own since stage-1's already ran in the base image.
#[derive(Debug, Clone)]
pub struct StageView<'a> {
    pub stage: StageId,
    pub image: &'a ImageConfig,
    pub proxy: &'a ProxyConfig,
    pub apt: &'a AptConfig,
    pub environment: &'a EnvList,
    pub bake_environment: bool,
    pub ports: Vec<String>,
    pub device: DeviceKind,
    pub custom: CustomScripts,
    /// SSH settings, when this stage is the one installing them.
    pub ssh: Option<&'a SshSettings>,
}

impl StageView<'_> {
    /// The single entry point of the stage, if any.
    pub fn entry_point(&self) -> Option<&str> {
        self.custom.on_entry.last().map(String::as_str)
    }
}

/// Build the view of one stage.
pub fn stage_view<'a>(
    spec: &'a BuildSpec,
    merged: &'a MergedStage,
    stage: StageId,
) -> StageView<'a> {
    let ssh = merged
        .ssh
        .as_ref()
        .filter(|ssh| ssh.stage == stage)
        .map(|ssh| &ssh.settings);
    match stage {
        StageId::One => {
            let config = &spec.stage_1;
            let ports = match ssh {
                Some(_) => stage_ports(config),
                None => config.ports.clone(),
            };
            StageView {
                stage,
                image: &config.image,
                proxy: &config.proxy,
                apt: &config.apt,
                environment: &config.environment,
                bake_environment: config.bake_environment,
                ports,
                device: config.device.unwrap_or_default(),
                custom: config.custom.clone(),
                ssh,
            }
        }
        StageId::Two => {
            let mut custom = merged.custom.clone();
            custom.on_build = spec.stage_2.custom.on_build.clone();
            StageView {
                stage,
                image: &merged.image,
                proxy: &merged.proxy,
                apt: &merged.apt,
                environment: &merged.environment,
                bake_environment: spec.stage_2.bake_environment,
                ports: merged.ports.clone(),
                device: merged.device,
                custom,
                ssh,
            }
        }
    }
}

/// Merge stage-2 on top of stage-1.
pub fn merge_stages(spec: &BuildSpec) -> MergedStage {
    let base = &spec.stage_1;
    let derived = &spec.stage_2;

    let mut environment = base.environment.clone();
    environment.export_all(&derived.environment);

    let ssh = match (&base.ssh, &derived.ssh) {
        (_, Some(settings)) => Some(MergedSsh {
            stage: StageId::Two,
            settings: settings.clone(),
        }),
        (Some(settings), None) => Some(MergedSsh {
            stage: StageId::One,
            settings: settings.clone(),
        }),
        (None, None) => None,
    };

    let mut ports: Vec<String> = base.ports.iter().chain(&derived.ports).cloned().collect();
    if let Some(mapping) = ssh.as_ref().and_then(|s| s.settings.port_mapping()) {
        ports.push(mapping);
    }

    let mut custom = CustomScripts::default();
    for hook in Hook::ALL {
        let merged = custom.entries_mut(hook);
        merged.extend(base.custom.entries(hook).iter().cloned());
        merged.extend(derived.custom.entries(hook).iter().cloned());
    }

    let merged = MergedStage {
        image: derived.image.clone(),
        ssh,
        proxy: merge_proxy(&base.proxy, &derived.proxy),
        apt: merge_apt(&base.apt, &derived.apt),
        environment,
        ports,
        device: derived.device.or(base.device).unwrap_or_default(),
        custom,
    };
    tracing::debug!(
        env = merged.environment.len(),
        ports = merged.ports.len(),
        ssh = merged.has_ssh(),
        "merged stages"
    );
    merged
}

/// Ports published by a single stage's own service.
pub fn stage_ports(config: &StageConfig) -> Vec<String> {
    let mut ports = config.ports.clone();
    if let Some(mapping) = config.ssh.as_ref().and_then(SshSettings::port_mapping) {
        ports.push(mapping);
    }
    ports
}

fn merge_proxy(base: &ProxyConfig, derived: &ProxyConfig) -> ProxyConfig {
    ProxyConfig {
        address: derived.address.clone().or_else(|| base.address.clone()),
        port: derived.port.or(base.port),
        enable_globally: derived.enable_globally.or(base.enable_globally),
        remove_after_build: derived.remove_after_build.or(base.remove_after_build),
        use_https: derived.use_https.or(base.use_https),
    }
}

fn merge_apt(base: &AptConfig, derived: &AptConfig) -> AptConfig {
    AptConfig {
        repo_source: derived.repo_source.clone().or_else(|| base.repo_source.clone()),
        keep_repo_after_build: derived.keep_repo_after_build.or(base.keep_repo_after_build),
        use_proxy: derived.use_proxy.or(base.use_proxy),
        keep_proxy_after_build: derived.keep_proxy_after_build.or(base.keep_proxy_after_build),
    }
}

/// Join optional host and container parts into a compose port string.
///
/// Without a host part the mapping is the container port alone; without a
/// container part there is nothing to publish.
pub fn port_mapping(host: Option<&str>, container: Option<&str>) -> Option<String> {
    let host = host.map(str::trim).filter(|h| !h.is_empty());
    let container = container.map(str::trim).filter(|c| !c.is_empty())?;
    Some(match host {
        Some(host) => format!("{host}:{container}"),
        None => container.to_string(),
    })
}

/// Normalize a port entry from the document.
///
/// Empty entries (`""`, `":"`) are dropped and a missing host part
/// (`":22"`) collapses to the container port. A missing container part is
/// an error.
pub fn normalize_port(entry: &str, path: &str) -> Result<Option<String>> {
    let entry = entry.trim();
    if entry.trim_matches(':').is_empty() {
        return Ok(None);
    }
    match entry.rsplit_once(':') {
        None => Ok(Some(entry.to_string())),
        Some((_, container)) if container.trim().is_empty() => Err(Error::schema(
            path,
            format!("port mapping '{entry}' has no container port"),
            "Write port mappings as HOST:CONTAINER or CONTAINER",
        )),
        Some((host, container)) if !host.contains(':') || host.trim_matches(':').is_empty() => {
            Ok(port_mapping(Some(host.trim_matches(':')), Some(container)))
        }
        // ip:host:container, kept as written
        Some(_) => Ok(Some(entry.to_string())),
    }
}
