// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! The compiler pipeline, from document to in-memory artifacts.

use std::path::Path;

use crate::context::{OutputMode, ResolveContext};
use crate::credentials::{Ed25519Generator, KeyGenerator, ResolvedUser, resolve_credentials};
use crate::emit::{Artifacts, emit};
use crate::merge::{MergedStage, StageView, merge_stages, stage_view};
use crate::spec::{BuildSpec, StageId, UserConfig};
use crate::storage::{ResolvedMount, resolve_mounts};
use crate::{Result, guardrail, template};

#[cfg(test)]
#[path = "./pipeline_test.rs"]
mod pipeline_test;

/// Everything known about a configuration once every resolver has run.
#[derive(Debug, Clone)]
pub struct Compilation {
    pub spec: BuildSpec,
    pub merged: MergedStage,
    /// Users of the stage that installs SSH, empty without SSH.
    pub users: Vec<ResolvedUser>,
    pub stage_1_mounts: Vec<ResolvedMount>,
    pub stage_2_mounts: Vec<ResolvedMount>,
    pub mode: OutputMode,
}

impl Compilation {
    pub fn mounts(&self, stage: StageId) -> &[ResolvedMount] {
        match stage {
            StageId::One => &self.stage_1_mounts,
            StageId::Two => &self.stage_2_mounts,
        }
    }

    pub fn view(&self, stage: StageId) -> StageView<'_> {
        stage_view(&self.spec, &self.merged, stage)
    }
}

/// Run every resolver and the guardrail, without emitting anything.
pub fn prepare(
    config: UserConfig,
    ctx: &ResolveContext,
    generator: &dyn KeyGenerator,
) -> Result<Compilation> {
    let spec = config.into_build_spec(&ctx.project_dir)?;
    tracing::debug!(project = %spec.project.name, "loaded configuration");

    let merged = merge_stages(&spec);
    guardrail::check(&spec, &merged, ctx.mode)?;

    let users = match &merged.ssh {
        Some(ssh) if ssh.settings.enable => resolve_credentials(ssh, ctx, generator)?,
        _ => Vec::new(),
    };

    let stage_1_mounts = resolve_mounts(&spec.stage_1, StageId::One, &spec.project, ctx)?;
    let stage_2_mounts = resolve_mounts(&spec.stage_2, StageId::Two, &spec.project, ctx)?;
    tracing::debug!(
        stage_1 = stage_1_mounts.len(),
        stage_2 = stage_2_mounts.len(),
        "resolved mounts"
    );

    Ok(Compilation {
        spec,
        merged,
        users,
        stage_1_mounts,
        stage_2_mounts,
        mode: ctx.mode,
    })
}

/// Compile a loaded document into its artifacts.
///
/// Nothing is written; call [`Artifacts::write`] on the result.
pub fn compile(config: UserConfig, ctx: &ResolveContext) -> Result<Artifacts> {
    compile_with(config, ctx, &Ed25519Generator)
}

/// Like [`compile`], with a custom source of generated keys.
pub fn compile_with(
    config: UserConfig,
    ctx: &ResolveContext,
    generator: &dyn KeyGenerator,
) -> Result<Artifacts> {
    let compiled = prepare(config, ctx, generator)?;
    let tree = template::render(&compiled)?;
    let artifacts = emit(&compiled, &tree)?;
    tracing::debug!(count = artifacts.len(), "compiled artifacts");
    Ok(artifacts)
}

/// Load the document at `path` and compile it.
pub fn compile_file<P: AsRef<Path>>(path: P, ctx: &ResolveContext) -> Result<Artifacts> {
    let config = UserConfig::load(path, ctx)?;
    compile(config, ctx)
}
