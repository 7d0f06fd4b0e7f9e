// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Rejects compose-time markers in values that compose never interpolates.

use crate::context::OutputMode;
use crate::merge::MergedStage;
use crate::spec::{BuildSpec, Hook, StageId};
use crate::ssh::KeySource;
use crate::vars::{first_compose_marker, visit_strings};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./guardrail_test.rs"]
mod guardrail_test;

/// Check every value that ends up in a generated file rather than in the
/// compose file.
pub fn check(spec: &BuildSpec, merged: &MergedStage, mode: OutputMode) -> Result<()> {
    for stage in StageId::ALL {
        let config = spec.stage(stage);
        let key = stage.key();

        for hook in Hook::ALL {
            let context = if hook == Hook::OnEntry {
                "entry point paths and arguments are written to files read by the container"
            } else if hook.is_build_time() {
                "build scripts run while the image is built, outside of compose"
            } else {
                "lifecycle scripts are written into generated wrapper scripts"
            };
            for (i, entry) in config.custom.entries(hook).iter().enumerate() {
                deny(
                    entry,
                    || format!("{key}.custom.{}[{i}]", hook.key()),
                    context,
                )?;
            }
        }

        // stage-2 bakes the merged environment, stage-1 values included
        let baked = config.bake_environment
            || (stage == StageId::One && spec.stage_2.bake_environment);
        if baked {
            for (name, value) in config.environment.iter() {
                deny(
                    value,
                    || format!("{key}.environment.{name}"),
                    "bake_environment writes the value into the image",
                )?;
            }
        }
    }

    if let Some(ssh) = &merged.ssh {
        let key = ssh.stage.key();
        for user in &ssh.settings.users {
            let fields = [("pubkey", &user.pubkey), ("privkey", &user.privkey)];
            for (field, source) in fields {
                let (suffix, value) = match source {
                    KeySource::File(path) => ("file", path),
                    KeySource::Text(text) => ("text", text),
                    KeySource::Absent => continue,
                };
                deny(
                    value,
                    || format!("{key}.ssh.users.{}.{field}_{suffix}", user.name),
                    "key material is read and copied at configure time",
                )?;
            }
        }
    }

    if mode == OutputMode::SingleArtifact {
        visit_strings(&spec.document, "", &mut |path, s| match first_compose_marker(s) {
            Some(name) => Err(Error::ComposeMarkerInSingleArtifact {
                path: path.to_string(),
                name,
            }),
            None => Ok(()),
        })?;
    }

    tracing::debug!(?mode, "guardrail passed");
    Ok(())
}

fn deny<P>(value: &str, path: P, context: &str) -> Result<()>
where
    P: FnOnce() -> String,
{
    match first_compose_marker(value) {
        Some(name) => Err(Error::ComposeMarkerNotAllowed {
            path: path(),
            name,
            context: context.to_string(),
        }),
        None => Ok(()),
    }
}
