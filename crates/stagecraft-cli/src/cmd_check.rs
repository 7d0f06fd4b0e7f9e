// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Verify that the generated files on disk match the configuration.

use clap::Args;
use miette::Result;
use stagecraft::{DriftState, OutputMode};

/// Verify generated files are up to date
#[derive(Debug, Args)]
pub struct CmdCheck {
    #[clap(flatten)]
    project: crate::ProjectFlags,

    /// Check the single-artifact output instead of the compose output
    #[clap(long, env = "STAGECRAFT_SINGLE_ARTIFACT")]
    single_artifact: bool,
}

impl CmdCheck {
    pub fn run(&mut self) -> Result<i32> {
        let mode = if self.single_artifact {
            OutputMode::SingleArtifact
        } else {
            OutputMode::Compose
        };
        let (config_path, ctx) = self.project.resolve(mode)?;
        let artifacts = stagecraft::compile_file(&config_path, &ctx)?;
        let stale: Vec<_> = artifacts
            .diff_against_disk(&ctx.project_dir)?
            .into_iter()
            .filter(|drift| drift.state != DriftState::Unchanged)
            .collect();

        if stale.is_empty() {
            println!("✓ Generated files match {}", config_path.display());
            return Ok(0);
        }

        eprintln!("Error: Generated files are out of date:");

        for drift in &stale {
            match drift.state {
                DriftState::Missing => eprintln!("  - '{}' is missing", drift.path.display()),
                DriftState::Changed => eprintln!("  - '{}' differs", drift.path.display()),
                DriftState::Unchanged => {}
            }
        }

        eprintln!("\nRun 'stagecraft configure' to regenerate them");
        Ok(1)
    }
}
