// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Implementation of the `stagecraft configure` command.

use clap::Args;
use colored::Colorize;
use miette::Result;
use stagecraft::{COMPOSE_FILENAME, MERGED_BUILD_SCRIPT, OutputMode};

/// Compile the configuration and write every generated file
#[derive(Debug, Args)]
pub struct CmdConfigure {
    #[clap(flatten)]
    project: crate::ProjectFlags,

    /// Emit one self-contained build script instead of a compose file
    #[clap(long, env = "STAGECRAFT_SINGLE_ARTIFACT")]
    single_artifact: bool,

    /// Compile and list the files without writing them
    #[clap(long)]
    dry_run: bool,
}

impl CmdConfigure {
    pub fn run(&mut self) -> Result<i32> {
        let mode = if self.single_artifact {
            OutputMode::SingleArtifact
        } else {
            OutputMode::Compose
        };
        let (config_path, ctx) = self.project.resolve(mode)?;
        let artifacts = stagecraft::compile_file(&config_path, &ctx)?;

        if self.dry_run {
            for artifact in artifacts.iter() {
                println!("  {}", artifact.path.display().to_string().cyan());
            }
            println!();
            println!("Total: {} file(s), nothing written", artifacts.len());
            return Ok(0);
        }

        let written = artifacts.write(&ctx.project_dir)?;
        tracing::info!(count = written.len(), "wrote generated files");

        let main_file = match mode {
            OutputMode::Compose => COMPOSE_FILENAME,
            OutputMode::SingleArtifact => MERGED_BUILD_SCRIPT,
        };
        println!(
            "Configured {} ({} file(s) in {})",
            main_file.green(),
            written.len(),
            ctx.project_dir.display()
        );
        Ok(0)
    }
}
