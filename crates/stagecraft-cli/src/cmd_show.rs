// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Implementation of the `stagecraft show` command.

use std::path::Path;

use clap::Args;
use colored::Colorize;
use miette::{IntoDiagnostic, Result};
use stagecraft::spec::Hook;
use stagecraft::{BuildSpec, MergedStage, OutputMode, UserConfig};

/// Display the merged stage configuration
#[derive(Debug, Args)]
pub struct CmdShow {
    #[clap(flatten)]
    project: crate::ProjectFlags,

    /// Output format: table, yaml
    #[clap(long, default_value = "table")]
    format: String,
}

impl CmdShow {
    pub fn run(&mut self) -> Result<i32> {
        let (config_path, ctx) = self.project.resolve(OutputMode::Compose)?;
        let spec = UserConfig::load(&config_path, &ctx)?.into_build_spec(&ctx.project_dir)?;
        let merged = stagecraft::merge_stages(&spec);

        if self.format == "yaml" {
            let text = serde_yaml::to_string(&merged).into_diagnostic()?;
            println!("# {}", config_path.display());
            print!("{text}");
        } else {
            self.show_table(&config_path, &spec, &merged);
        }
        Ok(0)
    }

    fn show_table(&self, config_path: &Path, spec: &BuildSpec, merged: &MergedStage) {
        println!("{}", "Project:".bold());
        println!();
        println!("  {} ({})", spec.project.name.cyan(), config_path.display());
        for (label, stage) in [("stage-1", &spec.stage_1), ("stage-2", &spec.stage_2)] {
            let base = stage.image.base.as_deref().unwrap_or("<unset>");
            let output = stage.image.output.as_deref().unwrap_or("<unset>");
            println!("  {label}: {} -> {}", base.dimmed(), output.green());
        }

        println!();
        println!("{}", "Merged Stage:".bold());
        println!();
        println!("  device: {}", format!("{:?}", merged.device).to_lowercase().yellow());
        match &merged.ssh {
            Some(ssh) if ssh.settings.enable => {
                let users: Vec<&str> = ssh.settings.users.iter().map(|u| u.name.as_str()).collect();
                println!(
                    "  ssh: port {} installed by {} [users: {}]",
                    ssh.settings.port,
                    ssh.stage.label().cyan(),
                    users.join(", ")
                );
            }
            _ => println!("  ssh: {}", "(disabled)".dimmed()),
        }
        if let Some(address) = &merged.proxy.address {
            let port = merged.proxy.port.map(|p| format!(":{p}")).unwrap_or_default();
            println!("  proxy: {address}{port}");
        }

        if !merged.ports.is_empty() {
            println!();
            println!("{}", "Ports:".bold());
            println!();
            for (i, port) in merged.ports.iter().enumerate() {
                println!("  {}. {}", i + 1, port.green());
            }
        }

        if !merged.environment.is_empty() {
            println!();
            println!("{}", "Environment Variables:".bold());
            println!();
            for (i, (key, value)) in merged.environment.iter().enumerate() {
                println!("  {}. {} = {}", i + 1, key.cyan(), value.green());
            }
        }

        let hooks: Vec<(Hook, &[String])> = Hook::ALL
            .iter()
            .map(|&hook| (hook, merged.custom.entries(hook)))
            .filter(|(_, scripts)| !scripts.is_empty())
            .collect();
        if !hooks.is_empty() {
            println!();
            println!("{}", "Custom Scripts:".bold());
            println!();
            for (hook, scripts) in hooks {
                println!("  {}:", hook.key().yellow());
                for script in scripts {
                    println!("    - {script}");
                }
            }
        }
    }
}
