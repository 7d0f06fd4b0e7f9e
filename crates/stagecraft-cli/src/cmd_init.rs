// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Implementation of the `stagecraft init` command.

use std::path::PathBuf;

use clap::Args;
use miette::Result;

#[cfg(test)]
#[path = "./cmd_init_test.rs"]
mod cmd_init_test;

/// Create a new stagecraft.yaml file
#[derive(Debug, Args)]
pub struct CmdInit {
    /// Directory to create file in
    #[clap(default_value = ".")]
    path: PathBuf,

    /// Base image of stage-1
    #[clap(long, default_value = "ubuntu:24.04")]
    base: String,

    /// Project name, defaults to the directory name
    #[clap(long)]
    name: Option<String>,

    /// Template to use: minimal, standard
    #[clap(long, default_value = "standard")]
    template: String,
}

impl CmdInit {
    pub fn run(&mut self) -> Result<i32> {
        let config_path = self.path.join(stagecraft::CONFIG_FILENAME);

        if config_path.exists() {
            return Err(miette::miette!(
                "{} already exists at {:?}",
                stagecraft::CONFIG_FILENAME,
                config_path
            ));
        }

        let content = match self.template.as_str() {
            "minimal" => self.generate_minimal_template(),
            _ => self.generate_standard_template(),
        };

        std::fs::write(&config_path, content).map_err(|e| {
            miette::miette!("Failed to write {}: {}", stagecraft::CONFIG_FILENAME, e)
        })?;

        println!("Created {} at {:?}", stagecraft::CONFIG_FILENAME, config_path);
        println!();
        println!("Next steps:");
        println!("  1. Edit the file to describe your stages");
        println!("  2. Run 'stagecraft show' to preview the merged configuration");
        println!("  3. Run 'stagecraft configure' to generate the compose file");

        Ok(0)
    }

    fn project_section(&self) -> String {
        match &self.name {
            Some(name) => format!("project:\n  name: {}\n", yaml_scalar(name)),
            None => "# project:\n#   name: my-project\n".to_string(),
        }
    }

    fn generate_minimal_template(&self) -> String {
        format!(
            "api: stagecraft/v0\n\
            {}\
            \n\
            stage_1:\n  \
              image:\n    \
                base: {}\n",
            self.project_section(),
            yaml_scalar(&self.base),
        )
    }

    fn generate_standard_template(&self) -> String {
        format!(
            "# stagecraft two-stage image configuration\n\
            #\n\
            # ${{NAME}} and ${{NAME:-default}} are replaced from the environment\n\
            # when 'stagecraft configure' runs. {{{{NAME}}}} and {{{{NAME:-default}}}}\n\
            # are handed to compose and replaced when the compose file is used.\n\
            \n\
            api: stagecraft/v0\n\
            {}\
            \n\
            # Base image, holds the slow-changing toolchain\n\
            stage_1:\n  \
              image:\n    \
                base: {}\n  \
              # ssh:\n  \
              #   host_port: 2222\n  \
              #   users:\n  \
              #     me:\n  \
              #       password: \"{{{{SSH_PASSWORD}}}}\"\n  \
              #       pubkey_file: \"~\"\n  \
              # apt:\n  \
              #   repo_source: tuna\n  \
              # environment:\n  \
              #   - LANG=C.UTF-8\n  \
              # custom:\n  \
              #   on_build:\n  \
              #     - stage-1/custom/install.sh\n\
            \n\
            # Runtime image, built on top of stage_1\n\
            stage_2:\n  \
              # ports:\n  \
              #   - \"{{{{WEB_PORT:-8080}}}}:80\"\n  \
              # storage:\n  \
              #   data: {{type: auto-volume}}\n  \
              # mount:\n  \
              #   src: {{type: host, host_path: ./src, dst_path: /src}}\n  \
              # custom:\n  \
              #   on_entry:\n  \
              #     - stage-2/custom/entry.sh\n  \
              environment: []\n",
            self.project_section(),
            yaml_scalar(&self.base),
        )
    }
}

/// Quote a value so it stays a plain string in YAML.
fn yaml_scalar(value: &str) -> String {
    format!("{value:?}")
}
