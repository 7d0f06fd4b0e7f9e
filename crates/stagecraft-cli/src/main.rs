// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! stagecraft - Two-Stage Image Configuration Compiler CLI

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::Result;
use stagecraft::{OutputMode, ResolveContext};

mod cmd_check;
mod cmd_configure;
mod cmd_init;
mod cmd_show;

use cmd_check::CmdCheck;
use cmd_configure::CmdConfigure;
use cmd_init::CmdInit;
use cmd_show::CmdShow;

#[derive(Parser)]
#[clap(
    name = "stagecraft",
    about = "Two-Stage Image Configuration Compiler",
    version,
    long_about = "Compile a stagecraft.yaml document into a compose file and the helper files its images are built from"
)]
struct Opt {
    #[clap(flatten)]
    logging: Logging,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Parser)]
struct Logging {
    /// Increase verbosity (-v, -vv, -vvv)
    #[clap(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[clap(short, long, global = true)]
    quiet: bool,
}

#[derive(Parser, Clone, Debug, Default)]
pub struct ProjectFlags {
    /// Configuration file, or a directory to search upwards from
    #[clap(short = 'f', long, env = "STAGECRAFT_PROJECT_DIR", default_value = ".")]
    pub file: PathBuf,

    /// Reject host mounts outside of the project directory
    #[clap(long, env = "STAGECRAFT_STRICT_HOST_PATHS")]
    pub strict_host_paths: bool,
}

impl ProjectFlags {
    /// Locate the configuration document and build the context it is
    /// compiled in.
    pub fn resolve(&self, mode: OutputMode) -> Result<(PathBuf, ResolveContext)> {
        let config_path = stagecraft::locate_config(&self.file)?;
        let project_dir = stagecraft::discovery::project_dir_of(&config_path);
        tracing::debug!(config = %config_path.display(), "using configuration");
        let ctx = ResolveContext::from_process_env(project_dir)
            .with_mode(mode)
            .with_strict_host_paths(self.strict_host_paths);
        Ok((config_path, ctx))
    }
}

#[derive(Subcommand)]
enum Command {
    /// Compile the configuration and write every generated file
    Configure(CmdConfigure),

    /// Display the merged stage configuration
    Show(CmdShow),

    /// Verify generated files are up to date
    Check(CmdCheck),

    /// Create a new stagecraft.yaml file
    Init(CmdInit),
}

impl Opt {
    fn run(self) -> Result<i32> {
        let log_level = match (self.logging.quiet, self.logging.verbose) {
            (true, _) => tracing::Level::ERROR,
            (false, 0) => tracing::Level::WARN,
            (false, 1) => tracing::Level::INFO,
            (false, 2) => tracing::Level::DEBUG,
            (false, _) => tracing::Level::TRACE,
        };

        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .init();

        match self.cmd {
            Command::Configure(mut cmd) => cmd.run(),
            Command::Show(mut cmd) => cmd.run(),
            Command::Check(mut cmd) => cmd.run(),
            Command::Init(mut cmd) => cmd.run(),
        }
    }
}

fn main() -> Result<()> {
    let opt = Opt::parse();
    let code = opt.run()?;
    std::process::exit(code);
}
