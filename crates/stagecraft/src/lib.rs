// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! stagecraft - Two-Stage Image Configuration Compiler
//!
//! This crate compiles a human-edited, two-stage configuration document
//! (`stagecraft.yaml`) into a compose file and the helper files the image
//! builds consume: lifecycle script wrappers, entry point files and SSH key
//! material.
//!
//! # Overview
//!
//! Stage-1 describes a base image and stage-2 a runtime image derived from
//! it. The compiler resolves config-time variables (`${NAME}`) from the
//! environment while configuring, passes compose-time variables
//! (`{{NAME}}`) through to compose as `${NAME}`, merges the stages, resolves
//! credentials and storage, and renders everything into files that are
//! only written once the whole pipeline succeeded.
//!
//! # Example
//!
//! ```yaml
//! # stagecraft.yaml
//! api: stagecraft/v0
//! project:
//!   name: demo
//!
//! stage_1:
//!   image:
//!     base: "ubuntu:${UBUNTU_VERSION:-24.04}"
//!   ssh:
//!     host_port: 2222
//!     users:
//!       me:
//!         password: "{{SSH_PASSWORD}}"
//!         pubkey_file: "~"
//!
//! stage_2:
//!   ports: ["{{WEB_PORT:-8080}}:80"]
//!   storage:
//!     data: {type: auto-volume}
//!   custom:
//!     on_entry: ["stage-2/custom/serve.sh --port 80"]
//! ```

pub mod context;
pub mod credentials;
pub mod discovery;
pub mod emit;
pub mod environment;
pub mod error;
pub mod guardrail;
pub mod merge;
pub mod pipeline;
pub mod spec;
pub mod ssh;
pub mod storage;
pub mod template;
pub mod vars;

pub use context::{OutputMode, ResolveContext};
pub use discovery::locate_config;
pub use emit::{Artifact, ArtifactDrift, Artifacts, DriftState, FileMode};
pub use environment::{EnvList, generate_profile_script};
pub use error::{Error, Result};
pub use merge::{MergedStage, merge_stages};
pub use pipeline::{Compilation, compile, compile_file, compile_with, prepare};
pub use spec::{ApiVersion, BuildSpec, StageConfig, StageId, UserConfig};

/// Well-known filename for the configuration document.
pub const CONFIG_FILENAME: &str = "stagecraft.yaml";

/// Filename of the compose file written to the project directory.
pub const COMPOSE_FILENAME: &str = "docker-compose.yml";

/// Filename of the script written in single-artifact mode.
pub const MERGED_BUILD_SCRIPT: &str = "build-merged.sh";

/// Directory, below each stage directory, holding generated files.
pub const GENERATED_DIR: &str = "generated";

/// Where the project directory is visible inside the images.
pub const CONTAINER_ROOT: &str = "/stagecraft";
