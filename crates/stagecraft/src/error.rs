// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Error types for stagecraft operations.
//!
//! Every variant is fatal to the current compile. Variants carry the
//! offending configuration path (dotted, e.g. `stage_2.custom.on_build[0]`)
//! so the message can point the user at the exact value to fix.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience Result type with stagecraft Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while compiling a configuration document.
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// No config document found in directory tree
    #[error("No stagecraft.yaml found in {0:?} or any parent directory")]
    #[diagnostic(
        code(stagecraft::not_found_in_tree),
        help("Create one with 'stagecraft init' or point at it with -f")
    )]
    NotFoundInTree(PathBuf),

    /// Invalid YAML in the config document
    #[error("Invalid configuration document: {error}")]
    #[diagnostic(
        code(stagecraft::invalid_yaml),
        help("Check YAML syntax and that every field has the expected type")
    )]
    InvalidYaml {
        #[source]
        error: serde_yaml::Error,
    },

    /// Failed to read file
    #[error("Failed to read file: {path:?}")]
    #[diagnostic(code(stagecraft::read_failed))]
    ReadFailed {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    /// Failed to write an artifact
    #[error("Failed to write artifact: {path:?}")]
    #[diagnostic(code(stagecraft::write_failed))]
    WriteFailed {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    /// Structural invariant violated
    #[error("Invalid configuration at {path}: {message}")]
    #[diagnostic(code(stagecraft::schema), help("{help}"))]
    Schema {
        path: String,
        message: String,
        help: String,
    },

    /// Variable marker that cannot be parsed
    #[error("Malformed variable marker at {path}: {reason}")]
    #[diagnostic(
        code(stagecraft::malformed_marker),
        help(
            "Markers look like ${{NAME}}, ${{NAME:-default}}, {{{{NAME}}}} or {{{{NAME:-default}}}}, \
             where NAME matches [A-Za-z_][A-Za-z0-9_]*"
        )
    )]
    MalformedMarker { path: String, reason: String },

    /// Config-time variable left over after substitution
    #[error("Unresolved variable ${{{name}}} at {path}")]
    #[diagnostic(
        code(stagecraft::unresolved_variable),
        help(
            "Set the environment variable {name} before configuring, give it a default with \
             ${{{name}:-value}}, or use compose-time passthrough syntax {{{{{name}}}}} to let \
             the compose runtime resolve it"
        )
    )]
    UnresolvedVariable { path: String, name: String },

    /// Compose-time marker in a value that never reaches compose
    #[error("Compose-time marker {{{{{name}}}}} is not allowed at {path}: {context}")]
    #[diagnostic(
        code(stagecraft::compose_marker_not_allowed),
        help(
            "This value is baked into a generated file and is never interpolated by compose. \
             Use config-time syntax ${{{name}}} instead, or read the variable at runtime"
        )
    )]
    ComposeMarkerNotAllowed {
        path: String,
        name: String,
        context: String,
    },

    /// Compose-time marker while emitting a single build artifact
    #[error("Compose-time marker {{{{{name}}}}} at {path} cannot be used in single-artifact mode")]
    #[diagnostic(
        code(stagecraft::compose_marker_single_artifact),
        help(
            "The single-artifact output bypasses compose interpolation. Replace the marker with \
             ${{{name}}} or configure without --single-artifact"
        )
    )]
    ComposeMarkerInSingleArtifact { path: String, name: String },

    /// Referenced credential file does not exist
    #[error("Key file for user '{user}' not found: {path:?}")]
    #[diagnostic(
        code(stagecraft::key_file_not_found),
        help("Check the path in {field}; '~' searches the ssh directory for id_rsa, id_dsa, id_ecdsa and id_ed25519")
    )]
    KeyFileNotFound {
        user: String,
        field: String,
        path: PathBuf,
    },

    /// Private key could not be read to derive its public key
    #[error("Private key for user '{user}' could not be parsed: {reason}")]
    #[diagnostic(
        code(stagecraft::invalid_private_key),
        help("Supply an OpenSSH-format key; convert older keys with 'ssh-keygen -p -f <key>'")
    )]
    InvalidPrivateKey { user: String, reason: String },

    /// Key pair generation failed
    #[error("Failed to generate a key pair for user '{user}': {reason}")]
    #[diagnostic(code(stagecraft::key_generation))]
    KeyGeneration { user: String, reason: String },

    /// Storage declaration lacks a required field
    #[error("Storage declaration {path} is missing '{field}'")]
    #[diagnostic(
        code(stagecraft::missing_field),
        help("A {kind} declaration requires '{field}' to be set")
    )]
    MissingField {
        path: String,
        field: &'static str,
        kind: &'static str,
    },

    /// Host path resolves outside the project directory
    #[error("Host path {host_path:?} at {path} escapes the project directory {boundary:?}")]
    #[diagnostic(
        code(stagecraft::host_path_escapes),
        help("Use a path inside the project directory or configure without --strict-host-paths")
    )]
    HostPathEscapes {
        path: String,
        host_path: PathBuf,
        boundary: PathBuf,
    },

    /// Image storage used for a generic mount
    #[error("Storage type 'image' is not allowed at {path}")]
    #[diagnostic(
        code(stagecraft::image_mount_not_allowed),
        help("'image' storage is only valid for the stage storage categories app, data and workspace")
    )]
    ImageMountNotAllowed { path: String },

    /// Structural template reference does not point anywhere
    #[error("Unknown template reference '{reference}' at {path}")]
    #[diagnostic(code(stagecraft::template_reference))]
    TemplateReference { path: String, reference: String },

    /// Structural template references form a cycle
    #[error("Circular template reference: {0}")]
    #[diagnostic(code(stagecraft::template_cycle))]
    TemplateCycle(String),

    /// Resolved tree could not be serialized
    #[error("Failed to serialize {artifact}")]
    #[diagnostic(code(stagecraft::serialize_failed))]
    SerializeFailed {
        artifact: String,
        #[source]
        error: serde_yaml::Error,
    },

    /// IO error passthrough
    #[error(transparent)]
    #[diagnostic(code(stagecraft::io_error))]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a schema error with a corrective suggestion.
    pub(crate) fn schema(
        path: impl Into<String>,
        message: impl Into<String>,
        help: impl Into<String>,
    ) -> Self {
        Self::Schema {
            path: path.into(),
            message: message.into(),
            help: help.into(),
        }
    }
}
