// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

use std::path::Path;

use rstest::rstest;

use super::*;
use crate::context::ResolveContext;
use crate::merge::merge_stages;
use crate::spec::UserConfig;

fn run(yaml: &str, mode: OutputMode) -> Result<()> {
    let ctx = ResolveContext::new("/projects/demo");
    let spec = UserConfig::from_yaml(yaml, &ctx)?.into_build_spec(Path::new("/projects/demo"))?;
    let merged = merge_stages(&spec);
    check(&spec, &merged, mode)
}

#[rstest]
fn test_compose_markers_allowed_in_compose_fields() {
    let yaml = r#"
stage_1:
  image: {base: "ubuntu:{{UBUNTU_TAG:-24.04}}"}
  ports: ["{{HOST_PORT:-8080}}:80"]
  environment: ["TOKEN={{TOKEN}}"]
"#;
    run(yaml, OutputMode::Compose).unwrap();
}

#[rstest]
#[case("on_build", "stage_1.custom.on_build[1]")]
#[case("on_first_run", "stage_1.custom.on_first_run[1]")]
#[case("on_every_run", "stage_1.custom.on_every_run[1]")]
#[case("on_user_login", "stage_1.custom.on_user_login[1]")]
fn test_hooks_reject_compose_markers(#[case] hook: &str, #[case] expected: &str) {
    let yaml = format!(
        "stage_1:\n  image: {{base: alpine}}\n  custom:\n    {hook}: [\"a.sh\", \"b.sh {{{{ARG}}}}\"]\n"
    );
    let err = run(&yaml, OutputMode::Compose).unwrap_err();
    match err {
        Error::ComposeMarkerNotAllowed { path, name, .. } => {
            assert_eq!(path, expected);
            assert_eq!(name, "ARG");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[rstest]
fn test_entry_point_rejects_compose_markers() {
    let yaml = r#"
stage_1:
  image: {base: alpine}
stage_2:
  custom:
    on_entry: ["run.sh --port {{PORT}}"]
"#;
    let err = run(yaml, OutputMode::Compose).unwrap_err();
    assert!(
        matches!(err, Error::ComposeMarkerNotAllowed { ref path, .. } if path == "stage_2.custom.on_entry[0]"),
        "{err:?}"
    );
}

#[rstest]
fn test_baked_environment_rejects_compose_markers() {
    let yaml = r#"
stage_1:
  image: {base: alpine}
  environment: ["TOKEN={{TOKEN}}"]
  bake_environment: true
"#;
    let err = run(yaml, OutputMode::Compose).unwrap_err();
    assert!(
        matches!(err, Error::ComposeMarkerNotAllowed { ref path, .. } if path == "stage_1.environment.TOKEN"),
        "{err:?}"
    );
}

#[rstest]
fn test_stage_2_bake_covers_inherited_environment() {
    let yaml = r#"
stage_1:
  image: {base: alpine}
  environment: ["TOKEN={{TOKEN}}"]
stage_2:
  bake_environment: true
"#;
    let err = run(yaml, OutputMode::Compose).unwrap_err();
    assert!(
        matches!(err, Error::ComposeMarkerNotAllowed { ref path, .. } if path == "stage_1.environment.TOKEN"),
        "{err:?}"
    );
}

#[rstest]
fn test_key_sources_reject_compose_markers() {
    let yaml = r#"
stage_1:
  image: {base: alpine}
  ssh:
    users:
      me: {pubkey_file: "{{KEY_DIR}}/id_ed25519.pub"}
"#;
    let err = run(yaml, OutputMode::Compose).unwrap_err();
    assert!(
        matches!(err, Error::ComposeMarkerNotAllowed { ref path, .. } if path == "stage_1.ssh.users.me.pubkey_file"),
        "{err:?}"
    );
}

#[rstest]
fn test_single_artifact_rejects_any_compose_marker() {
    let yaml = r#"
stage_1:
  image: {base: alpine}
  ports: ["{{HOST_PORT:-8080}}:80"]
"#;
    run(yaml, OutputMode::Compose).unwrap();
    let err = run(yaml, OutputMode::SingleArtifact).unwrap_err();
    match err {
        Error::ComposeMarkerInSingleArtifact { path, name } => {
            assert_eq!(path, "stage_1.ports[0]");
            assert_eq!(name, "HOST_PORT");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
