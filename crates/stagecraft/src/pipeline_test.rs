// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use rstest::rstest;
use tempfile::TempDir;

use super::*;
use crate::emit::DriftState;
use crate::{COMPOSE_FILENAME, CONFIG_FILENAME, Error};

fn project(yaml: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join(CONFIG_FILENAME);
    std::fs::write(&path, yaml).unwrap();
    (tmp, path)
}

fn files_under(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                pending.push(path);
            } else {
                found.push(path.strip_prefix(root).unwrap().to_path_buf());
            }
        }
    }
    found.sort();
    found
}

#[rstest]
fn test_compile_is_idempotent() {
    let (tmp, path) = project(
        r#"
stage_1:
  image: {base: alpine}
  ssh:
    host_port: 2222
    users:
      me: {password: "123456"}
stage_2:
  ports: ["80:80"]
"#,
    );
    let ctx = ResolveContext::new(tmp.path());

    let first = compile_file(&path, &ctx).unwrap();
    first.write(tmp.path()).unwrap();
    let second = compile_file(&path, &ctx).unwrap();

    let contents = |a: &Artifacts| -> Vec<(PathBuf, String)> {
        a.iter().map(|x| (x.path.clone(), x.contents.clone())).collect()
    };
    assert_eq!(contents(&first), contents(&second));
    assert!(
        second
            .diff_against_disk(tmp.path())
            .unwrap()
            .iter()
            .all(|d| d.state == DriftState::Unchanged)
    );
}

#[rstest]
fn test_guardrail_failure_writes_nothing() {
    let (tmp, path) = project(
        r#"
stage_1:
  image: {base: alpine}
  custom:
    on_build: ["stage-1/custom/setup.sh {{MODE}}"]
"#,
    );
    let ctx = ResolveContext::new(tmp.path());
    let err = compile_file(&path, &ctx).unwrap_err();
    assert!(matches!(err, Error::ComposeMarkerNotAllowed { .. }), "{err:?}");
    assert_eq!(files_under(tmp.path()), vec![PathBuf::from(CONFIG_FILENAME)]);
}

#[rstest]
fn test_mixed_mode_markers() {
    let (tmp, path) = project(
        r#"
stage_1:
  image: {base: alpine}
  environment: ["MIXED=${A:-x}-{{B:-y}}"]
"#,
    );
    let ctx = ResolveContext::new(tmp.path());
    let spec = UserConfig::load(&path, &ctx)
        .and_then(|config| config.into_build_spec(tmp.path()))
        .unwrap();
    assert_eq!(spec.stage_1.environment.get("MIXED"), Some("x-{{B:-y}}"));

    let artifacts = compile(UserConfig::load(&path, &ctx).unwrap(), &ctx).unwrap();
    let compose = &artifacts.get(COMPOSE_FILENAME).unwrap().contents;
    assert!(compose.contains("MIXED=x-${B:-y}"), "{compose}");
}

#[rstest]
fn test_no_config_markers_survive() {
    let (tmp, path) = project(
        r#"
project: {name: "${PROJECT:-demo}"}
stage_1:
  image: {base: "ubuntu:${UBUNTU:-24.04}"}
  environment: ["HOME_DIR=${HOME_DIR}"]
"#,
    );
    let ctx = ResolveContext::new(tmp.path()).with_env([("HOME_DIR", "/home/me")]);
    let artifacts = compile_file(&path, &ctx).unwrap();
    for artifact in artifacts.iter() {
        assert!(
            !artifact.contents.contains("${"),
            "{} still holds a marker",
            artifact.path.display()
        );
    }
    let compose = &artifacts.get(COMPOSE_FILENAME).unwrap().contents;
    assert!(compose.contains("HOME_DIR=/home/me"));
    assert!(compose.contains("ubuntu:24.04"));
}

#[rstest]
fn test_prepare_skips_disabled_ssh() {
    let (tmp, path) = project(
        r#"
stage_1:
  image: {base: alpine}
  ssh:
    enable: false
    users:
      me: {pubkey_file: does/not/exist.pub}
"#,
    );
    let ctx = ResolveContext::new(tmp.path());
    let config = UserConfig::load(&path, &ctx).unwrap();
    let compiled = prepare(config, &ctx, &Ed25519Generator).unwrap();
    assert!(compiled.users.is_empty());
    assert!(compiled.merged.ports.is_empty());
}
