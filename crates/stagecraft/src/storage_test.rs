// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

use std::path::Path;

use indexmap::IndexMap;
use rstest::rstest;
use tempfile::TempDir;

use super::*;

fn option(yaml: &str) -> StorageOption {
    serde_yaml::from_str(yaml).unwrap()
}

fn project() -> ProjectIdentity {
    ProjectIdentity {
        name: "demo".to_string(),
    }
}

fn stage_with(
    storage: &[(&str, &str)],
    mount: &[(&str, &str)],
) -> StageConfig {
    let to_map = |entries: &[(&str, &str)]| -> IndexMap<String, StorageOption> {
        entries
            .iter()
            .map(|(k, yaml)| (k.to_string(), option(yaml)))
            .collect()
    };
    StageConfig {
        storage: to_map(storage),
        mount: to_map(mount),
        ..StageConfig::default()
    }
}

#[rstest]
fn test_auto_volume_names_are_deterministic() {
    let a = auto_volume_name(&project(), StageId::Two, MountScope::Storage, "data");
    let b = auto_volume_name(&project(), StageId::Two, MountScope::Storage, "data");
    assert_eq!(a, b);
    assert_eq!(a, "demo-stage-2-storage-data");
}

#[rstest]
fn test_auto_volume_names_do_not_collide() {
    let names = [
        auto_volume_name(&project(), StageId::Two, MountScope::Storage, "data"),
        auto_volume_name(&project(), StageId::Two, MountScope::Mount, "data"),
        auto_volume_name(&project(), StageId::One, MountScope::Mount, "data"),
        auto_volume_name(&project(), StageId::Two, MountScope::Mount, "my-cache"),
        auto_volume_name(&project(), StageId::Two, MountScope::Mount, "my.cache"),
        auto_volume_name(&project(), StageId::Two, MountScope::Mount, "My Cache"),
    ];
    let unique: std::collections::HashSet<_> = names.iter().collect();
    assert_eq!(unique.len(), names.len(), "{names:?}");
}

#[rstest]
fn test_resolve_each_kind() {
    let tmp = TempDir::new().unwrap();
    std::fs::create_dir(tmp.path().join("shared")).unwrap();
    let ctx = ResolveContext::new(tmp.path());
    let stage = stage_with(
        &[
            ("app", "type: image"),
            ("data", "type: auto-volume"),
            ("workspace", "type: host\nhost_path: shared"),
        ],
        &[(
            "cache",
            "type: manual-volume\nvolume_name: team-cache\ndst_path: /cache",
        )],
    );

    let mounts = resolve_mounts(&stage, StageId::Two, &project(), &ctx).unwrap();
    assert_eq!(mounts.len(), 4);

    assert_eq!(mounts[0].target, MountTarget::InImage);
    assert_eq!(mounts[0].dst, "/hard/image/app");
    assert_eq!(mounts[0].compose_entry(), None);

    assert_eq!(
        mounts[1].compose_entry().as_deref(),
        Some("demo-stage-2-storage-data:/hard/volume/data")
    );

    let expected_host = dunce::canonicalize(tmp.path().join("shared")).unwrap();
    assert_eq!(
        mounts[2].target,
        MountTarget::Bind {
            host_path: expected_host.to_string_lossy().into_owned()
        }
    );

    assert_eq!(
        mounts[3].target,
        MountTarget::Volume {
            key: "team-cache".to_string(),
            name: "team-cache".to_string(),
            external: true
        }
    );
    assert_eq!(mounts[3].dst, "/cache");
}

#[rstest]
#[case("type: manual-volume\ndst_path: /x", "volume_name")]
#[case("type: host\ndst_path: /x", "host_path")]
#[case("type: auto-volume", "dst_path")]
fn test_missing_required_field(#[case] yaml: &str, #[case] expected: &str) {
    let ctx = ResolveContext::new("/project");
    let stage = stage_with(&[], &[("thing", yaml)]);
    let err = resolve_mounts(&stage, StageId::One, &project(), &ctx).unwrap_err();
    match err {
        Error::MissingField { path, field, .. } => {
            assert_eq!(path, "stage_1.mount.thing");
            assert_eq!(field, expected);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[rstest]
fn test_image_only_for_storage_categories() {
    let ctx = ResolveContext::new("/project");
    let stage = stage_with(&[], &[("models", "type: image\ndst_path: /models")]);
    let err = resolve_mounts(&stage, StageId::Two, &project(), &ctx).unwrap_err();
    assert!(matches!(err, Error::ImageMountNotAllowed { ref path } if path == "stage_2.mount.models"));
}

#[rstest]
fn test_host_path_boundary() {
    let tmp = TempDir::new().unwrap();
    let project_dir = tmp.path().join("project");
    std::fs::create_dir(&project_dir).unwrap();
    let stage = stage_with(&[("data", "type: host\nhost_path: ../outside")], &[]);

    let lenient = ResolveContext::new(&project_dir);
    assert!(resolve_mounts(&stage, StageId::Two, &project(), &lenient).is_ok());

    let strict = ResolveContext::new(&project_dir).with_strict_host_paths(true);
    let err = resolve_mounts(&stage, StageId::Two, &project(), &strict).unwrap_err();
    assert!(matches!(err, Error::HostPathEscapes { .. }), "{err:?}");

    let inside = stage_with(&[("data", "type: host\nhost_path: ./sub/../data")], &[]);
    let mounts = resolve_mounts(&inside, StageId::Two, &project(), &strict).unwrap();
    assert_eq!(
        mounts[0].compose_entry().unwrap(),
        format!(
            "{}:/hard/volume/data",
            dunce::canonicalize(&project_dir).unwrap().join("data").display()
        )
    );
}

#[rstest]
fn test_compose_marker_host_path_passes_through() {
    let stage = stage_with(&[("data", "type: host\nhost_path: \"{{DATA_DIR}}\"")], &[]);
    let ctx = ResolveContext::new("/project");
    let mounts = resolve_mounts(&stage, StageId::Two, &project(), &ctx).unwrap();
    assert_eq!(
        mounts[0].compose_entry().as_deref(),
        Some("{{DATA_DIR}}:/hard/volume/data")
    );

    let strict = ctx.with_strict_host_paths(true);
    assert!(resolve_mounts(&stage, StageId::Two, &project(), &strict).is_err());
}

#[rstest]
fn test_manual_volume_with_compose_marker_gets_stable_key() {
    let stage = stage_with(
        &[],
        &[(
            "cache",
            "type: manual-volume\nvolume_name: \"{{CACHE_VOL}}\"\ndst_path: /cache",
        )],
    );
    let ctx = ResolveContext::new("/project");
    let mounts = resolve_mounts(&stage, StageId::Two, &project(), &ctx).unwrap();
    assert_eq!(
        mounts[0].target,
        MountTarget::Volume {
            key: "demo-stage-2-mount-cache".to_string(),
            name: "{{CACHE_VOL}}".to_string(),
            external: true
        }
    );
    assert_eq!(
        mounts[0].compose_entry().as_deref(),
        Some("demo-stage-2-mount-cache:/cache")
    );
}

#[rstest]
#[case("/a/b/../c", "/a/c")]
#[case("/a/./b", "/a/b")]
#[case("/..", "/")]
#[case("../../x", "../../x")]
fn test_normalize_lexically(#[case] input: &str, #[case] expected: &str) {
    assert_eq!(normalize_lexically(Path::new(input)), Path::new(expected));
}
