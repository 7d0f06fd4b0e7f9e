// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

use rstest::rstest;

use super::*;
use crate::context::ResolveContext;
use crate::credentials::{GeneratedPair, KeyGenerator};
use crate::pipeline::prepare;
use crate::spec::UserConfig;

struct NoKeys;

impl KeyGenerator for NoKeys {
    fn generate(&self, _comment: &str) -> std::result::Result<GeneratedPair, String> {
        Err("key generation is not expected here".to_string())
    }
}

fn render_yaml(yaml: &str) -> Result<ResolvedTree> {
    let ctx = ResolveContext::new("/projects/demo");
    let config = UserConfig::from_yaml(yaml, &ctx)?;
    let compiled = prepare(config, &ctx, &NoKeys)?;
    render(&compiled)
}

fn yaml(text: &str) -> Value {
    serde_yaml::from_str(text).unwrap()
}

#[rstest]
fn test_whole_string_reference_keeps_type() {
    let tree = render_template(
        "x-cfg: {ports: null}\nports: ${x-cfg.ports}\n",
        yaml("ports: ['80:80', '443:443']"),
    )
    .unwrap();
    assert_eq!(tree.as_value(), &yaml("ports: ['80:80', '443:443']"));
}

#[rstest]
fn test_embedded_reference_interpolates() {
    let tree = render_template(
        "x-cfg: {name: demo, port: 80}\nimage: \"${x-cfg.name}:${x-cfg.port}\"\n",
        Value::Null,
    )
    .unwrap();
    assert_eq!(tree.get("image"), Some(&Value::String("demo:80".to_string())));
}

#[rstest]
fn test_context_overrides_template_defaults() {
    let tree = render_template(
        "x-cfg: {a: {b: 1, c: 2}}\nout: ${x-cfg.a}\n",
        yaml("a: {c: 3, d: 4}"),
    )
    .unwrap();
    assert_eq!(tree.get("out"), Some(&yaml("{b: 1, c: 3, d: 4}")));
    assert!(tree.get("x-cfg").is_none());
}

#[rstest]
fn test_reference_chains_resolve() {
    let tree = render_template(
        "x-cfg: {a: '${x-cfg.b}', b: '${x-cfg.c}', c: end}\nout: ${x-cfg.a}\n",
        Value::Null,
    )
    .unwrap();
    assert_eq!(tree.get("out"), Some(&Value::String("end".to_string())));
}

#[rstest]
fn test_cycle_is_an_error() {
    let err = render_template(
        "x-cfg: {a: '${x-cfg.b}', b: '${x-cfg.a}'}\nout: ${x-cfg.a}\n",
        Value::Null,
    )
    .unwrap_err();
    match err {
        Error::TemplateCycle(chain) => {
            assert_eq!(chain, "x-cfg.a -> x-cfg.b -> x-cfg.a")
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[rstest]
fn test_unknown_reference_is_an_error() {
    let err = render_template("x-cfg: {}\nservices:\n  a: ${x-cfg.nope}\n", Value::Null)
        .unwrap_err();
    assert!(
        matches!(err, Error::TemplateReference { ref path, ref reference }
            if path == "services.a" && reference == "x-cfg.nope"),
        "{err:?}"
    );
}

#[rstest]
fn test_nulls_are_dropped() {
    let tree = render_template(
        "x-cfg: {gone: null}\nservice:\n  keep: 1\n  drop: ${x-cfg.gone}\n  list: [a, '${x-cfg.gone}']\n",
        Value::Null,
    )
    .unwrap();
    assert_eq!(tree.as_value(), &yaml("service: {keep: 1, list: [a]}"));
}

#[rstest]
fn test_compose_markers_rewritten_after_resolve() {
    let tree = render_template(
        "x-cfg: {env: null}\nenvironment: ${x-cfg.env}\n",
        yaml("env: ['A=x-{{B:-y}}']"),
    )
    .unwrap();
    assert_eq!(tree.get("environment"), Some(&yaml("['A=x-${B:-y}']")));
}

#[rstest]
fn test_render_minimal_document() {
    let tree = render_yaml("stage_1:\n  image: {base: \"ubuntu:24.04\"}\n").unwrap();
    let text = |path: &str| tree.get(path).and_then(Value::as_str).map(str::to_string);

    assert_eq!(text("name").as_deref(), Some("demo"));
    assert_eq!(text("services.stage-1.image").as_deref(), Some("demo:stage-1"));
    assert_eq!(
        text("services.stage-1.build.args.BASE_IMAGE").as_deref(),
        Some("ubuntu:24.04")
    );
    // stage-2 is built from stage-1's output unless told otherwise
    assert_eq!(
        text("services.stage-2.build.args.BASE_IMAGE").as_deref(),
        Some("demo:stage-1")
    );
    assert!(tree.get("services.stage-2.ports").is_none());
    assert!(tree.get("services.stage-2.deploy").is_none());
    assert!(tree.get("volumes").is_none());
}

#[rstest]
fn test_render_full_document() {
    let tree = render_yaml(
        r#"
project: {name: demo}
stage_1:
  image: {base: "ubuntu:24.04", output: "demo-base:dev"}
  ports: ["80:80"]
  device: {type: gpu}
stage_2:
  image: {base: "custom-base:1"}
  ports: ["{{WEB_PORT:-443}}:443"]
  environment: ["TOKEN={{TOKEN}}"]
  storage:
    data: {type: auto-volume}
    app: {type: image}
  mount:
    cache: {type: manual-volume, volume_name: shared-cache, dst_path: /cache}
"#,
    )
    .unwrap();

    assert_eq!(
        tree.get("services.stage-2.build.args.BASE_IMAGE"),
        Some(&Value::String("custom-base:1".to_string()))
    );
    assert_eq!(
        tree.get("services.stage-2.ports"),
        Some(&yaml("['80:80', '${WEB_PORT:-443}:443']"))
    );
    assert_eq!(
        tree.get("services.stage-2.environment"),
        Some(&yaml("['TOKEN=${TOKEN}']"))
    );
    assert_eq!(
        tree.get("services.stage-2.volumes"),
        Some(&yaml(
            "['demo-stage-2-storage-data:/hard/volume/data', 'shared-cache:/cache']"
        ))
    );
    assert_eq!(
        tree.get("services.stage-2.build.args.IMAGE_STORAGE_DIRS"),
        Some(&Value::String("/hard/image/app".to_string()))
    );
    assert_eq!(
        tree.get("volumes"),
        Some(&yaml("{demo-stage-2-storage-data: {}, shared-cache: {external: true}}"))
    );
    assert_eq!(
        tree.get("services.stage-2.deploy.resources.reservations.devices.0.driver"),
        Some(&Value::String("nvidia".to_string()))
    );
    assert!(tree.get("x-cfg").is_none());
}

#[rstest]
fn test_ssh_build_args() {
    let tree = render_yaml(
        r#"
stage_1:
  image: {base: alpine}
  ssh:
    host_port: 2222
    users:
      me:
        password: "{{SSH_PASSWORD}}"
        pubkey_text: "ssh-ed25519 AAAAexample me@host"
        uid: 1100
"#,
    )
    .unwrap();
    let arg = |name: &str| {
        tree.get(&format!("services.stage-1.build.args.{name}"))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    assert_eq!(arg("SSH_PORT").as_deref(), Some("22"));
    assert_eq!(arg("SSH_USER_COUNT").as_deref(), Some("1"));
    assert_eq!(arg("SSH_USER_0_NAME").as_deref(), Some("me"));
    assert_eq!(arg("SSH_USER_0_PASSWORD").as_deref(), Some("${SSH_PASSWORD}"));
    assert_eq!(arg("SSH_USER_0_UID").as_deref(), Some("1100"));
    assert_eq!(
        arg("SSH_USER_0_PUBKEY_FILES").as_deref(),
        Some("/stagecraft/stage-1/generated/ssh/me/pubkey.pub")
    );
    assert!(tree.get("services.stage-2.build.args.SSH_PORT").is_none());
    assert_eq!(
        tree.get("services.stage-2.ports"),
        Some(&yaml("['2222:22']"))
    );
}

#[rstest]
fn test_rendered_tree_is_plain() {
    let tree = render_yaml(
        "stage_1:\n  image: {base: alpine}\n  environment: [\"A={{B:-c}}\"]\n",
    )
    .unwrap();
    let text = tree.to_yaml().unwrap();
    assert!(text.contains("A=${B:-c}"), "{text}");
    assert!(!text.contains("{{"));
    assert!(!text.contains("x-cfg"));
}

#[rstest]
fn test_compose_marker_volume_name_stays_consistent() {
    let tree = render_yaml(
        r#"
stage_1:
  image: {base: alpine}
stage_2:
  mount:
    cache: {type: manual-volume, volume_name: "{{CACHE_VOL}}", dst_path: /cache}
"#,
    )
    .unwrap();
    assert_eq!(
        tree.get("services.stage-2.volumes"),
        Some(&yaml("['demo-stage-2-mount-cache:/cache']"))
    );
    assert_eq!(
        tree.get("volumes"),
        Some(&yaml(
            "{demo-stage-2-mount-cache: {external: true, name: '${CACHE_VOL}'}}"
        ))
    );
    assert!(!tree.to_yaml().unwrap().contains("{{"));
}

#[rstest]
fn test_template_key_order_is_kept() {
    let tree = render_yaml(
        "stage_1:\n  image: {base: alpine}\n  storage:\n    data: {type: auto-volume}\n",
    )
    .unwrap();
    let Value::Mapping(root) = tree.as_value() else {
        panic!("rendered tree is not a mapping");
    };
    let keys: Vec<&str> = root.keys().filter_map(Value::as_str).collect();
    assert_eq!(keys, ["name", "services", "volumes"]);
}
