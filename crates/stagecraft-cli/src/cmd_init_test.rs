// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

use rstest::rstest;
use stagecraft::{ResolveContext, UserConfig};
use tempfile::TempDir;

use super::*;

fn cmd(path: PathBuf, template: &str, name: Option<&str>) -> CmdInit {
    CmdInit {
        path,
        base: "debian:12".to_string(),
        name: name.map(str::to_string),
        template: template.to_string(),
    }
}

#[rstest]
#[case("minimal", None)]
#[case("standard", None)]
#[case("standard", Some("My App"))]
fn test_templates_compile(#[case] template: &str, #[case] name: Option<&str>) {
    let tmp = TempDir::new().unwrap();
    let mut init = cmd(tmp.path().to_path_buf(), template, name);
    assert_eq!(init.run().unwrap(), 0);

    let config_path = tmp.path().join(stagecraft::CONFIG_FILENAME);
    let ctx = ResolveContext::new(tmp.path());
    let spec = UserConfig::load(&config_path, &ctx)
        .and_then(|config| config.into_build_spec(tmp.path()))
        .unwrap();
    assert_eq!(spec.stage_1.image.base.as_deref(), Some("debian:12"));
    if name.is_some() {
        assert_eq!(spec.project.name, "my-app");
    }
    stagecraft::compile_file(&config_path, &ctx).unwrap();
}

#[rstest]
fn test_existing_file_is_kept() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join(stagecraft::CONFIG_FILENAME);
    std::fs::write(&config_path, "keep me").unwrap();

    let mut init = cmd(tmp.path().to_path_buf(), "standard", None);
    assert!(init.run().is_err());
    assert_eq!(std::fs::read_to_string(&config_path).unwrap(), "keep me");
}
