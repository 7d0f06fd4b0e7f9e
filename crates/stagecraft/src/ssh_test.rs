// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

use rstest::rstest;

use super::*;

fn parse_users(yaml: &str) -> Result<SshSettings> {
    let config: SshConfig = serde_yaml::from_str(yaml).unwrap();
    config.into_settings("stage_1.ssh")
}

#[rstest]
fn test_defaults_and_string_ports() {
    let settings = parse_users(
        r#"
host_port: "2222"
users:
  me:
    password: "123456"
    uid: "1100"
"#,
    )
    .unwrap();
    assert!(settings.enable);
    assert_eq!(settings.port, DEFAULT_SSH_PORT);
    assert_eq!(settings.host_port, Some(2222));
    assert_eq!(settings.users[0].uid, Some(1100));
    assert_eq!(settings.port_mapping().as_deref(), Some("2222:22"));
}

#[rstest]
fn test_mapping_without_host_port_is_container_only() {
    let settings = parse_users("users:\n  me:\n    password: x\n").unwrap();
    assert_eq!(settings.port_mapping().as_deref(), Some("22"));
}

#[rstest]
fn test_disabled_ssh_publishes_nothing() {
    let settings = parse_users("enable: false\nhost_port: 2222\n").unwrap();
    assert_eq!(settings.port_mapping(), None);
}

#[rstest]
#[case("pubkey_file: ~/.ssh/id_rsa.pub\n    pubkey_text: ssh-ed25519 AAAA", "pubkey_file and pubkey_text")]
#[case("privkey_file: /k\n    privkey_text: xyz", "privkey_file and privkey_text")]
fn test_mutually_exclusive_sources(#[case] fields: &str, #[case] expected: &str) {
    let yaml = format!("users:\n  alice:\n    {fields}\n");
    let err = parse_users(&yaml).unwrap_err();
    match err {
        Error::Schema { path, message, .. } => {
            assert_eq!(path, "stage_1.ssh.users.alice");
            assert!(message.contains(expected), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[rstest]
fn test_user_without_any_method_is_rejected() {
    let err = parse_users("users:\n  bob:\n    uid: 1000\n").unwrap_err();
    assert!(matches!(err, Error::Schema { ref message, .. } if message.contains("'bob'")));
}

#[rstest]
fn test_key_sources_are_independent() {
    let settings = parse_users(
        r#"
users:
  carol:
    pubkey_text: "ssh-ed25519 AAAA carol@laptop"
    privkey_file: "~"
"#,
    )
    .unwrap();
    let user = &settings.users[0];
    assert_eq!(
        user.pubkey,
        KeySource::Text("ssh-ed25519 AAAA carol@laptop".to_string())
    );
    assert_eq!(user.privkey, KeySource::File(KEY_DISCOVERY_TOKEN.to_string()));
    assert!(user.password.is_none());
}

#[rstest]
fn test_enabled_without_users_is_rejected() {
    let err = parse_users("port: 22\n").unwrap_err();
    assert!(matches!(err, Error::Schema { ref path, .. } if path == "stage_1.ssh.users"));
}

#[rstest]
#[case("../root")]
#[case("a/b")]
#[case("-x")]
fn test_user_names_are_path_safe(#[case] name: &str) {
    let yaml = format!("users:\n  {name:?}:\n    password: x\n");
    assert!(parse_users(&yaml).is_err());
}
