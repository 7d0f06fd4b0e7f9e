// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! SSH server and user declarations.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::spec::numeric;
use crate::{Error, Result};

#[cfg(test)]
#[path = "./ssh_test.rs"]
mod ssh_test;

/// Port sshd listens on inside the container unless configured.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Token that asks for the conventional key files of the invoking user.
pub const KEY_DISCOVERY_TOKEN: &str = "~";

static USER_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_.-]*$").expect("static regex is valid")
});

/// `ssh:` section as written in the document.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SshConfig {
    #[serde(default = "default_enable")]
    pub enable: bool,

    /// Port inside the container.
    #[serde(default = "default_port", deserialize_with = "numeric::number")]
    pub port: u16,

    /// Port published on the host, if any.
    #[serde(
        default,
        deserialize_with = "numeric::opt_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub host_port: Option<u16>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub users: IndexMap<String, SshUserSpec>,
}

fn default_enable() -> bool {
    true
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

/// One entry of `ssh.users` as written in the document.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SshUserSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubkey_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubkey_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privkey_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privkey_text: Option<String>,
    #[serde(
        default,
        deserialize_with = "numeric::opt_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub uid: Option<u32>,
    #[serde(
        default,
        deserialize_with = "numeric::opt_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub gid: Option<u32>,
}

/// Where a key comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    /// Path on the host, or the discovery token `~`.
    File(String),
    /// Key material inline in the document.
    Text(String),
    #[default]
    Absent,
}

impl KeySource {
    fn from_pair(file: Option<String>, text: Option<String>) -> std::result::Result<Self, ()> {
        match (file, text) {
            (Some(_), Some(_)) => Err(()),
            (Some(file), None) => Ok(Self::File(file)),
            (None, Some(text)) => Ok(Self::Text(text)),
            (None, None) => Ok(Self::Absent),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

/// A validated SSH user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SshUser {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub pubkey: KeySource,
    pub privkey: KeySource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
}

impl SshUser {
    /// True when the user can authenticate in at least one way.
    pub fn has_login_method(&self) -> bool {
        self.password.is_some() || !self.pubkey.is_absent() || !self.privkey.is_absent()
    }
}

impl SshUserSpec {
    /// Validate the file/text pairs and build the typed user.
    pub fn into_user(self, name: &str, path: &str) -> Result<SshUser> {
        if !USER_NAME_RE.is_match(name) {
            return Err(Error::schema(
                path,
                format!("'{name}' is not a valid user name"),
                "User names start with a letter or underscore and contain only letters, digits, '_', '.' and '-'",
            ));
        }
        let pubkey = KeySource::from_pair(self.pubkey_file, self.pubkey_text).map_err(|_| {
            Error::schema(
                path,
                format!("user '{name}' sets both pubkey_file and pubkey_text"),
                "Keep only one of pubkey_file and pubkey_text",
            )
        })?;
        let privkey = KeySource::from_pair(self.privkey_file, self.privkey_text).map_err(|_| {
            Error::schema(
                path,
                format!("user '{name}' sets both privkey_file and privkey_text"),
                "Keep only one of privkey_file and privkey_text",
            )
        })?;
        let user = SshUser {
            name: name.to_string(),
            password: self.password,
            pubkey,
            privkey,
            uid: self.uid,
            gid: self.gid,
        };
        if !user.has_login_method() {
            return Err(missing_login_method(name, path));
        }
        Ok(user)
    }
}

pub(crate) fn missing_login_method(name: &str, path: &str) -> Error {
    Error::schema(
        path,
        format!("user '{name}' has no password, public key or private key"),
        "Set a password, or one of pubkey_file, pubkey_text, privkey_file, privkey_text",
    )
}

/// Validated `ssh:` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SshSettings {
    pub enable: bool,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,
    pub users: Vec<SshUser>,
}

impl SshConfig {
    pub fn into_settings(self, path: &str) -> Result<SshSettings> {
        let users = self
            .users
            .into_iter()
            .map(|(name, spec)| spec.into_user(&name, &format!("{path}.users.{name}")))
            .collect::<Result<Vec<_>>>()?;
        if self.enable && users.is_empty() {
            return Err(Error::schema(
                format!("{path}.users"),
                "ssh is enabled but declares no users",
                "Add at least one user under ssh.users or set ssh.enable to false",
            ));
        }
        Ok(SshSettings {
            enable: self.enable,
            port: self.port,
            host_port: self.host_port,
            users,
        })
    }
}

impl SshSettings {
    /// The host:container mapping this section publishes.
    pub fn port_mapping(&self) -> Option<String> {
        if !self.enable {
            return None;
        }
        crate::merge::port_mapping(
            self.host_port.map(|p| p.to_string()).as_deref(),
            Some(&self.port.to_string()),
        )
    }
}
