// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Ordered environment variable lists and the baked profile script.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::{Error, Result};

#[cfg(test)]
#[path = "./environment_test.rs"]
mod environment_test;

/// Environment section as written in the document: either a list of
/// `KEY=VALUE` strings or a mapping.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum EnvironmentDoc {
    List(Vec<String>),
    Map(IndexMap<String, Value>),
}

impl Default for EnvironmentDoc {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl EnvironmentDoc {
    /// Normalize into an [`EnvList`], validating every key.
    pub fn into_env_list(self, path: &str) -> Result<EnvList> {
        let mut env = EnvList::default();
        match self {
            Self::List(entries) => {
                for (i, entry) in entries.iter().enumerate() {
                    let (key, value) = entry.split_once('=').ok_or_else(|| {
                        Error::schema(
                            format!("{path}[{i}]"),
                            format!("'{entry}' is not a KEY=VALUE assignment"),
                            "Write environment entries as KEY=VALUE",
                        )
                    })?;
                    check_key(key.trim(), &format!("{path}[{i}]"))?;
                    env.export(key.trim(), value);
                }
            }
            Self::Map(map) => {
                for (key, value) in map {
                    let entry_path = format!("{path}.{key}");
                    check_key(&key, &entry_path)?;
                    let value = match value {
                        Value::String(s) => s,
                        Value::Number(n) => n.to_string(),
                        Value::Bool(b) => b.to_string(),
                        Value::Null => String::new(),
                        _ => {
                            return Err(Error::schema(
                                entry_path,
                                "environment values must be scalars",
                                "Quote the value or flatten it into a string",
                            ));
                        }
                    };
                    env.export(key, value);
                }
            }
        }
        Ok(env)
    }
}

fn check_key(key: &str, path: &str) -> Result<()> {
    let mut chars = key.chars();
    let valid = matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(Error::schema(
            path,
            format!("'{key}' is not a valid environment variable name"),
            "Variable names must match [A-Za-z_][A-Za-z0-9_]*",
        ))
    }
}

/// Ordered environment with `export` semantics.
///
/// Re-exporting a key updates its value in place; the key keeps the
/// position of its first occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct EnvList(IndexMap<String, String>);

impl EnvList {
    /// Equivalent of `export KEY=VALUE`.
    pub fn export(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Apply every entry of `other`, in order, on top of this list.
    pub fn export_all(&mut self, other: &EnvList) {
        for (key, value) in other.iter() {
            self.export(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries as `KEY=VALUE` strings, the form compose accepts.
    pub fn to_assignments(&self) -> Vec<String> {
        self.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvList {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut env = Self::default();
        for (k, v) in iter {
            env.export(k, v);
        }
        env
    }
}

/// Generate the profile script that bakes `env` into an image.
///
/// Values are quoted so that they are exported literally.
pub fn generate_profile_script(env: &EnvList) -> String {
    let mut script = String::from("#!/bin/sh\n# generated by stagecraft, do not edit\n");
    for (key, value) in env.iter() {
        script.push_str("export ");
        script.push_str(key);
        script.push('=');
        script.push_str(&shell_words::quote(value));
        script.push('\n');
    }
    script
}
