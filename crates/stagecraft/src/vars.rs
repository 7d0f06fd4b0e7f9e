// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Variable markers and their two substitution domains.
//!
//! Two marker syntaxes can appear in any string of the config document:
//!
//! - config-time `${NAME}` / `${NAME:-default}`, replaced once while
//!   compiling from the [`ResolveContext`] environment;
//! - compose-time `{{NAME}}` / `{{NAME:-default}}`, left alone until the
//!   final tree is emitted, where they are rewritten to compose's own
//!   `${NAME}` syntax so the compose runtime substitutes them.
//!
//! Substitution is a single, non-recursive pass. A config-time marker whose
//! variable is unset and which has no default is left in place, and the
//! follow-up leftover scan turns it into a hard error.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::Value;

use crate::context::ResolveContext;
use crate::{Error, Result};

#[cfg(test)]
#[path = "./vars_test.rs"]
mod vars_test;

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex is valid"));

const DEFAULT_SEPARATOR: &str = ":-";

/// Which substitution domain a marker belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    /// `${NAME}`: resolved by this compiler.
    ConfigTime,
    /// `{{NAME}}`: resolved by the consumer of the compose file.
    ComposeTime,
}

impl MarkerKind {
    fn opener(self) -> &'static str {
        match self {
            Self::ConfigTime => "${",
            Self::ComposeTime => "{{",
        }
    }

    fn closer(self) -> &'static str {
        match self {
            Self::ConfigTime => "}",
            Self::ComposeTime => "}}",
        }
    }
}

/// A marker found in a string, with its byte span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub kind: MarkerKind,
    pub name: String,
    pub default: Option<String>,
    pub start: usize,
    pub end: usize,
}

/// Why a marker could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarkerError {
    #[error("unterminated '{opener}' starting at byte {offset}")]
    Unterminated { opener: &'static str, offset: usize },

    #[error("invalid variable name '{name}' in '{marker}'")]
    InvalidName { name: String, marker: String },
}

impl MarkerError {
    fn at(self, path: &str) -> Error {
        Error::MalformedMarker {
            path: display_path(path),
            reason: self.to_string(),
        }
    }
}

/// Find every marker of both kinds in `s`, left to right.
///
/// Markers are matched non-greedily: a config-time marker ends at the first
/// `}`, a compose-time marker at the first `}}`.
pub fn scan_markers(s: &str) -> std::result::Result<Vec<Marker>, MarkerError> {
    let mut markers = Vec::new();
    let mut pos = 0;

    while pos < s.len() {
        let rest = &s[pos..];
        let kind = if rest.starts_with("${") {
            MarkerKind::ConfigTime
        } else if rest.starts_with("{{") {
            MarkerKind::ComposeTime
        } else {
            pos += rest.chars().next().map_or(1, char::len_utf8);
            continue;
        };

        let body_start = pos + kind.opener().len();
        let close = s[body_start..]
            .find(kind.closer())
            .ok_or(MarkerError::Unterminated {
                opener: kind.opener(),
                offset: pos,
            })?;
        let body = &s[body_start..body_start + close];
        let end = body_start + close + kind.closer().len();

        let (name, default) = match body.split_once(DEFAULT_SEPARATOR) {
            Some((name, default)) => (name, Some(default.to_string())),
            None => (body, None),
        };
        if !NAME_PATTERN.is_match(name) {
            return Err(MarkerError::InvalidName {
                name: name.to_string(),
                marker: s[pos..end].to_string(),
            });
        }

        markers.push(Marker {
            kind,
            name: name.to_string(),
            default,
            start: pos,
            end,
        });
        pos = end;
    }

    Ok(markers)
}

/// True when `s` holds at least one compose-time marker.
pub fn contains_compose_marker(s: &str) -> bool {
    first_compose_marker(s).is_some()
}

/// Name of the first well-formed compose-time marker in `s`, if any.
pub fn first_compose_marker(s: &str) -> Option<String> {
    scan_markers(s).ok().and_then(|markers| {
        markers
            .into_iter()
            .find(|m| m.kind == MarkerKind::ComposeTime)
            .map(|m| m.name)
    })
}

/// Substitute config-time markers in a single string.
///
/// Compose-time markers are copied through untouched.
pub fn substitute_config_time(
    s: &str,
    ctx: &ResolveContext,
) -> std::result::Result<String, MarkerError> {
    let markers = scan_markers(s)?;
    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for marker in markers
        .iter()
        .filter(|m| m.kind == MarkerKind::ConfigTime)
    {
        out.push_str(&s[last..marker.start]);
        match (ctx.var(&marker.name), &marker.default) {
            (Some(value), _) => out.push_str(value),
            (None, Some(default)) => out.push_str(default),
            (None, None) => out.push_str(&s[marker.start..marker.end]),
        }
        last = marker.end;
    }
    out.push_str(&s[last..]);
    Ok(out)
}

/// Rewrite compose-time markers into compose's native `${NAME}` syntax.
pub fn rewrite_compose_str(s: &str) -> std::result::Result<String, MarkerError> {
    let markers = scan_markers(s)?;
    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for marker in markers
        .iter()
        .filter(|m| m.kind == MarkerKind::ComposeTime)
    {
        out.push_str(&s[last..marker.start]);
        out.push_str("${");
        out.push_str(&marker.name);
        if let Some(default) = &marker.default {
            out.push_str(DEFAULT_SEPARATOR);
            out.push_str(default);
        }
        out.push('}');
        last = marker.end;
    }
    out.push_str(&s[last..]);
    Ok(out)
}

/// Apply config-time substitution to every string value in the tree.
///
/// Mapping keys are left as written.
pub fn resolve_config_time(value: &mut Value, ctx: &ResolveContext) -> Result<()> {
    visit_strings_mut(value, "", &mut |path, s| {
        let resolved = substitute_config_time(s, ctx).map_err(|e| e.at(path))?;
        if resolved != *s {
            tracing::trace!(path = %display_path(path), "substituted config-time markers");
            *s = resolved;
        }
        Ok(())
    })
}

/// Fail on the first config-time marker still present in the tree.
pub fn ensure_no_config_markers(value: &Value) -> Result<()> {
    visit_strings(value, "", &mut |path, s| {
        let markers = scan_markers(s).map_err(|e| e.at(path))?;
        match markers.iter().find(|m| m.kind == MarkerKind::ConfigTime) {
            Some(marker) => Err(Error::UnresolvedVariable {
                path: display_path(path),
                name: marker.name.clone(),
            }),
            None => Ok(()),
        }
    })
}

/// Run the config-time domain over a document tree: substitute, then
/// reject anything left over.
pub fn resolve_document(value: &mut Value, ctx: &ResolveContext) -> Result<()> {
    resolve_config_time(value, ctx)?;
    ensure_no_config_markers(value)
}

/// Rewrite compose-time markers in every string of a plain tree.
///
/// Well-formedness is checked again here since the tree may now hold
/// strings that never went through the document resolver.
pub fn rewrite_compose_markers(value: &mut Value) -> Result<()> {
    visit_strings_mut(value, "", &mut |path, s| {
        let rewritten = rewrite_compose_str(s).map_err(|e| e.at(path))?;
        *s = rewritten;
        Ok(())
    })
}

/// Call `f` with the path and contents of every string in the tree.
pub fn visit_strings<F>(value: &Value, path: &str, f: &mut F) -> Result<()>
where
    F: FnMut(&str, &str) -> Result<()>,
{
    match value {
        Value::String(s) => f(path, s),
        Value::Sequence(items) => {
            for (i, item) in items.iter().enumerate() {
                visit_strings(item, &index_path(path, i), f)?;
            }
            Ok(())
        }
        Value::Mapping(map) => {
            for (key, item) in map {
                visit_strings(item, &child_path(path, &key_label(key)), f)?;
            }
            Ok(())
        }
        Value::Tagged(tagged) => visit_strings(&tagged.value, path, f),
        Value::Null | Value::Bool(_) | Value::Number(_) => Ok(()),
    }
}

fn visit_strings_mut<F>(value: &mut Value, path: &str, f: &mut F) -> Result<()>
where
    F: FnMut(&str, &mut String) -> Result<()>,
{
    match value {
        Value::String(s) => f(path, s),
        Value::Sequence(items) => {
            for (i, item) in items.iter_mut().enumerate() {
                visit_strings_mut(item, &index_path(path, i), f)?;
            }
            Ok(())
        }
        Value::Mapping(map) => {
            for (key, item) in map.iter_mut() {
                visit_strings_mut(item, &child_path(path, &key_label(key)), f)?;
            }
            Ok(())
        }
        Value::Tagged(tagged) => visit_strings_mut(&mut tagged.value, path, f),
        Value::Null | Value::Bool(_) | Value::Number(_) => Ok(()),
    }
}

pub(crate) fn key_label(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => "?".to_string(),
    }
}

pub(crate) fn child_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

pub(crate) fn index_path(parent: &str, index: usize) -> String {
    format!("{parent}[{index}]")
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.to_string()
    }
}
