//! Target path computation for mirrored images

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use super::reference::split_host;

/// How many leading path segments of the source repository are discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ReplaceLevel {
    /// Keep the full source path
    None,
    /// Keep only the image name
    All,
    /// Drop the first N segments (1..=3)
    Levels(u8),
}

impl Default for ReplaceLevel {
    fn default() -> Self {
        ReplaceLevel::Levels(1)
    }
}

impl FromStr for ReplaceLevel {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "none" => ReplaceLevel::None,
            "all" => ReplaceLevel::All,
            "2" => ReplaceLevel::Levels(2),
            "3" => ReplaceLevel::Levels(3),
            _ => ReplaceLevel::Levels(1),
        })
    }
}

impl From<String> for ReplaceLevel {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(level) => level,
            Err(never) => match never {},
        }
    }
}

impl From<ReplaceLevel> for String {
    fn from(value: ReplaceLevel) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ReplaceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplaceLevel::None => write!(f, "none"),
            ReplaceLevel::All => write!(f, "all"),
            ReplaceLevel::Levels(n) => write!(f, "{}", n),
        }
    }
}

/// Map a source image to its repository path under `namespace`
///
/// The registry host of the source is dropped, the replace level is applied to
/// the remaining segments, and the namespace is prefixed once. Never fails:
/// when the path is too short for the requested level only the image name is kept.
pub fn rewrite(source_image: &str, namespace: &str, policy: ReplaceLevel) -> String {
    let (_, path) = split_host(source_image.trim());
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let bare_name = segments.last().copied().unwrap_or_default();

    let rewritten = match policy {
        ReplaceLevel::All => bare_name.to_string(),
        ReplaceLevel::None => segments.join("/"),
        ReplaceLevel::Levels(n) => {
            let n = usize::from(n);
            if segments.len() > n {
                segments[n..].join("/")
            } else {
                bare_name.to_string()
            }
        }
    };

    prefix_namespace(&rewritten, namespace)
}

fn prefix_namespace(path: &str, namespace: &str) -> String {
    let namespace = namespace.trim_matches('/');
    if namespace.is_empty() {
        return path.to_string();
    }
    if path.is_empty() {
        return namespace.to_string();
    }
    if path.starts_with(&format!("{}/", namespace)) {
        path.to_string()
    } else {
        format!("{}/{}", namespace, path)
    }
}
