//! Registry module for destination registry descriptors
//!
//! Descriptors are loaded once from configuration and never mutated. Each
//! descriptor carries a [`RegistryKind`], which selects a [`RegistryPolicy`]
//! (default namespace field, timeout, extra copy flags) from a static table.

pub mod directory;
pub mod policy;

pub use directory::RegistryDirectory;
pub use policy::{NamespaceField, RegistryPolicy, VendorProfile};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of destination registry flavours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryKind {
    Harbor,
    Acr,
    Nexus,
    Swr,
    Tcr,
    /// Export to archive files in a local directory instead of pushing
    LocalFile,
    #[serde(other)]
    Generic,
}

impl RegistryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryKind::Harbor => "harbor",
            RegistryKind::Acr => "acr",
            RegistryKind::Nexus => "nexus",
            RegistryKind::Swr => "swr",
            RegistryKind::Tcr => "tcr",
            RegistryKind::LocalFile => "local_file",
            RegistryKind::Generic => "generic",
        }
    }
}

impl fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination registry configuration record
#[derive(Clone, Serialize, Deserialize)]
pub struct RegistryDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RegistryKind,
    /// Registry base address, or the export directory for `local_file`
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Harbor project
    #[serde(default)]
    pub project: Option<String>,
    /// ACR / SWR / TCR namespace
    #[serde(default)]
    pub namespace: Option<String>,
    /// Nexus hosted repository
    #[serde(default)]
    pub repository: Option<String>,
}

impl RegistryDescriptor {
    pub fn new(name: impl Into<String>, kind: RegistryKind, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            url: url.into(),
            username: None,
            password: None,
            project: None,
            namespace: None,
            repository: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    /// `user:pass` when both halves are configured and non-empty
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some((u, p)),
            _ => None,
        }
    }

    pub fn policy(&self) -> RegistryPolicy {
        RegistryPolicy::for_descriptor(self)
    }

    pub fn is_local_file(&self) -> bool {
        self.kind == RegistryKind::LocalFile
    }
}

impl fmt::Debug for RegistryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("project", &self.project)
            .field("namespace", &self.namespace)
            .field("repository", &self.repository)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_deserializes_unknown_as_generic() {
        let kind: RegistryKind = serde_yaml_ng::from_str("local_file").unwrap();
        assert_eq!(kind, RegistryKind::LocalFile);
        let kind: RegistryKind = serde_yaml_ng::from_str("quay").unwrap();
        assert_eq!(kind, RegistryKind::Generic);
    }

    #[test]
    fn test_credentials_require_both_parts() {
        let d = RegistryDescriptor::new("h", RegistryKind::Harbor, "harbor.local");
        assert!(d.credentials().is_none());

        let d = d.with_credentials("admin", "");
        assert!(d.credentials().is_none());

        let d = RegistryDescriptor::new("h", RegistryKind::Harbor, "harbor.local")
            .with_credentials("admin", "Harbor12345");
        assert_eq!(d.credentials(), Some(("admin", "Harbor12345")));
    }

    #[test]
    fn test_debug_hides_password() {
        let d = RegistryDescriptor::new("h", RegistryKind::Harbor, "harbor.local")
            .with_credentials("admin", "Harbor12345");
        let rendered = format!("{:?}", d);
        assert!(!rendered.contains("Harbor12345"));
        assert!(rendered.contains("***"));
    }
}
