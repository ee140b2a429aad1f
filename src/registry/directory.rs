//! Read-only lookup of configured destination registries

use super::RegistryDescriptor;
use crate::error::{Result, SyncError};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct RegistriesFile {
    #[serde(default)]
    registries: Vec<RegistryDescriptor>,
}

/// Named destination registries, unique by name
#[derive(Debug, Clone, Default)]
pub struct RegistryDirectory {
    registries: Vec<RegistryDescriptor>,
}

impl RegistryDirectory {
    pub fn new(registries: Vec<RegistryDescriptor>) -> Result<Self> {
        let mut seen = HashSet::new();
        for registry in &registries {
            if registry.name.trim().is_empty() {
                return Err(SyncError::Config("Registry name cannot be empty".to_string()));
            }
            if !seen.insert(registry.name.as_str()) {
                return Err(SyncError::Config(format!(
                    "Duplicate registry name: {}",
                    registry.name
                )));
            }
        }
        Ok(Self { registries })
    }

    /// Parse a `registries:` YAML document
    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: RegistriesFile = serde_yaml_ng::from_str(content)?;
        Self::new(file.registries)
    }

    /// Load the registries file; a missing file yields an empty directory
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let directory = Self::from_yaml(&content)?;
                debug!(path = %path.display(), count = directory.len(), "Loaded registry directory");
                Ok(directory)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Registries file not found, no destinations configured");
                Ok(Self::default())
            }
            Err(e) => Err(SyncError::Config(format!(
                "Failed to read registries file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    pub fn find(&self, name: &str) -> Option<&RegistryDescriptor> {
        self.registries.iter().find(|r| r.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegistryDescriptor> {
        self.registries.iter()
    }

    pub fn len(&self) -> usize {
        self.registries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryKind;

    const SAMPLE: &str = r#"
registries:
  - name: harbor-prod
    type: harbor
    url: harbor.example.com
    username: admin
    password: Harbor12345
    project: library
  - name: aliyun
    type: acr
    url: registry.cn-hangzhou.aliyuncs.com
    namespace: team
  - name: offline
    type: local_file
    url: downloads
"#;

    #[test]
    fn test_from_yaml_and_find() {
        let dir = RegistryDirectory::from_yaml(SAMPLE).unwrap();
        assert_eq!(dir.len(), 3);

        let harbor = dir.find("harbor-prod").unwrap();
        assert_eq!(harbor.kind, RegistryKind::Harbor);
        assert_eq!(harbor.project.as_deref(), Some("library"));

        assert_eq!(dir.find("offline").unwrap().kind, RegistryKind::LocalFile);
        assert!(dir.find("does-not-exist").is_none());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let yaml = r#"
registries:
  - { name: a, type: harbor, url: one.local }
  - { name: a, type: nexus, url: two.local }
"#;
        let err = RegistryDirectory::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = RegistryDirectory::load(&dir.path().join("nope.yaml")).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registries.yaml");
        std::fs::write(&path, SAMPLE).unwrap();
        let loaded = RegistryDirectory::load(&path).unwrap();
        assert!(loaded.find("aliyun").is_some());
    }
}
