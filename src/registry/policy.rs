//! Per-registry-kind behaviour table

use super::{RegistryDescriptor, RegistryKind};
use crate::error::handlers::VendorHint;
use std::time::Duration;

/// Namespace used when neither the request nor the descriptor provides one
pub const FALLBACK_NAMESPACE: &str = "library";

pub const DEFAULT_COPY_TIMEOUT: Duration = Duration::from_secs(300);
pub const SLOW_COPY_TIMEOUT: Duration = Duration::from_secs(600);
pub const EXPORT_TIMEOUT: Duration = Duration::from_secs(600);

/// Which descriptor field holds the default namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceField {
    Project,
    Namespace,
    Repository,
    Unused,
}

/// Tuning applied to any registry whose address matches `host_marker`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VendorProfile {
    pub label: &'static str,
    pub host_marker: &'static str,
    pub timeout: Duration,
    pub extra_copy_args: &'static [&'static str],
}

impl VendorProfile {
    pub fn hint(&self) -> VendorHint<'static> {
        VendorHint {
            label: self.label,
            marker: self.host_marker,
        }
    }
}

/// Cloud vendors that need special treatment regardless of declared kind
pub const VENDOR_PROFILES: &[VendorProfile] = &[VendorProfile {
    label: "Aliyun ACR",
    host_marker: "aliyuncs.com",
    timeout: SLOW_COPY_TIMEOUT,
    extra_copy_args: &["--dest-compress-format", "gzip"],
}];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct KindDefaults {
    field: NamespaceField,
    default_namespace: &'static str,
    timeout: Duration,
}

const fn kind_defaults(kind: RegistryKind) -> KindDefaults {
    match kind {
        RegistryKind::Harbor => KindDefaults {
            field: NamespaceField::Project,
            default_namespace: "library",
            timeout: DEFAULT_COPY_TIMEOUT,
        },
        RegistryKind::Acr | RegistryKind::Swr | RegistryKind::Tcr => KindDefaults {
            field: NamespaceField::Namespace,
            default_namespace: "default",
            timeout: DEFAULT_COPY_TIMEOUT,
        },
        RegistryKind::Nexus => KindDefaults {
            field: NamespaceField::Repository,
            default_namespace: "docker-hosted",
            timeout: DEFAULT_COPY_TIMEOUT,
        },
        RegistryKind::LocalFile => KindDefaults {
            field: NamespaceField::Unused,
            default_namespace: "",
            timeout: EXPORT_TIMEOUT,
        },
        RegistryKind::Generic => KindDefaults {
            field: NamespaceField::Unused,
            default_namespace: FALLBACK_NAMESPACE,
            timeout: DEFAULT_COPY_TIMEOUT,
        },
    }
}

/// Effective behaviour for one descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryPolicy {
    pub kind: RegistryKind,
    pub namespace_field: NamespaceField,
    pub default_namespace: &'static str,
    pub timeout: Duration,
    pub extra_copy_args: Vec<&'static str>,
    pub vendor: Option<VendorProfile>,
}

impl RegistryPolicy {
    pub fn for_descriptor(descriptor: &RegistryDescriptor) -> Self {
        let defaults = kind_defaults(descriptor.kind);
        let vendor = if descriptor.is_local_file() {
            None
        } else {
            VENDOR_PROFILES
                .iter()
                .find(|v| descriptor.url.contains(v.host_marker))
                .copied()
        };

        let mut policy = Self {
            kind: descriptor.kind,
            namespace_field: defaults.field,
            default_namespace: defaults.default_namespace,
            timeout: defaults.timeout,
            extra_copy_args: Vec::new(),
            vendor,
        };

        if let Some(vendor) = vendor {
            policy.timeout = policy.timeout.max(vendor.timeout);
            policy.extra_copy_args.extend_from_slice(vendor.extra_copy_args);
        }

        policy
    }

    /// Namespace used for a push
    ///
    /// A non-blank request override wins, then the descriptor field selected
    /// by the kind, then the kind default.
    pub fn resolve_namespace(&self, descriptor: &RegistryDescriptor, target_project: Option<&str>) -> String {
        if let Some(project) = target_project.map(str::trim).filter(|p| !p.is_empty()) {
            return project.to_string();
        }

        let configured = match self.namespace_field {
            NamespaceField::Project => descriptor.project.as_deref(),
            NamespaceField::Namespace => descriptor.namespace.as_deref(),
            NamespaceField::Repository => descriptor.repository.as_deref(),
            NamespaceField::Unused => None,
        };

        match configured.map(str::trim).filter(|n| !n.is_empty()) {
            Some(ns) => ns.to_string(),
            None if self.default_namespace.is_empty() => FALLBACK_NAMESPACE.to_string(),
            None => self.default_namespace.to_string(),
        }
    }

    pub fn vendor_hint(&self) -> Option<VendorHint<'static>> {
        self.vendor.map(|v| v.hint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harbor_uses_project_field() {
        let d = RegistryDescriptor::new("h", RegistryKind::Harbor, "harbor.local").with_project("mirror");
        let p = d.policy();
        assert_eq!(p.resolve_namespace(&d, None), "mirror");
        assert_eq!(p.resolve_namespace(&d, Some("override")), "override");
        assert_eq!(p.resolve_namespace(&d, Some("   ")), "mirror");
        assert_eq!(p.timeout, DEFAULT_COPY_TIMEOUT);
        assert!(p.extra_copy_args.is_empty());
    }

    #[test]
    fn test_kind_defaults_when_field_missing() {
        let cases = [
            (RegistryKind::Harbor, "library"),
            (RegistryKind::Acr, "default"),
            (RegistryKind::Swr, "default"),
            (RegistryKind::Tcr, "default"),
            (RegistryKind::Nexus, "docker-hosted"),
            (RegistryKind::Generic, "library"),
        ];
        for (kind, expected) in cases {
            let d = RegistryDescriptor::new("r", kind, "registry.local");
            assert_eq!(d.policy().resolve_namespace(&d, None), expected, "kind {}", kind);
        }
    }

    #[test]
    fn test_field_of_other_kind_is_ignored() {
        let d = RegistryDescriptor::new("n", RegistryKind::Nexus, "nexus.local").with_project("ignored");
        assert_eq!(d.policy().resolve_namespace(&d, None), "docker-hosted");
    }

    #[test]
    fn test_aliyun_vendor_profile() {
        let d = RegistryDescriptor::new("acr", RegistryKind::Acr, "registry.cn-hangzhou.aliyuncs.com")
            .with_namespace("team");
        let p = d.policy();
        assert_eq!(p.timeout, SLOW_COPY_TIMEOUT);
        assert_eq!(p.extra_copy_args, vec!["--dest-compress-format", "gzip"]);
        assert_eq!(p.vendor_hint().map(|h| h.label), Some("Aliyun ACR"));
    }

    #[test]
    fn test_vendor_matched_by_address_not_kind() {
        let d = RegistryDescriptor::new("g", RegistryKind::Generic, "registry.cn-beijing.aliyuncs.com");
        assert!(d.policy().vendor.is_some());

        let d = RegistryDescriptor::new("acr", RegistryKind::Acr, "myacr.example.com");
        assert!(d.policy().vendor.is_none());
    }

    #[test]
    fn test_local_file_policy() {
        let d = RegistryDescriptor::new("disk", RegistryKind::LocalFile, "downloads");
        let p = d.policy();
        assert_eq!(p.timeout, EXPORT_TIMEOUT);
        assert!(p.vendor.is_none());
    }
}
