//! Parsing of image reference strings

/// An image reference split into its parts
///
/// `host` is only populated when the first path segment looks like a
/// hostname (contains `.` or `:`), which is the same heuristic docker uses
/// to tell `gcr.io/app` apart from `library/app`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub host: Option<String>,
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    pub fn parse(image: &str) -> Self {
        let (host, rest) = split_host(image.trim());

        // digest pins carry no tag information usable for an archive name
        let without_digest = rest.split('@').next().unwrap_or(rest);

        let last_slash = without_digest.rfind('/').map(|p| p + 1).unwrap_or(0);
        let (repository, tag) = match without_digest[last_slash..].rfind(':') {
            Some(colon) => {
                let split_at = last_slash + colon;
                (&without_digest[..split_at], &without_digest[split_at + 1..])
            }
            None => (without_digest, ""),
        };

        Self {
            host: host.map(str::to_string),
            repository: repository.to_string(),
            tag: if tag.is_empty() {
                "latest".to_string()
            } else {
                tag.to_string()
            },
        }
    }

    /// `repository:tag` without the registry host
    pub fn name_with_tag(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

/// Split off a leading registry host segment, if there is one
pub fn split_host(image: &str) -> (Option<&str>, &str) {
    match image.split_once('/') {
        Some((first, rest)) if first.contains('.') || first.contains(':') => (Some(first), rest),
        _ => (None, image),
    }
}

/// Host (and port) portion of a registry URL as configured by operators
///
/// Accepts both `https://harbor.example.com/` and `harbor.example.com`.
pub fn registry_host(url: &str) -> &str {
    let without_scheme = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url);
    without_scheme
        .split('/')
        .next()
        .unwrap_or(without_scheme)
}

/// Sanitizes image names for use as file names
///
/// - `/` → `_` (registry separators)
/// - `:` → `_` (tag separators)
/// - `@` → `_` (digest separators)
pub fn sanitize_image_name(image_name: &str) -> String {
    image_name.replace(['/', ':', '@'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_host_and_tag() {
        let r = ImageReference::parse("registry.example.com/team/app:v1");
        assert_eq!(r.host.as_deref(), Some("registry.example.com"));
        assert_eq!(r.repository, "team/app");
        assert_eq!(r.tag, "v1");
    }

    #[test]
    fn test_parse_port_is_not_a_tag() {
        let r = ImageReference::parse("localhost:5000/app");
        assert_eq!(r.host.as_deref(), Some("localhost:5000"));
        assert_eq!(r.repository, "app");
        assert_eq!(r.tag, "latest");
    }

    #[test]
    fn test_parse_without_host() {
        let r = ImageReference::parse("library/nginx:1.25-alpine");
        assert_eq!(r.host, None);
        assert_eq!(r.name_with_tag(), "library/nginx:1.25-alpine");

        let r = ImageReference::parse("nginx");
        assert_eq!(r.name_with_tag(), "nginx:latest");
    }

    #[test]
    fn test_parse_digest_reference() {
        let r = ImageReference::parse("quay.io/org/app:v2@sha256:abcdef");
        assert_eq!(r.repository, "org/app");
        assert_eq!(r.tag, "v2");
    }

    #[test]
    fn test_registry_host() {
        assert_eq!(registry_host("https://harbor.example.com/"), "harbor.example.com");
        assert_eq!(registry_host("harbor.example.com:8443"), "harbor.example.com:8443");
        assert_eq!(registry_host("registry.cn-hangzhou.aliyuncs.com"), "registry.cn-hangzhou.aliyuncs.com");
    }

    #[test]
    fn test_sanitize_image_name() {
        assert_eq!(sanitize_image_name("nginx:latest"), "nginx_latest");
        assert_eq!(
            sanitize_image_name("registry.example.com/app:v1.0"),
            "registry.example.com_app_v1.0"
        );
    }
}
