//! Standardized handling of copy tool diagnostics and request validation

use crate::error::{Result, SyncError};
use std::time::Duration;

const NETWORK_KEYWORDS: &[&str] = &["timeout", "dial tcp", "connection", "network"];

/// How a single stderr line from the copy tool should be surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSeverity {
    Network,
    Other,
}

/// Best-effort category of a failed copy, used only to pick guidance text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Network,
    VendorAuthInterrupted,
    VendorPush,
    Generic,
}

/// Vendor fingerprint used to recognise vendor-specific failures in stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VendorHint<'a> {
    pub label: &'a str,
    pub marker: &'a str,
}

/// Classifier and message catalogue for copy tool failures
pub struct ToolErrorHandler;

impl ToolErrorHandler {
    pub fn classify_line(line: &str) -> LineSeverity {
        let lower = line.to_lowercase();
        if NETWORK_KEYWORDS.iter().any(|k| lower.contains(k)) {
            LineSeverity::Network
        } else {
            LineSeverity::Other
        }
    }

    /// Categorize the full stderr of a failed invocation
    pub fn classify_failure(stderr: &str, vendor: Option<VendorHint<'_>>) -> FailureKind {
        let lower = stderr.to_lowercase();
        // "network" alone is too broad for the whole-output check
        if ["timeout", "dial tcp", "connection"]
            .iter()
            .any(|k| lower.contains(k))
        {
            return FailureKind::Network;
        }

        if let Some(hint) = vendor {
            if stderr.contains(hint.marker) {
                if stderr.contains("unexpected EOF") {
                    return FailureKind::VendorAuthInterrupted;
                }
                return FailureKind::VendorPush;
            }
        }

        FailureKind::Generic
    }

    /// Guidance lines for a failed copy, first line is the headline
    pub fn guidance(
        kind: FailureKind,
        vendor: Option<VendorHint<'_>>,
        exit_code: Option<i32>,
        tool: &str,
    ) -> Vec<String> {
        let vendor_label = vendor.map(|v| v.label).unwrap_or("Registry");
        match kind {
            FailureKind::Network => vec![
                "Network connection timed out or failed, possible causes:".to_string(),
                "  1. The source registry is unreachable from this host".to_string(),
                "  2. The network connection is unstable".to_string(),
                "  3. Consider a closer mirror or an HTTP(S) proxy".to_string(),
            ],
            FailureKind::VendorAuthInterrupted => vec![
                format!("{} authentication connection was interrupted, possible causes:", vendor_label),
                "  1. The network dropped during the token exchange".to_string(),
                format!("  2. {} is temporarily unavailable", vendor_label),
                "  3. A very large layer exceeded the transfer window".to_string(),
                "  4. Retry later or check the network connection".to_string(),
                format!("  5. Confirm the {} credentials are correct", vendor_label),
            ],
            FailureKind::VendorPush => vec![
                format!("{} push failed, please check:", vendor_label),
                "  1. The account has push permission".to_string(),
                "  2. The namespace exists and is accessible".to_string(),
                "  3. The network connection is stable".to_string(),
                "  4. The credentials are correct".to_string(),
            ],
            FailureKind::Generic => vec![match exit_code {
                Some(code) => format!("{} command failed with exit code {}", tool, code),
                None => format!("{} command was terminated by a signal", tool),
            }],
        }
    }

    /// Messages emitted when an invocation exceeds its time budget
    pub fn timeout_guidance(timeout: Duration) -> Vec<String> {
        vec![
            format!(
                "Image transfer timed out after {}s, check the network connection",
                timeout.as_secs()
            ),
            "Suggestion: use a closer mirror or review the proxy configuration".to_string(),
        ]
    }
}

/// Request validation utilities
pub struct ValidationErrorHandler;

impl ValidationErrorHandler {
    pub fn validate_images(images: &[String]) -> Result<()> {
        if images.iter().all(|i| i.trim().is_empty()) {
            return Err(SyncError::Validation(
                "Image list cannot be empty".to_string(),
            ));
        }
        if let Some(bad) = images.iter().find(|i| i.trim().contains(char::is_whitespace)) {
            return Err(SyncError::Validation(format!(
                "Image reference cannot contain whitespace: {}",
                bad
            )));
        }
        Ok(())
    }

    pub fn validate_target_registry(name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(SyncError::Validation(
                "Target registry cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Proxy values must be absolute URLs the copy tool can use
    pub fn validate_proxy_url(value: &str) -> Result<()> {
        let parsed = url::Url::parse(value)
            .map_err(|e| SyncError::Validation(format!("Invalid proxy URL {}: {}", value, e)))?;
        if parsed.host_str().is_none() {
            return Err(SyncError::Validation(format!(
                "Proxy URL has no host: {}",
                value
            )));
        }
        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    const ACR: VendorHint<'static> = VendorHint {
        label: "Aliyun ACR",
        marker: "aliyuncs.com",
    };

    #[test]
    fn test_classify_line() {
        assert_eq!(
            ToolErrorHandler::classify_line("dial tcp 1.2.3.4:443: i/o timeout"),
            LineSeverity::Network
        );
        assert_eq!(
            ToolErrorHandler::classify_line("Connection reset by peer"),
            LineSeverity::Network
        );
        assert_eq!(
            ToolErrorHandler::classify_line("manifest unknown"),
            LineSeverity::Other
        );
    }

    #[test]
    fn test_classify_failure() {
        assert_eq!(
            ToolErrorHandler::classify_failure("dial tcp: lookup registry-1.docker.io", Some(ACR)),
            FailureKind::Network
        );
        assert_eq!(
            ToolErrorHandler::classify_failure(
                "Get https://registry.cn-hangzhou.aliyuncs.com/v2/: unexpected EOF",
                Some(ACR)
            ),
            FailureKind::VendorAuthInterrupted
        );
        assert_eq!(
            ToolErrorHandler::classify_failure(
                "denied: requested access to registry.cn-hangzhou.aliyuncs.com",
                Some(ACR)
            ),
            FailureKind::VendorPush
        );
        assert_eq!(
            ToolErrorHandler::classify_failure("denied: aliyuncs.com", None),
            FailureKind::Generic
        );
    }

    #[test]
    fn test_guidance_mentions_vendor_and_exit_code() {
        let lines = ToolErrorHandler::guidance(FailureKind::VendorPush, Some(ACR), Some(1), "skopeo");
        assert!(lines[0].starts_with("Aliyun ACR"));

        let lines = ToolErrorHandler::guidance(FailureKind::Generic, None, Some(2), "skopeo");
        assert_eq!(lines, vec!["skopeo command failed with exit code 2".to_string()]);
    }

    #[test]
    fn test_validate_images() {
        assert!(ValidationErrorHandler::validate_images(&[]).is_err());
        assert!(ValidationErrorHandler::validate_images(&["  ".to_string()]).is_err());
        assert!(ValidationErrorHandler::validate_images(&["nginx:1.25".to_string()]).is_ok());
        assert!(ValidationErrorHandler::validate_images(&["ng inx".to_string()]).is_err());
    }

    #[test]
    fn test_validate_proxy_url() {
        assert!(ValidationErrorHandler::validate_proxy_url("http://proxy.local:3128").is_ok());
        assert!(ValidationErrorHandler::validate_proxy_url("proxy.local:3128").is_err());
    }
}
