//! Command-line argument parsing

use crate::config::{MAX_HOURS, hours_duration};
use crate::copy::{ProxyConfig, SourceAuth};
use crate::image::ReplaceLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "docker-image-syncer")]
#[command(about = "Mirror container images into private registries or local archives")]
#[command(version, author)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output
    #[arg(long = "verbose", short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Quiet mode
    #[arg(
        long = "quiet",
        short = 'q',
        global = true,
        help = "Only print warnings and errors"
    )]
    pub quiet: bool,

    /// Registries file
    #[arg(
        long = "config",
        short = 'c',
        global = true,
        env = "IMAGE_SYNC_REGISTRIES",
        help = "Path to the registries YAML file"
    )]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Copy images to a configured registry
    Sync(SyncArgs),
    /// List configured registries
    Registries,
    /// List exported archives
    Files,
    /// Remove old exported archives
    Cleanup(CleanupArgs),
}

#[derive(clap::Args, Debug, Default)]
pub struct SyncArgs {
    /// Images to copy
    #[arg(help = "Source image references, e.g. docker.io/library/nginx:1.25")]
    pub images: Vec<String>,

    #[arg(
        long = "images-file",
        short = 'f',
        help = "File with one image reference per line ('#' starts a comment)"
    )]
    pub images_file: Option<PathBuf>,

    #[arg(long = "registry", short = 'r', help = "Name of the target registry")]
    pub registry: String,

    #[arg(
        long = "project",
        short = 'p',
        help = "Namespace/project on the target registry, overrides the configured default"
    )]
    pub project: Option<String>,

    #[arg(
        long = "replace-level",
        short = 'l',
        default_value = "1",
        help = "Source path segments to drop: none, all, 1, 2 or 3"
    )]
    pub replace_level: String,

    #[arg(long = "src-username", env = "IMAGE_SYNC_SRC_USERNAME", help = "Source registry username")]
    pub src_username: Option<String>,

    #[arg(
        long = "src-password",
        env = "IMAGE_SYNC_SRC_PASSWORD",
        hide_env_values = true,
        help = "Source registry password"
    )]
    pub src_password: Option<String>,

    #[arg(long = "http-proxy", help = "HTTP proxy for the copy tool")]
    pub http_proxy: Option<String>,

    #[arg(long = "https-proxy", help = "HTTPS proxy for the copy tool")]
    pub https_proxy: Option<String>,

    #[arg(long = "no-proxy", help = "Comma separated hosts that bypass the proxy")]
    pub no_proxy: Option<String>,

    #[arg(long = "json", help = "Print the final task snapshot as JSON")]
    pub json: bool,
}

impl SyncArgs {
    pub fn validate(&self) -> Result<(), String> {
        if self.images.is_empty() && self.images_file.is_none() {
            return Err("Provide images as arguments or with --images-file".to_string());
        }
        if self.registry.trim().is_empty() {
            return Err("Target registry cannot be empty".to_string());
        }
        if self.src_username.is_some() != self.src_password.is_some() {
            return Err("--src-username and --src-password must be given together".to_string());
        }
        Ok(())
    }

    pub fn replace_level(&self) -> ReplaceLevel {
        self.replace_level.parse().unwrap_or_default()
    }

    pub fn source_auth(&self) -> Option<SourceAuth> {
        match (&self.src_username, &self.src_password) {
            (Some(user), Some(pass)) => Some(SourceAuth::new(user.clone(), pass.clone())),
            _ => None,
        }
    }

    pub fn proxy_config(&self) -> Option<ProxyConfig> {
        let proxy = ProxyConfig {
            http_proxy: self.http_proxy.clone(),
            https_proxy: self.https_proxy.clone(),
            no_proxy: self.no_proxy.clone(),
        };
        (!proxy.is_empty()).then_some(proxy)
    }
}

/// Image references from a list file, blank lines and comments skipped
pub fn parse_image_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(clap::Args, Debug, Default)]
pub struct CleanupArgs {
    #[arg(long = "max-age-hours", help = "Delete files older than this many hours")]
    pub max_age_hours: Option<u64>,

    #[arg(long = "max-files", help = "Keep at most this many files")]
    pub max_files: Option<usize>,

    #[arg(long = "watch", help = "Keep running and clean up on the configured interval")]
    pub watch: bool,
}

impl CleanupArgs {
    /// Age limit from `--max-age-hours`; call after [`validate`](Self::validate)
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_hours.and_then(hours_duration)
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(hours) = self.max_age_hours {
            if hours_duration(hours).is_none() {
                return Err(format!("--max-age-hours must be between 1 and {}", MAX_HOURS));
            }
        }
        if self.max_files == Some(0) {
            return Err("--max-files must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sync_command() {
        let args = Args::try_parse_from([
            "docker-image-syncer",
            "-v",
            "sync",
            "--registry",
            "harbor-prod",
            "--replace-level",
            "all",
            "nginx:1.25",
            "redis:7",
        ])
        .unwrap();
        assert!(args.verbose);
        let Command::Sync(sync) = args.command else {
            panic!("expected sync");
        };
        assert_eq!(sync.images, vec!["nginx:1.25", "redis:7"]);
        assert_eq!(sync.replace_level(), ReplaceLevel::All);
        assert!(sync.validate().is_ok());
        assert!(sync.proxy_config().is_none());
    }

    #[test]
    fn test_sync_validation() {
        let args = SyncArgs {
            registry: "h".into(),
            ..Default::default()
        };
        assert!(args.validate().is_err());

        let args = SyncArgs {
            images: vec!["nginx".into()],
            registry: "h".into(),
            src_username: Some("u".into()),
            ..Default::default()
        };
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_parse_image_list() {
        let content = "# mirrors\nnginx:1.25\n\n  redis:7  # cache\n";
        assert_eq!(parse_image_list(content), vec!["nginx:1.25", "redis:7"]);
    }

    #[test]
    fn test_cleanup_validation() {
        assert!(CleanupArgs { max_files: Some(0), ..Default::default() }.validate().is_err());
        assert!(CleanupArgs::default().validate().is_ok());
        assert!(CleanupArgs::default().max_age().is_none());

        let args = Args::try_parse_from([
            "docker-image-syncer",
            "cleanup",
            "--max-age-hours",
            "18446744073709551615",
        ])
        .unwrap();
        let Command::Cleanup(cleanup) = args.command else {
            panic!("expected cleanup command");
        };
        assert!(cleanup.validate().is_err());

        let week = CleanupArgs { max_age_hours: Some(168), ..Default::default() };
        assert!(week.validate().is_ok());
        assert_eq!(week.max_age(), Some(Duration::from_secs(168 * 3600)));
    }
}
