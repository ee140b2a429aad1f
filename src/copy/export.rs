//! Export of images to local `docker-archive` files
//!
//! Archives are written as `docker-archive:<path>:<name>:<tag>`, which
//! records the reference in the archive's `manifest.json`. After each export
//! the manifest is read back; only when the expected `name:tag` is missing
//! do we write a `tag_*.sh` helper that re-tags the image after `docker load`.

use super::command::{self, ProxyEnv};
use super::{CopyLog, CopyOperation, CopyOutcome, CopyRequest, RunStatus, ToolOutput};
use crate::error::handlers::{FailureKind, ToolErrorHandler};
use crate::error::{Result, SyncError};
use crate::image::{ImageReference, sanitize_image_name};
use crate::output::format_size;
use chrono::Local;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const ARCHIVE_EXTENSION: &str = "tar";
pub const SCRIPT_PREFIX: &str = "tag_";
pub const SCRIPT_EXTENSION: &str = "sh";

/// Outcome of reading the tags back out of an exported archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveCheck {
    /// `manifest.json` lists the expected reference
    Tagged,
    /// Archive readable, reference absent; holds the tags that were found
    Untagged(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct ArchiveManifestEntry {
    #[serde(rename = "RepoTags", default)]
    repo_tags: Option<Vec<String>>,
}

/// `RepoTags` of every image in a docker-archive
pub fn archive_repo_tags(path: &Path) -> Result<Vec<String>> {
    let mut archive = tar::Archive::new(BufReader::new(File::open(path)?));
    for entry in archive.entries()? {
        let entry = entry?;
        let is_manifest = {
            let entry_path = entry.path()?;
            entry_path == Path::new("manifest.json") || entry_path == Path::new("./manifest.json")
        };
        if is_manifest {
            let manifests: Vec<ArchiveManifestEntry> = serde_json::from_reader(entry)?;
            return Ok(manifests
                .into_iter()
                .flat_map(|m| m.repo_tags.unwrap_or_default())
                .collect());
        }
    }
    Err(SyncError::Validation(format!(
        "No manifest.json in archive {}",
        path.display()
    )))
}

/// Whether `tags` contains `expected`, allowing a registry prefix on the tag
pub fn has_reference(tags: &[String], expected: &str) -> bool {
    tags.iter()
        .any(|t| t == expected || t.ends_with(&format!("/{}", expected)))
}

pub fn check_archive(path: &Path, expected: &str) -> Result<ArchiveCheck> {
    let tags = archive_repo_tags(path)?;
    if has_reference(&tags, expected) {
        Ok(ArchiveCheck::Tagged)
    } else {
        Ok(ArchiveCheck::Untagged(tags))
    }
}

/// Hex sha256 of a file, streamed
pub fn file_sha256(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Claim a fresh archive path by creating it empty
///
/// Returns the stem shared by the archive and its helper script along with
/// the archive path. Exports of the same image in the same second get a
/// numeric suffix; creation is exclusive, so concurrent runs never share a
/// file. The copy tool accepts an empty file as its destination.
pub fn reserve_archive(dir: &Path, source_image: &str, timestamp: &str) -> Result<(String, PathBuf)> {
    let base = format!("{}_{}", sanitize_image_name(source_image), timestamp);
    let mut attempt = 0u32;
    loop {
        let stem = match attempt {
            0 => base.clone(),
            n => format!("{}_{}", base, n),
        };
        let path = dir.join(format!("{}.{}", stem, ARCHIVE_EXTENSION));
        match File::options().write(true).create_new(true).open(&path) {
            Ok(_) => return Ok((stem, path)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && attempt < u32::MAX => {
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

pub fn script_name(stem: &str) -> String {
    format!("{}{}.{}", SCRIPT_PREFIX, stem, SCRIPT_EXTENSION)
}

const RECOVERY_SCRIPT: &str = r#"#!/bin/bash
# Re-tag an image loaded from an exported archive
# source: @SOURCE@
# archive: @ARCHIVE@
set -e

ARCHIVE="@ARCHIVE@"
TARGET="@TARGET@"

if [ ! -f "$ARCHIVE" ]; then
    echo "Archive not found: $ARCHIVE" >&2
    exit 1
fi

OUTPUT=$(docker load -i "$ARCHIVE")
echo "$OUTPUT"

LOADED=$(echo "$OUTPUT" | sed -n 's/^Loaded image: //p' | head -n 1)
if [ -z "$LOADED" ]; then
    LOADED=$(echo "$OUTPUT" | sed -n 's/^Loaded image ID: //p' | head -n 1)
fi
if [ -z "$LOADED" ]; then
    LOADED=$(docker images --filter "dangling=true" --format "{{.ID}}" | head -n 1)
fi

if [ -z "$LOADED" ]; then
    echo "Could not determine the loaded image, tag it manually:" >&2
    echo "  docker tag <IMAGE_ID> $TARGET" >&2
    exit 1
fi

if [ "$LOADED" != "$TARGET" ]; then
    docker tag "$LOADED" "$TARGET"
fi
echo "Image available as $TARGET"
"#;

pub fn render_recovery_script(source_image: &str, archive_file: &str, target: &str) -> String {
    RECOVERY_SCRIPT
        .replace("@SOURCE@", source_image)
        .replace("@ARCHIVE@", archive_file)
        .replace("@TARGET@", target)
}

fn write_script(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

fn remove_partial(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed partial archive"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial archive"),
    }
}

pub(super) async fn export_image(
    op: &CopyOperation,
    request: &CopyRequest<'_>,
    log: &dyn CopyLog,
    cancel: &CancellationToken,
) -> CopyOutcome {
    let registry = request.registry;
    let policy = registry.policy();
    let dir = match registry.url.trim() {
        "" => op.default_export_dir().clone(),
        url => PathBuf::from(url),
    };

    if let Err(e) = tokio::fs::create_dir_all(&dir).await {
        let reason = format!("Cannot create export directory {}: {}", dir.display(), e);
        log.error(&reason);
        return CopyOutcome::Failure(reason);
    }

    let reference = ImageReference::parse(request.source_image);
    let expected = reference.name_with_tag();
    let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let (stem, archive_path) = match reserve_archive(&dir, request.source_image, &timestamp) {
        Ok(reserved) => reserved,
        Err(e) => {
            let reason = format!("Cannot create archive in {}: {}", dir.display(), e);
            log.error(&reason);
            return CopyOutcome::Failure(reason);
        }
    };

    log.info("Export type: local archive");
    log.info(&format!("Archive: {}", archive_path.display()));

    let destination = format!("docker-archive:{}:{}", archive_path.display(), expected);
    let mut invocation = command::export_invocation(
        op.tool(),
        request.source_image,
        &destination,
        policy.timeout,
        request.source_auth,
    );
    log.info(&format!("Executing: {}", invocation.redacted()));

    if let Some(proxy) = request.proxy.filter(|p| !p.is_empty()) {
        let env = ProxyEnv::build(proxy, None);
        log.info("Proxy configured for export");
        invocation = invocation.envs(env.vars);
    }
    log.info(&format!("Export timeout: {}s", invocation.timeout.as_secs()));

    let output = match op.runner().run(&invocation, cancel).await {
        Ok(output) => output,
        Err(e) => {
            remove_partial(&archive_path);
            let reason = format!("Failed to start {}: {}", op.tool(), e);
            log.error(&reason);
            return CopyOutcome::Failure(reason);
        }
    };

    for line in output.stdout_lines() {
        log.info(&format!("  {}", line));
    }
    for line in output.stderr_lines() {
        log.warning(&format!("  {}", line));
    }

    match output.status {
        RunStatus::Exited(Some(0)) => {
            finish_export(request.source_image, &expected, &dir, &stem, log).await
        }
        RunStatus::Exited(code) => {
            remove_partial(&archive_path);
            export_failed(&output, code, op.tool(), log)
        }
        RunStatus::TimedOut => {
            remove_partial(&archive_path);
            let reason = format!(
                "Image export timed out after {}s, check the network connection",
                invocation.timeout.as_secs()
            );
            log.error(&reason);
            CopyOutcome::Failure(reason)
        }
        RunStatus::Cancelled => {
            remove_partial(&archive_path);
            log.warning("Export interrupted by cancellation");
            CopyOutcome::Cancelled
        }
    }
}

fn export_failed(output: &ToolOutput, code: Option<i32>, tool: &str, log: &dyn CopyLog) -> CopyOutcome {
    let reason = match code {
        Some(code) => format!("Image export failed with exit code {}", code),
        None => "Image export terminated by a signal".to_string(),
    };
    log.error(&reason);
    let kind = ToolErrorHandler::classify_failure(&output.stderr, None);
    if kind == FailureKind::Network {
        for line in ToolErrorHandler::guidance(kind, None, code, tool) {
            log.error(&line);
        }
    }
    CopyOutcome::Failure(reason)
}

async fn finish_export(
    source_image: &str,
    expected: &str,
    dir: &Path,
    stem: &str,
    log: &dyn CopyLog,
) -> CopyOutcome {
    let archive_name = format!("{}.{}", stem, ARCHIVE_EXTENSION);
    let archive_path = dir.join(&archive_name);

    let size = match tokio::fs::metadata(&archive_path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => {
            let reason = format!(
                "Export reported success but archive is missing: {}",
                archive_path.display()
            );
            log.error(&reason);
            return CopyOutcome::Failure(reason);
        }
    };

    log.success("Image exported");
    log.info(&format!("  Source: {}", source_image));
    log.info(&format!("  Archive: {}", archive_name));
    log.info(&format!("  Size: {}", format_size(size)));

    let hash_path = archive_path.clone();
    match blocking(move || file_sha256(&hash_path)).await {
        Ok(digest) => log.info(&format!("  Digest: sha256:{}", digest)),
        Err(e) => log.warning(&format!("Could not compute archive digest: {}", e)),
    }

    let check_path = archive_path.clone();
    let expected_owned = expected.to_string();
    let check = blocking(move || check_archive(&check_path, &expected_owned)).await;
    let missing_tags = match check {
        Ok(ArchiveCheck::Tagged) => {
            log.info(&format!("Archive keeps reference {}", expected));
            log.info(&format!("  Load with: docker load -i {}", archive_name));
            None
        }
        Ok(ArchiveCheck::Untagged(found)) => Some(found.join(", ")),
        Err(e) => Some(format!("unreadable manifest ({})", e)),
    };

    if let Some(found) = missing_tags {
        log.warning(&format!(
            "Archive does not record {} (found: {}), writing re-tag helper",
            expected,
            if found.is_empty() { "none" } else { found.as_str() }
        ));
        let script_name = script_name(stem);
        let script_path = dir.join(&script_name);
        let content = render_recovery_script(source_image, &archive_name, expected);
        match write_script(&script_path, &content) {
            Ok(()) => {
                log.info(&format!("Re-tag helper: {}", script_name));
                log.info(&format!("  Usage: bash {}", script_name));
            }
            Err(e) => log.warning(&format!("Failed to write re-tag helper: {}", e)),
        }
    }

    CopyOutcome::Success(archive_path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_archive(path: &Path, manifest: &str) {
        let file = File::create(path).unwrap();
        let mut builder = tar::Builder::new(file);
        let mut header = tar::Header::new_gnu();
        header.set_size(manifest.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "manifest.json", manifest.as_bytes())
            .unwrap();
        builder.finish().unwrap();
    }

    #[test]
    fn test_archive_tags_are_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.tar");
        write_archive(
            &path,
            r#"[{"Config":"c.json","RepoTags":["team/app:v1"],"Layers":[]}]"#,
        );

        assert_eq!(archive_repo_tags(&path).unwrap(), vec!["team/app:v1".to_string()]);
        assert_eq!(check_archive(&path, "team/app:v1").unwrap(), ArchiveCheck::Tagged);
        assert_eq!(
            check_archive(&path, "team/app:v2").unwrap(),
            ArchiveCheck::Untagged(vec!["team/app:v1".to_string()])
        );
    }

    #[test]
    fn test_archive_without_tags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.tar");
        write_archive(&path, r#"[{"Config":"c.json","RepoTags":null,"Layers":[]}]"#);
        assert_eq!(
            check_archive(&path, "nginx:latest").unwrap(),
            ArchiveCheck::Untagged(Vec::new())
        );
    }

    #[test]
    fn test_has_reference_accepts_registry_prefix() {
        let tags = vec!["docker.io/library/nginx:1.25".to_string()];
        assert!(has_reference(&tags, "library/nginx:1.25"));
        assert!(!has_reference(&tags, "nginx:1.26"));
    }

    #[test]
    fn test_file_sha256() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();
        assert_eq!(
            file_sha256(&path).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_reserve_archive_claims_unique_paths() {
        let dir = tempfile::tempdir().unwrap();
        let (stem, path) = reserve_archive(dir.path(), "docker.io/team/app:v1", "20240101_120000").unwrap();
        assert_eq!(stem, "docker.io_team_app_v1_20240101_120000");
        assert_eq!(path, dir.path().join("docker.io_team_app_v1_20240101_120000.tar"));
        assert!(path.is_file());

        let (next, _) = reserve_archive(dir.path(), "docker.io/team/app:v1", "20240101_120000").unwrap();
        assert_eq!(next, "docker.io_team_app_v1_20240101_120000_1");
        assert_eq!(script_name(&next), "tag_docker.io_team_app_v1_20240101_120000_1.sh");
    }

    #[test]
    fn test_concurrent_reservations_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let stems: Vec<String> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| reserve_archive(dir.path(), "nginx:1.25", "20240101_120000").unwrap().0))
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });
        let unique: std::collections::HashSet<&String> = stems.iter().collect();
        assert_eq!(unique.len(), 8);
    }

    #[test]
    fn test_recovery_script_mentions_target() {
        let script = render_recovery_script("quay.io/org/app:2", "quay.io_org_app_2_x.tar", "org/app:2");
        assert!(script.starts_with("#!/bin/bash"));
        assert!(script.contains("TARGET=\"org/app:2\""));
        assert!(script.contains("ARCHIVE=\"quay.io_org_app_2_x.tar\""));
        assert!(!script.contains('@'));
    }
}
