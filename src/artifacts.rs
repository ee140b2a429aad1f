//! Exported archive housekeeping
//!
//! Lists and prunes the files written by `local_file` exports. Pruning runs
//! on demand or from [`spawn_periodic_cleanup`], never from the sync path.

use crate::copy::export::{ARCHIVE_EXTENSION, SCRIPT_EXTENSION, SCRIPT_PREFIX};
use crate::error::{Result, SyncError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Helper script written next to an archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptInfo {
    pub name: String,
    pub size: u64,
}

/// One exported archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactInfo {
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<ScriptInfo>,
}

/// Outcome of one cleanup pass
///
/// Counts are per artifact: an archive and its re-tag script count once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Removed for exceeding the age limit
    pub expired: usize,
    /// Removed to get back under the file count limit
    pub overflow: usize,
    /// Artifacts with at least one file that could not be removed
    pub failed: usize,
}

impl CleanupReport {
    pub fn removed(&self) -> usize {
        self.expired + self.overflow
    }
}

struct FileEntry {
    name: String,
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

/// Files that live and die together: an archive with its script, or a lone file
struct ArtifactGroup {
    files: Vec<FileEntry>,
    modified: SystemTime,
}

impl ArtifactGroup {
    fn name(&self) -> &str {
        self.files.first().map(|f| f.name.as_str()).unwrap_or_default()
    }

    /// Remove every member; true when all of them are gone
    fn remove(&self) -> bool {
        let mut ok = true;
        for file in &self.files {
            if let Err(e) = std::fs::remove_file(&file.path) {
                warn!(file = %file.name, error = %e, "Failed to remove artifact file");
                ok = false;
            }
        }
        ok
    }
}

/// Directory holding exported archives
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn files(&self) -> Result<Vec<FileEntry>> {
        let read_dir = match std::fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            let meta = match entry.metadata() {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "Cannot stat file");
                    continue;
                }
            };
            files.push(FileEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
                size: meta.len(),
                modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
        Ok(files)
    }

    /// Archives, newest first, each paired with its re-tag script if present
    pub fn list_artifacts(&self) -> Result<Vec<ArtifactInfo>> {
        let files = self.files()?;
        let archive_suffix = format!(".{}", ARCHIVE_EXTENSION);

        let scripts: HashMap<String, ScriptInfo> = files
            .iter()
            .filter_map(|f| {
                let stem = script_stem(&f.name)?;
                Some((
                    format!("{}{}", stem, archive_suffix),
                    ScriptInfo {
                        name: f.name.clone(),
                        size: f.size,
                    },
                ))
            })
            .collect();

        let mut artifacts: Vec<ArtifactInfo> = files
            .iter()
            .filter(|f| f.name.ends_with(&archive_suffix))
            .map(|f| ArtifactInfo {
                name: f.name.clone(),
                size: f.size,
                modified: DateTime::<Utc>::from(f.modified),
                script: scripts.get(&f.name).cloned(),
            })
            .collect();
        artifacts.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
        Ok(artifacts)
    }

    /// Delete one file by name; deleting an archive also drops its script
    ///
    /// Returns the names that were removed.
    pub fn delete_artifact(&self, name: &str) -> Result<Vec<String>> {
        let path = self.resolve(name)?;
        if !path.is_file() {
            return Err(SyncError::Validation(format!("No such artifact: {}", name)));
        }
        std::fs::remove_file(&path)?;
        let mut removed = vec![name.to_string()];

        if let Some(stem) = name.strip_suffix(&format!(".{}", ARCHIVE_EXTENSION)) {
            let script = format!("{}{}.{}", SCRIPT_PREFIX, stem, SCRIPT_EXTENSION);
            let script_path = self.dir.join(&script);
            if script_path.is_file() {
                std::fs::remove_file(&script_path)?;
                removed.push(script);
            }
        }
        info!(dir = %self.dir.display(), removed = ?removed, "Deleted artifact");
        Ok(removed)
    }

    /// Only bare file names inside the store are accepted
    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let candidate = Path::new(name);
        let mut components = candidate.components();
        match (components.next(), components.next()) {
            (Some(std::path::Component::Normal(_)), None) => Ok(self.dir.join(candidate)),
            _ => Err(SyncError::Validation(format!("Invalid artifact name: {}", name))),
        }
    }

    /// Remove files older than `max_age`, then the oldest beyond `max_files`
    pub fn cleanup(&self, max_age: Duration, max_files: usize) -> Result<CleanupReport> {
        self.cleanup_at(SystemTime::now(), max_age, max_files)
    }

    pub fn cleanup_at(&self, now: SystemTime, max_age: Duration, max_files: usize) -> Result<CleanupReport> {
        let mut groups = group_files(self.files()?);
        let mut report = CleanupReport::default();
        debug!(dir = %self.dir.display(), count = groups.len(), "Checking artifacts for cleanup");

        // oldest first
        groups.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.name().cmp(b.name())));

        let mut remaining = Vec::with_capacity(groups.len());
        for group in groups {
            let age = now.duration_since(group.modified).unwrap_or_default();
            if age <= max_age {
                remaining.push(group);
            } else if group.remove() {
                debug!(artifact = %group.name(), age_hours = age.as_secs() / 3600, "Removed expired artifact");
                report.expired += 1;
            } else {
                report.failed += 1;
                remaining.push(group);
            }
        }

        let excess = remaining.len().saturating_sub(max_files);
        for group in remaining.iter().take(excess) {
            if group.remove() {
                debug!(artifact = %group.name(), "Removed artifact over the file limit");
                report.overflow += 1;
            } else {
                report.failed += 1;
            }
        }

        info!(
            expired = report.expired,
            overflow = report.overflow,
            failed = report.failed,
            "Artifact cleanup finished"
        );
        Ok(report)
    }

    /// Total bytes used by every file in the store
    pub fn disk_usage(&self) -> Result<u64> {
        Ok(self.files()?.iter().map(|f| f.size).sum())
    }
}

/// Pair each archive with its script; everything else stands alone
fn group_files(files: Vec<FileEntry>) -> Vec<ArtifactGroup> {
    let archive_suffix = format!(".{}", ARCHIVE_EXTENSION);
    let archives: Vec<String> = files
        .iter()
        .filter(|f| f.name.ends_with(&archive_suffix))
        .map(|f| f.name.clone())
        .collect();

    let mut scripts: HashMap<String, FileEntry> = HashMap::new();
    let mut groups = Vec::new();
    for file in files {
        let owner = script_stem(&file.name)
            .map(|stem| format!("{}{}", stem, archive_suffix))
            .filter(|archive| archives.contains(archive));
        match owner {
            Some(archive) => {
                scripts.insert(archive, file);
            }
            None => groups.push(ArtifactGroup {
                modified: file.modified,
                files: vec![file],
            }),
        }
    }
    for group in &mut groups {
        if let Some(script) = scripts.remove(group.name()) {
            group.files.push(script);
        }
    }
    groups
}

fn script_stem(name: &str) -> Option<&str> {
    name.strip_prefix(SCRIPT_PREFIX)?
        .strip_suffix(&format!(".{}", SCRIPT_EXTENSION))
}

/// Run [`ArtifactStore::cleanup`] every `interval` until `shutdown` fires
pub fn spawn_periodic_cleanup(
    store: ArtifactStore,
    interval: Duration,
    max_age: Duration,
    max_files: usize,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let store = store.clone();
                    match tokio::task::spawn_blocking(move || store.cleanup(max_age, max_files)).await {
                        Ok(Ok(report)) if report.removed() > 0 => {
                            info!(removed = report.removed(), "Periodic cleanup removed artifacts");
                        }
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => warn!(error = %e, "Periodic cleanup failed"),
                        Err(e) => warn!(error = %e, "Periodic cleanup task panicked"),
                    }
                }
            }
        }
        debug!("Periodic cleanup stopped");
    })
}
