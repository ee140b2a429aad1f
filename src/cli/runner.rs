//! Command dispatch for the binary

use crate::artifacts::{ArtifactStore, spawn_periodic_cleanup};
use crate::cli::args::{Args, CleanupArgs, Command, SyncArgs, parse_image_list};
use crate::config::AppConfig;
use crate::error::{Result, SyncError};
use crate::events::SyncEvent;
use crate::output::OutputManager;
use crate::registry::RegistryDirectory;
use crate::sync::{StartSyncRequest, SyncOrchestrator};
use crate::task::TaskStatus;
use std::path::PathBuf;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio_util::sync::CancellationToken;

pub struct Runner {
    args: Args,
    output: OutputManager,
    config: AppConfig,
}

impl Runner {
    pub fn new(args: Args) -> Result<Self> {
        let output = if args.quiet {
            OutputManager::new_quiet()
        } else {
            OutputManager::new(args.verbose)
        };

        let mut config = AppConfig::from_env()?;
        if let Some(path) = &args.config {
            config.registries_file = path.clone();
        }

        Ok(Self { args, output, config })
    }

    /// Execute the selected command; `Ok(false)` means it ran but did not fully succeed
    pub async fn run(&self) -> Result<bool> {
        match &self.args.command {
            Command::Sync(sync) => self.sync(sync).await,
            Command::Registries => self.registries().map(|_| true),
            Command::Files => self.files().map(|_| true),
            Command::Cleanup(cleanup) => self.cleanup(cleanup).await.map(|_| true),
        }
    }

    fn load_directory(&self) -> Result<RegistryDirectory> {
        self.output.detail(&format!(
            "Registries file: {}",
            self.config.registries_file.display()
        ));
        RegistryDirectory::load(&self.config.registries_file)
    }

    fn collect_images(&self, args: &SyncArgs) -> Result<Vec<String>> {
        let mut images = args.images.clone();
        if let Some(path) = &args.images_file {
            let content = std::fs::read_to_string(path).map_err(|e| {
                SyncError::Validation(format!("Cannot read images file {}: {}", path.display(), e))
            })?;
            images.extend(parse_image_list(&content));
        }
        Ok(images)
    }

    async fn sync(&self, args: &SyncArgs) -> Result<bool> {
        args.validate().map_err(SyncError::Validation)?;

        let request = StartSyncRequest {
            images: self.collect_images(args)?,
            target_registry: args.registry.clone(),
            target_project: args.project.clone(),
            replace_level: args.replace_level(),
            source_auth: args.source_auth(),
            proxy_config: args.proxy_config(),
        };

        let orchestrator = SyncOrchestrator::from_config(&self.config, self.load_directory()?);
        let mut events = orchestrator.subscribe();
        let task_id = orchestrator.start(request)?;

        self.output.section(&format!("Sync to {} ({})", args.registry, task_id));

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let done = orchestrator.wait(&task_id);
        tokio::pin!(done);
        let mut interrupted = false;

        let snapshot = loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => self.render_event(&task_id, &event),
                    Err(RecvError::Lagged(skipped)) => {
                        self.output.verbose(&format!("Skipped {} events, output may be incomplete", skipped));
                    }
                    Err(RecvError::Closed) => break (&mut done).await?,
                },
                finished = &mut done => {
                    // the worker is gone; print whatever it published last
                    loop {
                        match events.try_recv() {
                            Ok(event) => self.render_event(&task_id, &event),
                            Err(TryRecvError::Lagged(_)) => continue,
                            Err(_) => break,
                        }
                    }
                    break finished?;
                }
                _ = &mut ctrl_c, if !interrupted => {
                    interrupted = true;
                    self.output.warning("Interrupt received, cancelling sync");
                    orchestrator.cancel(&task_id);
                }
            }
        };

        self.output.summary(
            "Sync Summary",
            &[
                ("Task", snapshot.id.clone()),
                ("Status", snapshot.status.to_string()),
                ("Images", format!("{} / {}", snapshot.progress, snapshot.total)),
                ("Succeeded", snapshot.succeeded().to_string()),
                ("Failed", snapshot.errors.len().to_string()),
                ("Elapsed", self.output.elapsed_time()),
            ],
        );
        for image in &snapshot.errors {
            self.output.error(&format!("Failed: {}", image));
        }

        if args.json {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }

        Ok(snapshot.status == TaskStatus::Completed && snapshot.errors.is_empty())
    }

    fn render_event(&self, task_id: &str, event: &SyncEvent) {
        if event.task_id() == task_id {
            self.output.event(event);
        }
    }

    fn registries(&self) -> Result<()> {
        let directory = self.load_directory()?;
        self.output.section("Configured Registries");
        if directory.is_empty() {
            self.output.warning("No registries configured");
            return Ok(());
        }

        for registry in directory.iter() {
            let policy = registry.policy();
            let namespace = if registry.is_local_file() {
                "-".to_string()
            } else {
                policy.resolve_namespace(registry, None)
            };
            let auth = if registry.credentials().is_some() {
                format!("user {}", registry.username.as_deref().unwrap_or_default())
            } else {
                "anonymous".to_string()
            };
            println!(
                "  {:<20} {:<10} {:<40} namespace={} auth={} timeout={}s",
                registry.name,
                registry.kind,
                registry.url,
                namespace,
                auth,
                policy.timeout.as_secs()
            );
        }
        Ok(())
    }

    /// Downloads dir plus every `local_file` destination
    fn artifact_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = vec![self.config.downloads_dir.clone()];
        for registry in self.load_directory()?.iter().filter(|r| r.is_local_file()) {
            let dir = PathBuf::from(registry.url.trim());
            if !registry.url.trim().is_empty() && !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
        Ok(dirs)
    }

    fn files(&self) -> Result<()> {
        self.output.section("Exported Archives");
        let mut total = 0usize;
        for dir in self.artifact_dirs()? {
            let store = ArtifactStore::new(&dir);
            let artifacts = store.list_artifacts()?;
            if artifacts.is_empty() {
                continue;
            }
            self.output.info(&format!(
                "{} ({})",
                dir.display(),
                self.output.format_size(store.disk_usage()?)
            ));
            for artifact in &artifacts {
                println!(
                    "  {:<60} {:>10}  {}",
                    artifact.name,
                    self.output.format_size(artifact.size),
                    artifact.modified.format("%Y-%m-%d %H:%M:%S")
                );
                if let Some(script) = &artifact.script {
                    println!("    re-tag helper: {}", script.name);
                }
            }
            total += artifacts.len();
        }
        if total == 0 {
            self.output.info("No exported archives");
        }
        Ok(())
    }

    async fn cleanup(&self, args: &CleanupArgs) -> Result<()> {
        args.validate().map_err(SyncError::Validation)?;
        let max_age = args.max_age().unwrap_or_else(|| self.config.max_file_age());
        let max_files = args.max_files.unwrap_or(self.config.max_files);
        let dirs = self.artifact_dirs()?;

        self.output.section("Artifact Cleanup");
        for dir in &dirs {
            let report = ArtifactStore::new(dir).cleanup(max_age, max_files)?;
            self.output.summary(
                &format!("{}", dir.display()),
                &[
                    ("Expired", report.expired.to_string()),
                    ("Over limit", report.overflow.to_string()),
                    ("Failed", report.failed.to_string()),
                ],
            );
        }

        if args.watch {
            let shutdown = CancellationToken::new();
            let workers: Vec<_> = dirs
                .into_iter()
                .map(|dir| {
                    spawn_periodic_cleanup(
                        ArtifactStore::new(dir),
                        self.config.cleanup_interval(),
                        max_age,
                        max_files,
                        shutdown.clone(),
                    )
                })
                .collect();
            self.output.info(&format!(
                "Cleaning up every {}h, press Ctrl-C to stop",
                self.config.cleanup_interval_hours
            ));
            tokio::signal::ctrl_c().await?;
            shutdown.cancel();
            for worker in workers {
                worker.await?;
            }
        }
        Ok(())
    }
}
