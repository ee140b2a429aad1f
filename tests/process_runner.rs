//! Real subprocess behaviour of the process runner (unix shells only)
#![cfg(unix)]

use docker_image_syncer::copy::{Invocation, ProcessRunner, RunStatus, ToolRunner};
use docker_image_syncer::registry::{RegistryDescriptor, RegistryDirectory, RegistryKind};
use docker_image_syncer::task::{TaskLedger, TaskStatus};
use docker_image_syncer::{StartSyncRequest, SyncOrchestrator};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn shell(script: &str, timeout: Duration) -> Invocation {
    Invocation::new("sh", timeout).args(["-c", script, "fake-copy"])
}

#[tokio::test]
async fn captures_output_and_exit_code() {
    let runner = ProcessRunner::new();
    assert!(runner.is_available("sh"));

    let inv = shell("echo copied; echo 'dial tcp: connection refused' >&2; exit 3", Duration::from_secs(10));
    let out = runner.run(&inv, &CancellationToken::new()).await.unwrap();

    assert_eq!(out.status, RunStatus::Exited(Some(3)));
    assert_eq!(out.stdout.trim(), "copied");
    assert!(out.stderr.contains("connection refused"));
}

#[tokio::test]
async fn env_is_scoped_to_child() {
    let runner = ProcessRunner::new();
    let inv = shell("printf '%s' \"$HTTPS_PROXY\"", Duration::from_secs(10))
        .envs(vec![("HTTPS_PROXY".to_string(), "http://proxy.test:3128".to_string())]);
    let out = runner.run(&inv, &CancellationToken::new()).await.unwrap();

    assert!(out.success());
    assert_eq!(out.stdout, "http://proxy.test:3128");
    assert!(std::env::var("HTTPS_PROXY").map(|v| v != "http://proxy.test:3128").unwrap_or(true));
}

#[tokio::test]
async fn timeout_kills_child() {
    let runner = ProcessRunner::new();
    let started = Instant::now();
    let inv = shell("sleep 30", Duration::from_millis(200));
    let out = runner.run(&inv, &CancellationToken::new()).await.unwrap();

    assert_eq!(out.status, RunStatus::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn cancellation_kills_child() {
    let runner = ProcessRunner::new();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let out = runner.run(&shell("sleep 30", Duration::from_secs(60)), &cancel).await.unwrap();

    assert_eq!(out.status, RunStatus::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn orchestrator_with_fake_copy_tool() {
    let tmp = tempfile::tempdir().unwrap();
    let tool = tmp.path().join("fake-skopeo");
    std::fs::write(
        &tool,
        "#!/bin/sh\n\
         for last; do :; done\n\
         case \"$last\" in\n\
           *broken*) echo \"manifest unknown\" >&2; exit 1 ;;\n\
         esac\n\
         echo \"Copying to $last\"\n",
    )
    .unwrap();
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    let directory = RegistryDirectory::new(vec![RegistryDescriptor::new(
        "harbor",
        RegistryKind::Harbor,
        "harbor.local",
    )])
    .unwrap();
    let orch = SyncOrchestrator::new(
        Arc::new(TaskLedger::new()),
        Arc::new(directory),
        Arc::new(ProcessRunner::new()),
        tool.display().to_string(),
    );

    let id = orch
        .start(StartSyncRequest::new(["team/app:1", "team/broken:1"], "harbor"))
        .unwrap();
    let snap = tokio::time::timeout(Duration::from_secs(20), orch.wait(&id))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(snap.status, TaskStatus::Completed);
    assert_eq!(snap.errors, vec!["team/broken:1".to_string()]);
    assert!(snap
        .logs
        .iter()
        .any(|l| l.message.contains("Copying to docker://harbor.local/library/app:1")));
    assert!(snap.logs.iter().any(|l| l.message.contains("exit code 1")));
}
