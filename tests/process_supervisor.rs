// tests/process_supervisor.rs
#![cfg(unix)]

mod common;
use crate::common::init_tracing;
use crate::common::scripts::write_script;

use std::error::Error;
use std::path::Path;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use cardwatch::config::ProcessSection;
use cardwatch::errors::CardwatchError;
use cardwatch::process::{ProcessState, ProcessSupervisor};
use cardwatch::types::{RepoKey, RunMode};

type TestResult = Result<(), Box<dyn Error>>;

fn supervisor_for(program: &Path, grace_millis: u64) -> ProcessSupervisor {
    let mut cfg = ProcessSection::new(program, program.parent().unwrap().join("out"));
    cfg.startup_grace_millis = grace_millis;
    cfg.stop_timeout_seconds = 2;
    cfg.oneshot_args = vec!["{owner}".into(), "{repo}".into()];
    ProcessSupervisor::new(&cfg)
}

#[tokio::test]
async fn second_start_fails_with_already_running() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let program = write_script(dir.path(), "sleeper.sh", "sleep 30");
    let supervisor = supervisor_for(&program, 100);

    let handle = supervisor.start(RunMode::Watch, None).await?;
    assert_eq!(handle.state, ProcessState::Running);
    assert!(handle.pid.is_some());
    assert!(handle.started_at.is_some());

    match supervisor.start(RunMode::Watch, None).await {
        Err(CardwatchError::AlreadyRunning { pid }) => assert_eq!(pid, handle.pid),
        other => panic!("expected AlreadyRunning, got {other:?}"),
    }

    let stopped = supervisor.stop(true, Duration::from_secs(2)).await?;
    assert_eq!(stopped.state, ProcessState::Stopped);
    assert_eq!(stopped.pid, None);
    Ok(())
}

#[tokio::test]
async fn concurrent_starts_yield_exactly_one_process() -> TestResult {
    let dir = tempfile::tempdir()?;
    let program = write_script(dir.path(), "sleeper.sh", "sleep 30");
    let supervisor = supervisor_for(&program, 100);

    let (a, b) = tokio::join!(
        supervisor.start(RunMode::Watch, None),
        supervisor.start(RunMode::Watch, None)
    );
    let started = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(started, 1);

    supervisor.stop(false, Duration::ZERO).await?;
    assert_eq!(supervisor.status().state, ProcessState::Stopped);
    Ok(())
}

#[tokio::test]
async fn stop_when_stopped_is_not_running() {
    let supervisor = supervisor_for(Path::new("/nonexistent/gen"), 50);
    let err = supervisor.stop(true, Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(err, CardwatchError::NotRunning));
}

#[tokio::test]
async fn graceful_stop_escalates_to_kill() -> TestResult {
    let dir = tempfile::tempdir()?;
    let program = write_script(
        dir.path(),
        "stubborn.sh",
        "trap '' TERM\nwhile true; do sleep 0.05; done",
    );
    let supervisor = supervisor_for(&program, 100);
    supervisor.start(RunMode::Watch, None).await?;

    let stopped = timeout(
        Duration::from_secs(10),
        supervisor.stop(true, Duration::from_millis(300)),
    )
    .await??;
    assert_eq!(stopped.state, ProcessState::Stopped);
    Ok(())
}

#[tokio::test]
async fn crash_is_detected_without_a_stop_call() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let program = write_script(dir.path(), "crasher.sh", "sleep 0.3\nexit 3");
    let supervisor = supervisor_for(&program, 50);

    let handle = supervisor.start(RunMode::Watch, None).await?;
    assert_eq!(handle.state, ProcessState::Running);

    let mut rx = supervisor.subscribe();
    let exited = timeout(
        Duration::from_secs(5),
        rx.wait_for(|h| h.state == ProcessState::Failed),
    )
    .await??
    .clone();
    assert_eq!(exited.last_exit_code, Some(3));
    assert_eq!(supervisor.status().state, ProcessState::Failed);

    // A failed process can be started again.
    let again = supervisor.start(RunMode::Watch, None).await?;
    assert!(again.state.is_live());
    supervisor.stop(false, Duration::ZERO).await.ok();
    Ok(())
}

#[tokio::test]
async fn immediate_non_zero_exit_is_a_launch_error() -> TestResult {
    let dir = tempfile::tempdir()?;
    let program = write_script(dir.path(), "broken.sh", "exit 7");
    let supervisor = supervisor_for(&program, 500);

    let err = supervisor.start(RunMode::OneShot, None).await.unwrap_err();
    assert!(matches!(err, CardwatchError::ProcessLaunch(_)));
    assert_eq!(supervisor.status().state, ProcessState::Failed);
    assert_eq!(supervisor.status().last_exit_code, Some(7));
    Ok(())
}

#[tokio::test]
async fn missing_program_is_a_launch_error() {
    let supervisor = supervisor_for(Path::new("/nonexistent/dir/gen"), 50);
    let err = supervisor.start(RunMode::OneShot, None).await.unwrap_err();
    assert!(matches!(err, CardwatchError::ProcessLaunch(_)));
    assert_eq!(supervisor.status().state, ProcessState::Failed);
}

#[tokio::test]
async fn one_shot_run_substitutes_repository_arguments() -> TestResult {
    let dir = tempfile::tempdir()?;
    let record = dir.path().join("args.txt");
    let program = write_script(
        dir.path(),
        "echoer.sh",
        &format!("echo \"$1 $2\" > '{}'", record.display()),
    );
    let supervisor = supervisor_for(&program, 1000);

    let key = RepoKey::new("A", "B", "main");
    let handle = supervisor.start(RunMode::OneShot, Some(&key)).await?;
    if handle.state.is_live() {
        supervisor
            .wait_for_exit(Duration::from_secs(5), &CancellationToken::new())
            .await?;
    }

    assert_eq!(std::fs::read_to_string(&record)?.trim(), "A B");
    assert_eq!(supervisor.status().state, ProcessState::Stopped);
    Ok(())
}

#[tokio::test]
async fn wait_for_exit_observes_cancellation() -> TestResult {
    let dir = tempfile::tempdir()?;
    let program = write_script(dir.path(), "sleeper.sh", "sleep 30");
    let supervisor = supervisor_for(&program, 50);
    supervisor.start(RunMode::Watch, None).await?;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = supervisor
        .wait_for_exit(Duration::from_secs(5), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, CardwatchError::Cancelled));

    supervisor.stop(false, Duration::ZERO).await?;
    Ok(())
}
