// src/process/supervisor.rs

//! Lifecycle owner for the external generator process.
//!
//! - `start`/`stop` are serialized by one async mutex, so two concurrent
//!   start requests can never produce two live processes.
//! - The child itself is owned by a monitor task. It is the only writer of
//!   exit transitions and publishes them on a `watch` channel the moment
//!   `wait()` returns, so `status()` never reports a dead process as running
//!   once the exit has been reaped.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ProcessSection;
use crate::errors::{CardwatchError, Result};
use crate::process::handle::{ProcessHandle, ProcessState};
use crate::process::output::drain_lines;
use crate::process::signal::terminate;
use crate::types::{RepoKey, RunMode};

/// Upper bound for waiting on a process after a forceful kill.
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Bookkeeping for the currently spawned child.
struct LiveProcess {
    pid: Option<u32>,
    kill: Option<oneshot::Sender<()>>,
    stopping: Arc<AtomicBool>,
}

/// Supervises exactly one instance of the generator at a time.
pub struct ProcessSupervisor {
    program: PathBuf,
    working_dir: PathBuf,
    oneshot_args: Vec<String>,
    watch_args: Vec<String>,
    startup_grace: Duration,
    stop_timeout: Duration,
    control: Mutex<Option<LiveProcess>>,
    state_tx: watch::Sender<ProcessHandle>,
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("program", &self.program)
            .field("state", &*self.state_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl ProcessSupervisor {
    pub fn new(cfg: &ProcessSection) -> Self {
        let (state_tx, _) = watch::channel(ProcessHandle::default());
        Self {
            program: cfg.program.clone(),
            working_dir: cfg.effective_working_dir(),
            oneshot_args: cfg.oneshot_args.clone(),
            watch_args: cfg.watch_args.clone(),
            startup_grace: cfg.startup_grace(),
            stop_timeout: cfg.stop_timeout(),
            control: Mutex::new(None),
            state_tx,
        }
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }

    /// Current snapshot.
    pub fn status(&self) -> ProcessHandle {
        self.state_tx.borrow().clone()
    }

    /// Receiver that sees every state transition, including exits.
    pub fn subscribe(&self) -> watch::Receiver<ProcessHandle> {
        self.state_tx.subscribe()
    }

    fn args_for(&self, mode: RunMode, repo: Option<&RepoKey>) -> Vec<String> {
        match mode {
            RunMode::Watch => self.watch_args.clone(),
            RunMode::OneShot => self
                .oneshot_args
                .iter()
                .map(|arg| match repo {
                    Some(key) => arg
                        .replace("{owner}", &key.owner)
                        .replace("{repo}", &key.repo)
                        .replace("{branch}", &key.branch),
                    None => arg.clone(),
                })
                .collect(),
        }
    }

    /// Launch the generator.
    ///
    /// Fails with `AlreadyRunning` unless the current state is `Stopped` or
    /// `Failed`. Returns once the process has survived the startup grace
    /// period (state `Running`) or, for a one-shot run that finished cleanly
    /// within that period, with state `Stopped`.
    pub async fn start(&self, mode: RunMode, repo: Option<&RepoKey>) -> Result<ProcessHandle> {
        let mut live = self.control.lock().await;

        let current = self.status();
        if current.state.is_live() {
            return Err(CardwatchError::AlreadyRunning { pid: current.pid });
        }

        let args = self.args_for(mode, repo);
        self.state_tx.send_modify(|h| {
            h.state = ProcessState::Starting;
            h.pid = None;
            h.mode = Some(mode);
            h.started_at = Some(Utc::now());
        });

        info!(
            program = ?self.program,
            cwd = ?self.working_dir,
            ?args,
            %mode,
            "starting generator process"
        );

        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                self.state_tx.send_modify(|h| {
                    h.state = ProcessState::Failed;
                    h.pid = None;
                    h.last_exit_code = None;
                });
                warn!(program = ?self.program, error = %err, "failed to spawn generator");
                return Err(CardwatchError::ProcessLaunch(format!(
                    "spawning {:?} in {:?}: {err}",
                    self.program, self.working_dir
                )));
            }
        };

        let pid = child.id();
        drain_lines("stdout", pid, child.stdout.take());
        drain_lines("stderr", pid, child.stderr.take());

        let (kill_tx, kill_rx) = oneshot::channel();
        let stopping = Arc::new(AtomicBool::new(false));
        self.state_tx.send_modify(|h| h.pid = pid);

        tokio::spawn(monitor_child(
            child,
            kill_rx,
            self.state_tx.clone(),
            Arc::clone(&stopping),
        ));

        *live = Some(LiveProcess {
            pid,
            kill: Some(kill_tx),
            stopping,
        });

        // Confirm the process is actually alive.
        let mut rx = self.state_tx.subscribe();
        let exited_early = timeout(
            self.startup_grace,
            rx.wait_for(|h| !h.state.is_live()),
        )
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false);

        if !exited_early {
            self.state_tx.send_if_modified(|h| {
                if h.state == ProcessState::Starting {
                    h.state = ProcessState::Running;
                    true
                } else {
                    false
                }
            });
            let handle = self.status();
            info!(pid = ?handle.pid, %mode, "generator process running");
            return Ok(handle);
        }

        let handle = self.status();
        if handle.state == ProcessState::Failed {
            return Err(CardwatchError::ProcessLaunch(format!(
                "process exited immediately (exit code {:?})",
                handle.last_exit_code
            )));
        }
        debug!(%mode, "generator finished within startup grace period");
        Ok(handle)
    }

    /// Stop the generator.
    ///
    /// With `graceful`, a termination signal is sent first and the process
    /// gets `stop_timeout` to exit before it is killed.
    pub async fn stop(&self, graceful: bool, stop_timeout: Duration) -> Result<ProcessHandle> {
        let mut guard = self.control.lock().await;

        if !self.status().state.is_live() {
            *guard = None;
            return Err(CardwatchError::NotRunning);
        }
        let Some(mut live) = guard.take() else {
            return Err(CardwatchError::NotRunning);
        };

        live.stopping.store(true, Ordering::SeqCst);
        self.state_tx.send_if_modified(|h| {
            if h.state.is_live() {
                h.state = ProcessState::Stopping;
                true
            } else {
                false
            }
        });

        let mut rx = self.state_tx.subscribe();

        if graceful {
            if let Some(pid) = live.pid {
                info!(pid, timeout = ?stop_timeout, "sending termination signal");
                match terminate(pid) {
                    Ok(()) => {
                        let exited = timeout(stop_timeout, rx.wait_for(|h| !h.state.is_live()))
                            .await
                            .map(|r| r.is_ok())
                            .unwrap_or(false);
                        if exited {
                            return Ok(self.status());
                        }
                        warn!(pid, "process ignored termination signal; killing");
                    }
                    Err(err) => {
                        warn!(pid, error = %err, "termination signal failed; killing");
                    }
                }
            }
        }

        if let Some(kill) = live.kill.take() {
            let _ = kill.send(());
        }
        let exited = timeout(KILL_WAIT, rx.wait_for(|h| !h.state.is_live()))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false);
        if !exited {
            warn!(pid = ?live.pid, "process did not exit after kill");
            return Err(CardwatchError::ProcessCrash(
                "process did not exit after a forceful kill".to_string(),
            ));
        }

        Ok(self.status())
    }

    /// Wait until the current process (if any) is no longer live.
    pub async fn wait_for_exit(
        &self,
        limit: Duration,
        cancel: &CancellationToken,
    ) -> Result<ProcessHandle> {
        let mut rx = self.state_tx.subscribe();
        tokio::select! {
            _ = cancel.cancelled() => Err(CardwatchError::Cancelled),
            res = timeout(limit, rx.wait_for(|h| !h.state.is_live())) => match res {
                Ok(Ok(handle)) => Ok(handle.clone()),
                Ok(Err(_)) => Err(CardwatchError::Other(anyhow::anyhow!("process state channel closed"))),
                Err(_) => Err(CardwatchError::ArtifactTimeout(limit)),
            },
        }
    }
}

/// Own the child until it exits and publish the exit transition.
async fn monitor_child(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    state_tx: watch::Sender<ProcessHandle>,
    stopping: Arc<AtomicBool>,
) {
    let pid = child.id();
    let mut kill_rx = kill_rx;

    let status = tokio::select! {
        status = child.wait() => status,
        Ok(()) = &mut kill_rx => {
            info!(pid = ?pid, "killing generator process");
            if let Err(e) = child.start_kill() {
                warn!(pid = ?pid, error = %e, "failed to kill generator process");
            }
            child.wait().await
        }
    };

    let requested = stopping.load(Ordering::SeqCst);
    let (code, success) = match &status {
        Ok(s) => (s.code(), s.success()),
        Err(e) => {
            warn!(pid = ?pid, error = %e, "waiting for generator process failed");
            (None, false)
        }
    };

    let next = if requested || success {
        ProcessState::Stopped
    } else {
        ProcessState::Failed
    };

    state_tx.send_modify(|h| {
        h.state = next;
        h.pid = None;
        h.last_exit_code = code;
    });

    if next == ProcessState::Failed {
        warn!(pid = ?pid, exit_code = ?code, "generator process exited abnormally");
    } else {
        info!(pid = ?pid, exit_code = ?code, requested, "generator process exited");
    }
}
