// src/monitor/cycle.rs

//! One generation cycle: detect → generate → observe → dispatch → commit.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{CardwatchError, Result};
use crate::monitor::pending::GenerationRequest;
use crate::monitor::poll::poll;
use crate::monitor::Monitor;
use crate::notify::{delivery_failed, NotificationOutcome, Payload};
use crate::process::{ProcessHandle, ProcessState};
use crate::types::{RepoKey, RunMode};
use crate::watch::ArtifactEvent;

/// How a cycle (or an attempt to run one) ended without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Branch head matches the recorded commit.
    Unchanged { sha: String },
    /// Artifact produced and dispatched; `sha` is now recorded.
    Committed {
        sha: String,
        artifact: PathBuf,
        outcomes: Vec<NotificationOutcome>,
    },
    /// Another cycle for this repository is still running.
    Busy,
    /// Polling is disabled until the configuration is reloaded.
    Disabled { reason: String },
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleOutcome::Unchanged { sha } => write!(f, "unchanged ({})", short_sha(sha)),
            CycleOutcome::Committed { sha, outcomes, .. } => {
                let sent = outcomes.iter().filter(|o| o.success).count();
                write!(
                    f,
                    "new commit {} delivered to {sent}/{} subscribers",
                    short_sha(sha),
                    outcomes.len()
                )
            }
            CycleOutcome::Busy => f.write_str("a check is already in progress"),
            CycleOutcome::Disabled { reason } => write!(f, "disabled: {reason}"),
        }
    }
}

pub fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}

impl Monitor {
    /// Poll `key` once and run the full cycle if its branch head moved.
    ///
    /// The caller holds the repository's in-flight guard.
    pub(crate) async fn run_cycle(
        &self,
        key: &RepoKey,
        cancel: &CancellationToken,
    ) -> Result<CycleOutcome> {
        let last_sha = self.store.last_sha(key).ok_or_else(|| {
            CardwatchError::NotFound(format!("repository {key} is not configured"))
        })?;

        let check = tokio::select! {
            _ = cancel.cancelled() => return Err(CardwatchError::Cancelled),
            res = poll(self.source.as_ref(), key, &last_sha) => res?,
        };

        if !check.changed {
            return Ok(CycleOutcome::Unchanged { sha: check.new_sha });
        }

        info!(
            repo = %key,
            old = %short_sha(&last_sha),
            new = %short_sha(&check.new_sha),
            "new commit detected"
        );
        let request = GenerationRequest::new(key.clone(), check.new_sha.clone());
        let artifact = self.generate(request, cancel).await?;

        let caption = format!(
            "{}/{} ({}) updated: {}",
            key.owner,
            key.repo,
            key.branch,
            short_sha(&check.new_sha)
        );
        let payload = Payload::Image {
            path: artifact.path.clone(),
            caption: Some(caption),
        };
        let outcomes = tokio::select! {
            _ = cancel.cancelled() => return Err(CardwatchError::Cancelled),
            outcomes = self.dispatcher.dispatch(&payload) => outcomes,
        };
        self.remember_artifact(&artifact);

        // Cancellation is observed before the commit, never after.
        if cancel.is_cancelled() {
            return Err(CardwatchError::Cancelled);
        }
        if delivery_failed(&outcomes) {
            return Err(CardwatchError::Notification {
                target: "all subscribers".to_string(),
                reason: format!("none of {} deliveries succeeded", outcomes.len()),
            });
        }

        self.store.commit_sha(key, &check.new_sha)?;
        info!(repo = %key, sha = %check.new_sha, "cycle complete");

        Ok(CycleOutcome::Committed {
            sha: check.new_sha,
            artifact: artifact.path,
            outcomes,
        })
    }

    /// Get an artifact for `request` from this repository's own one-shot run,
    /// or from a generator already running in watch mode.
    ///
    /// A one-shot run started for another repository is never shared: its
    /// arguments name that repository. The cycle waits for it to exit
    /// (bounded by the artifact window) and then starts its own.
    async fn generate(
        &self,
        request: GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<ArtifactEvent> {
        let key = request.repository.clone();
        let window = self.settings.artifact_timeout;
        let deadline = Instant::now() + window;

        let (mut stream, mut ticket, own_run) = loop {
            let current = self.supervisor.status();
            let shared = current.mode == Some(RunMode::Watch)
                && matches!(current.state, ProcessState::Starting | ProcessState::Running);
            if current.state.is_live() && !shared {
                info!(repo = %key, pid = ?current.pid, "generator busy with another run; waiting for it to exit");
                let remaining = deadline.saturating_duration_since(Instant::now());
                self.supervisor
                    .wait_for_exit(remaining, cancel)
                    .await
                    .map_err(|err| match err {
                        CardwatchError::ArtifactTimeout(_) => CardwatchError::ArtifactTimeout(window),
                        other => other,
                    })?;
                continue;
            }

            // Watch before starting so no early artifact is missed.
            let stream =
                self.watcher
                    .observe(&self.settings.output_dir, window, cancel.child_token())?;
            let ticket = self.pending.register(request.clone());

            if shared {
                info!(repo = %key, pid = ?current.pid, "watch-mode generator running; waiting for its output");
                break (stream, ticket, None);
            }
            match self.supervisor.start(RunMode::OneShot, Some(&key)).await {
                Ok(handle) => {
                    debug!(repo = %key, pid = ?handle.pid, "one-shot generation started");
                    break (stream, ticket, Some(handle));
                }
                // Lost the race for the supervisor; look again.
                Err(CardwatchError::AlreadyRunning { .. }) => continue,
                Err(err) => return Err(err),
            }
        };

        let started_here = own_run.is_some();
        let run_started_at = own_run.and_then(|h| h.started_at);
        let mut process_rx = self.supervisor.subscribe();

        let result = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Err(CardwatchError::Cancelled),
                assigned = ticket.receiver() => match assigned {
                    Ok(event) => break Ok(event),
                    Err(_) => break Err(CardwatchError::Cancelled),
                },
                event = stream.next() => match event {
                    Some(event) => {
                        if let Some(owner) = self.pending.offer(event) {
                            debug!(repo = %owner, "artifact assigned");
                        }
                    }
                    None if cancel.is_cancelled() => break Err(CardwatchError::Cancelled),
                    None => break Err(CardwatchError::ArtifactTimeout(window)),
                },
                code = failed_exit(&mut process_rx, run_started_at), if started_here => {
                    break Err(CardwatchError::ProcessCrash(format!(
                        "one-shot run for {key} exited with code {code:?}"
                    )));
                }
            }
        };

        if result.is_err() && started_here {
            let current = self.supervisor.status();
            if current.state.is_live() && current.started_at == run_started_at {
                if let Err(err) = self.supervisor.stop(true, self.settings.stop_timeout).await {
                    warn!(repo = %key, error = %err, "stopping abandoned one-shot run failed");
                }
            }
        }
        result
    }
}

/// Exit code of the run started at `started_at`, once it fails.
async fn failed_exit(
    rx: &mut watch::Receiver<ProcessHandle>,
    started_at: Option<DateTime<Utc>>,
) -> Option<i32> {
    rx.wait_for(|h| h.started_at == started_at && h.state == ProcessState::Failed)
        .await
        .ok()
        .and_then(|h| h.last_exit_code)
}
