// src/monitor/scheduler.rs

//! Per-repository poll timers and on-demand checks.
//!
//! Each configured repository gets its own task. The task and on-demand
//! checks share one async mutex per repository, so two cycles for the same
//! repository can never overlap; repositories never wait for each other.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{CardwatchError, Result};
use crate::monitor::cycle::CycleOutcome;
use crate::monitor::schedule::{RepoSchedule, ScheduleEffect};
use crate::monitor::Monitor;
use crate::types::{RepoKey, RepositoryTarget};

/// Scheduling bookkeeping of one repository.
#[derive(Debug, Default)]
pub(crate) struct RepoSlot {
    in_flight: tokio::sync::Mutex<()>,
    schedule: Mutex<RepoSchedule>,
}

impl RepoSlot {
    fn schedule(&self) -> MutexGuard<'_, RepoSchedule> {
        self.schedule.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Running poll timers.
#[derive(Debug)]
pub(crate) struct Session {
    tasks: Vec<JoinHandle<()>>,
}

/// Read-only view of one repository for status reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoStatus {
    pub key: RepoKey,
    pub last_sha: String,
    pub in_flight: bool,
    pub consecutive_failures: u32,
    pub backoff: Option<Duration>,
    pub disabled: Option<String>,
}

impl Monitor {
    pub(crate) fn slot(&self, key: &RepoKey) -> Option<Arc<RepoSlot>> {
        self.slots().get(key).cloned()
    }

    pub(crate) fn slots(&self) -> MutexGuard<'_, BTreeMap<RepoKey, Arc<RepoSlot>>> {
        self.slots.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn cancel_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .child_token()
    }

    /// Replace the repository set, merging persisted last-seen SHAs.
    ///
    /// Every repository starts with a fresh schedule, which re-enables
    /// repositories disabled by a previous not-found error. Repositories that
    /// stay configured keep their in-flight guard, so a cycle still running
    /// across the reload cannot be joined by a second one.
    pub fn load_repositories(&self, configured: &[RepositoryTarget]) -> Result<usize> {
        let merged = self.store.sync_repositories(configured)?;
        let mut slots = self.slots();
        let mut previous = std::mem::take(&mut *slots);
        for repo in &merged {
            let key = repo.key();
            let slot = match previous.remove(&key) {
                Some(slot) => {
                    *slot.schedule() = RepoSchedule::new();
                    slot
                }
                None => Arc::new(RepoSlot::default()),
            };
            slots.insert(key, slot);
        }
        info!(count = merged.len(), "repository list loaded");
        Ok(merged.len())
    }

    pub fn is_monitoring(&self) -> bool {
        self.session
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_some()
    }

    /// Run one cycle for `key` now, unless one is already in flight.
    pub async fn check_repository(&self, key: &RepoKey) -> Result<CycleOutcome> {
        let cancel = self.cancel_token();
        self.check_with(key, &cancel, false).await
    }

    async fn check_with(
        &self,
        key: &RepoKey,
        cancel: &CancellationToken,
        respect_disabled: bool,
    ) -> Result<CycleOutcome> {
        let slot = self.slot(key).ok_or_else(|| {
            CardwatchError::NotFound(format!("repository {key} is not configured"))
        })?;

        if respect_disabled {
            if let Some(reason) = slot.schedule().disabled() {
                return Ok(CycleOutcome::Disabled {
                    reason: reason.to_string(),
                });
            }
        }

        let Ok(_guard) = slot.in_flight.try_lock() else {
            debug!(repo = %key, "cycle already in flight; not starting another");
            return Ok(CycleOutcome::Busy);
        };

        let result = self.run_cycle(key, cancel).await;

        match &result {
            Ok(outcome) => {
                slot.schedule().record_success();
                debug!(repo = %key, %outcome, "check finished");
            }
            Err(CardwatchError::Cancelled) => {
                debug!(repo = %key, "check cancelled");
            }
            Err(err) => {
                let effect = slot.schedule().record_error(err, self.settings.max_backoff);
                match &effect {
                    ScheduleEffect::Disabled(reason) => {
                        warn!(repo = %key, %reason, "repository disabled until configuration reload");
                    }
                    ScheduleEffect::Backoff(delay) => {
                        warn!(repo = %key, error = %err, ?delay, "backing off");
                    }
                    _ => warn!(repo = %key, error = %err, "cycle failed"),
                }
                if let Err(e) = self.store.record_error() {
                    warn!(error = %e, "persisting error counter failed");
                }
            }
        }
        result
    }

    /// Run a cycle for every configured repository concurrently.
    ///
    /// Results are returned in repository order.
    pub async fn check_all(self: &Arc<Self>) -> Vec<(RepoKey, Result<CycleOutcome>)> {
        let keys: Vec<RepoKey> = self.slots().keys().cloned().collect();
        let handles: Vec<_> = keys
            .into_iter()
            .map(|key| {
                let monitor = Arc::clone(self);
                let task_key = key.clone();
                let handle =
                    tokio::spawn(async move { monitor.check_repository(&task_key).await });
                (key, handle)
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (key, handle) in handles {
            let result = handle.await.unwrap_or_else(|e| {
                Err(CardwatchError::Other(anyhow::anyhow!("check task failed: {e}")))
            });
            results.push((key, result));
        }
        results
    }

    /// Start one poll timer per repository.
    ///
    /// Returns `false` if monitoring was already running.
    pub fn start_monitoring(self: &Arc<Self>) -> bool {
        let mut session = self.session.lock().unwrap_or_else(|p| p.into_inner());
        if session.is_some() {
            return false;
        }

        let Some(interval) = self.settings.refresh_interval else {
            info!("refresh interval is 0; scheduled polling disabled");
            *session = Some(Session { tasks: Vec::new() });
            return true;
        };

        let keys: Vec<RepoKey> = self.slots().keys().cloned().collect();
        let tasks = keys
            .into_iter()
            .map(|key| {
                let monitor = Arc::clone(self);
                let cancel = self.cancel_token();
                tokio::spawn(async move { monitor.repo_loop(key, interval, cancel).await })
            })
            .collect::<Vec<_>>();

        info!(repositories = tasks.len(), ?interval, "monitoring started");
        *session = Some(Session { tasks });
        true
    }

    /// Cancel all timers and every in-flight wait, then wait for the tasks.
    ///
    /// Returns `false` if monitoring was not running.
    pub async fn stop_monitoring(&self) -> bool {
        let session = self
            .session
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();

        {
            let mut cancel = self.cancel.lock().unwrap_or_else(|p| p.into_inner());
            cancel.cancel();
            *cancel = CancellationToken::new();
        }

        let Some(session) = session else {
            return false;
        };
        for task in session.tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "poll task ended abnormally");
            }
        }
        info!("monitoring stopped");
        true
    }

    /// Stop, swap in `configured` as the repository list, start again.
    pub async fn restart_monitoring(
        self: &Arc<Self>,
        configured: &[RepositoryTarget],
    ) -> Result<usize> {
        self.stop_monitoring().await;
        let count = self.load_repositories(configured)?;
        self.start_monitoring();
        Ok(count)
    }

    async fn repo_loop(self: Arc<Self>, key: RepoKey, interval: Duration, cancel: CancellationToken) {
        debug!(repo = %key, "poll timer started");
        loop {
            let _ = self.check_with(&key, &cancel, true).await;

            let Some(slot) = self.slot(&key) else {
                break;
            };
            let next = slot.schedule().next_delay(interval);
            let Some(delay) = next else {
                info!(repo = %key, "poll timer stopped (repository disabled)");
                break;
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        debug!(repo = %key, "poll timer finished");
    }

    pub fn repository_status(&self) -> Vec<RepoStatus> {
        let persisted = self.store.repositories();
        let slots = self.slots();
        persisted
            .into_iter()
            .filter_map(|repo| {
                let key = repo.key();
                let slot = slots.get(&key)?;
                let schedule = slot.schedule();
                Some(RepoStatus {
                    in_flight: slot.in_flight.try_lock().is_err(),
                    consecutive_failures: schedule.consecutive_failures(),
                    backoff: schedule.current_backoff(),
                    disabled: schedule.disabled().map(str::to_string),
                    last_sha: repo.last_commit_sha,
                    key,
                })
            })
            .collect()
    }
}
