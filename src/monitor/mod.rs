// src/monitor/mod.rs

//! Repository monitoring: polling, generation cycles and their schedule.
//!
//! - `poll.rs`: compare a branch head against the recorded commit.
//! - `schedule.rs`: pure per-repository backoff / disable bookkeeping.
//! - `pending.rs`: correlate observed artifacts with waiting requests.
//! - `cycle.rs`: the detect → generate → observe → dispatch → commit pipeline.
//! - `scheduler.rs`: per-repository timers, on-demand checks, cancellation.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::ConfigFile;
use crate::github::CommitSource;
use crate::notify::Dispatcher;
use crate::process::ProcessSupervisor;
use crate::state::StateStore;
use crate::types::RepoKey;
use crate::watch::{ArtifactEvent, ArtifactWatcher};

pub mod cycle;
pub mod pending;
pub mod poll;
pub mod schedule;
pub mod scheduler;

pub use cycle::{short_sha, CycleOutcome};
pub use pending::{GenerationRequest, PendingRequests, PendingTicket};
pub use poll::{poll, CommitCheckResult};
pub use schedule::{backoff_delay, RepoSchedule, ScheduleEffect, BACKOFF_BASE};
pub use scheduler::RepoStatus;

/// Timing knobs of the monitor.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// `None` disables the per-repository timers.
    pub refresh_interval: Option<Duration>,
    pub artifact_timeout: Duration,
    pub max_backoff: Duration,
    pub stop_timeout: Duration,
    pub output_dir: PathBuf,
}

impl MonitorSettings {
    pub fn from_config(cfg: &ConfigFile) -> Self {
        Self {
            refresh_interval: cfg.monitor.refresh_interval(),
            artifact_timeout: cfg.monitor.artifact_timeout(),
            max_backoff: cfg.monitor.max_backoff(),
            stop_timeout: cfg.process.stop_timeout(),
            output_dir: cfg.process.output_dir.clone(),
        }
    }
}

/// Owns the repository schedule and drives generation cycles.
pub struct Monitor {
    settings: MonitorSettings,
    source: Arc<dyn CommitSource>,
    store: StateStore,
    supervisor: Arc<ProcessSupervisor>,
    watcher: ArtifactWatcher,
    dispatcher: Arc<Dispatcher>,
    pending: Arc<PendingRequests>,
    slots: Mutex<BTreeMap<RepoKey, Arc<scheduler::RepoSlot>>>,
    session: Mutex<Option<scheduler::Session>>,
    cancel: Mutex<CancellationToken>,
    last_artifact: Mutex<Option<ArtifactEvent>>,
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("settings", &self.settings)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl Monitor {
    pub fn new(
        settings: MonitorSettings,
        source: Arc<dyn CommitSource>,
        store: StateStore,
        supervisor: Arc<ProcessSupervisor>,
        watcher: ArtifactWatcher,
        dispatcher: Arc<Dispatcher>,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            source,
            store,
            supervisor,
            watcher,
            dispatcher,
            pending: PendingRequests::new(),
            slots: Mutex::new(BTreeMap::new()),
            session: Mutex::new(None),
            cancel: Mutex::new(CancellationToken::new()),
            last_artifact: Mutex::new(None),
        })
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Snapshot of the requests still waiting for an artifact.
    pub fn pending_requests(&self) -> Vec<GenerationRequest> {
        self.pending.snapshot()
    }

    /// Most recent artifact observed by any cycle in this process lifetime.
    pub fn last_artifact(&self) -> Option<ArtifactEvent> {
        self.last_artifact
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub(crate) fn remember_artifact(&self, event: &ArtifactEvent) {
        *self.last_artifact.lock().unwrap_or_else(|p| p.into_inner()) = Some(event.clone());
    }
}
