// src/watch/watcher.rs

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::fs::{FileSystem, RealFileSystem};
use crate::watch::debounce::{SettleTracker, Settled};
use crate::watch::hash::digest_file;
use crate::watch::patterns::ArtifactFilter;

/// A completely written artifact file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactEvent {
    pub path: PathBuf,
    pub observed_at: DateTime<Utc>,
    /// blake3 of the file contents at the time it was reported.
    pub digest: String,
}

/// Factory for [`ArtifactStream`]s over an output directory.
#[derive(Clone)]
pub struct ArtifactWatcher {
    settle: Duration,
    filter: ArtifactFilter,
    fs: Arc<dyn FileSystem>,
}

impl fmt::Debug for ArtifactWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactWatcher")
            .field("settle", &self.settle)
            .field("filter", &self.filter)
            .finish()
    }
}

impl ArtifactWatcher {
    pub fn new(filter: ArtifactFilter, settle: Duration) -> Self {
        Self {
            settle,
            filter,
            fs: Arc::new(RealFileSystem),
        }
    }

    pub fn with_fs(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    /// Start observing `directory` for new artifacts.
    ///
    /// Only files created or modified after this call are reported. The
    /// returned stream ends once `timeout` has elapsed or `cancel` fires.
    /// The directory is created if it does not exist yet.
    pub fn observe(
        &self,
        directory: impl AsRef<Path>,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<ArtifactStream> {
        let directory = directory.as_ref();
        if !self.fs.is_dir(directory) {
            self.fs.create_dir_all(directory)?;
        }
        let directory = directory
            .canonicalize()
            .unwrap_or_else(|_| directory.to_path_buf());

        // Channel from the blocking notify callback into the async world.
        let (event_tx, event_rx) = mpsc::unbounded_channel::<Event>();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    // The receiver is gone once the stream is dropped.
                    let _ = event_tx.send(event);
                }
                Err(err) => {
                    warn!(error = %err, "file watch error");
                }
            },
            Config::default(),
        )?;

        watcher.watch(&directory, RecursiveMode::NonRecursive)?;
        info!(dir = ?directory, ?timeout, "observing output directory");

        Ok(ArtifactStream {
            _watcher: watcher,
            events: Some(event_rx),
            tracker: SettleTracker::new(self.settle),
            filter: self.filter.clone(),
            fs: Arc::clone(&self.fs),
            deadline: Instant::now() + timeout,
            cancel,
            ready: VecDeque::new(),
            reported: HashSet::new(),
            finished: false,
        })
    }
}

/// Lazy, finite sequence of [`ArtifactEvent`]s from one output directory.
///
/// Dropping the stream stops the underlying filesystem watcher.
pub struct ArtifactStream {
    _watcher: RecommendedWatcher,
    events: Option<mpsc::UnboundedReceiver<Event>>,
    tracker: SettleTracker,
    filter: ArtifactFilter,
    fs: Arc<dyn FileSystem>,
    deadline: Instant,
    cancel: CancellationToken,
    ready: VecDeque<ArtifactEvent>,
    reported: HashSet<(PathBuf, String)>,
    finished: bool,
}

impl fmt::Debug for ArtifactStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactStream")
            .field("deadline", &self.deadline)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl ArtifactStream {
    /// Next settled artifact, or `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<ArtifactEvent> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return Some(event);
            }
            if self.finished {
                return None;
            }

            let now = Instant::now();
            if self.cancel.is_cancelled() {
                debug!("artifact stream cancelled");
                self.finished = true;
                continue;
            }

            let settled = self.tracker.take_settled(now);
            if !settled.is_empty() {
                self.confirm(settled, now).await;
                continue;
            }

            if now >= self.deadline {
                debug!("artifact stream reached its deadline");
                self.finished = true;
                continue;
            }

            let wake = self
                .tracker
                .next_deadline()
                .map_or(self.deadline, |d| d.min(self.deadline));

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {}
                event = recv_event(&mut self.events) => match event {
                    Some(event) => self.record(event),
                    None => {
                        warn!("filesystem event channel closed");
                        self.events = None;
                    }
                },
                _ = sleep_until(wake) => {}
            }
        }
    }

    fn record(&mut self, event: Event) {
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            return;
        }
        let now = Instant::now();
        for path in event.paths {
            if !self.filter.matches(&path) {
                continue;
            }
            let len = self.fs.file_len(&path).ok();
            debug!(path = ?path, ?len, "artifact candidate changed");
            self.tracker.record(&path, now, len);
        }
    }

    /// Re-check settled candidates and queue the ones that are complete.
    async fn confirm(&mut self, settled: Vec<Settled>, now: Instant) {
        for Settled { path, len } in settled {
            if !self.fs.is_file(&path) {
                debug!(path = ?path, "candidate vanished before settling");
                continue;
            }
            let current = match self.fs.file_len(&path) {
                Ok(len) => len,
                Err(err) => {
                    debug!(path = ?path, error = %err, "stat failed; waiting for more events");
                    continue;
                }
            };
            if current == 0 || len != Some(current) {
                // Still being written; give it another settle window.
                self.tracker.record(&path, now, Some(current));
                continue;
            }

            let hash_path = path.clone();
            let digest = match tokio::task::spawn_blocking(move || digest_file(&hash_path)).await {
                Ok(Ok(digest)) => digest,
                Ok(Err(err)) => {
                    warn!(path = ?path, error = %err, "hashing artifact failed");
                    continue;
                }
                Err(err) => {
                    warn!(path = ?path, error = %err, "hashing task failed");
                    continue;
                }
            };
            if digest.len != current {
                self.tracker.record(&path, now, Some(digest.len));
                continue;
            }
            let digest = digest.hex;

            if !self.reported.insert((path.clone(), digest.clone())) {
                continue;
            }

            info!(path = ?path, digest = %digest, "artifact observed");
            self.ready.push_back(ArtifactEvent {
                path,
                observed_at: Utc::now(),
                digest,
            });
        }
    }
}

async fn recv_event(events: &mut Option<mpsc::UnboundedReceiver<Event>>) -> Option<Event> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
