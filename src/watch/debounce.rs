// src/watch/debounce.rs

//! Settle-window bookkeeping for filesystem events.
//!
//! Pure and clock-free: callers pass the current instant in. A path is
//! "settled" once no event for it has been seen for the whole settle window.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Pending {
    last_event: Instant,
    len: Option<u64>,
}

/// A path whose settle window elapsed, with the size seen at its last event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settled {
    pub path: PathBuf,
    pub len: Option<u64>,
}

#[derive(Debug)]
pub struct SettleTracker {
    settle: Duration,
    pending: HashMap<PathBuf, Pending>,
}

impl SettleTracker {
    pub fn new(settle: Duration) -> Self {
        Self {
            settle,
            pending: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Note an event for `path`, restarting its settle window.
    pub fn record(&mut self, path: &Path, now: Instant, len: Option<u64>) {
        self.pending.insert(
            path.to_path_buf(),
            Pending {
                last_event: now,
                len,
            },
        );
    }

    /// Earliest instant at which some pending path settles.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .map(|p| p.last_event + self.settle)
            .min()
    }

    /// Remove and return every path that has been quiet for the settle window.
    pub fn take_settled(&mut self, now: Instant) -> Vec<Settled> {
        let settle = self.settle;
        let ready: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, p)| now >= p.last_event + settle)
            .map(|(path, _)| path.clone())
            .collect();

        let mut out: Vec<Settled> = ready
            .into_iter()
            .filter_map(|path| {
                self.pending
                    .remove(&path)
                    .map(|p| Settled { path, len: p.len })
            })
            .collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        out
    }
}
