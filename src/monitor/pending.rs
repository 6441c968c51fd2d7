// src/monitor/pending.rs

//! Correlation of observed artifacts with outstanding generation requests.
//!
//! The generator does not tag its output with the repository it was run
//! for, so matching is best effort:
//! - a request whose `correlation_hint` appears in the artifact's file name
//!   wins;
//! - otherwise the oldest pending request gets the artifact (FIFO), and the
//!   choice is logged as ambiguous when more than one request was waiting.
//!
//! While requests are pending, an artifact (path + digest) is handed out at
//! most once, even when several cycles observe the same directory. Once the
//! queue drains the record is forgotten, so a retried cycle for the same
//! commit can receive an identical card again.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::types::RepoKey;
use crate::watch::ArtifactEvent;

/// A detected change waiting for its artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub repository: RepoKey,
    pub sha: String,
    pub requested_at: DateTime<Utc>,
    pub correlation_hint: String,
}

impl GenerationRequest {
    pub fn new(repository: RepoKey, sha: impl Into<String>) -> Self {
        let correlation_hint = repository.repo.to_lowercase();
        Self {
            repository,
            sha: sha.into(),
            requested_at: Utc::now(),
            correlation_hint,
        }
    }
}

struct Waiter {
    id: u64,
    request: GenerationRequest,
    tx: oneshot::Sender<ArtifactEvent>,
}

/// Shorter hints match too many file names to mean anything.
const MIN_HINT_LEN: usize = 3;

#[derive(Default)]
struct Inner {
    next_id: u64,
    queue: VecDeque<Waiter>,
    /// Artifacts assigned since the queue was last empty.
    claimed: Vec<(PathBuf, String)>,
}

impl Inner {
    fn forget_claims_if_idle(&mut self) {
        if self.queue.is_empty() {
            self.claimed.clear();
        }
    }
}

/// Scheduler-owned set of pending requests.
#[derive(Default)]
pub struct PendingRequests {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for PendingRequests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequests")
            .field("pending", &self.lock().queue.len())
            .finish()
    }
}

/// Registration of one request. Dropping it withdraws the request.
pub struct PendingTicket {
    id: u64,
    owner: Arc<PendingRequests>,
    rx: oneshot::Receiver<ArtifactEvent>,
}

impl PendingTicket {
    /// The receiving side; resolves once an artifact was assigned.
    pub fn receiver(&mut self) -> &mut oneshot::Receiver<ArtifactEvent> {
        &mut self.rx
    }
}

impl Drop for PendingTicket {
    fn drop(&mut self) {
        self.owner.withdraw(self.id);
    }
}

impl PendingRequests {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn register(self: &Arc<Self>, request: GenerationRequest) -> PendingTicket {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.lock();
        inner.queue.retain(|w| !w.tx.is_closed());
        inner.forget_claims_if_idle();
        let id = inner.next_id;
        inner.next_id += 1;
        debug!(repo = %request.repository, sha = %request.sha, "generation request pending");
        inner.queue.push_back(Waiter { id, request, tx });
        PendingTicket {
            id,
            owner: Arc::clone(self),
            rx,
        }
    }

    fn withdraw(&self, id: u64) {
        let mut inner = self.lock();
        inner.queue.retain(|w| w.id != id);
        inner.forget_claims_if_idle();
    }

    /// Read-only view, oldest first.
    pub fn snapshot(&self) -> Vec<GenerationRequest> {
        self.lock().queue.iter().map(|w| w.request.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hand `event` to the best matching request.
    ///
    /// Returns the repository it was assigned to, or `None` if the artifact
    /// was already claimed or nobody is waiting.
    pub fn offer(&self, event: ArtifactEvent) -> Option<RepoKey> {
        let mut inner = self.lock();
        inner.queue.retain(|w| !w.tx.is_closed());
        inner.forget_claims_if_idle();

        let claim = (event.path.clone(), event.digest.clone());
        if inner.claimed.contains(&claim) {
            return None;
        }
        if inner.queue.is_empty() {
            debug!(path = ?event.path, "artifact observed with no pending request");
            return None;
        }

        let file_name = event
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let hinted = inner.queue.iter().position(|w| {
            w.request.correlation_hint.len() >= MIN_HINT_LEN
                && file_name.contains(&w.request.correlation_hint)
        });

        let idx = match hinted {
            Some(idx) => idx,
            None => {
                if inner.queue.len() > 1 {
                    let waiting: Vec<String> = inner
                        .queue
                        .iter()
                        .map(|w| w.request.repository.to_string())
                        .collect();
                    warn!(
                        path = ?event.path,
                        ?waiting,
                        "ambiguous artifact; assigning it to the oldest pending request"
                    );
                }
                0
            }
        };

        let waiter = inner.queue.remove(idx)?;
        let repo = waiter.request.repository.clone();
        inner.claimed.push(claim);
        inner.forget_claims_if_idle();
        // The cycle may have given up in the meantime; that is fine.
        let _ = waiter.tx.send(event);
        Some(repo)
    }
}
