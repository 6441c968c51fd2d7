// src/state/store.rs

//! Typed accessor over a [`StateBackend`].
//!
//! Every mutation goes through [`StateStore::update`], which holds the single
//! state lock for the whole read-modify-write-save sequence. If the durable
//! save fails, the in-memory state is rolled back so readers never observe a
//! change that was not persisted.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::errors::{CardwatchError, Result};
use crate::state::backend::{Counters, PersistedState, StateBackend};
use crate::types::{RepoKey, RepositoryTarget, SubscriberTarget};

#[derive(Clone)]
pub struct StateStore {
    backend: Arc<Mutex<Box<dyn StateBackend>>>,
}

impl fmt::Debug for StateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStore").finish_non_exhaustive()
    }
}

impl StateStore {
    pub fn new(backend: impl StateBackend + 'static) -> Self {
        Self {
            backend: Arc::new(Mutex::new(Box::new(backend))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn StateBackend>> {
        // A panic while holding the lock cannot leave a half-applied patch
        // behind (patches are whole sections), so the data is still usable.
        self.backend.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn snapshot(&self) -> PersistedState {
        self.lock().get()
    }

    /// Atomic read-modify-write of the persisted state.
    ///
    /// `f` sees a copy of the current state; whatever it changes is written
    /// back section by section and flushed before the lock is released.
    pub fn update<R>(&self, f: impl FnOnce(&mut PersistedState) -> R) -> Result<R> {
        let mut backend = self.lock();
        let before = backend.get();
        let mut after = before.clone();
        let out = f(&mut after);

        let patches = before.diff(&after);
        if patches.is_empty() {
            return Ok(out);
        }

        for patch in patches {
            backend.set(patch)?;
        }

        if let Err(err) = backend.save() {
            warn!(error = %err, "saving state failed; rolling back in-memory change");
            for patch in after.diff(&before) {
                if let Err(e) = backend.set(patch) {
                    warn!(error = %e, "rollback of state section failed");
                }
            }
            return Err(err);
        }

        Ok(out)
    }

    // ---- repositories ----

    pub fn repositories(&self) -> Vec<RepositoryTarget> {
        self.snapshot().repository
    }

    pub fn repository(&self, key: &RepoKey) -> Option<RepositoryTarget> {
        self.snapshot()
            .repository
            .into_iter()
            .find(|r| &r.key() == key)
    }

    pub fn last_sha(&self, key: &RepoKey) -> Option<String> {
        self.repository(key).map(|r| r.last_commit_sha)
    }

    /// Record `sha` as the last commit announced for `key`.
    pub fn commit_sha(&self, key: &RepoKey, sha: &str) -> Result<()> {
        let found = self.update(|state| {
            match state.repository.iter_mut().find(|r| &r.key() == key) {
                Some(repo) => {
                    repo.last_commit_sha = sha.to_string();
                    true
                }
                None => false,
            }
        })?;

        if !found {
            return Err(CardwatchError::NotFound(format!(
                "repository {key} is no longer configured"
            )));
        }
        debug!(repo = %key, sha = %sha, "committed last-seen sha");
        Ok(())
    }

    /// Replace the repository list with `configured`, keeping the persisted
    /// last-seen SHA of every repository that is still configured.
    ///
    /// A configured `lastsha` only seeds repositories that have no persisted
    /// SHA yet.
    pub fn sync_repositories(&self, configured: &[RepositoryTarget]) -> Result<Vec<RepositoryTarget>> {
        self.update(|state| {
            let merged: Vec<RepositoryTarget> = configured
                .iter()
                .map(|cfg| {
                    let persisted = state
                        .repository
                        .iter()
                        .find(|r| r.key() == cfg.key())
                        .map(|r| r.last_commit_sha.clone())
                        .filter(|sha| !sha.is_empty());
                    match persisted {
                        Some(sha) => cfg.clone().with_last_sha(sha),
                        None => cfg.clone(),
                    }
                })
                .collect();
            state.repository = merged.clone();
            merged
        })
    }

    // ---- subscribers ----

    pub fn subscribers(&self) -> Vec<SubscriberTarget> {
        self.snapshot().subscriber
    }

    /// Returns `true` if the target was already present (nothing changed).
    pub fn add_subscriber(&self, target: &SubscriberTarget) -> Result<bool> {
        self.update(|state| {
            if state
                .subscriber
                .iter()
                .any(|s| s.origin_id == target.origin_id)
            {
                true
            } else {
                state.subscriber.push(target.clone());
                false
            }
        })
    }

    /// Copy configured subscribers into a registry that was never seeded.
    ///
    /// Returns how many targets were added; zero once the registry has been
    /// seeded, so removals made at runtime stick across restarts.
    pub fn seed_subscribers(&self, configured: &[SubscriberTarget]) -> Result<usize> {
        self.update(|state| {
            if state.seeded {
                return 0;
            }
            let mut added = 0;
            for target in configured {
                if !state
                    .subscriber
                    .iter()
                    .any(|s| s.origin_id == target.origin_id)
                {
                    state.subscriber.push(target.clone());
                    added += 1;
                }
            }
            state.seeded = true;
            added
        })
    }

    /// Returns `true` if the origin was present and has been removed.
    pub fn remove_subscriber(&self, origin_id: &str) -> Result<bool> {
        self.update(|state| {
            let before = state.subscriber.len();
            state.subscriber.retain(|s| s.origin_id != origin_id);
            state.subscriber.len() != before
        })
    }

    // ---- counters ----

    pub fn counters(&self) -> Counters {
        self.snapshot().counters
    }

    pub fn record_notifications(&self, sent: u64, failed: u64) -> Result<()> {
        self.update(|state| {
            state.counters.notifications_sent += sent;
            state.counters.notification_failures += failed;
        })
    }

    pub fn record_error(&self) -> Result<()> {
        self.update(|state| state.counters.errors += 1)
    }
}
