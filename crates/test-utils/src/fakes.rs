#![allow(dead_code)]

//! In-memory stand-ins for the remote provider and the message transport.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cardwatch::errors::CardwatchError;
use cardwatch::github::{CommitFuture, CommitSource};
use cardwatch::notify::{NotificationTransport, Payload, SendFuture};
use cardwatch::types::{RepoKey, SubscriberTarget};

/// Failure a [`FakeCommitSource`] can be scripted to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeFailure {
    Network,
    NotFound,
    RateLimited(Option<Duration>),
}

impl FakeFailure {
    fn to_error(self, repo: &RepoKey) -> CardwatchError {
        match self {
            FakeFailure::Network => CardwatchError::Network(format!("fake outage for {repo}")),
            FakeFailure::NotFound => CardwatchError::NotFound(format!("{repo} does not exist")),
            FakeFailure::RateLimited(retry_after) => CardwatchError::RateLimited { retry_after },
        }
    }
}

#[derive(Default)]
struct SourceState {
    heads: HashMap<RepoKey, String>,
    failures: HashMap<RepoKey, VecDeque<FakeFailure>>,
    calls: Vec<RepoKey>,
}

/// Commit source answering from a table of branch heads.
///
/// Scripted failures are returned first, one per call, before the table is
/// consulted again.
#[derive(Clone, Default)]
pub struct FakeCommitSource {
    state: Arc<Mutex<SourceState>>,
}

impl FakeCommitSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_head(&self, repo: &RepoKey, sha: &str) {
        self.state
            .lock()
            .unwrap()
            .heads
            .insert(repo.clone(), sha.to_string());
    }

    pub fn fail_next(&self, repo: &RepoKey, failure: FakeFailure) {
        self.state
            .lock()
            .unwrap()
            .failures
            .entry(repo.clone())
            .or_default()
            .push_back(failure);
    }

    pub fn calls(&self) -> Vec<RepoKey> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self, repo: &RepoKey) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|r| *r == repo)
            .count()
    }
}

impl CommitSource for FakeCommitSource {
    fn latest_commit<'a>(&'a self, repo: &'a RepoKey) -> CommitFuture<'a> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.calls.push(repo.clone());
            if let Some(failure) = state.failures.get_mut(repo).and_then(VecDeque::pop_front) {
                return Err(failure.to_error(repo));
            }
            match state.heads.get(repo) {
                Some(sha) => Ok(sha.clone()),
                None => Err(CardwatchError::NotFound(format!("{repo} has no head"))),
            }
        })
    }
}

#[derive(Default)]
struct TransportState {
    delivered: Vec<(SubscriberTarget, Payload)>,
    failing: HashSet<String>,
    delay: Option<Duration>,
}

/// Transport that records every successful delivery and fails on demand.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    state: Arc<Mutex<TransportState>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every delivery to `origin` fail.
    pub fn fail_for(&self, origin: &str) {
        self.state.lock().unwrap().failing.insert(origin.to_string());
    }

    /// Delay every delivery (used to exercise the send timeout).
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = Some(delay);
    }

    pub fn delivered(&self) -> Vec<(SubscriberTarget, Payload)> {
        self.state.lock().unwrap().delivered.clone()
    }

    pub fn delivered_to(&self, origin: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .delivered
            .iter()
            .filter(|(t, _)| t.origin_id == origin)
            .count()
    }
}

impl NotificationTransport for RecordingTransport {
    fn send<'a>(&'a self, target: &'a SubscriberTarget, payload: &'a Payload) -> SendFuture<'a> {
        Box::pin(async move {
            let delay = self.state.lock().unwrap().delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let mut state = self.state.lock().unwrap();
            if state.failing.contains(&target.origin_id) {
                return Err(CardwatchError::Notification {
                    target: target.to_string(),
                    reason: "recipient refused".to_string(),
                });
            }
            state.delivered.push((target.clone(), payload.clone()));
            Ok(())
        })
    }
}
