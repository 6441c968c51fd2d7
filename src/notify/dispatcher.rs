// src/notify/dispatcher.rs

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::error::Elapsed;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::errors::{CardwatchError, Result};
use crate::notify::{NotificationTransport, Payload};
use crate::state::StateStore;
use crate::types::SubscriberTarget;

type SendResult = std::result::Result<Result<()>, Elapsed>;

/// Why a single delivery failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationErrorKind {
    /// The transport did not answer within the per-send timeout.
    Timeout,
    /// The transport answered and refused the message.
    Rejected,
    /// The send could not be carried out at all.
    Transport,
}

impl fmt::Display for NotificationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationErrorKind::Timeout => f.write_str("timeout"),
            NotificationErrorKind::Rejected => f.write_str("rejected"),
            NotificationErrorKind::Transport => f.write_str("transport"),
        }
    }
}

/// Result of one delivery attempt to one subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationOutcome {
    pub target: SubscriberTarget,
    pub success: bool,
    pub error_kind: Option<NotificationErrorKind>,
}

impl NotificationOutcome {
    fn delivered(target: SubscriberTarget) -> Self {
        Self {
            target,
            success: true,
            error_kind: None,
        }
    }

    fn failed(target: SubscriberTarget, kind: NotificationErrorKind) -> Self {
        Self {
            target,
            success: false,
            error_kind: Some(kind),
        }
    }
}

/// True when there was at least one subscriber and nobody got the payload.
pub fn delivery_failed(outcomes: &[NotificationOutcome]) -> bool {
    !outcomes.is_empty() && outcomes.iter().all(|o| !o.success)
}

/// Delivery counters for the current process lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounters {
    pub success_count: u64,
    pub failure_count: u64,
}

pub struct Dispatcher {
    store: StateStore,
    transport: Arc<dyn NotificationTransport>,
    send_timeout: Duration,
    success_count: AtomicU64,
    failure_count: AtomicU64,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("send_timeout", &self.send_timeout)
            .field("counters", &self.run_counters())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        store: StateStore,
        transport: Arc<dyn NotificationTransport>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            store,
            transport,
            send_timeout,
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
        }
    }

    /// Register `target`. Returns `true` if it was already subscribed.
    pub fn subscribe(&self, target: &SubscriberTarget) -> Result<bool> {
        let already_present = self.store.add_subscriber(target)?;
        if already_present {
            debug!(target = %target, "already subscribed");
        } else {
            info!(target = %target, "subscriber added");
        }
        Ok(already_present)
    }

    /// Remove the subscriber with `origin_id`. Returns `true` if it was present.
    pub fn unsubscribe(&self, origin_id: &str) -> Result<bool> {
        let was_present = self.store.remove_subscriber(origin_id)?;
        if was_present {
            info!(origin = %origin_id, "subscriber removed");
        }
        Ok(was_present)
    }

    /// Subscribers in insertion order.
    pub fn list(&self) -> Vec<SubscriberTarget> {
        self.store.subscribers()
    }

    pub fn run_counters(&self) -> RunCounters {
        RunCounters {
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
        }
    }

    /// Deliver `payload` to every subscriber registered right now.
    ///
    /// Sends run concurrently, each bounded by the send timeout. Outcomes are
    /// returned in subscriber order; a failed delivery never affects the
    /// others. Dropping the returned future abandons the remaining sends.
    pub async fn dispatch(&self, payload: &Payload) -> Vec<NotificationOutcome> {
        let targets = self.store.subscribers();
        if targets.is_empty() {
            info!(%payload, "no subscribers; nothing to deliver");
            return Vec::new();
        }

        // The set aborts sends still in flight if this future is dropped.
        let mut sends = JoinSet::new();
        for (idx, target) in targets.iter().cloned().enumerate() {
            let transport = Arc::clone(&self.transport);
            let payload = payload.clone();
            let limit = self.send_timeout;
            sends.spawn(async move {
                (idx, timeout(limit, transport.send(&target, &payload)).await)
            });
        }

        let mut results: Vec<Option<SendResult>> = targets.iter().map(|_| None).collect();
        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok((idx, result)) => results[idx] = Some(result),
                Err(err) => warn!(error = %err, "delivery task aborted"),
            }
        }

        let outcomes: Vec<NotificationOutcome> = targets
            .into_iter()
            .zip(results)
            .map(|(target, result)| match result {
                Some(Ok(Ok(()))) => {
                    debug!(target = %target, "delivered");
                    NotificationOutcome::delivered(target)
                }
                Some(Ok(Err(err))) => {
                    warn!(target = %target, error = %err, "delivery failed");
                    NotificationOutcome::failed(target, classify(&err))
                }
                Some(Err(_elapsed)) => {
                    warn!(target = %target, timeout = ?self.send_timeout, "delivery timed out");
                    NotificationOutcome::failed(target, NotificationErrorKind::Timeout)
                }
                None => NotificationOutcome::failed(target, NotificationErrorKind::Transport),
            })
            .collect();

        let sent = outcomes.iter().filter(|o| o.success).count() as u64;
        let failed = outcomes.len() as u64 - sent;
        self.success_count.fetch_add(sent, Ordering::Relaxed);
        self.failure_count.fetch_add(failed, Ordering::Relaxed);
        if let Err(err) = self.store.record_notifications(sent, failed) {
            warn!(error = %err, "persisting notification counters failed");
        }

        info!(%payload, sent, failed, "dispatch finished");
        outcomes
    }
}

fn classify(err: &CardwatchError) -> NotificationErrorKind {
    match err {
        CardwatchError::Notification { .. } => NotificationErrorKind::Rejected,
        _ => NotificationErrorKind::Transport,
    }
}
