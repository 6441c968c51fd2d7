// src/github/mod.rs

//! Commit-state queries against the repository provider.
//!
//! The monitor only depends on the [`CommitSource`] trait; production code
//! uses [`GitHubCommitSource`], tests plug in a scripted fake.

use std::future::Future;
use std::pin::Pin;

use crate::errors::Result;
use crate::types::RepoKey;

pub mod client;
pub mod retry;

pub use client::GitHubCommitSource;
pub use retry::{retry_transient, RetryConfig};

/// Boxed future returned by [`CommitSource`].
pub type CommitFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

/// Something that can tell the latest commit identifier of a branch.
///
/// Implementations report:
/// - `CardwatchError::NotFound` when the repository or branch does not exist,
/// - `CardwatchError::RateLimited` when the provider throttles us,
/// - `CardwatchError::Network` for transport failures and other non-2xx replies.
pub trait CommitSource: Send + Sync {
    fn latest_commit<'a>(&'a self, repo: &'a RepoKey) -> CommitFuture<'a>;
}
