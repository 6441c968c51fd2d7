// src/monitor/poll.rs

use tracing::debug;

use crate::errors::{CardwatchError, Result};
use crate::github::CommitSource;
use crate::types::RepoKey;

/// Outcome of comparing a branch head with the recorded commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitCheckResult {
    pub changed: bool,
    pub new_sha: String,
}

impl CommitCheckResult {
    /// An empty `last_sha` means "never seen" and always counts as changed.
    pub fn compare(last_sha: &str, latest: String) -> Self {
        Self {
            changed: last_sha.is_empty() || last_sha != latest,
            new_sha: latest,
        }
    }
}

/// Ask `source` for the branch head of `repo` and compare it with `last_sha`.
pub async fn poll(
    source: &dyn CommitSource,
    repo: &RepoKey,
    last_sha: &str,
) -> Result<CommitCheckResult> {
    if repo.owner.trim().is_empty() || repo.repo.trim().is_empty() {
        return Err(CardwatchError::ConfigError(format!(
            "repository {repo} needs a non-empty owner and repo"
        )));
    }

    let latest = source.latest_commit(repo).await?;
    let result = CommitCheckResult::compare(last_sha, latest);
    debug!(
        repo = %repo,
        last = %last_sha,
        latest = %result.new_sha,
        changed = result.changed,
        "polled branch head"
    );
    Ok(result)
}
