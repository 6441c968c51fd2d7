// src/github/client.rs

//! GitHub REST client for branch-head lookups.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, RETRY_AFTER, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::GitHubSection;
use crate::errors::{CardwatchError, Result};
use crate::github::retry::{retry_transient, RetryConfig};
use crate::github::{CommitFuture, CommitSource};
use crate::types::RepoKey;

const USER_AGENT_VALUE: &str = concat!("cardwatch/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
}

/// Queries `GET /repos/{owner}/{repo}/commits/{branch}`.
#[derive(Debug, Clone)]
pub struct GitHubCommitSource {
    http: reqwest::Client,
    api_base: String,
    token: Option<String>,
    retry: RetryConfig,
}

impl GitHubCommitSource {
    pub fn new(cfg: &GitHubSection) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_seconds.max(1)))
            .build()
            .map_err(|e| CardwatchError::ConfigError(format!("building HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            token: cfg.token.clone().filter(|t| !t.trim().is_empty()),
            retry: RetryConfig::DEFAULT.with_max_retries(cfg.max_retries),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn commit_url(&self, repo: &RepoKey) -> String {
        format!(
            "{}/repos/{}/{}/commits/{}",
            self.api_base, repo.owner, repo.repo, repo.branch
        )
    }

    async fn fetch_once(&self, repo: &RepoKey) -> Result<String> {
        let url = self.commit_url(repo);
        debug!(repo = %repo, url = %url, "querying latest commit");

        let mut req = self
            .http
            .get(&url)
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, USER_AGENT_VALUE)
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = &self.token {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| CardwatchError::Network(format!("requesting {url}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let headers = resp.headers().clone();
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_failure(status, &headers, &body, repo));
        }

        let commit: CommitResponse = resp
            .json()
            .await
            .map_err(|e| CardwatchError::Network(format!("decoding commit for {repo}: {e}")))?;

        if commit.sha.is_empty() {
            return Err(CardwatchError::Network(format!(
                "provider returned an empty commit id for {repo}"
            )));
        }
        Ok(commit.sha)
    }
}

impl CommitSource for GitHubCommitSource {
    fn latest_commit<'a>(&'a self, repo: &'a RepoKey) -> CommitFuture<'a> {
        Box::pin(async move { retry_transient(self.retry, || self.fetch_once(repo)).await })
    }
}

/// Map a non-2xx reply onto the error taxonomy.
pub fn classify_failure(
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
    repo: &RepoKey,
) -> CardwatchError {
    match status {
        StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
            CardwatchError::NotFound(format!("{repo} (HTTP {})", status.as_u16()))
        }
        StatusCode::TOO_MANY_REQUESTS => CardwatchError::RateLimited {
            retry_after: rate_limit_delay(headers),
        },
        StatusCode::FORBIDDEN if is_rate_limited(headers, body) => CardwatchError::RateLimited {
            retry_after: rate_limit_delay(headers),
        },
        other => {
            warn!(repo = %repo, status = other.as_u16(), "unexpected provider reply");
            CardwatchError::Network(format!(
                "HTTP {} for {repo}: {}",
                other.as_u16(),
                body.chars().take(200).collect::<String>()
            ))
        }
    }
}

fn is_rate_limited(headers: &HeaderMap, body: &str) -> bool {
    let exhausted = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0");
    exhausted || headers.contains_key(RETRY_AFTER) || body.contains("rate limit")
}

/// How long the provider asked us to wait, from `retry-after` (seconds) or
/// `x-ratelimit-reset` (epoch seconds).
fn rate_limit_delay(headers: &HeaderMap) -> Option<Duration> {
    let header_u64 = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    };

    if let Some(secs) = header_u64(RETRY_AFTER.as_str()) {
        return Some(Duration::from_secs(secs));
    }

    let reset = header_u64("x-ratelimit-reset")?;
    let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();
    Some(Duration::from_secs(reset.saturating_sub(now)))
}
