// src/types.rs

//! Core data model shared by every component.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Branch used when a repository entry leaves `branch` empty or unset.
pub const DEFAULT_BRANCH: &str = "main";

/// Unique key of a watched repository: `owner/repo@branch`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoKey {
    pub owner: String,
    pub repo: String,
    pub branch: String,
}

impl RepoKey {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, branch: impl Into<String>) -> Self {
        let branch = branch.into();
        Self {
            owner: owner.into(),
            repo: repo.into(),
            branch: if branch.trim().is_empty() {
                DEFAULT_BRANCH.to_string()
            } else {
                branch
            },
        }
    }
}

impl fmt::Display for RepoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.owner, self.repo, self.branch)
    }
}

impl FromStr for RepoKey {
    type Err = String;

    /// Accepts `owner/repo` or `owner/repo@branch`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (path, branch) = match s.split_once('@') {
            Some((path, branch)) => (path, branch),
            None => (s, ""),
        };
        match path.split_once('/') {
            Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
                Ok(RepoKey::new(owner, repo, branch))
            }
            _ => Err(format!(
                "invalid repository '{s}' (expected \"owner/repo\" or \"owner/repo@branch\")"
            )),
        }
    }
}

/// A repository whose branch head is monitored for new commits.
///
/// `last_commit_sha` is empty until the first successful generation cycle
/// (meaning "unseen"). Only the monitor mutates it, and only after the
/// artifact was observed and dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryTarget {
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default, rename = "lastsha")]
    pub last_commit_sha: String,
}

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

impl RepositoryTarget {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, branch: impl Into<String>) -> Self {
        let key = RepoKey::new(owner, repo, branch);
        Self {
            owner: key.owner,
            repo: key.repo,
            branch: key.branch,
            last_commit_sha: String::new(),
        }
    }

    pub fn with_last_sha(mut self, sha: impl Into<String>) -> Self {
        self.last_commit_sha = sha.into();
        self
    }

    pub fn key(&self) -> RepoKey {
        RepoKey::new(self.owner.clone(), self.repo.clone(), self.branch.clone())
    }
}

/// Kind of messaging destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriberKind {
    Group,
    Private,
}

impl fmt::Display for SubscriberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriberKind::Group => f.write_str("group"),
            SubscriberKind::Private => f.write_str("private"),
        }
    }
}

impl FromStr for SubscriberKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "group" | "g" => Ok(SubscriberKind::Group),
            "private" | "p" | "friend" => Ok(SubscriberKind::Private),
            other => Err(format!(
                "invalid subscriber kind: {other} (expected \"group\" or \"private\")"
            )),
        }
    }
}

/// A registered notification destination. Unique by `origin_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriberTarget {
    #[serde(rename = "origin")]
    pub origin_id: String,
    pub kind: SubscriberKind,
}

impl SubscriberTarget {
    pub fn new(origin_id: impl Into<String>, kind: SubscriberKind) -> Self {
        Self {
            origin_id: origin_id.into(),
            kind,
        }
    }

    pub fn group(origin_id: impl Into<String>) -> Self {
        Self::new(origin_id, SubscriberKind::Group)
    }

    pub fn private(origin_id: impl Into<String>) -> Self {
        Self::new(origin_id, SubscriberKind::Private)
    }
}

impl fmt::Display for SubscriberTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.origin_id)
    }
}

impl FromStr for SubscriberTarget {
    type Err = String;

    /// Parses `group:<id>` / `private:<id>`; a bare id is treated as a group.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (kind, origin) = match s.split_once(':') {
            Some((kind, origin)) => (kind.parse::<SubscriberKind>()?, origin.trim()),
            None => (SubscriberKind::Group, s),
        };
        if origin.is_empty() {
            return Err("subscriber origin must not be empty".to_string());
        }
        Ok(SubscriberTarget::new(origin, kind))
    }
}

/// How the external generator is run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Generate once and exit.
    OneShot,
    /// Keep running and write artifacts whenever it sees fit.
    Watch,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::OneShot => f.write_str("one-shot"),
            RunMode::Watch => f.write_str("watch"),
        }
    }
}
