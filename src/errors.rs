// src/errors.rs

//! Crate-wide error type and helpers.
//!
//! Errors local to one repository, one subscriber or one process-control
//! call are contained by their callers and surfaced through status and
//! logging. Only `Config` errors found at startup are fatal.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CardwatchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited by provider{}", retry_hint(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("Process already running (pid {pid:?})")]
    AlreadyRunning { pid: Option<u32> },

    #[error("Process is not running")]
    NotRunning,

    #[error("Failed to launch process: {0}")]
    ProcessLaunch(String),

    #[error("Process exited abnormally: {0}")]
    ProcessCrash(String),

    #[error("No artifact appeared within {0:?}")]
    ArtifactTimeout(Duration),

    #[error("Notification to {target} failed: {reason}")]
    Notification { target: String, reason: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("File watch error: {0}")]
    WatchError(#[from] notify::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {}s)", d.as_secs()),
        None => String::new(),
    }
}

impl CardwatchError {
    /// Whether retrying the same call shortly may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, CardwatchError::Network(_))
    }

    /// Short operator-facing hint appended to command replies.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            CardwatchError::Network(_) => {
                Some("check network connectivity and the GitHub token permissions")
            }
            CardwatchError::NotFound(_) => {
                Some("check the owner/repo/branch spelling and that the token can read the repository")
            }
            CardwatchError::RateLimited { .. } => {
                Some("configure a GitHub token or raise refresh_interval_seconds")
            }
            CardwatchError::AlreadyRunning { .. } => Some("stop the running process first"),
            CardwatchError::NotRunning => Some("start the process first"),
            CardwatchError::ProcessLaunch(_) => {
                Some("check that [process].program exists and is executable")
            }
            CardwatchError::ProcessCrash(_) => Some("inspect the generator logs and its config"),
            CardwatchError::ArtifactTimeout(_) => {
                Some("check [process].output_dir and raise artifact_timeout_seconds if generation is slow")
            }
            CardwatchError::Notification { .. } => {
                Some("check the transport endpoint and that the bot can reach the target")
            }
            CardwatchError::ConfigError(_) => Some("fix the configuration file and restart monitoring"),
            _ => None,
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, CardwatchError>;
