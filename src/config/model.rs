// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::types::{RepositoryTarget, SubscriberTarget};

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [monitor]
/// refresh_interval_seconds = 3600
///
/// [process]
/// program = "YumeCard_core/YumeCard"
/// working_dir = "YumeCard_core"
/// output_dir = "YumeCard_core/Style"
///
/// [[repository]]
/// owner = "FengYing1314"
/// repo = "astrbot_plugin_YumeCard"
/// branch = "main"
/// ```
///
/// All sections except `[process]` are optional and have defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub monitor: MonitorSection,

    #[serde(default)]
    pub github: GitHubSection,

    pub process: ProcessSection,

    #[serde(default)]
    pub state: StateSection,

    #[serde(default)]
    pub transport: TransportSection,

    /// `[[repository]]` entries. Kept loose so that one malformed entry can be
    /// skipped without rejecting the whole file.
    #[serde(default)]
    pub repository: Vec<RawRepositoryEntry>,

    #[serde(default)]
    pub subscriber: Vec<RawSubscriberEntry>,
}

/// `[monitor]` section: scheduling and timeouts.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSection {
    /// Seconds between scheduled polls. `0` disables scheduled polling; on-demand
    /// checks still work.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_seconds: u64,

    /// How long a cycle waits for the artifact before it is abandoned.
    #[serde(default = "default_artifact_timeout")]
    pub artifact_timeout_seconds: u64,

    /// Quiet period after the last filesystem event before a file counts as
    /// completely written.
    #[serde(default = "default_settle_millis")]
    pub settle_millis: u64,

    /// Per-subscriber delivery timeout.
    #[serde(default = "default_notify_timeout")]
    pub notify_timeout_seconds: u64,

    /// Upper bound for the per-repository backoff after rate limiting.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_seconds: u64,
}

fn default_refresh_interval() -> u64 {
    3600
}

fn default_artifact_timeout() -> u64 {
    120
}

fn default_settle_millis() -> u64 {
    300
}

fn default_notify_timeout() -> u64 {
    30
}

fn default_max_backoff() -> u64 {
    3600
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            refresh_interval_seconds: default_refresh_interval(),
            artifact_timeout_seconds: default_artifact_timeout(),
            settle_millis: default_settle_millis(),
            notify_timeout_seconds: default_notify_timeout(),
            max_backoff_seconds: default_max_backoff(),
        }
    }
}

impl MonitorSection {
    /// `None` when scheduled polling is disabled.
    pub fn refresh_interval(&self) -> Option<Duration> {
        match self.refresh_interval_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn artifact_timeout(&self) -> Duration {
        Duration::from_secs(self.artifact_timeout_seconds)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_millis)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_seconds)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_seconds)
    }
}

/// `[github]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubSection {
    /// Optional personal access token; raises the rate limit and allows
    /// private repositories.
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Retries for transient failures, not counting the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_request_timeout() -> u64 {
    15
}

fn default_max_retries() -> u32 {
    2
}

impl Default for GitHubSection {
    fn default() -> Self {
        Self {
            token: None,
            api_base: default_api_base(),
            request_timeout_seconds: default_request_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

/// `[process]` section: the external generator.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessSection {
    pub program: PathBuf,

    /// Directory the program runs in; defaults to the program's parent.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Directory the program writes artifacts into.
    pub output_dir: PathBuf,

    /// Extra arguments for one-shot runs. `{owner}`, `{repo}` and `{branch}`
    /// are substituted when the run was requested for a single repository.
    #[serde(default)]
    pub oneshot_args: Vec<String>,

    /// Arguments selecting the continuous watch mode.
    #[serde(default = "default_watch_args")]
    pub watch_args: Vec<String>,

    /// How long a freshly spawned process must stay up to count as running.
    #[serde(default = "default_startup_grace")]
    pub startup_grace_millis: u64,

    /// Graceful stop window before escalating to a forceful kill.
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_seconds: u64,

    #[serde(default = "default_artifact_patterns")]
    pub artifact_patterns: Vec<String>,

    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,
}

fn default_watch_args() -> Vec<String> {
    vec!["--watch".to_string()]
}

fn default_startup_grace() -> u64 {
    500
}

fn default_stop_timeout() -> u64 {
    10
}

fn default_artifact_patterns() -> Vec<String> {
    ["*.png", "*.jpg", "*.jpeg", "*.webp"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_ignore_patterns() -> Vec<String> {
    ["*.tmp", "*.part", ".*"].into_iter().map(String::from).collect()
}

impl ProcessSection {
    pub fn new(program: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            working_dir: None,
            output_dir: output_dir.into(),
            oneshot_args: Vec::new(),
            watch_args: default_watch_args(),
            startup_grace_millis: default_startup_grace(),
            stop_timeout_seconds: default_stop_timeout(),
            artifact_patterns: default_artifact_patterns(),
            ignore_patterns: default_ignore_patterns(),
        }
    }

    pub fn effective_working_dir(&self) -> PathBuf {
        match (&self.working_dir, self.program.parent()) {
            (Some(dir), _) => dir.clone(),
            (None, Some(parent)) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_millis)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_seconds)
    }
}

/// `[state]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StateSection {
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

fn default_state_path() -> PathBuf {
    PathBuf::from("cardwatch-state.toml")
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

/// Which notification transport the binary wires up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Write deliveries to the log only.
    #[default]
    Log,
    /// OneBot v11 HTTP API.
    OneBot,
}

/// `[transport]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TransportSection {
    #[serde(default)]
    pub kind: TransportKind,

    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub access_token: Option<String>,
}

/// Loosely-typed `[[repository]]` entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRepositoryEntry {
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub lastsha: Option<String>,
}

/// Loosely-typed `[[subscriber]]` entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSubscriberEntry {
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
}

/// A configuration entry that was dropped during validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    /// e.g. `repository[2]`.
    pub entry: String,
    pub reason: String,
}

/// Validated configuration.
///
/// Constructed via `ConfigFile::try_from(RawConfigFile)`; invalid repository
/// and subscriber entries are listed in `skipped` instead of failing the load.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub monitor: MonitorSection,
    pub github: GitHubSection,
    pub process: ProcessSection,
    pub state: StateSection,
    pub transport: TransportSection,
    pub repositories: Vec<RepositoryTarget>,
    pub subscribers: Vec<SubscriberTarget>,
    pub skipped: Vec<SkippedEntry>,
}
