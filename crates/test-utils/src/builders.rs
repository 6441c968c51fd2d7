#![allow(dead_code)]

use std::path::PathBuf;

use cardwatch::config::{
    ConfigFile, GitHubSection, MonitorSection, ProcessSection, RawConfigFile,
    RawRepositoryEntry, RawSubscriberEntry, StateSection, TransportSection,
};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new(program: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            config: RawConfigFile {
                monitor: MonitorSection::default(),
                github: GitHubSection::default(),
                process: ProcessSection::new(program, output_dir),
                state: StateSection::default(),
                transport: TransportSection::default(),
                repository: Vec::new(),
                subscriber: Vec::new(),
            },
        }
    }

    pub fn with_repository(mut self, owner: &str, repo: &str, branch: &str) -> Self {
        self.config.repository.push(RawRepositoryEntry {
            owner: Some(owner.to_string()),
            repo: Some(repo.to_string()),
            branch: Some(branch.to_string()),
            lastsha: None,
        });
        self
    }

    pub fn with_seen_repository(mut self, owner: &str, repo: &str, lastsha: &str) -> Self {
        self.config.repository.push(RawRepositoryEntry {
            owner: Some(owner.to_string()),
            repo: Some(repo.to_string()),
            branch: None,
            lastsha: Some(lastsha.to_string()),
        });
        self
    }

    pub fn with_subscriber(mut self, origin: &str, kind: &str) -> Self {
        self.config.subscriber.push(RawSubscriberEntry {
            origin: Some(origin.to_string()),
            kind: Some(kind.to_string()),
        });
        self
    }

    pub fn refresh_interval_secs(mut self, secs: u64) -> Self {
        self.config.monitor.refresh_interval_seconds = secs;
        self
    }

    pub fn artifact_timeout_secs(mut self, secs: u64) -> Self {
        self.config.monitor.artifact_timeout_seconds = secs;
        self
    }

    pub fn settle_millis(mut self, millis: u64) -> Self {
        self.config.monitor.settle_millis = millis;
        self
    }

    pub fn notify_timeout_secs(mut self, secs: u64) -> Self {
        self.config.monitor.notify_timeout_seconds = secs;
        self
    }

    pub fn startup_grace_millis(mut self, millis: u64) -> Self {
        self.config.process.startup_grace_millis = millis;
        self
    }

    pub fn stop_timeout_secs(mut self, secs: u64) -> Self {
        self.config.process.stop_timeout_seconds = secs;
        self
    }

    pub fn oneshot_args(mut self, args: &[&str]) -> Self {
        self.config.process.oneshot_args = args.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}
