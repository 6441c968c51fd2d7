// src/config/validate.rs

use std::collections::HashSet;

use globset::Glob;
use tracing::warn;

use crate::config::model::{
    ConfigFile, RawConfigFile, RawRepositoryEntry, RawSubscriberEntry, SkippedEntry,
};
use crate::errors::{CardwatchError, Result};
use crate::types::{RepoKey, RepositoryTarget, SubscriberKind, SubscriberTarget};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = CardwatchError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_global_config(&raw)?;

        let mut skipped = Vec::new();
        let repositories = collect_repositories(&raw.repository, &mut skipped);
        let subscribers = collect_subscribers(&raw.subscriber, &mut skipped);

        for s in &skipped {
            warn!(entry = %s.entry, reason = %s.reason, "skipping invalid configuration entry");
        }

        Ok(ConfigFile {
            monitor: raw.monitor,
            github: raw.github,
            process: raw.process,
            state: raw.state,
            transport: raw.transport,
            repositories,
            subscribers,
            skipped,
        })
    }
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.monitor.artifact_timeout_seconds == 0 {
        return Err(CardwatchError::ConfigError(
            "[monitor].artifact_timeout_seconds must be >= 1 (got 0)".to_string(),
        ));
    }

    if cfg.process.program.as_os_str().is_empty() {
        return Err(CardwatchError::ConfigError(
            "[process].program must not be empty".to_string(),
        ));
    }

    if cfg.process.output_dir.as_os_str().is_empty() {
        return Err(CardwatchError::ConfigError(
            "[process].output_dir must not be empty".to_string(),
        ));
    }

    if cfg.process.artifact_patterns.is_empty() {
        return Err(CardwatchError::ConfigError(
            "[process].artifact_patterns must contain at least one glob".to_string(),
        ));
    }

    for pattern in cfg
        .process
        .artifact_patterns
        .iter()
        .chain(cfg.process.ignore_patterns.iter())
    {
        Glob::new(pattern).map_err(|e| {
            CardwatchError::ConfigError(format!("invalid glob '{pattern}' in [process]: {e}"))
        })?;
    }

    if cfg.transport.kind == crate::config::model::TransportKind::OneBot
        && cfg.transport.endpoint.as_deref().is_none_or(|e| e.trim().is_empty())
    {
        return Err(CardwatchError::ConfigError(
            "[transport].endpoint is required when kind = \"onebot\"".to_string(),
        ));
    }

    Ok(())
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn collect_repositories(
    entries: &[RawRepositoryEntry],
    skipped: &mut Vec<SkippedEntry>,
) -> Vec<RepositoryTarget> {
    let mut seen: HashSet<RepoKey> = HashSet::new();
    let mut out = Vec::new();

    for (idx, entry) in entries.iter().enumerate() {
        let label = format!("repository[{idx}]");

        let (owner, repo) = match (non_empty(&entry.owner), non_empty(&entry.repo)) {
            (Some(owner), Some(repo)) => (owner, repo),
            (None, _) => {
                skipped.push(SkippedEntry {
                    entry: label,
                    reason: "missing required field 'owner'".to_string(),
                });
                continue;
            }
            (_, None) => {
                skipped.push(SkippedEntry {
                    entry: label,
                    reason: "missing required field 'repo'".to_string(),
                });
                continue;
            }
        };

        let target = RepositoryTarget::new(owner, repo, non_empty(&entry.branch).unwrap_or(""))
            .with_last_sha(non_empty(&entry.lastsha).unwrap_or(""));

        if !seen.insert(target.key()) {
            skipped.push(SkippedEntry {
                entry: label,
                reason: format!("duplicate repository {}", target.key()),
            });
            continue;
        }

        out.push(target);
    }

    out
}

fn collect_subscribers(
    entries: &[RawSubscriberEntry],
    skipped: &mut Vec<SkippedEntry>,
) -> Vec<SubscriberTarget> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();

    for (idx, entry) in entries.iter().enumerate() {
        let label = format!("subscriber[{idx}]");

        let Some(origin) = non_empty(&entry.origin) else {
            skipped.push(SkippedEntry {
                entry: label,
                reason: "missing required field 'origin'".to_string(),
            });
            continue;
        };

        let kind = match non_empty(&entry.kind) {
            None => SubscriberKind::Group,
            Some(k) => match k.parse::<SubscriberKind>() {
                Ok(kind) => kind,
                Err(reason) => {
                    skipped.push(SkippedEntry { entry: label, reason });
                    continue;
                }
            },
        };

        if seen.insert(origin.to_string()) {
            out.push(SubscriberTarget::new(origin, kind));
        }
    }

    out
}
