// src/watch/patterns.rs

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

/// Compiled include/ignore globs deciding which files count as artifacts.
///
/// Patterns are matched against the file *name* only, since the watcher
/// observes a single output directory:
///
/// ```toml
/// [process]
/// artifact_patterns = ["*.png", "*.jpg"]
/// ignore_patterns = ["*.tmp", ".*"]
/// ```
#[derive(Clone)]
pub struct ArtifactFilter {
    include: GlobSet,
    ignore: Option<GlobSet>,
}

impl fmt::Debug for ArtifactFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactFilter")
            .field("include", &self.include.len())
            .field("ignore", &self.ignore.as_ref().map(GlobSet::len))
            .finish()
    }
}

impl ArtifactFilter {
    pub fn new(include: &[String], ignore: &[String]) -> Result<Self> {
        let include = build_globset(include).context("building artifact globset")?;
        let ignore = if ignore.is_empty() {
            None
        } else {
            Some(build_globset(ignore).context("building ignore globset")?)
        };
        Ok(Self { include, ignore })
    }

    /// Returns true if `path` looks like a finished artifact.
    pub fn matches(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        if !self.include.is_match(name) {
            return false;
        }
        if let Some(ignore) = &self.ignore {
            if ignore.is_match(name) {
                return false;
            }
        }
        true
    }
}

/// Build a GlobSet from simple string patterns.
fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat).with_context(|| format!("invalid glob pattern: {pat}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}
