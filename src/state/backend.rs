// src/state/backend.rs

//! Persisted configuration storage.
//!
//! A [`StateBackend`] offers the three primitives the rest of the crate
//! relies on: `get` (full snapshot), `set` (replace one section) and `save`
//! (durable flush). The typed accessor on top of it lives in
//! [`crate::state::store`].

use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::{CardwatchError, Result};
use crate::fs::FileSystem;
use crate::types::{RepositoryTarget, SubscriberTarget};

/// Cumulative counters kept across restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    #[serde(default)]
    pub notifications_sent: u64,
    #[serde(default)]
    pub notification_failures: u64,
    #[serde(default)]
    pub errors: u64,
}

/// Everything that survives a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Set once the configured subscribers were copied in; later edits to
    /// the registry are never overridden by the configuration again.
    #[serde(default)]
    pub seeded: bool,
    #[serde(default)]
    pub counters: Counters,
    #[serde(default)]
    pub repository: Vec<RepositoryTarget>,
    #[serde(default)]
    pub subscriber: Vec<SubscriberTarget>,
}

/// One section of [`PersistedState`] to overwrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatePatch {
    Repositories(Vec<RepositoryTarget>),
    Subscribers(Vec<SubscriberTarget>),
    Counters(Counters),
    Seeded(bool),
}

impl PersistedState {
    pub fn apply(&mut self, patch: StatePatch) {
        match patch {
            StatePatch::Repositories(r) => self.repository = r,
            StatePatch::Subscribers(s) => self.subscriber = s,
            StatePatch::Counters(c) => self.counters = c,
            StatePatch::Seeded(b) => self.seeded = b,
        }
    }

    /// Patches that turn `self` into `other`.
    pub fn diff(&self, other: &PersistedState) -> Vec<StatePatch> {
        let mut patches = Vec::new();
        if self.repository != other.repository {
            patches.push(StatePatch::Repositories(other.repository.clone()));
        }
        if self.subscriber != other.subscriber {
            patches.push(StatePatch::Subscribers(other.subscriber.clone()));
        }
        if self.counters != other.counters {
            patches.push(StatePatch::Counters(other.counters));
        }
        if self.seeded != other.seeded {
            patches.push(StatePatch::Seeded(other.seeded));
        }
        patches
    }
}

/// Storage primitives for persisted state.
pub trait StateBackend: Send + Debug {
    /// Full snapshot of the current (possibly unsaved) state.
    fn get(&self) -> PersistedState;

    /// Overwrite one section in memory.
    fn set(&mut self, patch: StatePatch) -> Result<()>;

    /// Durably flush the in-memory state.
    fn save(&mut self) -> Result<()>;
}

/// State kept in memory only (lost on restart).
#[derive(Debug, Default)]
pub struct MemoryStateBackend {
    state: PersistedState,
}

impl MemoryStateBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedState) -> Self {
        Self { state }
    }
}

impl StateBackend for MemoryStateBackend {
    fn get(&self) -> PersistedState {
        self.state.clone()
    }

    fn set(&mut self, patch: StatePatch) -> Result<()> {
        self.state.apply(patch);
        Ok(())
    }

    fn save(&mut self) -> Result<()> {
        Ok(())
    }
}

/// State stored as TOML in a single file.
#[derive(Debug)]
pub struct FileStateBackend {
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
    state: PersistedState,
}

impl FileStateBackend {
    /// Open (or lazily create) the state file.
    ///
    /// A file that exists but cannot be parsed is reported as an error rather
    /// than silently replaced: losing every last-seen SHA would re-announce
    /// every repository.
    pub fn open(path: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Result<Self> {
        let path = path.into();

        let state = if fs.is_file(&path) {
            let contents = fs.read_to_string(&path)?;
            let state: PersistedState = toml::from_str(&contents).map_err(|e| {
                CardwatchError::ConfigError(format!(
                    "persisted state {:?} is corrupted: {e}",
                    path
                ))
            })?;
            info!(
                path = ?path,
                repositories = state.repository.len(),
                subscribers = state.subscriber.len(),
                "loaded persisted state"
            );
            state
        } else {
            debug!(path = ?path, "no persisted state yet; starting empty");
            PersistedState::default()
        };

        Ok(Self { path, fs, state })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl StateBackend for FileStateBackend {
    fn get(&self) -> PersistedState {
        self.state.clone()
    }

    fn set(&mut self, patch: StatePatch) -> Result<()> {
        self.state.apply(patch);
        Ok(())
    }

    fn save(&mut self) -> Result<()> {
        let text = toml::to_string_pretty(&self.state)?;
        self.fs.write_atomic(&self.path, text.as_bytes())?;
        debug!(path = ?self.path, "persisted state saved");
        Ok(())
    }
}
