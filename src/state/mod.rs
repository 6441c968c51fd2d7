// src/state/mod.rs

//! Persisted state: repositories with their last-seen commit, subscribers,
//! and cumulative counters.

pub mod backend;
pub mod store;

pub use backend::{
    Counters, FileStateBackend, MemoryStateBackend, PersistedState, StateBackend, StatePatch,
};
pub use store::StateStore;
