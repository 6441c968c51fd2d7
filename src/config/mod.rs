// src/config/mod.rs

//! Configuration loading and validation for cardwatch.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate global settings and filter out malformed entries (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, parse_str};
pub use model::{
    ConfigFile, GitHubSection, MonitorSection, ProcessSection, RawConfigFile,
    RawRepositoryEntry, RawSubscriberEntry, SkippedEntry, StateSection, TransportKind,
    TransportSection,
};
