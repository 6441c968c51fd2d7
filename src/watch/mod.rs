// src/watch/mod.rs

//! Output-directory observation.
//!
//! This module is responsible for:
//! - Compiling artifact / ignore glob patterns.
//! - Wiring up a cross-platform filesystem watcher (`notify`).
//! - Debouncing bursts of events so partially written files are never
//!   reported, and tagging each artifact with a content digest.
//!
//! It does **not** know which repository an artifact belongs to; correlation
//! happens in the monitor.

pub mod debounce;
pub mod hash;
pub mod patterns;
pub mod watcher;

pub use debounce::{SettleTracker, Settled};
pub use hash::{digest_file, ContentDigest};
pub use patterns::ArtifactFilter;
pub use watcher::{ArtifactEvent, ArtifactStream, ArtifactWatcher};
