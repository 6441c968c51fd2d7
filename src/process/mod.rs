// src/process/mod.rs

//! External generator process supervision.
//!
//! - [`supervisor`] owns start/stop and the exit monitor.
//! - [`handle`] holds the state machine and the status snapshot type.
//! - [`output`] drains the child's stdout/stderr into the log.
//! - [`signal`] sends the polite termination request used by graceful stop.

pub mod handle;
pub mod output;
pub mod signal;
pub mod supervisor;

pub use handle::{ProcessHandle, ProcessState};
pub use supervisor::ProcessSupervisor;
