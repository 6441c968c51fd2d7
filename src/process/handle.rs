// src/process/handle.rs

use std::fmt;

use chrono::{DateTime, Utc};

use crate::types::RunMode;

/// Lifecycle of the external generator.
///
/// ```text
/// Stopped -> Starting -> Running -> Stopping -> Stopped
///               |           |
///               +-----------+--> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl ProcessState {
    /// A process exists (or is being created / torn down).
    pub fn is_live(self) -> bool {
        matches!(
            self,
            ProcessState::Starting | ProcessState::Running | ProcessState::Stopping
        )
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessState::Stopped => "stopped",
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Stopping => "stopping",
            ProcessState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Read-only snapshot of the supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub state: ProcessState,
    pub pid: Option<u32>,
    pub mode: Option<RunMode>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_exit_code: Option<i32>,
}

impl Default for ProcessHandle {
    fn default() -> Self {
        Self {
            state: ProcessState::Stopped,
            pid: None,
            mode: None,
            started_at: None,
            last_exit_code: None,
        }
    }
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.state)?;
        if let Some(mode) = self.mode {
            write!(f, " ({mode})")?;
        }
        if let Some(pid) = self.pid {
            write!(f, ", pid {pid}")?;
        }
        if let Some(started) = self.started_at {
            write!(f, ", started {}", started.format("%Y-%m-%d %H:%M:%S UTC"))?;
        }
        if let Some(code) = self.last_exit_code {
            write!(f, ", last exit code {code}")?;
        }
        Ok(())
    }
}
