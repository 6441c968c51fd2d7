// src/commands.rs

//! Command surface issued by the host runtime.
//!
//! Every command maps onto one operation of the core and answers with a
//! [`CommandReply`]: a success flag plus a human-readable message, with a
//! remediation hint on failure.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};

use crate::config::{load_and_validate, ConfigFile, SkippedEntry};
use crate::errors::CardwatchError;
use crate::monitor::{short_sha, CycleOutcome, Monitor, RepoStatus};
use crate::notify::{Dispatcher, Payload, RunCounters};
use crate::process::{ProcessHandle, ProcessSupervisor};
use crate::state::{Counters, StateStore};
use crate::types::{RepoKey, RunMode, SubscriberKind, SubscriberTarget};

pub const HELP: &str = "\
commands:
  status                      show monitor, process and subscriber state
  subscribe <origin> [kind]   register a destination (kind: group | private)
  unsubscribe <origin>        remove a destination
  list                        list subscribers
  notify [text]               send text, or re-send the last artifact
  start                       run the generator once
  watch                       run the generator in continuous mode
  stop                        stop the generator
  check [owner/repo[@branch]] check one or all repositories now
  restart                     reload the configuration and restart monitoring
  stop-monitoring             stop all poll timers
  help                        this text";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    Subscribe(SubscriberTarget),
    Unsubscribe(String),
    List,
    Notify(Option<String>),
    Start,
    Watch,
    Stop,
    Check(Option<RepoKey>),
    Restart,
    StopMonitoring,
    Help,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let args: Vec<&str> = rest.split_whitespace().collect();

        match word.to_lowercase().as_str() {
            "status" => Ok(Command::Status),
            "subscribe" | "sub" => match args.as_slice() {
                [target] => target.parse().map(Command::Subscribe),
                [origin, kind] => {
                    let kind: SubscriberKind = kind.parse()?;
                    Ok(Command::Subscribe(SubscriberTarget::new(*origin, kind)))
                }
                _ => Err("usage: subscribe <origin> [group|private]".to_string()),
            },
            "unsubscribe" | "unsub" => match args.as_slice() {
                [origin] => {
                    let origin = origin.split_once(':').map_or(*origin, |(_, id)| id);
                    Ok(Command::Unsubscribe(origin.to_string()))
                }
                _ => Err("usage: unsubscribe <origin>".to_string()),
            },
            "list" => Ok(Command::List),
            "notify" => Ok(Command::Notify(
                (!rest.is_empty()).then(|| rest.to_string()),
            )),
            "start" => Ok(Command::Start),
            "watch" => Ok(Command::Watch),
            "stop" => Ok(Command::Stop),
            "check" => match args.as_slice() {
                [] => Ok(Command::Check(None)),
                [repo] => repo.parse().map(|key| Command::Check(Some(key))),
                _ => Err("usage: check [owner/repo[@branch]]".to_string()),
            },
            "restart" => Ok(Command::Restart),
            "stop-monitoring" | "stopmonitoring" => Ok(Command::StopMonitoring),
            "help" | "?" => Ok(Command::Help),
            "" => Err("empty command".to_string()),
            other => Err(format!("unknown command '{other}' (try 'help')")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub success: bool,
    pub message: String,
}

impl CommandReply {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }

    /// Failure reply for `err`, with its remediation hint if it has one.
    pub fn error(context: &str, err: &CardwatchError) -> Self {
        let message = match err.remediation() {
            Some(hint) => format!("{context}: {err}\nhint: {hint}"),
            None => format!("{context}: {err}"),
        };
        Self::failure(message)
    }
}

impl fmt::Display for CommandReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.success { "ok" } else { "error" };
        write!(f, "[{mark}] {}", self.message)
    }
}

/// Everything `status` reports.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub program: PathBuf,
    pub program_exists: bool,
    pub output_dir: PathBuf,
    pub output_dir_exists: bool,
    pub monitoring: bool,
    pub process: ProcessHandle,
    pub repositories: Vec<RepoStatus>,
    pub pending_requests: usize,
    pub subscribers: usize,
    pub counters: Counters,
    pub run: RunCounters,
    pub skipped: Vec<SkippedEntry>,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let yes_no = |b: bool| if b { "yes" } else { "no" };
        writeln!(
            f,
            "program: {} (exists: {})",
            self.program.display(),
            yes_no(self.program_exists)
        )?;
        writeln!(
            f,
            "output dir: {} (exists: {})",
            self.output_dir.display(),
            yes_no(self.output_dir_exists)
        )?;
        writeln!(f, "process: {}", self.process)?;
        writeln!(
            f,
            "monitoring: {} ({} repositories, {} pending)",
            if self.monitoring { "running" } else { "stopped" },
            self.repositories.len(),
            self.pending_requests
        )?;
        for repo in &self.repositories {
            let sha = if repo.last_sha.is_empty() {
                "unseen"
            } else {
                short_sha(&repo.last_sha)
            };
            write!(f, "  {} last={sha}", repo.key)?;
            if repo.in_flight {
                write!(f, " in-flight")?;
            }
            if let Some(delay) = repo.backoff {
                write!(f, " backoff={}s", delay.as_secs())?;
            }
            if let Some(reason) = &repo.disabled {
                write!(f, " disabled ({reason})")?;
            }
            writeln!(f)?;
        }
        writeln!(f, "subscribers: {}", self.subscribers)?;
        writeln!(
            f,
            "notifications: {} sent, {} failed this run; {} sent, {} failed total; {} errors",
            self.run.success_count,
            self.run.failure_count,
            self.counters.notifications_sent,
            self.counters.notification_failures,
            self.counters.errors
        )?;
        for s in &self.skipped {
            writeln!(f, "skipped {}: {}", s.entry, s.reason)?;
        }
        Ok(())
    }
}

/// The wired-up core, driven by commands.
pub struct App {
    config_path: PathBuf,
    config: Mutex<ConfigFile>,
    store: StateStore,
    supervisor: Arc<ProcessSupervisor>,
    dispatcher: Arc<Dispatcher>,
    monitor: Arc<Monitor>,
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("config_path", &self.config_path)
            .finish_non_exhaustive()
    }
}

impl App {
    pub fn new(
        config_path: PathBuf,
        config: ConfigFile,
        store: StateStore,
        supervisor: Arc<ProcessSupervisor>,
        dispatcher: Arc<Dispatcher>,
        monitor: Arc<Monitor>,
    ) -> Self {
        Self {
            config_path,
            config: Mutex::new(config),
            store,
            supervisor,
            dispatcher,
            monitor,
        }
    }

    fn config(&self) -> MutexGuard<'_, ConfigFile> {
        self.config.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn status_report(&self) -> StatusReport {
        let (program, output_dir, skipped) = {
            let cfg = self.config();
            (
                cfg.process.program.clone(),
                cfg.process.output_dir.clone(),
                cfg.skipped.clone(),
            )
        };
        StatusReport {
            program_exists: program.is_file(),
            output_dir_exists: output_dir.is_dir(),
            program,
            output_dir,
            monitoring: self.monitor.is_monitoring(),
            process: self.supervisor.status(),
            repositories: self.monitor.repository_status(),
            pending_requests: self.monitor.pending_requests().len(),
            subscribers: self.dispatcher.list().len(),
            counters: self.store.counters(),
            run: self.dispatcher.run_counters(),
            skipped,
        }
    }

    pub async fn handle(&self, command: Command) -> CommandReply {
        info!(?command, "handling command");
        match command {
            Command::Help => CommandReply::ok(HELP),
            Command::Status => CommandReply::ok(self.status_report().to_string()),
            Command::Subscribe(target) => match self.dispatcher.subscribe(&target) {
                Ok(true) => CommandReply::ok(format!("{target} is already subscribed")),
                Ok(false) => CommandReply::ok(format!("subscribed {target}")),
                Err(err) => CommandReply::error("subscribe failed", &err),
            },
            Command::Unsubscribe(origin) => match self.dispatcher.unsubscribe(&origin) {
                Ok(true) => CommandReply::ok(format!("unsubscribed {origin}")),
                Ok(false) => CommandReply::ok(format!("{origin} is not subscribed")),
                Err(err) => CommandReply::error("unsubscribe failed", &err),
            },
            Command::List => {
                let subscribers = self.dispatcher.list();
                if subscribers.is_empty() {
                    return CommandReply::ok("no subscribers");
                }
                let lines: Vec<String> = subscribers
                    .iter()
                    .enumerate()
                    .map(|(i, s)| format!("{}. {s}", i + 1))
                    .collect();
                CommandReply::ok(lines.join("\n"))
            }
            Command::Notify(text) => self.manual_notify(text).await,
            Command::Start => self.start_process(RunMode::OneShot).await,
            Command::Watch => self.start_process(RunMode::Watch).await,
            Command::Stop => {
                let timeout = self.supervisor.stop_timeout();
                match self.supervisor.stop(true, timeout).await {
                    Ok(handle) => CommandReply::ok(format!("generator stopped: {handle}")),
                    Err(err) => CommandReply::error("stop failed", &err),
                }
            }
            Command::Check(target) => self.check(target).await,
            Command::Restart => self.restart().await,
            Command::StopMonitoring => {
                if self.monitor.stop_monitoring().await {
                    CommandReply::ok("monitoring stopped")
                } else {
                    CommandReply::ok("monitoring was not running")
                }
            }
        }
    }

    async fn start_process(&self, mode: RunMode) -> CommandReply {
        match self.supervisor.start(mode, None).await {
            Ok(handle) => CommandReply::ok(format!("generator started ({mode}): {handle}")),
            Err(err) => CommandReply::error("start failed", &err),
        }
    }

    async fn manual_notify(&self, text: Option<String>) -> CommandReply {
        let payload = match text {
            Some(text) => Payload::Text(text),
            None => match self.monitor.last_artifact() {
                Some(artifact) => Payload::Image {
                    path: artifact.path,
                    caption: None,
                },
                None => {
                    return CommandReply::failure(
                        "nothing to send: no artifact observed yet (use 'notify <text>')",
                    );
                }
            },
        };

        let outcomes = self.dispatcher.dispatch(&payload).await;
        if outcomes.is_empty() {
            return CommandReply::ok("no subscribers");
        }
        let failed: Vec<String> = outcomes
            .iter()
            .filter(|o| !o.success)
            .map(|o| o.target.to_string())
            .collect();
        let sent = outcomes.len() - failed.len();
        let message = if failed.is_empty() {
            format!("delivered to {sent} subscribers")
        } else {
            format!(
                "delivered to {sent}/{} subscribers; failed: {}",
                outcomes.len(),
                failed.join(", ")
            )
        };
        if sent == 0 {
            CommandReply::failure(format!(
                "{message}\nhint: check the transport endpoint and that the bot can reach the targets"
            ))
        } else {
            CommandReply::ok(message)
        }
    }

    async fn check(&self, target: Option<RepoKey>) -> CommandReply {
        let results = match target {
            Some(key) => {
                let result = self.monitor.check_repository(&key).await;
                vec![(key, result)]
            }
            None => self.monitor.check_all().await,
        };
        if results.is_empty() {
            return CommandReply::ok("no repositories configured");
        }

        let mut success = true;
        let lines: Vec<String> = results
            .iter()
            .map(|(key, result)| match result {
                Ok(outcome @ CycleOutcome::Busy) => {
                    success = false;
                    format!("{key}: {outcome}")
                }
                Ok(outcome) => format!("{key}: {outcome}"),
                Err(err) => {
                    success = false;
                    match err.remediation() {
                        Some(hint) => format!("{key}: {err} (hint: {hint})"),
                        None => format!("{key}: {err}"),
                    }
                }
            })
            .collect();

        CommandReply {
            success,
            message: lines.join("\n"),
        }
    }

    async fn restart(&self) -> CommandReply {
        let cfg = match load_and_validate(&self.config_path) {
            Ok(cfg) => cfg,
            Err(err) => return CommandReply::error("reloading configuration failed", &err),
        };
        let repositories = cfg.repositories.clone();
        let skipped = cfg.skipped.len();
        {
            let mut current = self.config();
            current.repositories = cfg.repositories;
            current.skipped = cfg.skipped;
        }

        match self.monitor.restart_monitoring(&repositories).await {
            Ok(count) => {
                let mut message = format!("monitoring restarted with {count} repositories");
                if skipped > 0 {
                    message.push_str(&format!(" ({skipped} configuration entries skipped)"));
                }
                CommandReply::ok(message)
            }
            Err(err) => CommandReply::error("restarting monitoring failed", &err),
        }
    }

    /// Stop the timers and, if it is still up, the generator.
    pub async fn shutdown(&self) {
        self.monitor.stop_monitoring().await;
        if self.supervisor.status().state.is_live() {
            let timeout = self.supervisor.stop_timeout();
            if let Err(err) = self.supervisor.stop(true, timeout).await {
                warn!(error = %err, "stopping generator on shutdown failed");
            }
        }
        info!("shutdown complete");
    }
}
