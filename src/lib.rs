// src/lib.rs

pub mod cli;
pub mod commands;
pub mod config;
pub mod errors;
pub mod fs;
pub mod github;
pub mod logging;
pub mod monitor;
pub mod notify;
pub mod process;
pub mod state;
pub mod types;
pub mod watch;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::commands::{App, Command, CommandReply};
use crate::config::{load_and_validate, ConfigFile, TransportKind};
use crate::fs::{FileSystem, RealFileSystem};
use crate::github::{CommitSource, GitHubCommitSource};
use crate::monitor::{Monitor, MonitorSettings};
use crate::notify::{Dispatcher, LogTransport, NotificationTransport, OneBotTransport};
use crate::process::ProcessSupervisor;
use crate::state::{FileStateBackend, StateStore};
use crate::watch::{ArtifactFilter, ArtifactWatcher};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - persisted state
/// - commit source, process supervisor, artifact watcher, dispatcher
/// - the monitor and its poll timers
/// - the console command loop and Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let app = Arc::new(build_app(config_path, cfg)?);

    if args.once {
        let reply = app.handle(Command::Check(None)).await;
        println!("{reply}");
        app.shutdown().await;
        if !reply.success {
            anyhow::bail!("one or more repository checks failed");
        }
        return Ok(());
    }

    app.monitor().start_monitoring();
    console(Arc::clone(&app)).await?;
    app.shutdown().await;
    Ok(())
}

/// Build the production [`App`]: file-backed state, GitHub commit source and
/// the configured notification transport.
pub fn build_app(config_path: PathBuf, cfg: ConfigFile) -> errors::Result<App> {
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let store = StateStore::new(FileStateBackend::open(&cfg.state.path, fs)?);
    let source: Arc<dyn CommitSource> = Arc::new(GitHubCommitSource::new(&cfg.github)?);

    let transport: Arc<dyn NotificationTransport> = match cfg.transport.kind {
        TransportKind::Log => Arc::new(LogTransport),
        TransportKind::OneBot => Arc::new(OneBotTransport::new(
            &cfg.transport,
            cfg.monitor.notify_timeout(),
        )?),
    };

    assemble(config_path, cfg, store, source, transport)
}

/// Wire the core around the given collaborators.
///
/// Subscribers listed in the configuration seed the persisted registry the
/// first time it is opened; after that the registry is only changed by
/// subscribe and unsubscribe commands. The configured repositories are
/// merged with the persisted last-seen commits.
pub fn assemble(
    config_path: PathBuf,
    cfg: ConfigFile,
    store: StateStore,
    source: Arc<dyn CommitSource>,
    transport: Arc<dyn NotificationTransport>,
) -> errors::Result<App> {
    let supervisor = Arc::new(ProcessSupervisor::new(&cfg.process));
    let filter = ArtifactFilter::new(&cfg.process.artifact_patterns, &cfg.process.ignore_patterns)?;
    let watcher = ArtifactWatcher::new(filter, cfg.monitor.settle());
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        transport,
        cfg.monitor.notify_timeout(),
    ));

    let seeded = store.seed_subscribers(&cfg.subscribers)?;
    if seeded > 0 {
        info!(count = seeded, "subscribers seeded from configuration");
    }

    let monitor = Monitor::new(
        MonitorSettings::from_config(&cfg),
        source,
        store.clone(),
        Arc::clone(&supervisor),
        watcher,
        Arc::clone(&dispatcher),
    );
    monitor.load_repositories(&cfg.repositories)?;

    Ok(App::new(config_path, cfg, store, supervisor, dispatcher, monitor))
}

/// Read commands from stdin until EOF+Ctrl-C, Ctrl-C or `quit`.
async fn console(app: Arc<App>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("cardwatch ready; type 'help' for commands");

    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    warn!(error = %e, "failed to listen for Ctrl+C");
                }
                info!("interrupt received; shutting down");
                break;
            }
            line = lines.next_line() => match line? {
                Some(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    if matches!(line, "quit" | "exit") {
                        break;
                    }
                    let reply = match line.parse::<Command>() {
                        Ok(command) => app.handle(command).await,
                        Err(reason) => CommandReply::failure(reason),
                    };
                    println!("{reply}");
                }
                None => {
                    debug!("stdin closed; waiting for Ctrl+C");
                    tokio::signal::ctrl_c().await?;
                    break;
                }
            },
        }
    }
    Ok(())
}

/// Simple dry-run output: resolved settings, repositories and subscribers.
fn print_dry_run(cfg: &ConfigFile) {
    println!("cardwatch dry-run");
    match cfg.monitor.refresh_interval() {
        Some(interval) => println!("  monitor.refresh_interval = {}s", interval.as_secs()),
        None => println!("  monitor.refresh_interval = disabled"),
    }
    println!(
        "  monitor.artifact_timeout = {}s",
        cfg.monitor.artifact_timeout_seconds
    );
    println!("  process.program = {}", cfg.process.program.display());
    println!(
        "  process.working_dir = {}",
        cfg.process.effective_working_dir().display()
    );
    println!("  process.output_dir = {}", cfg.process.output_dir.display());
    println!("  state.path = {}", cfg.state.path.display());
    println!("  transport = {:?}", cfg.transport.kind);
    println!();

    println!("repositories ({}):", cfg.repositories.len());
    for repo in &cfg.repositories {
        if repo.last_commit_sha.is_empty() {
            println!("  - {}", repo.key());
        } else {
            println!("  - {} (lastsha {})", repo.key(), repo.last_commit_sha);
        }
    }

    println!("subscribers ({}):", cfg.subscribers.len());
    for sub in &cfg.subscribers {
        println!("  - {sub}");
    }

    if !cfg.skipped.is_empty() {
        println!("skipped entries ({}):", cfg.skipped.len());
        for s in &cfg.skipped {
            println!("  - {}: {}", s.entry, s.reason);
        }
    }

    debug!("dry-run complete (nothing started)");
}
