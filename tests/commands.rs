// tests/commands.rs
//
// Command parsing and the replies `App::handle` produces.

mod common;
use crate::common::builders::ConfigFileBuilder;
use crate::common::fakes::{FakeCommitSource, RecordingTransport};
use crate::common::{init_tracing, with_timeout};

use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use cardwatch::cli::LogLevel;
use cardwatch::commands::{App, Command};
use cardwatch::config::ConfigFile;
use cardwatch::logging::filter_directives;
use cardwatch::notify::Payload;
use cardwatch::state::{MemoryStateBackend, StateStore};
use cardwatch::types::{RepoKey, SubscriberKind, SubscriberTarget};

type TestResult = Result<(), Box<dyn Error>>;

fn app_with(
    config_path: &Path,
    cfg: ConfigFile,
) -> Result<(App, RecordingTransport), Box<dyn Error>> {
    app_on_store(config_path, cfg, StateStore::new(MemoryStateBackend::new()))
}

fn app_on_store(
    config_path: &Path,
    cfg: ConfigFile,
    store: StateStore,
) -> Result<(App, RecordingTransport), Box<dyn Error>> {
    init_tracing();
    let transport = RecordingTransport::new();
    let app = cardwatch::assemble(
        config_path.to_path_buf(),
        cfg,
        store,
        Arc::new(FakeCommitSource::new()),
        Arc::new(transport.clone()),
    )?;
    Ok((app, transport))
}

fn simple_config(dir: &Path) -> ConfigFileBuilder {
    ConfigFileBuilder::new(dir.join("generator"), dir.join("out")).refresh_interval_secs(0)
}

#[test]
fn parses_every_command_and_alias() -> TestResult {
    assert_eq!("status".parse::<Command>()?, Command::Status);
    assert_eq!("  LIST ".parse::<Command>()?, Command::List);
    assert_eq!("?".parse::<Command>()?, Command::Help);
    assert_eq!("stopmonitoring".parse::<Command>()?, Command::StopMonitoring);
    assert_eq!("stop-monitoring".parse::<Command>()?, Command::StopMonitoring);
    assert_eq!("stop".parse::<Command>()?, Command::Stop);
    assert_eq!("watch".parse::<Command>()?, Command::Watch);

    assert_eq!(
        "subscribe 12345".parse::<Command>()?,
        Command::Subscribe(SubscriberTarget::group("12345"))
    );
    assert_eq!(
        "sub 42 private".parse::<Command>()?,
        Command::Subscribe(SubscriberTarget::new("42", SubscriberKind::Private))
    );
    assert_eq!(
        "subscribe private:42".parse::<Command>()?,
        Command::Subscribe(SubscriberTarget::private("42"))
    );
    assert_eq!(
        "unsub group:12345".parse::<Command>()?,
        Command::Unsubscribe("12345".into())
    );

    assert_eq!("notify".parse::<Command>()?, Command::Notify(None));
    assert_eq!(
        "notify hello there".parse::<Command>()?,
        Command::Notify(Some("hello there".into()))
    );

    assert_eq!("check".parse::<Command>()?, Command::Check(None));
    assert_eq!(
        "check octo/cat@dev".parse::<Command>()?,
        Command::Check(Some(RepoKey::new("octo", "cat", "dev")))
    );
    assert_eq!(
        "check octo/cat".parse::<Command>()?,
        Command::Check(Some(RepoKey::new("octo", "cat", "main")))
    );
    Ok(())
}

#[test]
fn rejects_malformed_commands() {
    let err = "frobnicate".parse::<Command>().unwrap_err();
    assert!(err.contains("unknown command 'frobnicate'"), "got: {err}");

    assert!("subscribe".parse::<Command>().is_err());
    assert!("subscribe 1 2 3".parse::<Command>().is_err());
    assert!("subscribe 1 channel".parse::<Command>().is_err());
    assert!("subscribe group:".parse::<Command>().is_err());
    assert!("unsubscribe".parse::<Command>().is_err());
    assert!("check not-a-repo".parse::<Command>().is_err());
    assert!("check a/b c/d".parse::<Command>().is_err());
    assert!("".parse::<Command>().is_err());
}

#[tokio::test]
async fn subscribe_is_idempotent_through_handle() -> TestResult {
    let dir = tempfile::tempdir()?;
    let (app, _) = app_with(&dir.path().join("Cardwatch.toml"), simple_config(dir.path()).build())?;

    let first = with_timeout(app.handle("subscribe 100".parse()?)).await;
    assert!(first.success);
    assert_eq!(first.message, "subscribed group:100");

    let second = with_timeout(app.handle("subscribe 100".parse()?)).await;
    assert!(second.success);
    assert!(second.message.contains("already subscribed"), "{}", second.message);

    let list = with_timeout(app.handle(Command::List)).await;
    assert_eq!(list.message, "1. group:100");

    let gone = with_timeout(app.handle(Command::Unsubscribe("100".into()))).await;
    assert_eq!(gone.message, "unsubscribed 100");
    let again = with_timeout(app.handle(Command::Unsubscribe("100".into()))).await;
    assert!(again.success);
    assert_eq!(again.message, "100 is not subscribed");

    let empty = with_timeout(app.handle(Command::List)).await;
    assert_eq!(empty.message, "no subscribers");
    Ok(())
}

#[tokio::test]
async fn unsubscribing_a_configured_target_survives_reassembly() -> TestResult {
    let dir = tempfile::tempdir()?;
    let config_path = dir.path().join("Cardwatch.toml");
    let store = StateStore::new(MemoryStateBackend::new());
    let cfg = simple_config(dir.path())
        .with_subscriber("g1", "group")
        .with_subscriber("p1", "private")
        .build();

    let (app, _) = app_on_store(&config_path, cfg.clone(), store.clone())?;
    assert_eq!(app.dispatcher().list().len(), 2);
    let gone = with_timeout(app.handle(Command::Unsubscribe("g1".into()))).await;
    assert_eq!(gone.message, "unsubscribed g1");
    drop(app);

    // A restart with the same configuration must not bring g1 back.
    let (app, _) = app_on_store(&config_path, cfg, store.clone())?;
    assert_eq!(app.dispatcher().list(), vec![SubscriberTarget::private("p1")]);
    assert!(store.snapshot().seeded);
    Ok(())
}

#[tokio::test]
async fn status_reports_program_repositories_and_counters() -> TestResult {
    let dir = tempfile::tempdir()?;
    let cfg = simple_config(dir.path())
        .with_repository("octo", "cat", "")
        .with_subscriber("7", "private")
        .build();
    let (app, _) = app_with(&dir.path().join("Cardwatch.toml"), cfg)?;

    let reply = with_timeout(app.handle(Command::Status)).await;
    assert!(reply.success);
    let text = reply.message;
    assert!(text.contains("program:"), "{text}");
    assert!(text.contains("(exists: no)"), "{text}");
    assert!(text.contains("octo/cat@main last=unseen"), "{text}");
    assert!(text.contains("subscribers: 1"), "{text}");
    assert!(text.contains("monitoring: stopped"), "{text}");
    Ok(())
}

#[tokio::test]
async fn notify_sends_text_and_reports_partial_failure() -> TestResult {
    let dir = tempfile::tempdir()?;
    let cfg = simple_config(dir.path())
        .with_subscriber("g1", "group")
        .with_subscriber("p1", "private")
        .build();
    let (app, transport) = app_with(&dir.path().join("Cardwatch.toml"), cfg)?;

    let reply = with_timeout(app.handle("notify hello".parse()?)).await;
    assert!(reply.success);
    assert_eq!(reply.message, "delivered to 2 subscribers");
    assert_eq!(transport.delivered_to("g1"), 1);
    assert!(matches!(&transport.delivered()[0].1, Payload::Text(t) if t == "hello"));

    transport.fail_for("g1");
    let reply = with_timeout(app.handle("notify again".parse()?)).await;
    assert!(reply.success);
    assert!(reply.message.contains("failed: group:g1"), "{}", reply.message);

    transport.fail_for("p1");
    let reply = with_timeout(app.handle("notify third".parse()?)).await;
    assert!(!reply.success);
    assert!(reply.message.contains("hint:"), "{}", reply.message);
    assert!(reply.to_string().starts_with("[error]"));
    Ok(())
}

#[tokio::test]
async fn notify_without_artifact_fails() -> TestResult {
    let dir = tempfile::tempdir()?;
    let cfg = simple_config(dir.path()).with_subscriber("g1", "group").build();
    let (app, transport) = app_with(&dir.path().join("Cardwatch.toml"), cfg)?;

    let reply = with_timeout(app.handle(Command::Notify(None))).await;
    assert!(!reply.success);
    assert!(reply.message.starts_with("nothing to send"), "{}", reply.message);
    assert!(transport.delivered().is_empty());
    Ok(())
}

#[tokio::test]
async fn stop_without_process_fails_with_hint() -> TestResult {
    let dir = tempfile::tempdir()?;
    let (app, _) = app_with(&dir.path().join("Cardwatch.toml"), simple_config(dir.path()).build())?;

    let reply = with_timeout(app.handle(Command::Stop)).await;
    assert!(!reply.success);
    assert!(reply.message.starts_with("stop failed"), "{}", reply.message);
    Ok(())
}

#[tokio::test]
async fn check_of_unknown_repository_is_a_failure() -> TestResult {
    let dir = tempfile::tempdir()?;
    let (app, _) = app_with(&dir.path().join("Cardwatch.toml"), simple_config(dir.path()).build())?;

    let reply = with_timeout(app.handle("check nobody/nothing".parse()?)).await;
    assert!(!reply.success);
    assert!(reply.message.contains("nobody/nothing@main"), "{}", reply.message);

    let reply = with_timeout(app.handle(Command::Check(None))).await;
    assert!(reply.success);
    assert_eq!(reply.message, "no repositories configured");
    Ok(())
}

#[tokio::test]
async fn restart_reloads_repositories_from_disk() -> TestResult {
    let dir = tempfile::tempdir()?;
    let config_path = dir.path().join("Cardwatch.toml");
    let out = dir.path().join("out");
    let program = dir.path().join("generator");
    let header = format!(
        "[monitor]\nrefresh_interval_seconds = 0\n\n[process]\nprogram = {program:?}\noutput_dir = {out:?}\n",
        program = program.display().to_string(),
        out = out.display().to_string(),
    );
    std::fs::write(&config_path, &header)?;
    let cfg = cardwatch::config::load_and_validate(&config_path)?;
    let (app, _) = app_with(&config_path, cfg)?;
    assert!(app.monitor().repository_status().is_empty());

    std::fs::write(
        &config_path,
        format!(
            "{header}\n[[repository]]\nowner = \"octo\"\nrepo = \"cat\"\n\n[[repository]]\nowner = \"octo\"\nrepo = \"dog\"\nbranch = \"dev\"\n\n[[repository]]\nrepo = \"orphan\"\n"
        ),
    )?;

    let reply = with_timeout(app.handle(Command::Restart)).await;
    assert!(reply.success, "{}", reply.message);
    assert_eq!(
        reply.message,
        "monitoring restarted with 2 repositories (1 configuration entries skipped)"
    );
    let keys: Vec<String> = app
        .monitor()
        .repository_status()
        .iter()
        .map(|r| r.key.to_string())
        .collect();
    assert_eq!(keys, vec!["octo/cat@main", "octo/dog@dev"]);

    let stopped = with_timeout(app.handle(Command::StopMonitoring)).await;
    assert_eq!(stopped.message, "monitoring stopped");
    Ok(())
}

#[test]
fn log_filter_prefers_cli_then_env() {
    let quiet = "hyper=warn,hyper_util=warn,reqwest=warn,notify=warn";

    assert_eq!(filter_directives(None, None), format!("info,{quiet}"));
    assert_eq!(
        filter_directives(Some(LogLevel::Debug), Some("trace")),
        format!("debug,{quiet}")
    );
    assert_eq!(filter_directives(None, Some("WARNING")), format!("warn,{quiet}"));
    assert_eq!(
        filter_directives(None, Some("cardwatch=trace,reqwest=info")),
        "cardwatch=trace,reqwest=info"
    );
    assert_eq!(filter_directives(None, Some("  ")), format!("info,{quiet}"));
}
