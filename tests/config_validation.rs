// tests/config_validation.rs

mod common;
use crate::common::init_tracing;

use std::error::Error;
use std::io::Write;

use tempfile::NamedTempFile;

use cardwatch::config::{load_and_validate, parse_str, ConfigFile, TransportKind};
use cardwatch::errors::CardwatchError;
use cardwatch::types::{SubscriberKind, DEFAULT_BRANCH};

type TestResult = Result<(), Box<dyn Error>>;

fn validate(text: &str) -> Result<ConfigFile, CardwatchError> {
    ConfigFile::try_from(parse_str(text)?)
}

#[test]
fn minimal_config_uses_defaults() -> TestResult {
    init_tracing();
    let cfg = validate(
        r#"
[process]
program = "bin/YumeCard"
output_dir = "bin/Style"
"#,
    )?;

    assert_eq!(cfg.monitor.refresh_interval_seconds, 3600);
    assert_eq!(cfg.monitor.artifact_timeout_seconds, 120);
    assert_eq!(cfg.github.api_base, "https://api.github.com");
    assert_eq!(cfg.transport.kind, TransportKind::Log);
    assert_eq!(cfg.process.effective_working_dir(), std::path::PathBuf::from("bin"));
    assert!(cfg.repositories.is_empty());
    assert!(cfg.skipped.is_empty());
    Ok(())
}

#[test]
fn zero_refresh_interval_disables_scheduled_polling() -> TestResult {
    let cfg = validate(
        r#"
[monitor]
refresh_interval_seconds = 0

[process]
program = "gen"
output_dir = "out"
"#,
    )?;
    assert_eq!(cfg.monitor.refresh_interval(), None);
    Ok(())
}

#[test]
fn repository_missing_owner_is_skipped_with_reason() -> TestResult {
    init_tracing();
    let cfg = validate(
        r#"
[process]
program = "gen"
output_dir = "out"

[[repository]]
repo = "orphan"

[[repository]]
owner = "A"
repo = "B"

[[repository]]
owner = "C"
"#,
    )?;

    assert_eq!(cfg.repositories.len(), 1);
    let repo = &cfg.repositories[0];
    assert_eq!((repo.owner.as_str(), repo.repo.as_str()), ("A", "B"));
    assert_eq!(repo.branch, DEFAULT_BRANCH);
    assert_eq!(repo.last_commit_sha, "");

    assert_eq!(cfg.skipped.len(), 2);
    assert_eq!(cfg.skipped[0].entry, "repository[0]");
    assert!(cfg.skipped[0].reason.contains("owner"));
    assert_eq!(cfg.skipped[1].entry, "repository[2]");
    assert!(cfg.skipped[1].reason.contains("repo"));
    Ok(())
}

#[test]
fn duplicate_repository_and_blank_branch_collapse() -> TestResult {
    let cfg = validate(
        r#"
[process]
program = "gen"
output_dir = "out"

[[repository]]
owner = "A"
repo = "B"
branch = ""
lastsha = "abc123"

[[repository]]
owner = "A"
repo = "B"
branch = "main"
"#,
    )?;

    assert_eq!(cfg.repositories.len(), 1);
    assert_eq!(cfg.repositories[0].last_commit_sha, "abc123");
    assert_eq!(cfg.skipped.len(), 1);
    assert!(cfg.skipped[0].reason.contains("duplicate"));
    Ok(())
}

#[test]
fn subscriber_entries_are_parsed_and_deduplicated() -> TestResult {
    let cfg = validate(
        r#"
[process]
program = "gen"
output_dir = "out"

[[subscriber]]
origin = "g1"

[[subscriber]]
origin = "p1"
kind = "private"

[[subscriber]]
origin = "g1"
kind = "group"

[[subscriber]]
origin = "x"
kind = "channel"

[[subscriber]]
kind = "group"
"#,
    )?;

    let origins: Vec<_> = cfg
        .subscribers
        .iter()
        .map(|s| (s.origin_id.as_str(), s.kind))
        .collect();
    assert_eq!(
        origins,
        vec![("g1", SubscriberKind::Group), ("p1", SubscriberKind::Private)]
    );
    assert_eq!(cfg.skipped.len(), 2);
    Ok(())
}

#[test]
fn zero_artifact_timeout_is_fatal() {
    let result = validate(
        r#"
[monitor]
artifact_timeout_seconds = 0

[process]
program = "gen"
output_dir = "out"
"#,
    );
    match result {
        Err(CardwatchError::ConfigError(msg)) => assert!(msg.contains("artifact_timeout")),
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

#[test]
fn invalid_glob_is_fatal() {
    let result = validate(
        r#"
[process]
program = "gen"
output_dir = "out"
artifact_patterns = ["[unclosed"]
"#,
    );
    assert!(matches!(result, Err(CardwatchError::ConfigError(_))));
}

#[test]
fn onebot_transport_requires_endpoint() {
    let result = validate(
        r#"
[process]
program = "gen"
output_dir = "out"

[transport]
kind = "onebot"
"#,
    );
    assert!(matches!(result, Err(CardwatchError::ConfigError(_))));
}

#[test]
fn missing_process_section_is_a_toml_error() {
    let result = parse_str("[monitor]\nrefresh_interval_seconds = 5\n");
    assert!(matches!(result, Err(CardwatchError::TomlError(_))));
}

#[test]
fn load_and_validate_reads_from_disk() -> TestResult {
    let mut file = NamedTempFile::new()?;
    write!(
        file,
        r#"
[process]
program = "gen"
output_dir = "out"

[[repository]]
owner = "FengYing1314"
repo = "astrbot_plugin_YumeCard"
"#
    )?;

    let cfg = load_and_validate(file.path())?;
    assert_eq!(cfg.repositories.len(), 1);
    assert_eq!(
        cfg.repositories[0].key().to_string(),
        "FengYing1314/astrbot_plugin_YumeCard@main"
    );
    Ok(())
}
