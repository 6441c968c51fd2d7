// tests/artifact_watcher.rs

mod common;
use crate::common::init_tracing;

use std::error::Error;
use std::fs;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

use cardwatch::fs::mock::MockFileSystem;
use cardwatch::fs::FileSystem;
use cardwatch::watch::{digest_file, ArtifactFilter, ArtifactWatcher, SettleTracker};

type TestResult = Result<(), Box<dyn Error>>;

fn watcher(settle_millis: u64) -> Result<ArtifactWatcher, Box<dyn Error>> {
    let filter = ArtifactFilter::new(
        &["*.png".to_string(), "*.jpg".to_string()],
        &["*.tmp".to_string(), ".*".to_string()],
    )?;
    Ok(ArtifactWatcher::new(filter, Duration::from_millis(settle_millis)))
}

#[test]
fn filter_matches_file_names_only() -> TestResult {
    let filter = ArtifactFilter::new(&["*.png".to_string()], &[".*".to_string()])?;
    assert!(filter.matches(std::path::Path::new("/out/.hidden-dir/card.png")));
    assert!(!filter.matches(std::path::Path::new("/out/.card.png")));
    assert!(!filter.matches(std::path::Path::new("/out/card.txt")));
    Ok(())
}

#[test]
fn settle_tracker_reports_only_quiet_paths() {
    let settle = Duration::from_millis(300);
    let mut tracker = SettleTracker::new(settle);
    let t0 = Instant::now();
    let a = std::path::Path::new("a.png");
    let b = std::path::Path::new("b.png");

    tracker.record(a, t0, Some(1));
    tracker.record(b, t0 + Duration::from_millis(100), Some(5));
    tracker.record(a, t0 + Duration::from_millis(200), Some(10));

    assert_eq!(tracker.next_deadline(), Some(t0 + Duration::from_millis(400)));
    assert!(tracker.take_settled(t0 + Duration::from_millis(350)).is_empty());

    let settled = tracker.take_settled(t0 + Duration::from_millis(420));
    assert_eq!(settled.len(), 1);
    assert_eq!(settled[0].path, b);

    let settled = tracker.take_settled(t0 + Duration::from_millis(500));
    assert_eq!(settled.len(), 1);
    assert_eq!((settled[0].path.as_path(), settled[0].len), (a, Some(10)));
    assert!(tracker.is_empty());
}

#[tokio::test]
async fn chunked_write_is_reported_once_when_complete() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let mut stream = watcher(300)?.observe(
        dir.path(),
        Duration::from_secs(5),
        CancellationToken::new(),
    )?;

    let path = dir.path().join("card.png");
    let writer_path = path.clone();
    tokio::spawn(async move {
        let mut file = fs::File::create(&writer_path).unwrap();
        for chunk in 0..5 {
            file.write_all(format!("chunk-{chunk};").as_bytes()).unwrap();
            file.flush().unwrap();
            sleep(Duration::from_millis(50)).await;
        }
    });

    let event = timeout(Duration::from_secs(5), stream.next())
        .await?
        .ok_or("stream ended without an artifact")?;
    assert_eq!(event.path.file_name(), path.file_name());
    assert_eq!(
        fs::read_to_string(&event.path)?,
        "chunk-0;chunk-1;chunk-2;chunk-3;chunk-4;"
    );
    let digest = digest_file(&event.path)?;
    assert_eq!(event.digest, digest.hex);
    assert_eq!(digest.len, 40);
    Ok(())
}

#[tokio::test]
async fn ignored_files_are_not_reported_and_stream_ends_at_timeout() -> TestResult {
    let dir = tempfile::tempdir()?;
    let mut stream = watcher(100)?.observe(
        dir.path(),
        Duration::from_millis(800),
        CancellationToken::new(),
    )?;

    fs::write(dir.path().join("card.png.tmp"), b"partial")?;
    fs::write(dir.path().join("notes.txt"), b"text")?;

    let started = Instant::now();
    let next = timeout(Duration::from_secs(5), stream.next()).await?;
    assert!(next.is_none());
    assert!(started.elapsed() >= Duration::from_millis(500));
    // Finished streams stay finished.
    assert!(stream.next().await.is_none());
    Ok(())
}

#[tokio::test]
async fn cancellation_ends_the_stream_early() -> TestResult {
    let dir = tempfile::tempdir()?;
    let cancel = CancellationToken::new();
    let mut stream = watcher(100)?.observe(dir.path(), Duration::from_secs(60), cancel.clone())?;

    let canceller = cancel.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let next = timeout(Duration::from_secs(5), stream.next()).await?;
    assert!(next.is_none());
    Ok(())
}

#[tokio::test]
async fn missing_output_directory_is_created() -> TestResult {
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("Style").join("out");
    let _stream = watcher(100)?.observe(&output, Duration::from_secs(1), CancellationToken::new())?;
    assert!(output.is_dir());
    Ok(())
}

#[tokio::test]
async fn missing_output_directory_is_created_through_the_filesystem_seam() -> TestResult {
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("virtual").join("out");
    let mock = MockFileSystem::new();
    let watcher = watcher(100)?.with_fs(Arc::new(mock.clone()));

    // The directory only exists in the mock, so the OS watch itself may fail.
    let _ = watcher.observe(&output, Duration::from_secs(1), CancellationToken::new());
    assert!(mock.is_dir(&output));
    assert!(!output.exists());
    Ok(())
}

#[tokio::test]
async fn renamed_in_artifact_is_reported() -> TestResult {
    let dir = tempfile::tempdir()?;
    let mut stream = watcher(150)?.observe(
        dir.path(),
        Duration::from_secs(5),
        CancellationToken::new(),
    )?;

    let staged = dir.path().join("card.png.tmp");
    fs::write(&staged, b"finished card")?;
    fs::rename(&staged, dir.path().join("card.png"))?;

    let event = timeout(Duration::from_secs(5), stream.next())
        .await?
        .ok_or("stream ended without an artifact")?;
    assert_eq!(
        event.path.file_name().and_then(|n| n.to_str()),
        Some("card.png")
    );
    Ok(())
}
