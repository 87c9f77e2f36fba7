//! Build executor tests

use std::path::Path;
use std::sync::Arc;

use cloudeploy::artifacts::MemoryArtifactStore;
use cloudeploy::bus::{Channels, EventBus, MemoryEventBus};
use cloudeploy::deploy::{BuildExecutor, BuildFailure, BuildOutcome, BuildPlan};

use crate::common::drain;

const THREE_FILES: &str = "mkdir -p dist/assets \
    && printf '<html></html>' > dist/index.html \
    && printf 'run()' > dist/app.js \
    && printf 'body{}' > dist/assets/style.css";

struct Harness {
    bus: Arc<MemoryEventBus>,
    artifacts: Arc<MemoryArtifactStore>,
    executor: BuildExecutor,
}

impl Harness {
    fn new() -> Self {
        let bus = Arc::new(MemoryEventBus::new(256));
        let artifacts = Arc::new(MemoryArtifactStore::new());
        let executor = BuildExecutor::new(bus.clone(), artifacts.clone());
        Self {
            bus,
            artifacts,
            executor,
        }
    }

    /// Run `build_command` in `source_dir`, returning the outcome and every
    /// event published on the project's channel
    async fn run(&self, source_dir: &Path, build_command: &str) -> (BuildOutcome, Vec<String>) {
        let plan = BuildPlan {
            project_id: "p1".to_string(),
            repository: None,
            source_dir: source_dir.to_path_buf(),
            install_command: String::new(),
            build_command: build_command.to_string(),
            output_dir: "dist".into(),
        };
        let mut subscription = self.bus.subscribe(&Channels::build_logs("p1")).await.unwrap();
        let outcome = self.executor.run(&plan).await;
        let events = drain(&mut subscription).await;
        (outcome, events)
    }
}

fn upload_lines(events: &[String]) -> Vec<&str> {
    events
        .iter()
        .filter(|e| e.starts_with("uploaded "))
        .map(String::as_str)
        .collect()
}

#[tokio::test]
async fn test_three_files_exit_zero_succeeds() {
    let tmp = tempfile::tempdir().unwrap();
    let harness = Harness::new();

    let (outcome, events) = harness.run(tmp.path(), THREE_FILES).await;

    assert!(outcome.succeeded(), "{:?}", outcome.failures);
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(
        upload_lines(&events),
        vec![
            "uploaded app.js",
            "uploaded assets/style.css",
            "uploaded index.html"
        ]
    );
    assert_eq!(events.first().map(String::as_str), Some("Build started..."));
    assert_eq!(events.last().map(String::as_str), Some("Done"));

    assert_eq!(harness.artifacts.len(), 3);
    let index = harness.artifacts.get("__outputs/p1/index.html").unwrap();
    assert_eq!(index.content_type, "text/html");
    assert_eq!(&index.data[..], b"<html></html>");
    assert!(harness.artifacts.get("__outputs/p1/assets/style.css").is_some());
}

#[tokio::test]
async fn test_nonzero_exit_fails_but_uploads_output() {
    let tmp = tempfile::tempdir().unwrap();
    let harness = Harness::new();

    let (outcome, events) = harness
        .run(
            tmp.path(),
            "mkdir -p dist && printf a > dist/a.txt && printf b > dist/b.txt && exit 1",
        )
        .await;

    assert!(!outcome.succeeded());
    assert_eq!(outcome.exit_code(), 1);
    assert!(outcome
        .failures
        .contains(&BuildFailure::ExitStatus { code: Some(1) }));
    assert_eq!(outcome.uploaded.len(), 2);
    assert_eq!(events.last().map(String::as_str), Some("Done with errors"));
}

#[tokio::test]
async fn test_diagnostic_output_fails_build() {
    let tmp = tempfile::tempdir().unwrap();
    let harness = Harness::new();

    let (outcome, events) = harness
        .run(
            tmp.path(),
            "mkdir -p dist && printf a > dist/a.txt && echo 'deprecated option' >&2",
        )
        .await;

    assert!(!outcome.succeeded());
    assert!(outcome
        .failures
        .contains(&BuildFailure::Diagnostics { lines: 1 }));
    assert!(events.iter().any(|e| e == "error: deprecated option"));
    assert_eq!(upload_lines(&events), vec!["uploaded a.txt"]);
}

#[tokio::test]
async fn test_stdout_lines_are_published() {
    let tmp = tempfile::tempdir().unwrap();
    let harness = Harness::new();

    let (outcome, events) = harness
        .run(
            tmp.path(),
            "echo 'compiling' && echo 'bundling' && mkdir -p dist && printf a > dist/a.txt",
        )
        .await;

    assert!(outcome.succeeded(), "{:?}", outcome.failures);
    let compiling = events.iter().position(|e| e == "compiling").unwrap();
    let bundling = events.iter().position(|e| e == "bundling").unwrap();
    assert!(compiling < bundling);
}

#[tokio::test]
async fn test_upload_failure_does_not_stop_other_uploads() {
    let tmp = tempfile::tempdir().unwrap();
    let harness = Harness::new();
    harness.artifacts.fail_keys_ending_with("app.js");

    let (outcome, events) = harness.run(tmp.path(), THREE_FILES).await;

    assert!(!outcome.succeeded());
    assert_eq!(outcome.failures.len(), 1);
    assert!(matches!(
        &outcome.failures[0],
        BuildFailure::Upload { key, .. } if key == "__outputs/p1/app.js"
    ));
    assert_eq!(
        upload_lines(&events),
        vec!["uploaded assets/style.css", "uploaded index.html"]
    );
    assert!(events.iter().any(|e| e.starts_with("error uploading app.js")));
    assert_eq!(harness.artifacts.len(), 2);
}

#[tokio::test]
async fn test_missing_output_dir_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let harness = Harness::new();

    let (outcome, _) = harness.run(tmp.path(), "true").await;

    assert!(matches!(
        outcome.failures.as_slice(),
        [BuildFailure::OutputMissing { .. }]
    ));
    assert!(harness.artifacts.is_empty());
}

#[tokio::test]
async fn test_unstartable_build_fails_without_upload() {
    let tmp = tempfile::tempdir().unwrap();
    let harness = Harness::new();

    let (outcome, events) = harness.run(&tmp.path().join("missing"), "true").await;

    assert!(matches!(
        outcome.failures.as_slice(),
        [BuildFailure::Spawn { .. }]
    ));
    assert!(!events.iter().any(|e| e == "Starting to upload"));
}

#[tokio::test]
async fn test_blank_diagnostic_line_fails_build() {
    let tmp = tempfile::tempdir().unwrap();
    let harness = Harness::new();

    let (outcome, _) = harness
        .run(tmp.path(), "mkdir -p dist && printf a > dist/a.txt && echo >&2")
        .await;

    assert!(outcome
        .failures
        .contains(&BuildFailure::Diagnostics { lines: 1 }));
}

#[tokio::test]
async fn test_rebuild_uploads_only_its_own_output() {
    let tmp = tempfile::tempdir().unwrap();

    let first = Harness::new();
    let (outcome, _) = first
        .run(tmp.path(), "mkdir -p dist && printf old > dist/old.html")
        .await;
    assert!(outcome.succeeded(), "{:?}", outcome.failures);

    let second = Harness::new();
    let (outcome, _) = second
        .run(tmp.path(), "mkdir -p dist && printf new > dist/new.html")
        .await;

    assert!(outcome.succeeded(), "{:?}", outcome.failures);
    assert_eq!(outcome.uploaded, vec!["__outputs/p1/new.html".to_string()]);
    assert_eq!(second.artifacts.keys(), vec!["__outputs/p1/new.html".to_string()]);
}

#[tokio::test]
async fn test_failed_rebuild_does_not_reupload_previous_output() {
    let tmp = tempfile::tempdir().unwrap();

    let first = Harness::new();
    first
        .run(tmp.path(), "mkdir -p dist && printf old > dist/index.html")
        .await;

    let second = Harness::new();
    let (outcome, _) = second.run(tmp.path(), "exit 3").await;

    assert!(outcome
        .failures
        .contains(&BuildFailure::ExitStatus { code: Some(3) }));
    assert!(outcome
        .failures
        .iter()
        .any(|f| matches!(f, BuildFailure::OutputMissing { .. })));
    assert!(second.artifacts.is_empty());
}
