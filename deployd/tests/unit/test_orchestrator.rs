//! Orchestrator tests

use std::sync::Arc;
use std::time::Duration;

use cloudeploy::artifacts::MemoryArtifactStore;
use cloudeploy::bus::{BuildEvent, Channels, EventBus, MemoryEventBus};
use cloudeploy::deploy::{BuildExecutor, DeploymentStatus};
use cloudeploy::errors::DeployError;
use cloudeploy::jobs::in_process::{InProcessJobRunner, PlanTemplate};
use cloudeploy::jobs::JobRunner;
use cloudeploy::orchestrator::{Orchestrator, OrchestratorOptions};
use cloudeploy::store::{DeploymentStore, MemoryStore};
use tokio::sync::Notify;

use crate::common::{insert_project, PanickingRunner, RejectingRunner, ScriptedRunner};

fn options() -> OrchestratorOptions {
    OrchestratorOptions {
        exclusive_builds: false,
        log_drain_grace: Duration::from_millis(50),
    }
}

fn orchestrator(
    store: Arc<MemoryStore>,
    bus: Arc<MemoryEventBus>,
    runner: Arc<dyn JobRunner>,
    options: OrchestratorOptions,
) -> Orchestrator {
    Orchestrator::new(store, bus, runner, options)
}

#[tokio::test]
async fn test_successful_build_end_to_end() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(MemoryEventBus::default());
    let artifacts = Arc::new(MemoryArtifactStore::new());
    let project = insert_project(store.as_ref(), "foo").await;
    std::fs::create_dir_all(tmp.path().join(&project.id)).unwrap();

    let template = PlanTemplate {
        work_root: tmp.path().to_path_buf(),
        install_command: String::new(),
        build_command: "mkdir -p dist/assets && echo 1 > dist/index.html \
            && echo 2 > dist/app.js && echo 3 > dist/assets/style.css"
            .to_string(),
        output_dir: "dist".into(),
        checkout: false,
    };
    let executor = Arc::new(BuildExecutor::new(bus.clone(), artifacts.clone()));
    let runner = Arc::new(InProcessJobRunner::new(executor, template));
    let orchestrator = orchestrator(store.clone(), bus.clone(), runner, options());

    let handle = orchestrator.start_deployment(&project.id).await.unwrap();
    assert_eq!(handle.deployment.status, DeploymentStatus::Pending);

    let finished = orchestrator.wait_for(&handle.deployment.id).await.unwrap();
    assert_eq!(finished.status, DeploymentStatus::Success);

    let logs = store.list_logs(&project.id).await.unwrap();
    assert!(logs
        .iter()
        .all(|l| l.deployment_id.as_deref() == Some(handle.deployment.id.as_str())));
    let uploaded: Vec<&str> = logs
        .iter()
        .map(|l| l.message.as_str())
        .filter(|m| m.starts_with("uploaded "))
        .collect();
    assert_eq!(
        uploaded,
        vec![
            "uploaded app.js",
            "uploaded assets/style.css",
            "uploaded index.html"
        ]
    );
    assert_eq!(logs.first().map(|l| l.message.as_str()), Some("Build started..."));

    let project = store.find_project(&project.id).await.unwrap().unwrap();
    assert_eq!(project.artifact_root.as_deref(), Some(project.id.as_str()));
    assert_eq!(artifacts.len(), 3);
}

#[tokio::test]
async fn test_nonzero_exit_marks_failed() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(MemoryEventBus::default());
    let project = insert_project(store.as_ref(), "foo").await;
    let runner = Arc::new(ScriptedRunner::new(bus.clone(), &["compiling"], 1));
    let orchestrator = orchestrator(store.clone(), bus.clone(), runner, options());

    let handle = orchestrator.start_deployment(&project.id).await.unwrap();
    let finished = orchestrator.wait_for(&handle.deployment.id).await.unwrap();

    assert_eq!(finished.status, DeploymentStatus::Failed);
    let project = store.find_project(&project.id).await.unwrap().unwrap();
    assert_eq!(project.artifact_root, None);
}

#[tokio::test]
async fn test_rejected_launch_marks_failed() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(MemoryEventBus::default());
    let project = insert_project(store.as_ref(), "foo").await;
    let orchestrator = orchestrator(
        store.clone(),
        bus.clone(),
        Arc::new(RejectingRunner),
        options(),
    );

    let handle = orchestrator.start_deployment(&project.id).await.unwrap();
    let finished = orchestrator.wait_for(&handle.deployment.id).await.unwrap();

    assert_eq!(finished.status, DeploymentStatus::Failed);
    assert!(store.list_logs(&project.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_logs_persisted_exactly_once() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(MemoryEventBus::default());
    let project = insert_project(store.as_ref(), "foo").await;
    let lines = ["one", "two", "three", "four"];
    let runner = Arc::new(ScriptedRunner::new(bus.clone(), &lines, 0));
    let orchestrator = orchestrator(store.clone(), bus.clone(), runner, options());

    let handle = orchestrator.start_deployment(&project.id).await.unwrap();
    let finished = orchestrator.wait_for(&handle.deployment.id).await.unwrap();
    assert_eq!(finished.status, DeploymentStatus::Success);

    let messages: Vec<String> = store
        .list_logs(&project.id)
        .await
        .unwrap()
        .into_iter()
        .map(|l| l.message)
        .collect();
    assert_eq!(messages, lines);
}

#[tokio::test]
async fn test_start_unknown_project_is_not_found() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(MemoryEventBus::default());
    let runner = Arc::new(ScriptedRunner::new(bus.clone(), &[], 0));
    let orchestrator = orchestrator(store, bus, runner.clone(), options());

    let err = orchestrator.start_deployment("missing").await.unwrap_err();
    assert!(matches!(err, DeployError::NotFound(_)));
    assert_eq!(runner.launches(), 0);
}

#[tokio::test]
async fn test_exclusive_builds_reject_concurrent_start() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(MemoryEventBus::default());
    let project = insert_project(store.as_ref(), "foo").await;
    let gate = Arc::new(Notify::new());
    let runner = Arc::new(ScriptedRunner::new(bus.clone(), &[], 0).gated(gate.clone()));
    let orchestrator = orchestrator(
        store.clone(),
        bus.clone(),
        runner.clone(),
        OrchestratorOptions {
            exclusive_builds: true,
            log_drain_grace: Duration::from_millis(50),
        },
    );

    let first = orchestrator.start_deployment(&project.id).await.unwrap();
    let err = orchestrator.start_deployment(&project.id).await.unwrap_err();
    assert!(matches!(err, DeployError::Conflict(_)));

    gate.notify_one();
    let finished = orchestrator.wait_for(&first.deployment.id).await.unwrap();
    assert_eq!(finished.status, DeploymentStatus::Success);

    let second = orchestrator.start_deployment(&project.id).await.unwrap();
    gate.notify_one();
    orchestrator.wait_for(&second.deployment.id).await.unwrap();

    assert_eq!(runner.launches(), 2);
    assert_eq!(store.list_deployments(&project.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_concurrent_starts_allowed_by_default() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(MemoryEventBus::default());
    let project = insert_project(store.as_ref(), "foo").await;
    let runner = Arc::new(ScriptedRunner::new(bus.clone(), &[], 0));
    let orchestrator = orchestrator(store.clone(), bus.clone(), runner, options());

    let first = orchestrator.start_deployment(&project.id).await.unwrap();
    let second = orchestrator.start_deployment(&project.id).await.unwrap();
    assert_ne!(first.deployment.id, second.deployment.id);

    orchestrator.shutdown().await.unwrap();
    assert_eq!(orchestrator.active_deployments(), 0);
    for id in [&first.deployment.id, &second.deployment.id] {
        let deployment = store.get_deployment(id).await.unwrap().unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Success);
    }
}

#[tokio::test]
async fn test_panicking_runner_marks_failed_and_keeps_logs() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(MemoryEventBus::default());
    let project = insert_project(store.as_ref(), "foo").await;
    let runner = Arc::new(PanickingRunner {
        bus: bus.clone() as Arc<dyn EventBus>,
    });
    let orchestrator = orchestrator(store.clone(), bus.clone(), runner, options());

    let handle = orchestrator.start_deployment(&project.id).await.unwrap();
    let finished = orchestrator.wait_for(&handle.deployment.id).await.unwrap();

    assert_eq!(finished.status, DeploymentStatus::Failed);
    let messages: Vec<String> = store
        .list_logs(&project.id)
        .await
        .unwrap()
        .into_iter()
        .map(|l| l.message)
        .collect();
    assert_eq!(messages, vec!["about to fail".to_string()]);
}

#[tokio::test]
async fn test_external_status_update() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(MemoryEventBus::default());
    let project = insert_project(store.as_ref(), "foo").await;
    let runner = Arc::new(ScriptedRunner::new(bus.clone(), &[], 0));
    let orchestrator = orchestrator(store.clone(), bus, runner, options());

    let deployment = store.create_deployment(&project.id).await.unwrap();

    let err = orchestrator
        .update_deployment_status(&deployment.id, DeploymentStatus::Success)
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::InvalidTransition { .. }));

    orchestrator
        .update_deployment_status(&deployment.id, DeploymentStatus::Building)
        .await
        .unwrap();
    let updated = orchestrator
        .update_deployment_status(&deployment.id, DeploymentStatus::Success)
        .await
        .unwrap();
    assert_eq!(updated.status, DeploymentStatus::Success);

    let project = store.find_project(&project.id).await.unwrap().unwrap();
    assert_eq!(project.artifact_root.as_deref(), Some(project.id.as_str()));
}

#[tokio::test]
async fn test_append_logs_requires_project() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(MemoryEventBus::default());
    let runner = Arc::new(ScriptedRunner::new(bus.clone(), &[], 0));
    let orchestrator = orchestrator(store, bus, runner, options());

    let err = orchestrator
        .append_logs("missing", &["line".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::NotFound(_)));
}

#[tokio::test]
async fn test_external_failure_during_build_wins() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(MemoryEventBus::default());
    let project = insert_project(store.as_ref(), "foo").await;
    let gate = Arc::new(Notify::new());
    let runner = Arc::new(ScriptedRunner::new(bus.clone(), &["compiling"], 0).gated(gate.clone()));
    let orchestrator = orchestrator(store.clone(), bus.clone(), runner, options());

    let handle = orchestrator.start_deployment(&project.id).await.unwrap();
    let id = handle.deployment.id.clone();
    for _ in 0..200 {
        let current = store.get_deployment(&id).await.unwrap().unwrap();
        if current.status == DeploymentStatus::Building {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    orchestrator
        .update_deployment_status(&id, DeploymentStatus::Failed)
        .await
        .unwrap();
    gate.notify_one();
    let finished = orchestrator.wait_for(&id).await.unwrap();

    assert_eq!(finished.status, DeploymentStatus::Failed);
    let project = store.find_project(&project.id).await.unwrap().unwrap();
    assert_eq!(project.artifact_root, None);
}

#[tokio::test]
async fn test_events_published_before_start_are_not_persisted() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(MemoryEventBus::default());
    let project = insert_project(store.as_ref(), "foo").await;
    bus.publish(
        &Channels::build_logs(&project.id),
        &BuildEvent::new("Build started..."),
    )
    .await
    .unwrap();

    let runner = Arc::new(ScriptedRunner::new(bus.clone(), &["compiling", "done"], 0));
    let orchestrator = orchestrator(store.clone(), bus.clone(), runner, options());
    let handle = orchestrator.start_deployment(&project.id).await.unwrap();
    orchestrator.wait_for(&handle.deployment.id).await.unwrap();

    let messages: Vec<String> = store
        .list_logs(&project.id)
        .await
        .unwrap()
        .into_iter()
        .map(|l| l.message)
        .collect();
    assert_eq!(messages, vec!["compiling".to_string(), "done".to_string()]);
}
