//! Orchestrator HTTP surface tests

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use cloudeploy::bus::MemoryEventBus;
use cloudeploy::orchestrator::{Orchestrator, OrchestratorOptions};
use cloudeploy::server::serve::api_router;
use cloudeploy::server::state::ServerState;
use cloudeploy::store::{DeploymentStore, MemoryStore};
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::common::ScriptedRunner;

fn test_app() -> (Router, Arc<Orchestrator>) {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(MemoryEventBus::default());
    let runner = Arc::new(ScriptedRunner::new(bus.clone(), &["building", "uploaded index.html"], 0));
    let orchestrator = Arc::new(Orchestrator::new(
        store,
        bus,
        runner,
        OrchestratorOptions {
            exclusive_builds: false,
            log_drain_grace: Duration::from_millis(50),
        },
    ));
    let router = api_router(Arc::new(ServerState::new(orchestrator.clone())));
    (router, orchestrator)
}

async fn call(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(body) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(body.to_string())
        }
        None => Body::empty(),
    };
    let response = router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn register(router: &Router, name: &str) -> Value {
    let (status, project) = call(
        router,
        Method::POST,
        "/projects",
        Some(json!({ "name": name, "repoUrl": "https://github.com/acme/site.git" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    project
}

#[tokio::test]
async fn test_health() {
    let (router, _) = test_app();

    let (status, body) = call(&router, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["activeDeployments"], 0);
}

#[tokio::test]
async fn test_register_and_fetch_project() {
    let (router, _) = test_app();

    let project = register(&router, "My Site").await;
    assert_eq!(project["subdomain"], "my-site");
    assert_eq!(project["branch"], "main");
    assert_eq!(project["artifactRoot"], Value::Null);

    let second = register(&router, "my site").await;
    assert_eq!(second["subdomain"], "my-site-2");

    let id = project["id"].as_str().unwrap();
    let (status, fetched) = call(&router, Method::GET, &format!("/projects/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], "My Site");
}

#[tokio::test]
async fn test_register_rejects_bad_repository() {
    let (router, _) = test_app();

    let (status, body) = call(
        &router,
        Method::POST,
        "/projects",
        Some(json!({ "name": "site", "repoUrl": "ftp://example.com/repo" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_start_deployment_returns_pending() {
    let (router, orchestrator) = test_app();
    let project = register(&router, "site").await;
    let id = project["id"].as_str().unwrap();

    let (status, deployment) = call(
        &router,
        Method::POST,
        &format!("/projects/{id}/deployments"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(deployment["status"], "PENDING");
    assert_eq!(deployment["projectId"], id);

    let deployment_id = deployment["id"].as_str().unwrap();
    orchestrator.wait_for(deployment_id).await.unwrap();

    let (status, deployment) = call(
        &router,
        Method::GET,
        &format!("/deployments/{deployment_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deployment["status"], "SUCCESS");

    let (_, logs) = call(&router, Method::GET, &format!("/projects/{id}/logs"), None).await;
    let messages: Vec<&str> = logs
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["message"].as_str().unwrap())
        .collect();
    assert_eq!(messages, vec!["building", "uploaded index.html"]);

    let (_, project) = call(&router, Method::GET, &format!("/projects/{id}"), None).await;
    assert_eq!(project["artifactRoot"], id);
}

#[tokio::test]
async fn test_unknown_project_is_not_found() {
    let (router, _) = test_app();

    let (status, body) = call(&router, Method::POST, "/projects/nope/deployments", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_status_update_follows_state_machine() {
    let (router, orchestrator) = test_app();
    let project = register(&router, "site").await;
    let id = project["id"].as_str().unwrap();
    let deployment = orchestrator.store().create_deployment(id).await.unwrap();
    let uri = format!("/deployments/{}/status", deployment.id);

    let (status, body) = call(&router, Method::PATCH, &uri, Some(json!({ "status": "SUCCESS" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_TRANSITION");

    let (status, body) = call(&router, Method::PATCH, &uri, Some(json!({ "status": "DONE" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, body) = call(&router, Method::PATCH, &uri, Some(json!({ "status": "building" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "BUILDING");
}

#[tokio::test]
async fn test_append_and_list_logs() {
    let (router, _) = test_app();
    let project = register(&router, "site").await;
    let id = project["id"].as_str().unwrap();
    let uri = format!("/projects/{id}/logs");

    let (status, body) = call(
        &router,
        Method::POST,
        &uri,
        Some(json!({ "lines": ["first", "second"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["written"], 2);

    let (status, logs) = call(&router, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    let logs = logs.as_array().unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0]["message"], "first");
    assert_eq!(logs[1]["message"], "second");
    assert_eq!(logs[0]["deploymentId"], Value::Null);

    let (status, body) = call(
        &router,
        Method::POST,
        "/projects/nope/logs",
        Some(json!({ "lines": ["x"] })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}
