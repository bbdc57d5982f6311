//! Control API surface tests: exercise the router through
//! tower's `oneshot` rather than binding a real listener.

use std::sync::Arc;

use autoupdater_api::{router, ApiState};
use autoupdater_core::engine::UpdateEngine;
use autoupdater_core::events::EventBus;
use autoupdater_core::executor::memory::InMemoryExecutor;
use autoupdater_core::executor::Architecture;
use autoupdater_core::mirror::memory::InMemoryMirror;
use autoupdater_core::package::{Package, PackageName};
use autoupdater_registry::{PackageRegistry, Reconciler};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

fn package(name: &str) -> Package {
    Package {
        name: PackageName::from(name),
        friendly_name: None,
        mirror_path: format!("/mirror/{name}"),
        repository_url: format!("git@example.com:{name}.git"),
        compose_subdir: "compose".to_string(),
        registry_auth: None,
        critical_services: vec![],
        auto_update: false,
    }
}

fn test_state() -> ApiState {
    let exec: Arc<dyn autoupdater_core::executor::Executor> = Arc::new(InMemoryExecutor::new(Architecture::X64));
    let mirror: Arc<dyn autoupdater_core::mirror::RepositoryMirror> =
        Arc::new(InMemoryMirror::new(vec![("v1.1.0", "v1.1.0")]));
    let registry = Arc::new(PackageRegistry::new(vec![package("demo")]));
    let engine = Arc::new(UpdateEngine::new(exec.clone(), mirror.clone(), EventBus::default()));
    let reconciler = Arc::new(Reconciler::new(
        registry.clone(),
        exec,
        mirror,
        engine.clone(),
        EventBus::default(),
    ));

    ApiState {
        registry,
        engine,
        reconciler,
    }
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn list_packages_returns_configured_packages() {
    let app = router(test_state());
    let response = app
        .oneshot(Request::builder().uri("/packages").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["packages"][0]["name"], "demo");
}

#[tokio::test]
async fn get_upgrade_reports_available_version() {
    let app = router(test_state());
    let response = app
        .oneshot(Request::builder().uri("/upgrades/demo").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["upgradeAvailable"], true);
    assert_eq!(body["availableVersion"], "v1.1.0");
}

#[tokio::test]
async fn get_upgrade_404s_for_unknown_package() {
    let app = router(test_state());
    let response = app
        .oneshot(Request::builder().uri("/upgrades/ghost").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn trigger_update_returns_started() {
    let app = router(test_state());
    let response = app
        .oneshot(Request::builder().method("POST").uri("/update/demo").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "started");
    assert_eq!(body["packageName"], "demo");
}

#[tokio::test]
async fn trigger_update_returns_conflict_when_already_in_flight() {
    let state = test_state();
    // Hold the per-package lock directly, bypassing the spawned-task race
    // that a real in-flight update would introduce, so BUSY is observed
    // deterministically.
    let guard = state.engine.try_begin(&PackageName::from("demo")).unwrap();
    let app = router(state);

    let response = app
        .oneshot(Request::builder().method("POST").uri("/update/demo").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    drop(guard);
}

#[tokio::test]
async fn trigger_update_404s_for_unknown_package() {
    let app = router(test_state());
    let response = app
        .oneshot(Request::builder().method("POST").uri("/update/ghost").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
