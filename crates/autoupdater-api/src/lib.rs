//! Control API: `GET /packages`, `GET /upgrades/{name}`,
//! `POST /update/{name}`, `POST /update-all`. Pure wire-contract layer —
//! the router just serializes `autoupdater_core`/`autoupdater_registry`
//! types into their documented response shapes and enqueues work
//! onto the same Engine path the reconciler uses.

use std::sync::Arc;

use autoupdater_core::engine::{UpdateEngine, UpdateRequest};
use autoupdater_core::package::PackageName;
use autoupdater_registry::{PackageRegistry, ReconcileError, Reconciler};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<PackageRegistry>,
    pub engine: Arc<UpdateEngine>,
    pub reconciler: Arc<Reconciler>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/packages", get(list_packages))
        .route("/upgrades/:name", get(get_upgrade))
        .route("/update/:name", post(trigger_update))
        .route("/update-all", post(trigger_update_all))
        .with_state(state)
}

#[derive(Serialize)]
struct PackageSummary {
    name: String,
    #[serde(rename = "repositoryUrl")]
    repository_url: String,
    #[serde(rename = "currentVersion")]
    current_version: String,
    #[serde(rename = "lastChecked")]
    last_checked: Option<chrono::DateTime<chrono::Utc>>,
    status: &'static str,
}

#[derive(Serialize)]
struct PackagesResponse {
    packages: Vec<PackageSummary>,
}

async fn list_packages(State(state): State<ApiState>) -> Response {
    let mut packages = Vec::new();
    for package in state.registry.all() {
        let check = state.reconciler.check(&package.name).await.ok();
        let status = if state.engine.is_busy(&package.name) {
            "updating"
        } else {
            "idle"
        };
        packages.push(PackageSummary {
            name: package.name.0.clone(),
            repository_url: package.repository_url.clone(),
            current_version: check
                .as_ref()
                .map(|c| c.current_version.to_string())
                .unwrap_or_else(|| "-".to_string()),
            last_checked: check.as_ref().map(|_| chrono::Utc::now()),
            status,
        });
    }
    Json(PackagesResponse { packages }).into_response()
}

#[derive(Serialize)]
struct UpgradeResponse {
    #[serde(rename = "packageName")]
    package_name: String,
    #[serde(rename = "currentVersion")]
    current_version: String,
    #[serde(rename = "availableVersion")]
    available_version: String,
    #[serde(rename = "upgradeAvailable")]
    upgrade_available: bool,
    changelog: Option<String>,
}

async fn get_upgrade(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    let package_name = PackageName::from(name.as_str());
    match state.reconciler.check(&package_name).await {
        Ok(check) => Json(UpgradeResponse {
            package_name: name,
            current_version: check.current_version.to_string(),
            available_version: check.available_version.to_string(),
            upgrade_available: check.upgrade_available,
            changelog: None,
        })
        .into_response(),
        Err(ReconcileError::UnknownPackage(_)) => {
            (StatusCode::NOT_FOUND, Json(error_body("unknown package"))).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(error_body(&e.to_string()))).into_response(),
    }
}

#[derive(Serialize)]
struct UpdateStartedResponse {
    #[serde(rename = "packageName")]
    package_name: String,
    #[serde(rename = "updateId")]
    update_id: Uuid,
    status: &'static str,
    message: String,
}

fn error_body(message: &str) -> serde_json::Value {
    serde_json::json!({ "error": message })
}

async fn trigger_update(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    let package_name = PackageName::from(name.as_str());
    let package = match state.registry.find(&package_name) {
        Some(p) => p.clone(),
        None => return (StatusCode::NOT_FOUND, Json(error_body("unknown package"))).into_response(),
    };

    let guard = match state.engine.try_begin(&package_name) {
        Ok(guard) => guard,
        Err(_) => return (StatusCode::CONFLICT, Json(error_body("update already in flight"))).into_response(),
    };

    let update_id = Uuid::new_v4();
    let engine = state.engine.clone();
    tokio::spawn(async move {
        let _guard = guard;
        info!("{}: update {} started via Control API", package.name, update_id);
        let result = engine.update(&package, UpdateRequest::default()).await;
        info!("{}: update {} finished: {:?}", package.name, update_id, result.status);
    });

    Json(UpdateStartedResponse {
        package_name: name,
        update_id,
        status: "started",
        message: "update enqueued".to_string(),
    })
    .into_response()
}

#[derive(Serialize)]
struct UpdateAllResponse {
    #[serde(rename = "updatesStarted")]
    updates_started: Vec<UpdateStartedResponse>,
    skipped: Vec<String>,
}

async fn trigger_update_all(State(state): State<ApiState>) -> Response {
    let mut updates_started = Vec::new();
    let mut skipped = Vec::new();

    for package in state.registry.all() {
        let package_name_str = package.name.0.clone();
        match state.engine.try_begin(&package.name) {
            Ok(guard) => {
                let update_id = Uuid::new_v4();
                let engine = state.engine.clone();
                let package = package.clone();
                let name_for_log = package.name.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    info!("{}: update {} started via update-all", name_for_log, update_id);
                    let _ = engine.update(&package, UpdateRequest::default()).await;
                });
                updates_started.push(UpdateStartedResponse {
                    package_name: package_name_str,
                    update_id,
                    status: "started",
                    message: "update enqueued".to_string(),
                });
            }
            Err(_) => skipped.push(package_name_str),
        }
    }

    Json(UpdateAllResponse { updates_started, skipped }).into_response()
}
