//! End-to-end scenarios for the Update Engine against in-memory doubles,
//! covering the documented happy-path, no-op, and recovery scenarios.

use std::collections::BTreeSet;
use std::sync::Arc;

use autoupdater_core::engine::{UpdateEngine, UpdateRequest, UpdateStatus};
use autoupdater_core::events::EventBus;
use autoupdater_core::executor::memory::InMemoryExecutor;
use autoupdater_core::executor::Architecture;
use autoupdater_core::mirror::memory::InMemoryMirror;
use autoupdater_core::package::{Package, PackageName};
use autoupdater_core::state::{DeploymentState, RemoteJsonStateStore};
use autoupdater_core::version::PackageVersion;
use chrono::Utc;

fn package() -> Package {
    Package {
        name: PackageName::from("demo"),
        friendly_name: None,
        mirror_path: "/mirror".to_string(),
        repository_url: "git@example.com:demo.git".to_string(),
        compose_subdir: "compose".to_string(),
        registry_auth: None,
        critical_services: vec!["web".to_string()],
        auto_update: false,
    }
}

fn seed_state(exec: &InMemoryExecutor, compose_dir: &str, version: &str, up: &[&str], failed: &[&str]) {
    let mut state = DeploymentState::fresh(Utc::now());
    state.version = PackageVersion::parse(version);
    state.up = up.iter().map(|v| PackageVersion::parse(v)).collect::<BTreeSet<_>>();
    state.failed = failed.iter().map(|v| PackageVersion::parse(v)).collect::<BTreeSet<_>>();
    let json = serde_json::to_vec_pretty(&state).unwrap();
    exec.seed_file(format!("{compose_dir}/deployment.state.json"), json);
}

fn script_compose_success(exec: &InMemoryExecutor) {
    exec.script("sudo docker compose -f \"docker-compose.yml\" down", 0, "", "");
    exec.script("sudo docker compose -f \"docker-compose.yml\" up -d", 0, "", "");
}

fn script_declared_services(exec: &InMemoryExecutor, services: &[&str]) {
    exec.script(
        "sudo docker compose -f \"docker-compose.yml\" config --services",
        0,
        &services.join("\n"),
        "",
    );
}

fn script_healthy(exec: &InMemoryExecutor, service: &str) {
    exec.script(
        &format!("sudo docker compose -f \"docker-compose.yml\" ps -q {service}"),
        0,
        "container123",
        "",
    );
    exec.script(
        "docker inspect --format='{{.State.Health.Status}}' container123",
        0,
        "healthy",
        "",
    );
}

fn script_unhealthy(exec: &InMemoryExecutor, service: &str) {
    exec.script(
        &format!("sudo docker compose -f \"docker-compose.yml\" ps -q {service}"),
        0,
        "container123",
        "",
    );
    exec.script(
        "docker inspect --format='{{.State.Health.Status}}' container123",
        0,
        "unhealthy",
        "",
    );
}

#[tokio::test]
async fn s1_happy_forward_update() {
    let exec = InMemoryExecutor::new(Architecture::X64);
    let compose_dir = "/mirror/compose";
    exec.seed_file(format!("{compose_dir}/docker-compose.yml"), "");
    exec.seed_file(format!("{compose_dir}/up-1.0.1.sh"), "#!/bin/sh");
    exec.seed_file(format!("{compose_dir}/up-1.1.0.sh"), "#!/bin/sh");
    seed_state(&exec, compose_dir, "1.0.0", &["1.0.0"], &[]);
    script_compose_success(&exec);
    script_declared_services(&exec, &["web"]);
    script_healthy(&exec, "web");

    let mirror = InMemoryMirror::new(vec![("v1.0.0", "1.0.0"), ("v1.1.0", "1.1.0")]);
    let engine = UpdateEngine::new(Arc::new(exec), Arc::new(mirror), EventBus::default());

    let result = engine.update(&package(), UpdateRequest::default()).await;

    assert_eq!(result.status, UpdateStatus::Success);
    assert_eq!(result.executed_scripts, vec!["up-1.0.1.sh", "up-1.1.0.sh"]);
    assert_eq!(result.version, PackageVersion::parse("1.1.0"));
    assert!(!result.recovery_performed);
}

#[tokio::test]
async fn s2_no_op_when_already_at_latest_tag() {
    let exec = InMemoryExecutor::new(Architecture::X64);
    let compose_dir = "/mirror/compose";
    exec.seed_file(format!("{compose_dir}/docker-compose.yml"), "");
    seed_state(&exec, compose_dir, "1.1.0", &["1.1.0"], &[]);

    let mirror = InMemoryMirror::new(vec![("v1.1.0", "1.1.0")]);
    let engine = UpdateEngine::new(Arc::new(exec), Arc::new(mirror), EventBus::default());

    let result = engine.update(&package(), UpdateRequest::default()).await;

    assert_eq!(result.status, UpdateStatus::Success);
    assert!(result.executed_scripts.is_empty());
    assert_eq!(result.version, PackageVersion::parse("1.1.0"));
}

#[tokio::test]
async fn s3_migration_failure_with_backup_recovers() {
    let exec = InMemoryExecutor::new(Architecture::X64);
    let compose_dir = "/mirror/compose";
    exec.seed_file(format!("{compose_dir}/docker-compose.yml"), "");
    exec.seed_file(format!("{compose_dir}/up-1.0.1.sh"), "#!/bin/sh");
    exec.seed_file(format!("{compose_dir}/backup-manager.sh"), "#!/bin/sh");
    seed_state(&exec, compose_dir, "1.0.0", &["1.0.0"], &[]);
    script_compose_success(&exec);
    exec.script(
        "sudo /mirror/compose/backup-manager.sh --version=1.0.0",
        0,
        r#"{"file": "/backups/demo-1.0.0.tar.gz"}"#,
        "",
    );
    exec.script(
        "sudo /mirror/compose/backup-manager.sh --restore=/backups/demo-1.0.0.tar.gz",
        0,
        "",
        "",
    );
    exec.script("sudo /mirror/compose/up-1.0.1.sh", 1, "", "boom");

    let exec = Arc::new(exec);
    let mirror = InMemoryMirror::new(vec![("v1.0.1", "1.0.1")]);
    let engine = UpdateEngine::new(exec.clone(), Arc::new(mirror), EventBus::default());

    let result = engine.update(&package(), UpdateRequest::default()).await;

    assert_eq!(result.status, UpdateStatus::Failed);
    assert!(result.recovery_performed);
    assert!(result.backup_id.is_some());
    assert_eq!(result.version, PackageVersion::parse("1.0.0"));

    let persisted = RemoteJsonStateStore::new()
        .read(exec.as_ref(), compose_dir)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(persisted.version, PackageVersion::parse("1.0.0"));
    assert!(persisted.failed.contains(&PackageVersion::parse("1.0.1")));
}

#[tokio::test]
async fn s4_migration_failure_without_backup_does_not_recover() {
    let exec = InMemoryExecutor::new(Architecture::X64);
    let compose_dir = "/mirror/compose";
    exec.seed_file(format!("{compose_dir}/docker-compose.yml"), "");
    exec.seed_file(format!("{compose_dir}/up-1.0.1.sh"), "#!/bin/sh");
    seed_state(&exec, compose_dir, "1.0.0", &["1.0.0"], &[]);
    script_compose_success(&exec);
    exec.script("sudo /mirror/compose/up-1.0.1.sh", 1, "", "boom");

    let mirror = InMemoryMirror::new(vec![("v1.0.1", "1.0.1")]);
    let engine = UpdateEngine::new(Arc::new(exec), Arc::new(mirror), EventBus::default());

    let result = engine.update(&package(), UpdateRequest::default()).await;

    assert_eq!(result.status, UpdateStatus::Failed);
    assert!(!result.recovery_performed);
    assert!(result.error.unwrap().contains("no recovery possible"));
    assert_eq!(result.version, PackageVersion::parse("1.0.0"));
}

#[tokio::test]
async fn s5_critical_health_failure_with_backup_recovers() {
    let exec = InMemoryExecutor::new(Architecture::X64);
    let compose_dir = "/mirror/compose";
    exec.seed_file(format!("{compose_dir}/docker-compose.yml"), "");
    exec.seed_file(format!("{compose_dir}/backup-manager.sh"), "#!/bin/sh");
    seed_state(&exec, compose_dir, "1.0.0", &["1.0.0"], &[]);
    script_compose_success(&exec);
    script_declared_services(&exec, &["web"]);
    script_unhealthy(&exec, "web");
    exec.script(
        "sudo /mirror/compose/backup-manager.sh --version=1.0.0",
        0,
        r#"{"file": "/backups/demo-1.0.0.tar.gz"}"#,
        "",
    );
    exec.script(
        "sudo /mirror/compose/backup-manager.sh --restore=/backups/demo-1.0.0.tar.gz",
        0,
        "",
        "",
    );

    let mirror = InMemoryMirror::new(vec![("v1.1.0", "1.1.0")]);
    let engine = UpdateEngine::new(Arc::new(exec), Arc::new(mirror), EventBus::default());

    let result = engine.update(&package(), UpdateRequest::default()).await;

    assert_eq!(result.status, UpdateStatus::Failed);
    assert!(result.recovery_performed);
}

#[tokio::test]
async fn s6_non_critical_health_failure_is_partial_success() {
    let exec = InMemoryExecutor::new(Architecture::X64);
    let compose_dir = "/mirror/compose";
    exec.seed_file(format!("{compose_dir}/docker-compose.yml"), "");
    seed_state(&exec, compose_dir, "1.0.0", &["1.0.0"], &[]);
    script_compose_success(&exec);
    script_declared_services(&exec, &["worker"]);
    script_unhealthy(&exec, "worker");

    let mirror = InMemoryMirror::new(vec![("v1.1.0", "1.1.0")]);
    let engine = UpdateEngine::new(Arc::new(exec), Arc::new(mirror), EventBus::default());

    // "worker" is declared but not in the package's critical_services
    // list ("web"), so its failure is non-critical.
    let result = engine.update(&package(), UpdateRequest::default()).await;

    assert_eq!(result.status, UpdateStatus::PartialSuccess);
    assert!(!result.recovery_performed);
    assert_eq!(result.version, PackageVersion::parse("1.1.0"));
    assert!(result.health_check.is_some());
}

#[tokio::test]
async fn per_package_lock_rejects_a_second_concurrent_update() {
    let exec = InMemoryExecutor::new(Architecture::X64);
    let mirror = InMemoryMirror::new(vec![]);
    let engine = UpdateEngine::new(Arc::new(exec), Arc::new(mirror), EventBus::default());

    let pkg_name = package().name;
    let _guard = engine.try_begin(&pkg_name).expect("first lock should succeed");
    assert!(engine.try_begin(&pkg_name).is_err());
}
