//! Package registry and reconciliation loop.
//!
//! Holds the immutable set of configured packages and runs a per-package
//! background tick that asks the Repository Mirror for tags, compares the
//! max tag to the on-host `DeploymentState`, and either publishes an
//! `UpgradeAvailable` event or (when the package opts in via
//! `auto_update`) enqueues an `UpdateEngine::update` call. A package with
//! an update already in flight is skipped by the next tick rather than
//! queued.

use std::sync::Arc;
use std::time::Duration;

use autoupdater_core::engine::{UpdateEngine, UpdateRequest};
use autoupdater_core::events::{Event, EventBus};
use autoupdater_core::executor::Executor;
use autoupdater_core::mirror::RepositoryMirror;
use autoupdater_core::package::{Package, PackageName};
use autoupdater_core::state::RemoteJsonStateStore;
use autoupdater_core::version::PackageVersion;
use chrono::Utc;
use tracing::{debug, info, warn};

pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

/// Immutable set of configured packages, keyed by name. Built once at
/// process start from config; never mutated after registration.
#[derive(Debug, Clone)]
pub struct PackageRegistry {
    packages: Vec<Package>,
}

impl PackageRegistry {
    pub fn new(packages: Vec<Package>) -> Self {
        Self { packages }
    }

    pub fn all(&self) -> &[Package] {
        &self.packages
    }

    pub fn find(&self, name: &PackageName) -> Option<&Package> {
        self.packages.iter().find(|p| &p.name == name)
    }
}

/// One probe of a package's upstream tags against its on-host state,
/// without deciding what to do about the result — callers (the
/// reconciliation loop, or the Control API's `GET /upgrades/{name}`)
/// interpret it.
#[derive(Debug, Clone)]
pub struct UpgradeCheck {
    pub package: PackageName,
    pub current_version: PackageVersion,
    pub available_version: PackageVersion,
    pub upgrade_available: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("unknown package: {0}")]
    UnknownPackage(PackageName),

    #[error("failed to fetch tags: {0}")]
    Mirror(#[from] autoupdater_core::mirror::MirrorError),

    #[error("failed to read deployment state: {0}")]
    State(#[from] autoupdater_core::state::StateError),
}

pub struct Reconciler {
    registry: Arc<PackageRegistry>,
    executor: Arc<dyn Executor>,
    mirror: Arc<dyn RepositoryMirror>,
    engine: Arc<UpdateEngine>,
    events: EventBus,
    state_store: RemoteJsonStateStore,
    interval: Duration,
}

impl Reconciler {
    pub fn new(
        registry: Arc<PackageRegistry>,
        executor: Arc<dyn Executor>,
        mirror: Arc<dyn RepositoryMirror>,
        engine: Arc<UpdateEngine>,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            executor,
            mirror,
            engine,
            events,
            state_store: RemoteJsonStateStore::new(),
            interval: DEFAULT_RECONCILE_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Probe upstream tags for one package and compare against its
    /// on-host `DeploymentState`, without side effects. Backs the Control
    /// API's `GET /upgrades/{name}`.
    pub async fn check(&self, name: &PackageName) -> Result<UpgradeCheck, ReconcileError> {
        let package = self
            .registry
            .find(name)
            .ok_or_else(|| ReconcileError::UnknownPackage(name.clone()))?;

        let current_version = self
            .state_store
            .read(self.executor.as_ref(), &package.compose_dir())
            .await
            .unwrap_or_else(|e| {
                warn!("deployment state for {} is corrupt: {}; treating as empty", name, e);
                None
            })
            .map(|s| s.version)
            .unwrap_or_else(PackageVersion::empty);

        self.mirror.fetch(&package.mirror_path).await?;
        let tags = self.mirror.list_tags(&package.mirror_path).await?;
        let available_version = tags
            .into_iter()
            .map(|t| t.version)
            .max()
            .unwrap_or_else(PackageVersion::empty);

        Ok(UpgradeCheck {
            package: name.clone(),
            upgrade_available: available_version > current_version,
            current_version,
            available_version,
        })
    }

    /// One reconciliation tick for a single package: check for an
    /// upgrade, publish `UpgradeAvailable` when found, and (only if the
    /// package opts in) enqueue an engine update. A package with an
    /// update already in flight is skipped silently — never queued.
    pub async fn reconcile_once(&self, name: &PackageName) {
        let package = match self.registry.find(name) {
            Some(p) => p.clone(),
            None => return,
        };

        let check = match self.check(name).await {
            Ok(c) => c,
            Err(e) => {
                warn!("reconcile check failed for {}: {}", name, e);
                return;
            }
        };

        if !check.upgrade_available {
            return;
        }

        self.events.publish(Event::UpgradeAvailable {
            package: name.clone(),
            current_version: check.current_version.clone(),
            available_version: check.available_version.clone(),
            at: Utc::now(),
        });

        if !package.auto_update {
            debug!("{}: upgrade available, auto_update disabled, waiting for API trigger", name);
            return;
        }

        let guard = match self.engine.try_begin(name) {
            Ok(guard) => guard,
            Err(_) => {
                debug!("{}: update already in flight, skipping this tick", name);
                return;
            }
        };

        let engine = self.engine.clone();
        let name = name.clone();
        tokio::spawn(async move {
            let _guard = guard;
            info!("{}: auto-applying detected upgrade", name);
            let result = engine.update(&package, UpdateRequest::default()).await;
            if result.error.is_some() {
                warn!("{}: auto-update finished with an error: {:?}", name, result.error);
            }
        });
    }

    /// Spawn one background reconciliation task per registered package.
    /// Each loop ticks at `self.interval` until its handle is dropped or
    /// aborted.
    pub fn spawn_all(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        self.registry
            .all()
            .iter()
            .map(|p| {
                let reconciler = self.clone();
                let name = p.name.clone();
                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(reconciler.interval);
                    loop {
                        ticker.tick().await;
                        reconciler.reconcile_once(&name).await;
                    }
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoupdater_core::executor::memory::InMemoryExecutor;
    use autoupdater_core::executor::Architecture;
    use autoupdater_core::mirror::memory::InMemoryMirror;
    use autoupdater_core::package::RegistryAuth;

    fn package(name: &str, auto_update: bool) -> Package {
        Package {
            name: PackageName::from(name),
            friendly_name: None,
            mirror_path: format!("/mirror/{name}"),
            repository_url: format!("git@example.com:{name}.git"),
            compose_subdir: "compose".to_string(),
            registry_auth: None::<RegistryAuth>,
            critical_services: vec![],
            auto_update,
        }
    }

    #[tokio::test]
    async fn check_reports_upgrade_available_when_tag_exceeds_state() {
        let exec = Arc::new(InMemoryExecutor::new(Architecture::X64));
        let mirror = Arc::new(InMemoryMirror::new(vec![("v1.1.0", "1.1.0")]));
        let registry = Arc::new(PackageRegistry::new(vec![package("demo", false)]));
        let engine = Arc::new(UpdateEngine::new(exec.clone(), mirror.clone(), EventBus::default()));
        let reconciler = Reconciler::new(registry, exec, mirror, engine, EventBus::default());

        let result = reconciler.check(&PackageName::from("demo")).await.unwrap();
        assert!(result.upgrade_available);
        assert_eq!(result.available_version, PackageVersion::parse("1.1.0"));
        assert_eq!(result.current_version, PackageVersion::empty());
    }

    #[tokio::test]
    async fn unknown_package_is_an_error() {
        let exec = Arc::new(InMemoryExecutor::new(Architecture::X64));
        let mirror = Arc::new(InMemoryMirror::new(vec![]));
        let registry = Arc::new(PackageRegistry::new(vec![]));
        let engine = Arc::new(UpdateEngine::new(exec.clone(), mirror.clone(), EventBus::default()));
        let reconciler = Reconciler::new(registry, exec, mirror, engine, EventBus::default());

        let err = reconciler.check(&PackageName::from("missing")).await.unwrap_err();
        assert!(matches!(err, ReconcileError::UnknownPackage(_)));
    }

    #[tokio::test]
    async fn reconcile_once_skips_publish_when_no_upgrade() {
        let exec = Arc::new(InMemoryExecutor::new(Architecture::X64));
        let mirror = Arc::new(InMemoryMirror::new(vec![]));
        let registry = Arc::new(PackageRegistry::new(vec![package("demo", false)]));
        let engine = Arc::new(UpdateEngine::new(exec.clone(), mirror.clone(), EventBus::default()));
        let events = EventBus::default();
        let mut subscriber = events.subscribe();
        let reconciler = Reconciler::new(registry, exec, mirror, engine, events);

        reconciler.reconcile_once(&PackageName::from("demo")).await;
        assert!(subscriber.try_recv().is_err());
    }
}
