//! The Update Engine: a per-package state machine that plans a transition,
//! runs backup → stop → migrate → start → health-check, persists state
//! atomically, and recovers on failure. This is the core of the system —
//! see the module-level state diagram below.
//!
//! Every step returns a tagged [`StepOutcome`] rather than propagating an
//! exception for control flow; the engine folds outcomes explicitly so it
//! can always produce a structured [`UpdateResult`], success or failure.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backup::BackupManager;
use crate::compose::ComposeDriver;
use crate::events::{Event, EventBus};
use crate::executor::Executor;
use crate::health::{HealthEvaluator, Verdict};
use crate::mirror::RepositoryMirror;
use crate::package::{Package, PackageName};
use crate::planner::{self, execute_plan};
use crate::state::{DeploymentState, RemoteJsonStateStore};
use crate::version::PackageVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateStatus {
    Success,
    PartialSuccess,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateResult {
    pub status: UpdateStatus,
    pub previous_version: PackageVersion,
    pub version: PackageVersion,
    pub executed_scripts: Vec<String>,
    pub backup_id: Option<String>,
    pub health_check: Option<crate::health::HealthCheck>,
    pub recovery_performed: bool,
    pub error: Option<String>,
}

impl UpdateResult {
    fn no_op(version: PackageVersion) -> Self {
        Self {
            status: UpdateStatus::Success,
            previous_version: version.clone(),
            version,
            executed_scripts: Vec::new(),
            backup_id: None,
            health_check: None,
            recovery_performed: false,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    /// Explicit target version; `None` means "latest available tag".
    pub explicit_target: Option<PackageVersion>,
    /// Propagated into every suspension point; cancellation mid-update is
    /// treated as a failure of the current step and branches into
    /// Recover exactly like any other step failure. The
    /// public API does not expose cancellation by default — updates are
    /// assumed to run to completion — but callers that do wire one up
    /// (e.g. a shutdown signal) get the same recovery guarantees.
    pub cancellation: CancellationToken,
}

/// Returned by [`UpdateEngine::update`] when a second update for the same
/// package is already in flight; the caller (API) maps this to a BUSY
/// response, the Reconciler silently skips.
#[derive(Debug)]
pub struct Busy;

enum Recoverable {
    Yes { backup_id: String },
    No,
}

pub struct UpdateEngine {
    executor: Arc<dyn Executor>,
    mirror: Arc<dyn RepositoryMirror>,
    compose: ComposeDriver,
    backup: BackupManager,
    state_store: RemoteJsonStateStore,
    events: EventBus,
    locks: DashMap<PackageName, Arc<Mutex<()>>>,
}

impl UpdateEngine {
    pub fn new(executor: Arc<dyn Executor>, mirror: Arc<dyn RepositoryMirror>, events: EventBus) -> Self {
        Self {
            executor,
            mirror,
            compose: ComposeDriver::new(),
            backup: BackupManager::new(),
            state_store: RemoteJsonStateStore::new(),
            events,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, package: &PackageName) -> Arc<Mutex<()>> {
        self.locks
            .entry(package.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Attempt to acquire the per-package lock without blocking. Returns
    /// `Err(Busy)` if an update for this package is already in flight —
    /// callers never queue behind it.
    pub fn try_begin(&self, package: &PackageName) -> Result<OwnedLockGuard, Busy> {
        let lock = self.lock_for(package);
        match lock.clone().try_lock_owned() {
            Ok(guard) => Ok(OwnedLockGuard(guard)),
            Err(_) => Err(Busy),
        }
    }

    /// Non-mutating probe of whether an update for `package` is currently
    /// in flight, for read-only surfaces (Control API package listing)
    /// that want to report status without acquiring the lock themselves.
    pub fn is_busy(&self, package: &PackageName) -> bool {
        self.lock_for(package).try_lock().is_err()
    }

    /// Run a full update for `package`, never panicking on the expected
    /// failure path; always returns a structured [`UpdateResult`]. The
    /// caller must already hold the package's lock (see [`Self::try_begin`]).
    pub async fn update(&self, package: &Package, request: UpdateRequest) -> UpdateResult {
        let update_id = Uuid::new_v4();
        let compose_dir = package.compose_dir();

        let state = match self.state_store.read(self.executor.as_ref(), &compose_dir).await {
            Ok(s) => s,
            Err(e) => {
                warn!("deployment state at {} is corrupt: {}; treating as empty", compose_dir, e);
                None
            }
        };
        let state = state.unwrap_or_else(|| DeploymentState::fresh(Utc::now()));
        let current_version = state.version.clone();

        let (target_version, target_tag_name) = match self.resolve_target(package, &request, &current_version).await {
            Ok(Some(v)) => v,
            Ok(None) => return UpdateResult::no_op(current_version),
            Err(e) => {
                return UpdateResult {
                    status: UpdateStatus::Failed,
                    previous_version: current_version.clone(),
                    version: current_version,
                    executed_scripts: Vec::new(),
                    backup_id: None,
                    health_check: None,
                    recovery_performed: false,
                    error: Some(e),
                };
            }
        };

        if target_version == current_version {
            return UpdateResult::no_op(current_version);
        }

        self.events.publish(Event::UpdateStarted {
            package: package.name.clone(),
            update_id,
            from_version: current_version.clone(),
            target_version: target_version.clone(),
            at: Utc::now(),
        });

        let result = self
            .run_transition(
                package,
                &compose_dir,
                state,
                current_version,
                target_version,
                &target_tag_name,
                update_id,
                &request.cancellation,
            )
            .await;

        self.events.publish(Event::UpdateFinished {
            package: package.name.clone(),
            update_id,
            status: format!("{:?}", result.status),
            at: Utc::now(),
        });

        result
    }

    /// Resolves the update target, returning both the version and the
    /// git tag name that produced it. The tag's own spelling (`v1.2.3`,
    /// `ver1.2.3`, `1.2.3`) is preserved for [`RepositoryMirror::checkout`]
    /// rather than reconstructed from [`PackageVersion::to_string`], which
    /// only round-trips the `v`/no-prefix forms — a `ver`-style tag would
    /// otherwise fail to check out. An explicit target has no known tag
    /// spelling until checkout time, so its rendered form is used as-is.
    async fn resolve_target(
        &self,
        package: &Package,
        request: &UpdateRequest,
        current_version: &PackageVersion,
    ) -> Result<Option<(PackageVersion, String)>, String> {
        if let Some(explicit) = &request.explicit_target {
            return Ok(Some((explicit.clone(), explicit.to_string())));
        }

        self.mirror
            .fetch(&package.mirror_path)
            .await
            .map_err(|e| format!("failed to fetch tags: {e}"))?;
        let tags = self
            .mirror
            .list_tags(&package.mirror_path)
            .await
            .map_err(|e| format!("failed to list tags: {e}"))?;

        let max = tags.into_iter().max_by(|a, b| a.version.cmp(&b.version));
        match max {
            Some(t) if &t.version > current_version => Ok(Some((t.version, t.tag_name))),
            _ => Ok(None),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_transition(
        &self,
        package: &Package,
        compose_dir: &str,
        mut state: DeploymentState,
        current_version: PackageVersion,
        target_version: PackageVersion,
        target_tag_name: &str,
        update_id: Uuid,
        cancellation: &CancellationToken,
    ) -> UpdateResult {
        let scripts = match planner::discover_scripts(self.executor.as_ref(), compose_dir).await {
            Ok(s) => s,
            Err(e) => return self.fail_before_backup(current_version, format!("failed to discover migration scripts: {e}")),
        };
        let plan = planner::build_plan(&scripts, &current_version, &target_version, &state.up, &state.failed);

        let backup_capable = match self.backup.is_supported(self.executor.as_ref(), compose_dir).await {
            Ok(v) => v,
            Err(e) => return self.fail_before_backup(current_version, format!("failed to probe backup capability: {e}")),
        };

        let mut backup_id: Option<String> = None;
        if backup_capable {
            match self
                .backup
                .create(
                    self.executor.as_ref(),
                    compose_dir,
                    &package.name.0,
                    &current_version,
                    "unknown",
                    false,
                )
                .await
            {
                Ok(outcome) if outcome.success => backup_id = outcome.path,
                Ok(outcome) => {
                    return self.fail_before_backup(current_version, format!("backup creation failed: {}", outcome.message))
                }
                Err(e) => return self.fail_before_backup(current_version, format!("backup creation failed: {e}")),
            }
        }
        self.publish_step(package, update_id, "Backup");

        let recoverable = match &backup_id {
            Some(id) => Recoverable::Yes { backup_id: id.clone() },
            None => Recoverable::No,
        };

        if cancellation.is_cancelled() {
            return self
                .recover_or_fail(package, compose_dir, &recoverable, current_version, "update cancelled before stop".to_string())
                .await;
        }

        let arch = match self.executor.architecture().await {
            Ok(a) => a,
            Err(e) => return self.recover_or_fail(package, compose_dir, &recoverable, current_version, format!("failed to detect architecture: {e}")).await,
        };

        let current_files = match self.compose.compose_files_for(self.executor.as_ref(), compose_dir, arch).await {
            Ok(f) => f,
            Err(e) => return self.recover_or_fail(package, compose_dir, &recoverable, current_version, format!("failed to select compose files: {e}")).await,
        };

        if let Err(e) = self.compose.down(self.executor.as_ref(), compose_dir, &current_files).await {
            return self
                .recover_or_fail(package, compose_dir, &recoverable, current_version, format!("compose down failed: {e}"))
                .await;
        }
        self.publish_step(package, update_id, "Stop");

        if let Err(e) = self.mirror.checkout(&package.mirror_path, target_tag_name).await {
            return self
                .recover_or_fail(
                    package,
                    compose_dir,
                    &recoverable,
                    current_version,
                    format!("checkout of {target_tag_name} failed: {e}"),
                )
                .await;
        }

        if cancellation.is_cancelled() {
            return self
                .recover_or_fail(package, compose_dir, &recoverable, current_version, "update cancelled before migration".to_string())
                .await;
        }

        let outcomes = match execute_plan(self.executor.as_ref(), compose_dir, &plan).await {
            Ok(o) => o,
            Err(e) => return self.recover_or_fail(package, compose_dir, &recoverable, current_version, format!("migration plan failed: {e}")).await,
        };

        let mut executed_scripts = Vec::new();
        let mut migration_failed = None;
        for outcome in &outcomes {
            if outcome.success {
                executed_scripts.push(outcome.filename.clone());
                if target_version > current_version {
                    state.up.insert(outcome.version.clone());
                } else {
                    state.up.remove(&outcome.version);
                }
                state.failed.remove(&outcome.version);
            } else {
                state.failed.insert(outcome.version.clone());
                migration_failed = Some(format!("script {} failed: {}", outcome.filename, outcome.stderr.trim()));
                break;
            }
        }
        self.publish_step(package, update_id, "Migrate");

        if let Some(message) = migration_failed {
            // State is normally only advanced in Finalize, but a failed
            // migration script has already regressed `state.failed` in
            // memory above; persist it here too, or the failed version
            // never lands in the on-disk `Failed` set and a retry can't
            // tell it was attempted.
            state.updated = Utc::now();
            if let Err(e) = self.state_store.write(self.executor.as_ref(), compose_dir, &state).await {
                warn!("failed to persist deployment state after migration failure: {}", e);
            }
            return self
                .recover_or_fail(package, compose_dir, &recoverable, current_version, message)
                .await;
        }

        if cancellation.is_cancelled() {
            return self
                .recover_or_fail(package, compose_dir, &recoverable, current_version, "update cancelled before start".to_string())
                .await;
        }

        let new_files = match self.compose.compose_files_for(self.executor.as_ref(), compose_dir, arch).await {
            Ok(f) => f,
            Err(e) => return self.recover_or_fail(package, compose_dir, &recoverable, current_version, format!("failed to select compose files after checkout: {e}")).await,
        };

        if let Err(e) = self.compose.up(self.executor.as_ref(), compose_dir, &new_files).await {
            return self
                .recover_or_fail(package, compose_dir, &recoverable, current_version, format!("compose up failed: {e}"))
                .await;
        }
        self.publish_step(package, update_id, "Start");

        let probe_services = match self.compose.services(self.executor.as_ref(), compose_dir, &new_files).await {
            Ok(s) if !s.is_empty() => s,
            Ok(_) => vec!["web".to_string()],
            Err(e) => return self.recover_or_fail(package, compose_dir, &recoverable, current_version, format!("failed to list declared services: {e}")).await,
        };
        let evaluator = HealthEvaluator::new(15, Duration::from_secs(2));
        let health = match evaluator
            .check(
                self.executor.as_ref(),
                &self.compose,
                compose_dir,
                &new_files,
                &probe_services,
                &package.critical_services,
            )
            .await
        {
            Ok(h) => h,
            Err(e) => return self.recover_or_fail(package, compose_dir, &recoverable, current_version, format!("health check failed: {e}")).await,
        };
        self.publish_step(package, update_id, "HealthCheck");

        match health.verdict() {
            Verdict::CriticalFailure => {
                self.recover_or_fail(
                    package,
                    compose_dir,
                    &recoverable,
                    current_version,
                    "critical service(s) unhealthy after start".to_string(),
                )
                .await
            }
            Verdict::NonCriticalFailure => {
                state.version = target_version.clone();
                state.updated = Utc::now();
                if let Err(e) = self.state_store.write(self.executor.as_ref(), compose_dir, &state).await {
                    warn!("failed to persist deployment state after partial success: {}", e);
                }
                UpdateResult {
                    status: UpdateStatus::PartialSuccess,
                    previous_version: current_version,
                    version: target_version,
                    executed_scripts,
                    backup_id,
                    health_check: Some(health),
                    recovery_performed: false,
                    error: None,
                }
            }
            Verdict::Healthy => {
                state.version = target_version.clone();
                state.updated = Utc::now();
                if let Err(e) = self.state_store.write(self.executor.as_ref(), compose_dir, &state).await {
                    return UpdateResult {
                        status: UpdateStatus::Failed,
                        previous_version: current_version,
                        version: target_version,
                        executed_scripts,
                        backup_id,
                        health_check: Some(health),
                        recovery_performed: false,
                        error: Some(format!("update succeeded but state write failed: {e}")),
                    };
                }
                UpdateResult {
                    status: UpdateStatus::Success,
                    previous_version: current_version,
                    version: target_version,
                    executed_scripts,
                    backup_id,
                    health_check: Some(health),
                    recovery_performed: false,
                    error: None,
                }
            }
        }
    }

    fn fail_before_backup(&self, current_version: PackageVersion, error: String) -> UpdateResult {
        UpdateResult {
            status: UpdateStatus::Failed,
            previous_version: current_version.clone(),
            version: current_version,
            executed_scripts: Vec::new(),
            backup_id: None,
            health_check: None,
            recovery_performed: false,
            error: Some(error),
        }
    }

    /// Recovery precondition: a backup must have been created earlier in
    /// this same update. Without one, recovery is not attempted at all —
    /// the package is left on whatever state the failed step produced,
    /// and the caller is told explicitly that rollback was impossible.
    async fn recover_or_fail(
        &self,
        package: &Package,
        compose_dir: &str,
        recoverable: &Recoverable,
        previous_version: PackageVersion,
        reason: String,
    ) -> UpdateResult {
        let backup_id = match recoverable {
            Recoverable::Yes { backup_id } => backup_id.clone(),
            Recoverable::No => {
                return UpdateResult {
                    status: UpdateStatus::Failed,
                    previous_version: previous_version.clone(),
                    version: previous_version,
                    executed_scripts: Vec::new(),
                    backup_id: None,
                    health_check: None,
                    recovery_performed: false,
                    error: Some(format!("{reason} (no recovery possible without a backup)")),
                };
            }
        };

        info!("recovering {} to {} after failure: {}", package.name, previous_version, reason);

        let arch = self.executor.architecture().await.ok();
        if let Some(arch) = arch {
            if let Ok(current_files) = self.compose.compose_files_for(self.executor.as_ref(), compose_dir, arch).await {
                let _ = self.compose.down(self.executor.as_ref(), compose_dir, &current_files).await;
            }
        }

        let restore_outcome = self.backup.restore(self.executor.as_ref(), compose_dir, &backup_id).await;

        if previous_version.is_valid_nonempty() {
            let _ = self
                .mirror
                .checkout(&package.mirror_path, &previous_version.to_string())
                .await;
        }

        if let Some(arch) = self.executor.architecture().await.ok() {
            if let Ok(previous_files) = self.compose.compose_files_for(self.executor.as_ref(), compose_dir, arch).await {
                let _ = self.compose.up(self.executor.as_ref(), compose_dir, &previous_files).await;
            }
        }

        let restore_message = match restore_outcome {
            Ok(o) if o.success => None,
            Ok(o) => Some(format!("; backup restore reported: {}", o.message)),
            Err(e) => Some(format!("; backup restore failed: {e}")),
        };

        UpdateResult {
            status: UpdateStatus::Failed,
            previous_version: previous_version.clone(),
            version: previous_version,
            executed_scripts: Vec::new(),
            backup_id: Some(backup_id),
            health_check: None,
            recovery_performed: true,
            error: Some(format!("{reason}{}", restore_message.unwrap_or_default())),
        }
    }

    fn publish_step(&self, package: &Package, update_id: Uuid, step: &str) {
        debug!("{}: step {} completed", package.name, step);
        self.events.publish(Event::StepCompleted {
            package: package.name.clone(),
            update_id,
            step: step.to_string(),
            at: Utc::now(),
        });
    }
}

/// RAII guard from [`UpdateEngine::try_begin`]; dropping it releases the
/// per-package lock.
pub struct OwnedLockGuard(tokio::sync::OwnedMutexGuard<()>);
