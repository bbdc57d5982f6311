//! Wires config into the executor, mirror, registry, and engine every
//! subcommand needs. Kept separate from `main` so each `cli::*::run`
//! function takes the already-built pieces rather than reaching for
//! globals, avoiding static logger/service holders on domain types.

use std::sync::Arc;

use anyhow::{Context, Result};
use autoupdater_core::engine::UpdateEngine;
use autoupdater_core::events::EventBus;
use autoupdater_core::executor::ssh::SshExecutor;
use autoupdater_core::executor::{AuthMethod, Executor};
use autoupdater_core::mirror::{Git2Mirror, RepositoryMirror};
use autoupdater_registry::{PackageRegistry, Reconciler};

use crate::config::AutoupdaterConfig;

pub struct Runtime {
    pub registry: Arc<PackageRegistry>,
    pub engine: Arc<UpdateEngine>,
    pub reconciler: Arc<Reconciler>,
    pub events: EventBus,
}

impl Runtime {
    pub async fn bootstrap(config: &AutoupdaterConfig) -> Result<Self> {
        let auth = AuthMethod::PrivateKey {
            path: config.host.private_key_path.clone(),
        };
        let executor: Arc<dyn Executor> = Arc::new(
            SshExecutor::connect(&config.host.user, &config.host.address, Some(config.host.port), &auth)
                .await
                .with_context(|| format!("failed to connect to {}@{}", config.host.user, config.host.address))?,
        );
        let mirror: Arc<dyn RepositoryMirror> = Arc::new(Git2Mirror::new());

        let registry = Arc::new(PackageRegistry::new(config.engine_packages()));
        let events = EventBus::default();
        let engine = Arc::new(UpdateEngine::new(executor.clone(), mirror.clone(), events.clone()));
        let reconciler = Arc::new(
            Reconciler::new(registry.clone(), executor, mirror, engine.clone(), events.clone())
                .with_interval(std::time::Duration::from_secs(config.reconcile.interval_secs)),
        );

        Ok(Self {
            registry,
            engine,
            reconciler,
            events,
        })
    }
}
