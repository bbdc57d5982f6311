use anyhow::{Context, Result};
use autoupdater_api::{router, ApiState};
use tracing::info;

use crate::config::AutoupdaterConfig;
use crate::runtime::Runtime;

pub async fn run(config: AutoupdaterConfig) -> Result<()> {
    let bind = config.server.bind.clone();
    let runtime = Runtime::bootstrap(&config).await?;

    let reconciler_handles = runtime.reconciler.clone().spawn_all();
    info!("reconciliation loop started for {} package(s)", runtime.registry.all().len());

    let state = ApiState {
        registry: runtime.registry.clone(),
        engine: runtime.engine.clone(),
        reconciler: runtime.reconciler.clone(),
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    info!("Control API listening on {}", bind);

    axum::serve(listener, app).await.context("Control API server stopped")?;

    for handle in reconciler_handles {
        handle.abort();
    }
    Ok(())
}
