//! Persisted deployment state: `<composeDir>/deployment.state.json`.
//!
//! Writers always emit all four keys; readers tolerate missing `up`/
//! `failed` and treat them as empty, so the schema can grow without
//! breaking older state files.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::executor::{Executor, ExecutorError};
use crate::version::PackageVersion;

const STATE_FILENAME: &str = "deployment.state.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentState {
    #[serde(rename = "Version")]
    pub version: PackageVersion,
    #[serde(rename = "Updated")]
    pub updated: DateTime<Utc>,
    #[serde(rename = "Up", default)]
    pub up: BTreeSet<PackageVersion>,
    #[serde(rename = "Failed", default)]
    pub failed: BTreeSet<PackageVersion>,
}

impl DeploymentState {
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            version: PackageVersion::empty(),
            updated: now,
            up: BTreeSet::new(),
            failed: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("deployment state at {path} failed schema validation: {message}")]
    Corrupt { path: String, message: String },
}

fn state_path(compose_dir: &str) -> String {
    format!("{}/{}", compose_dir.trim_end_matches('/'), STATE_FILENAME)
}

/// Reads/writes the state file through the [`Executor`] abstraction, so
/// the same code path works whether the compose directory lives on the
/// managed host or (in tests) in memory. Writes go to a sibling temp path
/// then rename over the target — the `Executor::write_file` contract
/// already guarantees this.
pub struct RemoteJsonStateStore;

impl RemoteJsonStateStore {
    pub fn new() -> Self {
        Self
    }

    pub async fn exists(&self, executor: &dyn Executor, compose_dir: &str) -> Result<bool, StateError> {
        Ok(executor.file_exists(&state_path(compose_dir)).await?)
    }

    /// Returns `None` if the file is absent. A present-but-malformed file
    /// is treated as [`StateError::Corrupt`]; the Engine catches this and
    /// falls back to an Empty current version, logging a warning rather
    /// than aborting planning.
    pub async fn read(
        &self,
        executor: &dyn Executor,
        compose_dir: &str,
    ) -> Result<Option<DeploymentState>, StateError> {
        let path = state_path(compose_dir);
        if !executor.file_exists(&path).await? {
            return Ok(None);
        }

        let bytes = executor.read_file(&path).await?;
        let state: DeploymentState = serde_json::from_slice(&bytes).map_err(|e| StateError::Corrupt {
            path: path.clone(),
            message: e.to_string(),
        })?;

        Ok(Some(state))
    }

    pub async fn write(
        &self,
        executor: &dyn Executor,
        compose_dir: &str,
        state: &DeploymentState,
    ) -> Result<(), StateError> {
        executor.make_dir(compose_dir).await?;
        let path = state_path(compose_dir);
        let json = serde_json::to_vec_pretty(state).expect("DeploymentState always serializes");
        executor.write_file(&path, &json).await?;
        Ok(())
    }
}

impl Default for RemoteJsonStateStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique identifier minted for API-triggered updates.
pub fn new_update_id() -> Uuid {
    Uuid::new_v4()
}
