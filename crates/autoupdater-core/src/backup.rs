//! Backup/restore around a risky transition. Capability-detected per
//! package by probing for a well-known backup-manager script; packages
//! without one get no-op backups reported as `unsupported`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::executor::{Executor, ExecutorError};
use crate::version::PackageVersion;

const BACKUP_MANAGER_SCRIPT: &str = "backup-manager.sh";

#[derive(Debug, Error)]
pub enum BackupError {
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("backup manager script returned malformed output: {0}")]
    MalformedOutput(String),

    #[error("backup manager reported failure: {kind}: {message}")]
    ScriptReportedFailure { kind: String, message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub version: PackageVersion,
    pub package_name: String,
    pub created_date: DateTime<Utc>,
    pub backup_file: String,
    pub git_commit: String,
    pub git_tag_exists: bool,
}

#[derive(Debug, Clone)]
pub struct BackupArtifact {
    pub path: String,
    pub metadata: Option<BackupMetadata>,
}

#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub success: bool,
    pub path: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    pub success: bool,
    pub message: String,
}

pub struct BackupManager;

impl BackupManager {
    pub fn new() -> Self {
        Self
    }

    fn script_path(compose_dir: &str) -> String {
        format!("{}/{}", compose_dir.trim_end_matches('/'), BACKUP_MANAGER_SCRIPT)
    }

    /// Probe for the backup-manager script. Packages without one are not
    /// an error — backup operations simply become no-ops.
    pub async fn is_supported(&self, executor: &dyn Executor, compose_dir: &str) -> Result<bool, ExecutorError> {
        executor.file_exists(&Self::script_path(compose_dir)).await
    }

    pub async fn create(
        &self,
        executor: &dyn Executor,
        compose_dir: &str,
        package_name: &str,
        version: &PackageVersion,
        git_commit: &str,
        git_tag_exists: bool,
    ) -> Result<CreateOutcome, BackupError> {
        if !self.is_supported(executor, compose_dir).await? {
            return Ok(CreateOutcome {
                success: false,
                path: None,
                message: "unsupported: no backup-manager script present".to_string(),
            });
        }

        let script = Self::script_path(compose_dir);
        let result = executor
            .exec(&format!("sudo {} --version={}", script, version), Some(compose_dir))
            .await?;

        let value: Value = serde_json::from_str(result.stdout.trim())
            .map_err(|e| BackupError::MalformedOutput(e.to_string()))?;

        if let Some(error_kind) = value.get("error").and_then(Value::as_str) {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Err(BackupError::ScriptReportedFailure {
                kind: error_kind.to_string(),
                message,
            });
        }

        let file = value
            .get("file")
            .and_then(Value::as_str)
            .ok_or_else(|| BackupError::MalformedOutput(result.stdout.clone()))?
            .to_string();

        let metadata = BackupMetadata {
            version: version.clone(),
            package_name: package_name.to_string(),
            created_date: Utc::now(),
            backup_file: file.clone(),
            git_commit: git_commit.to_string(),
            git_tag_exists,
        };
        let sidecar_path = format!("{}.meta.json", file);
        let sidecar_json = serde_json::to_vec_pretty(&metadata).expect("BackupMetadata always serializes");
        executor.write_file(&sidecar_path, &sidecar_json).await?;

        Ok(CreateOutcome {
            success: true,
            path: Some(file),
            message: "backup created".to_string(),
        })
    }

    /// Restore from a named backup. If the sidecar records a git tag that
    /// still exists, the restore additionally checks out that tag on the
    /// host-side compose directory — callers supply the checkout closure
    /// since that operation lives in [`crate::mirror`].
    pub async fn restore(
        &self,
        executor: &dyn Executor,
        compose_dir: &str,
        backup_filename: &str,
    ) -> Result<RestoreOutcome, BackupError> {
        if !self.is_supported(executor, compose_dir).await? {
            return Ok(RestoreOutcome {
                success: false,
                message: "unsupported: no backup-manager script present".to_string(),
            });
        }

        let script = Self::script_path(compose_dir);
        let result = executor
            .exec(
                &format!("sudo {} --restore={}", script, backup_filename),
                Some(compose_dir),
            )
            .await?;

        Ok(RestoreOutcome {
            success: result.success(),
            message: if result.success() {
                "restore completed".to_string()
            } else {
                result.stderr.trim().to_string()
            },
        })
    }

    pub async fn read_sidecar(
        &self,
        executor: &dyn Executor,
        backup_path: &str,
    ) -> Result<Option<BackupMetadata>, BackupError> {
        let sidecar_path = format!("{}.meta.json", backup_path);
        if !executor.file_exists(&sidecar_path).await? {
            return Ok(None);
        }
        let bytes = executor.read_file(&sidecar_path).await?;
        let metadata: BackupMetadata =
            serde_json::from_slice(&bytes).map_err(|e| BackupError::MalformedOutput(e.to_string()))?;
        Ok(Some(metadata))
    }

    pub async fn list(&self, executor: &dyn Executor, compose_dir: &str) -> Result<Vec<BackupArtifact>, BackupError> {
        if !self.is_supported(executor, compose_dir).await? {
            return Ok(Vec::new());
        }

        let script = Self::script_path(compose_dir);
        let result = executor.exec(&format!("sudo {} --list", script), Some(compose_dir)).await?;
        let value: Value = serde_json::from_str(result.stdout.trim())
            .map_err(|e| BackupError::MalformedOutput(e.to_string()))?;

        let backups = value
            .get("backups")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut artifacts = Vec::new();
        for entry in backups {
            let path = entry
                .as_str()
                .or_else(|| entry.get("file").and_then(Value::as_str))
                .unwrap_or_default()
                .to_string();
            if path.is_empty() {
                continue;
            }
            let metadata = self.read_sidecar(executor, &path).await?;
            artifacts.push(BackupArtifact { path, metadata });
        }
        Ok(artifacts)
    }
}

impl Default for BackupManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::memory::InMemoryExecutor;
    use crate::executor::Architecture;

    #[tokio::test]
    async fn unsupported_when_no_script_present() {
        let exec = InMemoryExecutor::new(Architecture::X64);
        let manager = BackupManager::new();
        assert!(!manager.is_supported(&exec, "/app").await.unwrap());

        let outcome = manager
            .create(&exec, "/app", "demo", &PackageVersion::parse("1.0.0"), "abc123", false)
            .await
            .unwrap();
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn create_parses_success_json_and_writes_sidecar() {
        let exec = InMemoryExecutor::new(Architecture::X64);
        exec.seed_file("/app/backup-manager.sh", "#!/bin/sh");
        exec.script(
            "sudo /app/backup-manager.sh --version=1.0.0",
            0,
            r#"{"file": "/backups/demo-1.0.0.tar.gz"}"#,
            "",
        );

        let manager = BackupManager::new();
        let outcome = manager
            .create(&exec, "/app", "demo", &PackageVersion::parse("1.0.0"), "abc123", true)
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.path.as_deref(), Some("/backups/demo-1.0.0.tar.gz"));
        assert!(exec.file_exists("/backups/demo-1.0.0.tar.gz.meta.json").await.unwrap());
    }

    #[tokio::test]
    async fn create_surfaces_script_reported_errors() {
        let exec = InMemoryExecutor::new(Architecture::X64);
        exec.seed_file("/app/backup-manager.sh", "#!/bin/sh");
        exec.script(
            "sudo /app/backup-manager.sh --version=1.0.0",
            1,
            r#"{"error": "disk_full", "message": "no space left"}"#,
            "",
        );

        let manager = BackupManager::new();
        let err = manager
            .create(&exec, "/app", "demo", &PackageVersion::parse("1.0.0"), "abc123", false)
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::ScriptReportedFailure { .. }));
    }
}
