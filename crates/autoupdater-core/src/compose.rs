//! Compose CLI binding detection, arch-aware file selection, and command
//! generation. Generalizes the inline `docker compose ...` string-building
//! this system's predecessor did ad hoc into a reusable driver.

use tokio::sync::OnceCell;

use crate::executor::{Architecture, Executor, ExecutorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeFlavor {
    /// `docker compose ...` (v2 subcommand)
    V2,
    /// `docker-compose ...` (v1 hyphenated binary)
    V1,
}

impl ComposeFlavor {
    fn binary(self) -> &'static str {
        match self {
            ComposeFlavor::V2 => "docker compose",
            ComposeFlavor::V1 => "docker-compose",
        }
    }
}

pub struct ComposeDriver {
    flavor: OnceCell<ComposeFlavor>,
}

impl ComposeDriver {
    pub fn new() -> Self {
        Self {
            flavor: OnceCell::new(),
        }
    }

    /// Probe `docker compose version` then `docker-compose --version`,
    /// caching the winning invocation for the process lifetime. If both
    /// fail, default to v2 so the operator sees a clean "command not
    /// found" rather than a silently wrong binding.
    async fn flavor(&self, executor: &dyn Executor) -> Result<ComposeFlavor, ExecutorError> {
        self.flavor
            .get_or_try_init(|| async {
                if executor.exec("docker compose version", None).await?.success() {
                    return Ok(ComposeFlavor::V2);
                }
                if executor.exec("docker-compose --version", None).await?.success() {
                    return Ok(ComposeFlavor::V1);
                }
                Ok(ComposeFlavor::V2)
            })
            .await
            .copied()
    }

    /// Returns the subset of compose files applicable to `arch`: always
    /// `docker-compose.yml` if present, plus `docker-compose.<arch>.yml`
    /// for the detected architecture. Files named after another
    /// architecture, or living in a subdirectory, are excluded. Base file
    /// first, arch overlay second — file order is significant on the
    /// command line.
    pub async fn compose_files_for(
        &self,
        executor: &dyn Executor,
        compose_dir: &str,
        arch: Architecture,
    ) -> Result<Vec<String>, ExecutorError> {
        let mut files = Vec::new();
        if executor
            .file_exists(&format!("{}/docker-compose.yml", compose_dir))
            .await?
        {
            files.push("docker-compose.yml".to_string());
        }
        let overlay = format!("docker-compose.{}.yml", arch.as_str());
        if executor
            .file_exists(&format!("{}/{}", compose_dir, overlay))
            .await?
        {
            files.push(overlay);
        }
        Ok(files)
    }

    fn file_flags(files: &[String]) -> String {
        files
            .iter()
            .map(|f| format!("-f \"{}\"", f))
            .collect::<Vec<_>>()
            .join(" ")
    }

    async fn run(
        &self,
        executor: &dyn Executor,
        compose_dir: &str,
        files: &[String],
        subcommand: &str,
    ) -> Result<crate::executor::ExecResult, ExecutorError> {
        let flavor = self.flavor(executor).await?;
        let command = format!("sudo {} {} {}", flavor.binary(), Self::file_flags(files), subcommand);
        executor.exec(&command, Some(compose_dir)).await
    }

    pub async fn up(
        &self,
        executor: &dyn Executor,
        compose_dir: &str,
        files: &[String],
    ) -> Result<crate::executor::ExecResult, ExecutorError> {
        self.run(executor, compose_dir, files, "up -d").await
    }

    pub async fn down(
        &self,
        executor: &dyn Executor,
        compose_dir: &str,
        files: &[String],
    ) -> Result<crate::executor::ExecResult, ExecutorError> {
        self.run(executor, compose_dir, files, "down").await
    }

    pub async fn pull(
        &self,
        executor: &dyn Executor,
        compose_dir: &str,
        files: &[String],
    ) -> Result<crate::executor::ExecResult, ExecutorError> {
        self.run(executor, compose_dir, files, "pull").await
    }

    /// `restart` is never used in place of down+up — compose `restart`
    /// does not re-apply changed files, so every transition in this
    /// system goes through an explicit down-then-up pair.
    pub async fn restart(
        &self,
        executor: &dyn Executor,
        compose_dir: &str,
        files: &[String],
    ) -> Result<(), ExecutorError> {
        self.down(executor, compose_dir, files).await?;
        self.up(executor, compose_dir, files).await?;
        Ok(())
    }

    pub async fn ps(
        &self,
        executor: &dyn Executor,
        compose_dir: &str,
        files: &[String],
    ) -> Result<crate::executor::ExecResult, ExecutorError> {
        self.run(executor, compose_dir, files, "ps").await
    }

    /// Declared service names for this compose project, in the order
    /// `config --services` reports them. Used by the Health Evaluator to
    /// probe every service the compose file declares, not just the
    /// package's configured critical subset.
    pub async fn services(
        &self,
        executor: &dyn Executor,
        compose_dir: &str,
        files: &[String],
    ) -> Result<Vec<String>, ExecutorError> {
        let result = self.run(executor, compose_dir, files, "config --services").await?;
        Ok(result
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Container id for a single declared service, via the same cached
    /// v1/v2 binding every other compose invocation uses. Used by the
    /// Health Evaluator so its probes never bypass the flavor probe.
    pub async fn container_id_for(
        &self,
        executor: &dyn Executor,
        compose_dir: &str,
        files: &[String],
        service: &str,
    ) -> Result<String, ExecutorError> {
        let result = self.run(executor, compose_dir, files, &format!("ps -q {}", service)).await?;
        Ok(result.stdout.trim().to_string())
    }

    pub async fn ls_json(&self, executor: &dyn Executor) -> Result<crate::executor::ExecResult, ExecutorError> {
        let flavor = self.flavor(executor).await?;
        executor
            .exec(&format!("sudo {} ls --format json", flavor.binary()), None)
            .await
    }
}

impl Default for ComposeDriver {
    fn default() -> Self {
        Self::new()
    }
}
