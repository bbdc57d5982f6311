//! Post-start health classification, grounded in the poll-`docker inspect`
//! loop used by this system's direct predecessor: retry/interval polling
//! of each service's Docker health status, classified against a
//! per-package "critical services" set.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::compose::ComposeDriver;
use crate::executor::{Executor, ExecutorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceStatus {
    Healthy,
    Unhealthy,
    /// The compose service declares no health check, or status could not
    /// be determined within the retry budget.
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub service: String,
    pub status: ServiceStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Healthy,
    NonCriticalFailure,
    CriticalFailure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub healthy_services: Vec<String>,
    pub unhealthy_services: Vec<String>,
    pub critical_failure: bool,
}

impl HealthCheck {
    pub fn verdict(&self) -> Verdict {
        if self.unhealthy_services.is_empty() {
            Verdict::Healthy
        } else if self.critical_failure {
            Verdict::CriticalFailure
        } else {
            Verdict::NonCriticalFailure
        }
    }
}

pub struct HealthEvaluator {
    pub retries: u32,
    pub interval: Duration,
}

impl HealthEvaluator {
    pub fn new(retries: u32, interval: Duration) -> Self {
        Self { retries, interval }
    }

    /// Query compose `ps` for the declared services through the shared
    /// [`ComposeDriver`] (so probes use the same detected v1/v2 binding as
    /// every other compose invocation), then poll each service's container
    /// health status up to `self.retries` times, waiting `self.interval`
    /// between attempts. A service with no declared Docker healthcheck
    /// counts as healthy once its container is running.
    pub async fn check(
        &self,
        executor: &dyn Executor,
        compose: &ComposeDriver,
        compose_dir: &str,
        compose_files: &[String],
        services: &[String],
        critical_services: &[String],
    ) -> Result<HealthCheck, ExecutorError> {
        let mut healthy = Vec::new();
        let mut unhealthy = Vec::new();

        for service in services {
            let status = self
                .poll_service(executor, compose, compose_dir, compose_files, service)
                .await?;
            match status {
                ServiceStatus::Unhealthy => unhealthy.push(service.clone()),
                ServiceStatus::Healthy | ServiceStatus::Unknown => healthy.push(service.clone()),
            }
        }

        let critical_failure = unhealthy.iter().any(|svc| is_critical(svc, critical_services));

        Ok(HealthCheck {
            healthy_services: healthy,
            unhealthy_services: unhealthy,
            critical_failure,
        })
    }

    async fn poll_service(
        &self,
        executor: &dyn Executor,
        compose: &ComposeDriver,
        compose_dir: &str,
        compose_files: &[String],
        service: &str,
    ) -> Result<ServiceStatus, ExecutorError> {
        let container_id = compose
            .container_id_for(executor, compose_dir, compose_files, service)
            .await?;

        if container_id.is_empty() {
            return Ok(ServiceStatus::Unhealthy);
        }

        for _ in 0..self.retries.max(1) {
            let result = executor
                .exec(
                    &format!(
                        "docker inspect --format='{{{{.State.Health.Status}}}}' {}",
                        container_id
                    ),
                    None,
                )
                .await?;
            let status = result.stdout.trim().to_string();

            match status.as_str() {
                "healthy" => return Ok(ServiceStatus::Healthy),
                "unhealthy" => return Ok(ServiceStatus::Unhealthy),
                "" | "<no value>" => return Ok(ServiceStatus::Unknown),
                _ => {
                    tokio::time::sleep(self.interval).await;
                }
            }
        }

        Ok(ServiceStatus::Unknown)
    }
}

/// A service with no configured critical list is treated as critical by
/// default (conservative: any unhealthy service rolls back).
fn is_critical(service: &str, critical_services: &[String]) -> bool {
    critical_services.is_empty() || critical_services.iter().any(|c| c == service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::memory::InMemoryExecutor;
    use crate::executor::Architecture;

    #[tokio::test]
    async fn all_healthy_yields_healthy_verdict() {
        let exec = InMemoryExecutor::new(Architecture::X64);
        exec.script("cd /app && sudo docker compose -f \"docker-compose.yml\" ps -q web", 0, "abc123", "");
        exec.script(
            "docker inspect --format='{{.State.Health.Status}}' abc123",
            0,
            "healthy",
            "",
        );

        let compose = ComposeDriver::new();
        let evaluator = HealthEvaluator::new(3, Duration::from_millis(1));
        let result = evaluator
            .check(
                &exec,
                &compose,
                "/app",
                &["docker-compose.yml".to_string()],
                &["web".to_string()],
                &[],
            )
            .await
            .unwrap();

        assert_eq!(result.verdict(), Verdict::Healthy);
    }

    #[tokio::test]
    async fn unhealthy_critical_service_is_critical_failure() {
        let exec = InMemoryExecutor::new(Architecture::X64);
        exec.script("cd /app && sudo docker compose -f \"docker-compose.yml\" ps -q web", 0, "abc123", "");
        exec.script(
            "docker inspect --format='{{.State.Health.Status}}' abc123",
            0,
            "unhealthy",
            "",
        );

        let compose = ComposeDriver::new();
        let evaluator = HealthEvaluator::new(1, Duration::from_millis(1));
        let result = evaluator
            .check(
                &exec,
                &compose,
                "/app",
                &["docker-compose.yml".to_string()],
                &["web".to_string()],
                &["web".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(result.verdict(), Verdict::CriticalFailure);
    }

    #[tokio::test]
    async fn unhealthy_non_critical_service_is_non_critical_failure() {
        let exec = InMemoryExecutor::new(Architecture::X64);
        exec.script("cd /app && sudo docker compose -f \"docker-compose.yml\" ps -q worker", 0, "def456", "");
        exec.script(
            "docker inspect --format='{{.State.Health.Status}}' def456",
            0,
            "unhealthy",
            "",
        );

        let compose = ComposeDriver::new();
        let evaluator = HealthEvaluator::new(1, Duration::from_millis(1));
        let result = evaluator
            .check(
                &exec,
                &compose,
                "/app",
                &["docker-compose.yml".to_string()],
                &["worker".to_string()],
                &["web".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(result.verdict(), Verdict::NonCriticalFailure);
    }

    #[tokio::test]
    async fn probe_uses_the_compose_driver_s_detected_v1_flavor() {
        let exec = InMemoryExecutor::new(Architecture::X64);
        exec.script("docker compose version", 1, "", "not found");
        exec.script("docker-compose --version", 0, "docker-compose version 1.29.2", "");
        exec.script("cd /app && sudo docker-compose -f \"docker-compose.yml\" ps -q web", 0, "abc123", "");
        exec.script(
            "docker inspect --format='{{.State.Health.Status}}' abc123",
            0,
            "healthy",
            "",
        );

        let compose = ComposeDriver::new();
        let evaluator = HealthEvaluator::new(1, Duration::from_millis(1));
        let result = evaluator
            .check(
                &exec,
                &compose,
                "/app",
                &["docker-compose.yml".to_string()],
                &["web".to_string()],
                &[],
            )
            .await
            .unwrap();

        assert_eq!(result.verdict(), Verdict::Healthy);
    }
}
