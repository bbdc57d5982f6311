//! Process configuration: `autoupdater.toml`, loaded and validated by
//! reading, parsing, and validating up front — bailing with an
//! actionable message rather than panicking on the first bad field.

use std::path::Path;

use anyhow::{Context, Result};
use autoupdater_core::package::{Package as EnginePackage, PackageName, RegistryAuth};
use serde::{Deserialize, Serialize};

mod validate;

#[derive(Debug, Deserialize, Serialize)]
pub struct AutoupdaterConfig {
    pub server: ServerConfig,
    pub host: HostConfig,
    #[serde(default)]
    pub packages: Vec<PackageConfig>,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

/// The single managed host this updater instance drives. Multi-host
/// fleets are out of scope.
#[derive(Debug, Deserialize, Serialize)]
pub struct HostConfig {
    pub address: String,
    pub user: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default = "default_private_key_path")]
    pub private_key_path: String,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_private_key_path() -> String {
    "~/.ssh/id_ed25519".to_string()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_reconcile_interval_secs")]
    pub interval_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reconcile_interval_secs(),
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            user: String::new(),
            port: default_ssh_port(),
            private_key_path: default_private_key_path(),
        }
    }
}

fn default_reconcile_interval_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PackageConfig {
    pub name: String,
    pub friendly_name: Option<String>,
    pub mirror_path: String,
    pub repository_url: String,
    #[serde(default = "default_compose_subdir")]
    pub compose_subdir: String,
    pub registry_username: Option<String>,
    pub registry_token: Option<String>,
    #[serde(default)]
    pub critical_services: Vec<String>,
    #[serde(default)]
    pub auto_update: bool,
}

fn default_compose_subdir() -> String {
    "compose".to_string()
}

impl From<&PackageConfig> for EnginePackage {
    fn from(config: &PackageConfig) -> Self {
        let registry_auth = if config.registry_username.is_some() || config.registry_token.is_some() {
            Some(RegistryAuth {
                username: config.registry_username.clone(),
                token: config.registry_token.clone(),
            })
        } else {
            None
        };

        EnginePackage {
            name: PackageName::from(config.name.as_str()),
            friendly_name: config.friendly_name.clone(),
            mirror_path: config.mirror_path.clone(),
            repository_url: config.repository_url.clone(),
            compose_subdir: config.compose_subdir.clone(),
            registry_auth,
            critical_services: config.critical_services.clone(),
            auto_update: config.auto_update,
        }
    }
}

impl AutoupdaterConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;

        validate::validate(&config)?;

        Ok(config)
    }

    pub fn engine_packages(&self) -> Vec<EnginePackage> {
        self.packages.iter().map(EnginePackage::from).collect()
    }
}
