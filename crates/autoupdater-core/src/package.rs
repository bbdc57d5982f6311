//! Configured deployment unit. Immutable after registration.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageName(pub String);

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PackageName {
    fn from(value: &str) -> Self {
        PackageName(value.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryAuth {
    pub username: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub name: PackageName,
    pub friendly_name: Option<String>,
    /// Local mirror path (updater-side working copy).
    pub mirror_path: String,
    pub repository_url: String,
    /// Directory inside the mirror holding compose files, relative to
    /// `mirror_path`.
    pub compose_subdir: String,
    #[serde(default)]
    pub registry_auth: Option<RegistryAuth>,
    /// Service names considered critical for health evaluation. Empty
    /// means every declared service is critical (conservative default).
    #[serde(default)]
    pub critical_services: Vec<String>,
    /// Whether the reconciler applies detected upgrades automatically, or
    /// only publishes an `UpgradeAvailable` event for an API trigger.
    #[serde(default)]
    pub auto_update: bool,
}

impl Package {
    /// Absolute path to the compose directory, whether on the mirror or
    /// (when host-mounted) the managed host — callers decide which root
    /// this is relative to.
    pub fn compose_dir(&self) -> String {
        format!("{}/{}", self.mirror_path.trim_end_matches('/'), self.compose_subdir)
    }

    pub fn display_name(&self) -> &str {
        self.friendly_name.as_deref().unwrap_or(&self.name.0)
    }
}
