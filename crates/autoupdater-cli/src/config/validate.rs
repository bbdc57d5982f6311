use anyhow::{bail, Result};
use std::collections::HashSet;

use super::AutoupdaterConfig;

pub fn validate(config: &AutoupdaterConfig) -> Result<()> {
    if config.host.address.is_empty() {
        bail!("host.address cannot be empty");
    }
    if config.host.user.is_empty() {
        bail!("host.user cannot be empty");
    }

    if config.packages.is_empty() {
        bail!("at least one [[packages]] entry is required");
    }

    let mut seen = HashSet::new();
    for package in &config.packages {
        if package.name.is_empty() {
            bail!("a package entry has an empty name");
        }
        if !seen.insert(package.name.clone()) {
            bail!("package name '{}' is configured more than once", package.name);
        }
        if package.repository_url.is_empty() {
            bail!("package '{}' has no repository_url", package.name);
        }
        if package.mirror_path.is_empty() {
            bail!("package '{}' has no mirror_path", package.name);
        }
    }

    if config.reconcile.interval_secs == 0 {
        bail!("reconcile.interval_secs must be greater than zero");
    }

    Ok(())
}
