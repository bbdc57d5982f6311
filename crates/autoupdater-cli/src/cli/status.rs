use anyhow::{bail, Result};

use crate::config::AutoupdaterConfig;
use crate::output;
use crate::runtime::Runtime;
use autoupdater_core::package::PackageName;

pub async fn run(config: AutoupdaterConfig, name: &str) -> Result<()> {
    let runtime = Runtime::bootstrap(&config).await?;
    let package_name = PackageName::from(name);

    if runtime.registry.find(&package_name).is_none() {
        bail!("unknown package '{}'", name);
    }

    let check = runtime.reconciler.check(&package_name).await?;

    output::header(&format!("Status: {}", name));
    println!("  current version:   {}", check.current_version);
    println!("  available version: {}", check.available_version);
    if check.upgrade_available {
        output::info("an upgrade is available");
    } else {
        output::success("already at the latest tag");
    }

    Ok(())
}
