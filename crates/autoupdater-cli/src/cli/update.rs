use anyhow::{bail, Result};

use autoupdater_core::engine::{UpdateRequest, UpdateStatus};
use autoupdater_core::package::PackageName;
use autoupdater_core::version::PackageVersion;

use crate::config::AutoupdaterConfig;
use crate::output;
use crate::runtime::Runtime;

pub async fn run(config: AutoupdaterConfig, name: &str, version: Option<&str>) -> Result<()> {
    let runtime = Runtime::bootstrap(&config).await?;
    let package_name = PackageName::from(name);

    let package = match runtime.registry.find(&package_name) {
        Some(p) => p.clone(),
        None => bail!("unknown package '{}'", name),
    };

    let guard = match runtime.engine.try_begin(&package_name) {
        Ok(guard) => guard,
        Err(_) => bail!("an update for '{}' is already in flight", name),
    };

    let request = UpdateRequest {
        explicit_target: version.map(PackageVersion::parse),
        ..Default::default()
    };

    output::info(&format!("updating {}...", package.display_name()));
    let result = runtime.engine.update(&package, request).await;
    drop(guard);

    report(&result);

    if result.status == UpdateStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}

pub async fn run_all(config: AutoupdaterConfig) -> Result<()> {
    let runtime = Runtime::bootstrap(&config).await?;
    let mut any_failed = false;

    for package in runtime.registry.all().to_vec() {
        match runtime.engine.try_begin(&package.name) {
            Ok(guard) => {
                output::info(&format!("updating {}...", package.display_name()));
                let result = runtime.engine.update(&package, UpdateRequest::default()).await;
                drop(guard);
                report(&result);
                any_failed |= result.status == UpdateStatus::Failed;
            }
            Err(_) => output::error(&format!("{}: already in flight, skipped", package.display_name())),
        }
    }

    if any_failed {
        std::process::exit(1);
    }
    Ok(())
}

fn report(result: &autoupdater_core::engine::UpdateResult) {
    match result.status {
        UpdateStatus::Success => output::success(&format!("updated to {}", result.version)),
        UpdateStatus::PartialSuccess => output::info(&format!(
            "updated to {} with non-critical health failures",
            result.version
        )),
        UpdateStatus::Failed => {
            let reason = result.error.as_deref().unwrap_or("unknown error");
            output::error(&format!("update failed: {}", reason));
            if result.recovery_performed {
                output::info("the previous version was restored");
            }
        }
    }
}
