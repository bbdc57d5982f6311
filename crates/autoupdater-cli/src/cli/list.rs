use anyhow::Result;

use crate::config::AutoupdaterConfig;
use crate::output;
use crate::runtime::Runtime;

pub async fn run(config: AutoupdaterConfig) -> Result<()> {
    let runtime = Runtime::bootstrap(&config).await?;

    output::header("Packages");
    for package in runtime.registry.all() {
        let check = runtime.reconciler.check(&package.name).await;
        match check {
            Ok(c) => {
                let marker = if c.upgrade_available { "↑" } else { "=" };
                println!(
                    "  {:<20} current {:<10} available {:<10} {}",
                    package.display_name(),
                    c.current_version.to_string(),
                    c.available_version.to_string(),
                    marker
                );
            }
            Err(e) => output::error(&format!("{}: {}", package.display_name(), e)),
        }
    }

    Ok(())
}
