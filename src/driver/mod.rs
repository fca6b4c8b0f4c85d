pub mod android;
pub mod registry;
pub mod traits;

use anyhow::Result;
use colored::Colorize;
use registry::DeviceRegistry;

/// Print connected devices with the properties the runner will report
pub async fn list_devices(registry: &DeviceRegistry) -> Result<()> {
    let devices = registry.discover().await?;
    if devices.is_empty() {
        println!("{}", "No online Android devices found".yellow());
        return Ok(());
    }

    println!("{}", "Android devices:".bold());
    for device in &devices {
        let app = if registry.check_environment(device).await {
            device.app_version.green()
        } else {
            "not installed".red()
        };
        println!(
            "  {} {} | Android {} | {} | app {}",
            "•".green(),
            device.serial.cyan(),
            device.os_version,
            device.model,
            app
        );
    }
    Ok(())
}
