pub mod adb;

use crate::driver::traits::DeviceBridge;
use anyhow::Result;
use async_trait::async_trait;

/// `DeviceBridge` backed by the adb binary
#[derive(Debug, Clone, Default)]
pub struct AdbBridge;

#[async_trait]
impl DeviceBridge for AdbBridge {
    async fn list_serials(&self) -> Result<Vec<String>> {
        let devices = adb::get_devices().await?;
        for d in devices.iter().filter(|d| !d.is_online()) {
            log::warn!("Ignoring device {} in state '{}'", d.serial, d.state);
        }
        Ok(devices
            .into_iter()
            .filter(|d| d.is_online())
            .map(|d| d.serial)
            .collect())
    }

    async fn getprop(&self, serial: &str, key: &str) -> Result<String> {
        adb::getprop(serial, key).await
    }

    async fn package_version(&self, serial: &str, package: &str) -> Result<String> {
        let dumpsys = adb::shell(serial, &format!("dumpsys package {}", package)).await?;
        adb::parse_version_name(&dumpsys)
            .ok_or_else(|| anyhow::anyhow!("{} is not installed on {}", package, serial))
    }

    async fn installed_packages(&self, serial: &str) -> Result<Vec<String>> {
        let out = adb::shell(serial, "pm list packages").await?;
        Ok(adb::parse_packages(&out))
    }

    async fn logcat_dump(&self, serial: &str) -> Result<String> {
        adb::run(Some(serial), &["logcat", "-v", "time", "-d"]).await
    }

    async fn clear_logcat(&self, serial: &str) -> Result<()> {
        adb::run(Some(serial), &["logcat", "-c"]).await.map(|_| ())
    }

    async fn screencap(&self, serial: &str) -> Result<Vec<u8>> {
        adb::exec_out_binary(serial, "screencap -p").await
    }
}
