use anyhow::Result;
use async_trait::async_trait;

/// Access to attached devices through a device bridge (adb).
///
/// Apart from `clear_logcat`, every call is a query.
#[async_trait]
pub trait DeviceBridge: Send + Sync {
    /// Serials of devices that are online
    async fn list_serials(&self) -> Result<Vec<String>>;

    async fn getprop(&self, serial: &str, key: &str) -> Result<String>;

    /// `versionName` of an installed package
    async fn package_version(&self, serial: &str, package: &str) -> Result<String>;

    async fn installed_packages(&self, serial: &str) -> Result<Vec<String>>;

    /// Snapshot of the device log buffer
    async fn logcat_dump(&self, serial: &str) -> Result<String>;

    /// Empty the device log buffer
    async fn clear_logcat(&self, serial: &str) -> Result<()>;

    /// PNG screenshot
    async fn screencap(&self, serial: &str) -> Result<Vec<u8>>;
}
