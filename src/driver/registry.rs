use crate::driver::traits::DeviceBridge;
use crate::runner::state::Device;
use anyhow::Result;
use std::sync::Arc;

const PROP_MODEL: &str = "ro.product.model";
const PROP_OS_VERSION: &str = "ro.build.version.release";
const PROP_BUILD_ID: &str = "ro.build.display.id";

/// Enumerates attached devices and reads their descriptive properties.
pub struct DeviceRegistry {
    bridge: Arc<dyn DeviceBridge>,
    app_package: String,
}

impl DeviceRegistry {
    pub fn new(bridge: Arc<dyn DeviceBridge>, app_package: impl Into<String>) -> Self {
        Self {
            bridge,
            app_package: app_package.into(),
        }
    }

    /// All online devices whose properties could be read, in bridge order.
    ///
    /// A device whose property query fails is logged and left out.
    pub async fn discover(&self) -> Result<Vec<Device>> {
        let serials = self.bridge.list_serials().await?;
        let mut devices = Vec::with_capacity(serials.len());
        for serial in serials {
            match self.describe(&serial).await {
                Ok(device) => {
                    log::info!("Discovered {}", device.label());
                    devices.push(device);
                }
                Err(e) => log::warn!("Excluding device {}: {:#}", serial, e),
            }
        }
        Ok(devices)
    }

    /// Discover, then keep only the requested serials. Discovery order is
    /// kept so shard numbers follow it. An empty request keeps every device.
    pub async fn select(&self, serials: &[String]) -> Result<Vec<Device>> {
        let devices = self.discover().await?;
        if serials.is_empty() {
            return Ok(devices);
        }
        for serial in serials {
            if !devices.iter().any(|d| &d.serial == serial) {
                log::warn!("Requested device {} is not available", serial);
            }
        }
        Ok(devices
            .into_iter()
            .filter(|d| serials.contains(&d.serial))
            .collect())
    }

    /// True if the app under test is installed on `device`.
    pub async fn check_environment(&self, device: &Device) -> bool {
        match self.bridge.installed_packages(&device.serial).await {
            Ok(packages) => {
                let installed = packages.iter().any(|p| p == &self.app_package);
                if !installed {
                    log::warn!("{} is not installed on {}", self.app_package, device.label());
                }
                installed
            }
            Err(e) => {
                log::warn!("Package query failed on {}: {:#}", device.serial, e);
                false
            }
        }
    }

    async fn describe(&self, serial: &str) -> Result<Device> {
        let model = self.bridge.getprop(serial, PROP_MODEL).await?;
        let os_version = self.bridge.getprop(serial, PROP_OS_VERSION).await?;
        let build_id = self.bridge.getprop(serial, PROP_BUILD_ID).await?;
        let app_version = match self
            .bridge
            .package_version(serial, &self.app_package)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                log::debug!("No version for {} on {}: {:#}", self.app_package, serial, e);
                "unknown".to_string()
            }
        };
        Ok(Device {
            serial: serial.to_string(),
            model,
            os_version,
            build_id,
            app_version,
        })
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory bridge; serials listed in `broken` fail every property query.
    #[derive(Default)]
    pub struct FakeBridge {
        pub serials: Vec<String>,
        pub broken: Vec<String>,
        pub packages: HashMap<String, Vec<String>>,
        pub logcat: Mutex<HashMap<String, String>>,
        pub screencap_fails: bool,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeBridge {
        pub fn with_devices(serials: &[&str]) -> Self {
            Self {
                serials: serials.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl DeviceBridge for FakeBridge {
        async fn list_serials(&self) -> Result<Vec<String>> {
            Ok(self.serials.clone())
        }

        async fn getprop(&self, serial: &str, key: &str) -> Result<String> {
            self.record(format!("getprop {} {}", serial, key));
            if self.broken.iter().any(|s| s == serial) {
                anyhow::bail!("device offline");
            }
            Ok(match key {
                PROP_MODEL => format!("Model-{}", serial),
                PROP_OS_VERSION => "14".to_string(),
                _ => "UP1A.231005".to_string(),
            })
        }

        async fn package_version(&self, _serial: &str, _package: &str) -> Result<String> {
            Ok("25.23.01".to_string())
        }

        async fn installed_packages(&self, serial: &str) -> Result<Vec<String>> {
            Ok(self.packages.get(serial).cloned().unwrap_or_default())
        }

        async fn logcat_dump(&self, serial: &str) -> Result<String> {
            self.record(format!("logcat {}", serial));
            self.logcat
                .lock()
                .unwrap()
                .get(serial)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("logcat unavailable"))
        }

        async fn clear_logcat(&self, serial: &str) -> Result<()> {
            self.record(format!("logcat -c {}", serial));
            if let Some(buffer) = self.logcat.lock().unwrap().get_mut(serial) {
                buffer.clear();
            }
            Ok(())
        }

        async fn screencap(&self, serial: &str) -> Result<Vec<u8>> {
            self.record(format!("screencap {}", serial));
            if self.screencap_fails {
                anyhow::bail!("screencap failed");
            }
            Ok(vec![0x89, b'P', b'N', b'G'])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeBridge;
    use super::*;

    const PACKAGE: &str = "net.cj.cjhv.gs.tving";

    #[tokio::test]
    async fn test_discover_reads_properties() {
        let bridge = FakeBridge::with_devices(&["emulator-5554", "R3CN90"]);
        let registry = DeviceRegistry::new(Arc::new(bridge), PACKAGE);

        let devices = registry.discover().await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].serial, "emulator-5554");
        assert_eq!(devices[0].model, "Model-emulator-5554");
        assert_eq!(devices[0].os_version, "14");
        assert_eq!(devices[1].app_version, "25.23.01");
    }

    #[tokio::test]
    async fn test_discover_excludes_failing_device() {
        let mut bridge = FakeBridge::with_devices(&["good", "bad"]);
        bridge.broken.push("bad".to_string());
        let registry = DeviceRegistry::new(Arc::new(bridge), PACKAGE);

        let devices = registry.discover().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].serial, "good");
    }

    #[tokio::test]
    async fn test_select_keeps_discovery_order() {
        let bridge = FakeBridge::with_devices(&["a", "b", "c"]);
        let registry = DeviceRegistry::new(Arc::new(bridge), PACKAGE);

        let picked = registry
            .select(&["c".to_string(), "missing".to_string(), "a".to_string()])
            .await
            .unwrap();
        let serials: Vec<_> = picked.iter().map(|d| d.serial.as_str()).collect();
        assert_eq!(serials, vec!["a", "c"]);

        assert_eq!(registry.select(&[]).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_check_environment() {
        let mut bridge = FakeBridge::with_devices(&["a", "b"]);
        bridge
            .packages
            .insert("a".to_string(), vec![PACKAGE.to_string()]);
        let registry = DeviceRegistry::new(Arc::new(bridge), PACKAGE);
        let devices = registry.discover().await.unwrap();

        assert!(registry.check_environment(&devices[0]).await);
        assert!(!registry.check_environment(&devices[1]).await);
    }
}
