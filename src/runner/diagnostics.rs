use crate::driver::traits::DeviceBridge;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Device-log lines that indicate the app crashed or hung
pub const CRASH_KEYWORDS: [&str; 6] = [
    "FATAL EXCEPTION",
    "ANR in",
    "Not responding",
    "Application Not Responding",
    "Input dispatching timed out",
    "java.lang.Exception",
];

/// Crash lines copied into an error excerpt at most
const MAX_CRASH_LINES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    DeviceLog,
    Screenshot,
}

/// Best-effort collection step run after a failed attempt.
///
/// A hook never fails the attempt: every problem is logged and reported as
/// `None`.
#[async_trait]
pub trait DiagnosticHook: Send + Sync {
    fn kind(&self) -> ArtifactKind;

    /// Called for each target device before the tool starts.
    async fn prepare(&self, _serial: &str) {}

    async fn collect(&self, serial: &str, case_id: &str, dir: &Path) -> Option<PathBuf>;
}

/// `logcat -d` snapshot written to `logcat_TC<id>.txt`
pub struct LogcatHook {
    bridge: Arc<dyn DeviceBridge>,
}

impl LogcatHook {
    pub fn new(bridge: Arc<dyn DeviceBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl DiagnosticHook for LogcatHook {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::DeviceLog
    }

    /// Lines left from earlier cases must not show up in this attempt's log.
    async fn prepare(&self, serial: &str) {
        if let Err(e) = self.bridge.clear_logcat(serial).await {
            log::warn!("[{}] logcat clear failed: {:#}", serial, e);
        }
    }

    async fn collect(&self, serial: &str, case_id: &str, dir: &Path) -> Option<PathBuf> {
        let content = match self.bridge.logcat_dump(serial).await {
            Ok(c) => c,
            Err(e) => {
                log::warn!("[{}] logcat snapshot failed: {:#}", serial, e);
                return None;
            }
        };
        let path = dir.join(format!("logcat_TC{}.txt", case_id));
        write_artifact(&path, content.as_bytes())
    }
}

/// PNG screenshot written to `screenshot_TC<id>.png`
pub struct ScreenshotHook {
    bridge: Arc<dyn DeviceBridge>,
}

impl ScreenshotHook {
    pub fn new(bridge: Arc<dyn DeviceBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl DiagnosticHook for ScreenshotHook {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Screenshot
    }

    async fn collect(&self, serial: &str, case_id: &str, dir: &Path) -> Option<PathBuf> {
        let png = match self.bridge.screencap(serial).await {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => {
                log::warn!("[{}] screenshot was empty", serial);
                return None;
            }
            Err(e) => {
                log::warn!("[{}] screenshot failed: {:#}", serial, e);
                return None;
            }
        };
        let path = dir.join(format!("screenshot_TC{}.png", case_id));
        write_artifact(&path, &png)
    }
}

fn write_artifact(path: &Path, bytes: &[u8]) -> Option<PathBuf> {
    if let Some(dir) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(dir) {
            log::warn!("Cannot create {}: {}", dir.display(), e);
            return None;
        }
    }
    match std::fs::write(path, bytes) {
        Ok(()) => Some(path.to_path_buf()),
        Err(e) => {
            log::warn!("Cannot write {}: {}", path.display(), e);
            None
        }
    }
}

/// Crash-indicating lines of a device log, first few only
pub fn scan_crash_lines(device_log: &str) -> Vec<String> {
    device_log
        .lines()
        .filter(|line| CRASH_KEYWORDS.iter().any(|k| line.contains(k)))
        .take(MAX_CRASH_LINES)
        .map(|line| line.trim().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::registry::fake::FakeBridge;
    use tempfile::TempDir;

    #[test]
    fn test_scan_crash_lines() {
        let log = "03-07 10:00:01.000 I/ActivityManager: Start proc\n\
                   03-07 10:00:02.000 E/AndroidRuntime: FATAL EXCEPTION: main\n\
                   03-07 10:00:03.000 E/ActivityManager: ANR in net.cj.cjhv.gs.tving\n";
        let lines = scan_crash_lines(log);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("FATAL EXCEPTION: main"));
    }

    #[tokio::test]
    async fn test_hooks_write_artifacts() {
        let dir = TempDir::new().unwrap();
        let bridge = FakeBridge::with_devices(&["s1"]);
        bridge
            .logcat
            .lock()
            .unwrap()
            .insert("s1".to_string(), "E/AndroidRuntime: FATAL EXCEPTION".to_string());
        let bridge: Arc<dyn DeviceBridge> = Arc::new(bridge);

        let log = LogcatHook::new(bridge.clone())
            .collect("s1", "42", dir.path())
            .await
            .unwrap();
        assert_eq!(log.file_name().unwrap(), "logcat_TC42.txt");

        let shot = ScreenshotHook::new(bridge)
            .collect("s1", "42", dir.path())
            .await
            .unwrap();
        assert_eq!(shot.file_name().unwrap(), "screenshot_TC42.png");
    }

    #[tokio::test]
    async fn test_hook_failures_are_absent_values() {
        let dir = TempDir::new().unwrap();
        let mut bridge = FakeBridge::with_devices(&["s1"]);
        bridge.screencap_fails = true;
        let bridge: Arc<dyn DeviceBridge> = Arc::new(bridge);

        assert!(LogcatHook::new(bridge.clone())
            .collect("s1", "1", dir.path())
            .await
            .is_none());
        assert!(ScreenshotHook::new(bridge)
            .collect("s1", "1", dir.path())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_logcat_prepare_clears_buffer() {
        let dir = TempDir::new().unwrap();
        let bridge = Arc::new(FakeBridge::with_devices(&["s1"]));
        bridge.logcat.lock().unwrap().insert(
            "s1".to_string(),
            "E/AndroidRuntime: FATAL EXCEPTION: main (TC7)".to_string(),
        );
        let hook = LogcatHook::new(bridge.clone());

        hook.prepare("s1").await;
        let log = hook.collect("s1", "8", dir.path()).await.unwrap();

        assert!(scan_crash_lines(&std::fs::read_to_string(log).unwrap()).is_empty());
        assert_eq!(bridge.calls.lock().unwrap()[0], "logcat -c s1");
    }
}
