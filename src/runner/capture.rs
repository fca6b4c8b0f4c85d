//! Per-attempt network capture.
//!
//! A capture is begun before the automation tool starts and ended after it
//! finishes or times out. `end` consumes the handle so it runs at most once;
//! a handle dropped without `end` kills its process.

use super::output::truncate_chars;
use super::state::CapturedApiCall;
use crate::error::CaptureFault;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

const SNIPPET_LIMIT: usize = 300;

/// Device(s) whose traffic a capture is attributed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureTarget {
    Device(String),
    /// One capture spanning a sharded invocation; calls cannot be told apart
    /// per device
    Shard(Vec<String>),
}

impl CaptureTarget {
    /// Value written to `CapturedApiCall::serial`
    pub fn label(&self) -> String {
        match self {
            CaptureTarget::Device(serial) => serial.clone(),
            CaptureTarget::Shard(serials) => format!("shard[{}]", serials.join(",")),
        }
    }
}

/// A running capture
#[derive(Debug)]
pub struct CaptureHandle {
    pub case_id: String,
    pub target: CaptureTarget,
    pub started_at: DateTime<Utc>,
    pub dump: PathBuf,
    child: Option<Child>,
}

impl CaptureHandle {
    /// Handle without a backing process
    pub fn detached(case_id: &str, target: &CaptureTarget, dump: &Path) -> Self {
        Self {
            case_id: case_id.to_string(),
            target: target.clone(),
            started_at: Utc::now(),
            dump: dump.to_path_buf(),
            child: None,
        }
    }

    fn take_child(&mut self) -> Option<Child> {
        self.child.take()
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            log::warn!("Capture for TC{} dropped without teardown, killing", self.case_id);
            let _ = child.start_kill();
        }
    }
}

/// What a finished capture produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureReport {
    pub calls: Vec<CapturedApiCall>,
    /// Present only when the dump was written and parsed
    pub dump: Option<PathBuf>,
}

#[async_trait]
pub trait TrafficCapture: Send + Sync {
    async fn begin(
        &self,
        case_id: &str,
        target: &CaptureTarget,
        dump: &Path,
    ) -> Result<CaptureHandle, CaptureFault>;

    /// Never fails: problems are logged and yield an empty report.
    async fn end(&self, handle: CaptureHandle) -> CaptureReport;
}

/// mitmdump writing a HAR file
#[derive(Debug, Clone)]
pub struct MitmCapture {
    binary: PathBuf,
    port: u16,
    warmup: Duration,
    grace: Duration,
    domain: Option<String>,
}

impl MitmCapture {
    pub fn new(
        binary: PathBuf,
        port: u16,
        warmup: Duration,
        grace: Duration,
        domain: Option<String>,
    ) -> Self {
        Self {
            binary,
            port,
            warmup,
            grace,
            domain,
        }
    }

    fn args(&self, dump: &Path) -> Vec<String> {
        vec![
            "--listen-port".to_string(),
            self.port.to_string(),
            "--set".to_string(),
            format!("hardump={}", dump.display()),
        ]
    }

    async fn stop(&self, child: &mut Child) {
        if let Some(pid) = child.id() {
            // SIGINT lets mitmdump flush the HAR before exiting
            #[cfg(unix)]
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGINT);
            }
            #[cfg(not(unix))]
            let _ = pid;
        }

        match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(Ok(status)) => log::debug!("mitmdump exited: {}", status),
            Ok(Err(e)) => log::warn!("Waiting for mitmdump failed: {}", e),
            Err(_) => {
                log::warn!("mitmdump did not exit within {:?}, killing", self.grace);
                if let Err(e) = child.kill().await {
                    log::warn!("Failed to kill mitmdump: {}", e);
                }
            }
        }
    }
}

#[async_trait]
impl TrafficCapture for MitmCapture {
    async fn begin(
        &self,
        case_id: &str,
        target: &CaptureTarget,
        dump: &Path,
    ) -> Result<CaptureHandle, CaptureFault> {
        if let Some(dir) = dump.parent() {
            std::fs::create_dir_all(dir).map_err(CaptureFault::Spawn)?;
        }
        // A stale dump from an earlier run would leak old calls into this one.
        let _ = std::fs::remove_file(dump);

        let mut child = Command::new(&self.binary)
            .args(self.args(dump))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(CaptureFault::Spawn)?;

        tokio::time::sleep(self.warmup).await;

        if let Ok(Some(status)) = child.try_wait() {
            return Err(CaptureFault::Spawn(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("mitmdump exited during warm-up ({})", status),
            )));
        }

        log::debug!(
            "Capture started for TC{} on port {} -> {}",
            case_id,
            self.port,
            dump.display()
        );
        let mut handle = CaptureHandle::detached(case_id, target, dump);
        handle.child = Some(child);
        Ok(handle)
    }

    async fn end(&self, mut handle: CaptureHandle) -> CaptureReport {
        let ended_at = Utc::now();
        if let Some(mut child) = handle.take_child() {
            self.stop(&mut child).await;
        }

        match read_har(&handle.dump) {
            Ok(har) => {
                let calls = har_calls(
                    &har,
                    &handle.case_id,
                    &handle.target.label(),
                    (handle.started_at, ended_at),
                    self.domain.as_deref(),
                );
                log::debug!("TC{}: {} API call(s) captured", handle.case_id, calls.len());
                CaptureReport {
                    calls,
                    dump: Some(handle.dump.clone()),
                }
            }
            Err(fault) => {
                log::warn!("TC{}: {}", handle.case_id, fault);
                CaptureReport::default()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Har {
    pub log: HarLog,
}

#[derive(Debug, Deserialize)]
pub struct HarLog {
    #[serde(default)]
    pub entries: Vec<HarEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarEntry {
    pub started_date_time: String,
    /// Total elapsed milliseconds
    #[serde(default)]
    pub time: Option<f64>,
    pub request: HarRequest,
    #[serde(default)]
    pub response: Option<HarResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub post_data: Option<HarBody>,
}

#[derive(Debug, Deserialize)]
pub struct HarResponse {
    pub status: i64,
    #[serde(default)]
    pub content: Option<HarBody>,
}

#[derive(Debug, Deserialize)]
pub struct HarBody {
    #[serde(default)]
    pub text: Option<String>,
}

pub fn read_har(path: &Path) -> Result<Har, CaptureFault> {
    let content = std::fs::read_to_string(path).map_err(|e| CaptureFault::Dump {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&content).map_err(|e| CaptureFault::Dump {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Entries inside `window` whose URL contains `domain`, as call records
pub fn har_calls(
    har: &Har,
    case_id: &str,
    serial: &str,
    window: (DateTime<Utc>, DateTime<Utc>),
    domain: Option<&str>,
) -> Vec<CapturedApiCall> {
    let (from, to) = window;
    har.log
        .entries
        .iter()
        .filter(|e| domain.map_or(true, |d| e.request.url.contains(d)))
        .filter_map(|e| {
            let started_at = DateTime::parse_from_rfc3339(&e.started_date_time)
                .ok()?
                .with_timezone(&Utc);
            if started_at < from || started_at > to {
                return None;
            }
            let status_code = e
                .response
                .as_ref()
                .and_then(|r| u16::try_from(r.status).ok())
                .filter(|s| *s > 0);
            Some(CapturedApiCall {
                case_id: case_id.to_string(),
                serial: serial.to_string(),
                url: e.request.url.clone(),
                method: e.request.method.clone(),
                status_code,
                elapsed_ms: e.time,
                started_at,
                request_snippet: snippet(e.request.post_data.as_ref()),
                response_snippet: snippet(e.response.as_ref().and_then(|r| r.content.as_ref())),
            })
        })
        .collect()
}

fn snippet(body: Option<&HarBody>) -> Option<String> {
    body.and_then(|b| b.text.as_deref())
        .filter(|t| !t.is_empty())
        .map(|t| truncate_chars(t, SNIPPET_LIMIT))
}
