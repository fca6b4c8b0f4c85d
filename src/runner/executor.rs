use super::capture::{CaptureReport, CaptureTarget, TrafficCapture};
use super::diagnostics::{scan_crash_lines, ArtifactKind, DiagnosticHook};
use super::events::{EventEmitter, TestEvent};
use super::output::{determine_status, extract_error_excerpt, Determination, ShardDemux};
use super::state::{
    AttemptStatus, CaseState, Device, ExecutionAttempt, ExecutionMode, FlowDefinition,
};
use super::tool::{AutomationTool, Invocation, ToolOutput};
use crate::parser::PreparedFlow;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Artifact directory for output not attributable to one device
pub const SHARED_DIR: &str = "shared";

/// How one tool invocation ended, before per-device interpretation
enum InvocationResult {
    Completed(ToolOutput),
    TimedOut,
    Errored(String),
}

struct Invoked {
    result: InvocationResult,
    /// Wall-clock moment the tool was started
    started_at: DateTime<Local>,
    elapsed: Duration,
    report: CaptureReport,
}

/// Runs one case at a time across the selected devices.
///
/// Each invocation is bracketed by a capture (if configured): the capture
/// begins before the tool starts and ends after the tool returns, fails or
/// times out.
pub struct ExecutionCoordinator {
    tool: Arc<dyn AutomationTool>,
    capture: Option<Arc<dyn TrafficCapture>>,
    hooks: Vec<Arc<dyn DiagnosticHook>>,
    artifacts_root: PathBuf,
    timeout: Duration,
    emitter: EventEmitter,
}

impl ExecutionCoordinator {
    pub fn new(
        tool: Arc<dyn AutomationTool>,
        artifacts_root: impl Into<PathBuf>,
        timeout: Duration,
        emitter: EventEmitter,
    ) -> Self {
        Self {
            tool,
            capture: None,
            hooks: Vec::new(),
            artifacts_root: artifacts_root.into(),
            timeout,
            emitter,
        }
    }

    pub fn with_capture(mut self, capture: Arc<dyn TrafficCapture>) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn DiagnosticHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn timeout_message(&self) -> String {
        format!("Test timed out (exceeded {}s)", self.timeout.as_secs())
    }

    /// Run `flow` on `devices` and return one attempt per device, in device order.
    pub async fn run_case(
        &mut self,
        flow: &FlowDefinition,
        devices: &[Device],
    ) -> Vec<ExecutionAttempt> {
        if devices.is_empty() {
            log::warn!("TC{}: no devices to run on", flow.case_id);
            return Vec::new();
        }

        let case_id = flow.case_id.as_str();
        let mut state = CaseState::new(case_id);
        state.start();

        let mode = ExecutionMode::for_device_count(devices.len());
        self.emitter.emit(TestEvent::CaseStarted {
            case_id: case_id.to_string(),
            flow_path: flow.path.display().to_string(),
            shards: devices.len(),
        });

        let attempts = match PreparedFlow::prepare(&flow.path) {
            Ok(prepared) => match mode {
                ExecutionMode::Single => {
                    vec![self.run_single(case_id, prepared.path(), &devices[0]).await]
                }
                ExecutionMode::Sharded { shards } => {
                    self.run_sharded(case_id, prepared.path(), devices, shards)
                        .await
                }
            },
            Err(e) => {
                let message = format!(
                    "[exception] cannot prepare {}: {}",
                    flow.path.display(),
                    e
                );
                devices
                    .iter()
                    .map(|device| {
                        let mut attempt = ExecutionAttempt::new(case_id, device);
                        attempt.push_error(&message);
                        attempt.finish(AttemptStatus::Failure, Duration::ZERO);
                        self.emit_attempt(&attempt);
                        attempt
                    })
                    .collect()
            }
        };

        if attempts.iter().any(|a| a.status == AttemptStatus::TimedOut) {
            state.time_out();
        } else if attempts
            .iter()
            .any(|a| a.status == AttemptStatus::Failure && a.exit_code != Some(0))
        {
            state.crash();
        } else {
            state.complete();
        }
        debug_assert!(state.phase.is_terminal());
        log::info!("TC{} ended in phase {:?}", case_id, state.phase);

        attempts
    }

    async fn run_single(&self, case_id: &str, flow: &Path, device: &Device) -> ExecutionAttempt {
        let dir = self.device_dir(&device.serial);
        let target = CaptureTarget::Device(device.serial.clone());
        let invocation = Invocation::single(flow, &device.serial);

        let Invoked {
            result,
            started_at,
            elapsed,
            report,
        } = self
            .invoke(case_id, std::slice::from_ref(device), &target, &dir, &invocation)
            .await;

        let mut attempt = ExecutionAttempt::new(case_id, device);
        attempt.started_at = started_at;
        attempt.api_calls = report.calls;
        attempt.artifacts.capture_dump = report.dump;

        match result {
            InvocationResult::Completed(output) => {
                let combined = output.combined();
                attempt.exit_code = output.exit_code;
                attempt.artifacts.tool_log = write_tool_log(&dir, case_id, &combined);
                let determination = determine_status(None, &combined, output.exit_code);
                self.settle(&mut attempt, determination, &combined, elapsed);
                attempt.raw_output = combined;
            }
            other => {
                self.settle_abnormal(&mut attempt, &other, elapsed);
                attempt.artifacts.tool_log =
                    write_tool_log(&dir, case_id, attempt.error_excerpt.as_deref().unwrap_or(""));
            }
        }

        self.collect_diagnostics(&mut attempt, &dir).await;
        self.emit_attempt(&attempt);
        attempt
    }

    async fn run_sharded(
        &self,
        case_id: &str,
        flow: &Path,
        devices: &[Device],
        shards: usize,
    ) -> Vec<ExecutionAttempt> {
        let shared_dir = self.dated_dir(SHARED_DIR);
        let serials: Vec<String> = devices.iter().map(|d| d.serial.clone()).collect();
        let target = CaptureTarget::Shard(serials.clone());
        let invocation = Invocation::sharded(flow, serials);

        let Invoked {
            result,
            started_at,
            elapsed,
            report,
        } = self
            .invoke(case_id, devices, &target, &shared_dir, &invocation)
            .await;

        let mut attempts: Vec<ExecutionAttempt> = devices
            .iter()
            .map(|d| {
                let mut attempt = ExecutionAttempt::new(case_id, d);
                attempt.started_at = started_at;
                attempt
            })
            .collect();

        // One capture spans all shards; it is recorded once, on the first device.
        if let Some(first) = attempts.first_mut() {
            first.api_calls = report.calls;
            first.artifacts.capture_dump = report.dump;
        }

        match result {
            InvocationResult::Completed(output) => {
                let combined = output.combined();
                let shared_log = write_tool_log(&shared_dir, case_id, &combined);
                // Untagged diagnostics live only in the shared log; it goes out once.
                if let Some(first) = attempts.first_mut() {
                    first.artifacts.shared_log = shared_log.clone();
                }

                let mut demux = ShardDemux::new(shards);
                demux.extend(output.lines.iter().map(String::as_str));
                let global = demux.global_output();
                if !global.is_empty() {
                    log::debug!("TC{} untagged output:\n{}", case_id, global);
                }

                for (index, attempt) in attempts.iter_mut().enumerate() {
                    let shard = index + 1;
                    let own = demux.device_output(shard);
                    // Markers for some shards mean tagging works; judge each device on its own lines.
                    let judged = if demux.has_markers() {
                        own.as_str()
                    } else {
                        combined.as_str()
                    };
                    let determination =
                        determine_status(demux.marker(shard), judged, output.exit_code);

                    attempt.exit_code = output.exit_code;
                    attempt.artifacts.tool_log = if own.is_empty() {
                        shared_log.clone()
                    } else {
                        let dir = self.device_dir(&attempt.device.serial);
                        write_tool_log(&dir, case_id, &own)
                    };
                    self.settle(attempt, determination, judged, elapsed);
                    attempt.raw_output = own;
                }
            }
            other => {
                for attempt in attempts.iter_mut() {
                    self.settle_abnormal(attempt, &other, elapsed);
                }
            }
        }

        for attempt in attempts.iter_mut() {
            let dir = self.device_dir(&attempt.device.serial);
            self.collect_diagnostics(attempt, &dir).await;
            self.emit_attempt(attempt);
        }
        attempts
    }

    /// Hook preparation, capture begin, tool run under the timeout, capture
    /// end. The capture end runs on every path out of the tool call.
    async fn invoke(
        &self,
        case_id: &str,
        devices: &[Device],
        target: &CaptureTarget,
        dir: &Path,
        invocation: &Invocation,
    ) -> Invoked {
        for device in devices {
            for hook in &self.hooks {
                hook.prepare(&device.serial).await;
            }
        }

        let handle = match &self.capture {
            Some(capture) => {
                let dump = dir.join(format!("capture_TC{}.har", case_id));
                match capture.begin(case_id, target, &dump).await {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        log::warn!("TC{}: capture not started: {}", case_id, e);
                        None
                    }
                }
            }
            None => None,
        };

        let started_at = Local::now();
        let started = Instant::now();
        let result = match tokio::time::timeout(self.timeout, self.tool.run(invocation)).await {
            Ok(Ok(output)) => InvocationResult::Completed(output),
            Ok(Err(e)) => InvocationResult::Errored(format!("automation tool failed to run: {}", e)),
            Err(_) => InvocationResult::TimedOut,
        };
        let elapsed = started.elapsed();

        let report = match (&self.capture, handle) {
            (Some(capture), Some(handle)) => capture.end(handle).await,
            _ => CaptureReport::default(),
        };

        Invoked {
            result,
            started_at,
            elapsed,
            report,
        }
    }

    fn settle(
        &self,
        attempt: &mut ExecutionAttempt,
        determination: Determination,
        output: &str,
        elapsed: Duration,
    ) {
        match determination {
            Determination::Passed => attempt.finish(AttemptStatus::Success, elapsed),
            Determination::PassedByExitCode => {
                let message = format!(
                    "TC{} on {}: exit code 0 without a pass marker, counted as success",
                    attempt.case_id, attempt.device.serial
                );
                log::warn!("{}", message);
                self.emitter.warn(message);
                attempt.finish(AttemptStatus::Success, elapsed);
            }
            Determination::Failed => {
                let excerpt = extract_error_excerpt(output);
                if excerpt.is_empty() {
                    attempt.push_error(&format!(
                        "[maestro] exited with code {}",
                        attempt
                            .exit_code
                            .map_or_else(|| "none".to_string(), |c| c.to_string())
                    ));
                } else {
                    attempt.push_error(&excerpt);
                }
                attempt.finish(AttemptStatus::Failure, elapsed);
            }
        }
    }

    fn settle_abnormal(
        &self,
        attempt: &mut ExecutionAttempt,
        result: &InvocationResult,
        elapsed: Duration,
    ) {
        match result {
            InvocationResult::TimedOut => {
                attempt.push_error(&self.timeout_message());
                attempt.finish(AttemptStatus::TimedOut, elapsed);
            }
            InvocationResult::Errored(reason) => {
                attempt.push_error(&format!("[exception] {}", reason));
                attempt.finish(AttemptStatus::Failure, elapsed);
            }
            InvocationResult::Completed(_) => {}
        }
    }

    /// Run diagnostic hooks for a failed or timed-out attempt. Never changes
    /// the attempt status.
    async fn collect_diagnostics(&self, attempt: &mut ExecutionAttempt, dir: &Path) {
        if !attempt.status.is_failure() {
            return;
        }
        for hook in &self.hooks {
            let Some(path) = hook
                .collect(&attempt.device.serial, &attempt.case_id, dir)
                .await
            else {
                continue;
            };
            match hook.kind() {
                ArtifactKind::DeviceLog => {
                    if let Ok(bytes) = std::fs::read(&path) {
                        for line in scan_crash_lines(&String::from_utf8_lossy(&bytes)) {
                            attempt.push_error(&format!("[logcat] {}", line));
                        }
                    }
                    attempt.artifacts.device_log = Some(path);
                }
                ArtifactKind::Screenshot => attempt.artifacts.screenshot = Some(path),
            }
        }
    }

    fn emit_attempt(&self, attempt: &ExecutionAttempt) {
        self.emitter.emit(TestEvent::AttemptFinished {
            case_id: attempt.case_id.clone(),
            device: attempt.device.label(),
            status: attempt.status,
            elapsed_ms: attempt.elapsed_ms,
        });
    }

    /// `<artifacts>/<serial>/<YYYYMMDD>`
    pub fn device_dir(&self, serial: &str) -> PathBuf {
        self.dated_dir(serial)
    }

    fn dated_dir(&self, name: &str) -> PathBuf {
        let dir = self
            .artifacts_root
            .join(name)
            .join(Local::now().format("%Y%m%d").to_string());
        if let Err(e) = std::fs::create_dir_all(&dir) {
            log::warn!("Cannot create artifact directory {}: {}", dir.display(), e);
        }
        dir
    }
}

fn write_tool_log(dir: &Path, case_id: &str, content: &str) -> Option<PathBuf> {
    let path = dir.join(format!("maestro_TC{}.log", case_id));
    match std::fs::write(&path, content) {
        Ok(()) => Some(path),
        Err(e) => {
            log::warn!("Cannot write {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use crate::error::CaptureFault;
    use crate::runner::capture::CaptureHandle;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub type Journal = Arc<Mutex<Vec<String>>>;

    #[derive(Debug, Clone)]
    pub enum Script {
        Output(Vec<&'static str>, i32),
        /// Passes after sleeping this many milliseconds
        Slow(u64),
        Hang,
        SpawnError,
    }

    /// Tool that replays scripted outcomes, passing once the script runs out
    pub struct ScriptedTool {
        pub scripts: Mutex<VecDeque<Script>>,
        pub invocations: Mutex<Vec<Invocation>>,
        pub journal: Journal,
    }

    impl ScriptedTool {
        pub fn new(scripts: Vec<Script>, journal: Journal) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                invocations: Mutex::new(Vec::new()),
                journal,
            }
        }
    }

    #[async_trait]
    impl AutomationTool for ScriptedTool {
        async fn run(&self, invocation: &Invocation) -> std::io::Result<ToolOutput> {
            self.invocations.lock().unwrap().push(invocation.clone());
            self.journal.lock().unwrap().push("tool".to_string());
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Script::Output(vec!["[Passed]"], 0));
            match script {
                Script::Output(lines, code) => Ok(ToolOutput {
                    lines: lines.into_iter().map(String::from).collect(),
                    exit_code: Some(code),
                }),
                Script::Slow(ms) => {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(ToolOutput {
                        lines: vec!["[Passed]".to_string()],
                        exit_code: Some(0),
                    })
                }
                Script::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
                Script::SpawnError => Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "maestro not found",
                )),
            }
        }
    }

    /// Capture that counts begin/end and can refuse to start
    #[derive(Default)]
    pub struct CountingCapture {
        pub begins: AtomicUsize,
        pub ends: AtomicUsize,
        pub refuse_every: Option<usize>,
        pub attempts: AtomicUsize,
        pub journal: Journal,
    }

    #[async_trait]
    impl TrafficCapture for CountingCapture {
        async fn begin(
            &self,
            case_id: &str,
            target: &CaptureTarget,
            dump: &Path,
        ) -> Result<CaptureHandle, CaptureFault> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if self.refuse_every.map_or(false, |k| n % k == 0) {
                return Err(CaptureFault::Binary("injected".to_string()));
            }
            self.begins.fetch_add(1, Ordering::SeqCst);
            self.journal.lock().unwrap().push("capture begin".to_string());
            Ok(CaptureHandle::detached(case_id, target, dump))
        }

        async fn end(&self, handle: CaptureHandle) -> CaptureReport {
            self.ends.fetch_add(1, Ordering::SeqCst);
            self.journal.lock().unwrap().push("capture end".to_string());
            CaptureReport {
                calls: Vec::new(),
                dump: Some(handle.dump.clone()),
            }
        }
    }

    /// Hook recording its invocations; optionally returns nothing
    pub struct RecordingHook {
        pub kind: ArtifactKind,
        pub calls: AtomicUsize,
        pub fails: bool,
        pub content: &'static str,
    }

    impl RecordingHook {
        pub fn new(kind: ArtifactKind) -> Self {
            Self {
                kind,
                calls: AtomicUsize::new(0),
                fails: false,
                content: "",
            }
        }
    }

    #[async_trait]
    impl DiagnosticHook for RecordingHook {
        fn kind(&self) -> ArtifactKind {
            self.kind
        }

        async fn collect(&self, serial: &str, case_id: &str, dir: &Path) -> Option<PathBuf> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fails {
                return None;
            }
            let path = dir.join(format!("{:?}_{}_TC{}", self.kind, serial, case_id));
            std::fs::write(&path, self.content).ok()?;
            Some(path)
        }
    }
}
