use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// A connected Android device, read once at discovery time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub serial: String,
    pub model: String,
    pub os_version: String,
    pub build_id: String,
    pub app_version: String,
}

impl Device {
    pub fn label(&self) -> String {
        format!("{} ({})", self.model, self.serial)
    }
}

/// Header fields read from a flow's first YAML document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowMetadata {
    pub app_id: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A runnable flow file resolved for a case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDefinition {
    pub case_id: String,
    pub path: PathBuf,
    pub metadata: Option<FlowMetadata>,
}

/// How one case is dispatched to the automation tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One direct invocation per device
    Single,
    /// One invocation fanned out by the tool across `shards` devices
    Sharded { shards: usize },
}

impl ExecutionMode {
    pub fn for_device_count(count: usize) -> Self {
        if count > 1 {
            ExecutionMode::Sharded { shards: count }
        } else {
            ExecutionMode::Single
        }
    }
}

/// Final status of one (case, device) attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Success,
    Failure,
    TimedOut,
}

impl AttemptStatus {
    pub fn is_failure(&self) -> bool {
        !matches!(self, AttemptStatus::Success)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Success => "success",
            AttemptStatus::Failure => "failure",
            AttemptStatus::TimedOut => "timed_out",
        }
    }
}

/// Lifecycle of one case inside the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CasePhase {
    Pending,
    Running,
    Completed,
    TimedOut,
    Crashed,
}

impl CasePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CasePhase::Completed | CasePhase::TimedOut | CasePhase::Crashed
        )
    }
}

/// Case state machine: `Pending -> Running -> {Completed | TimedOut | Crashed}`
#[derive(Debug, Clone)]
pub struct CaseState {
    pub case_id: String,
    pub phase: CasePhase,
}

impl CaseState {
    pub fn new(case_id: &str) -> Self {
        Self {
            case_id: case_id.to_string(),
            phase: CasePhase::Pending,
        }
    }

    pub fn start(&mut self) -> bool {
        self.advance(CasePhase::Pending, CasePhase::Running)
    }

    pub fn complete(&mut self) -> bool {
        self.advance(CasePhase::Running, CasePhase::Completed)
    }

    pub fn time_out(&mut self) -> bool {
        self.advance(CasePhase::Running, CasePhase::TimedOut)
    }

    pub fn crash(&mut self) -> bool {
        self.advance(CasePhase::Running, CasePhase::Crashed)
    }

    fn advance(&mut self, from: CasePhase, to: CasePhase) -> bool {
        if self.phase != from {
            log::debug!(
                "TC{}: ignoring transition {:?} -> {:?} from {:?}",
                self.case_id,
                from,
                to,
                self.phase
            );
            return false;
        }
        self.phase = to;
        true
    }
}

/// Files produced around one attempt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptArtifacts {
    pub tool_log: Option<PathBuf>,
    pub screenshot: Option<PathBuf>,
    pub device_log: Option<PathBuf>,
    pub capture_dump: Option<PathBuf>,
    /// Full output of a sharded invocation, set on the first device only
    #[serde(default)]
    pub shared_log: Option<PathBuf>,
}

impl AttemptArtifacts {
    pub fn paths(&self) -> Vec<PathBuf> {
        [
            &self.tool_log,
            &self.screenshot,
            &self.device_log,
            &self.capture_dump,
            &self.shared_log,
        ]
        .into_iter()
        .flatten()
        .cloned()
        .collect()
    }
}

/// One HTTP exchange recorded by the capture proxy during an attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedApiCall {
    pub case_id: String,
    pub serial: String,
    pub url: String,
    pub method: String,
    pub status_code: Option<u16>,
    pub elapsed_ms: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub request_snippet: Option<String>,
    pub response_snippet: Option<String>,
}

impl CapturedApiCall {
    pub fn is_error(&self) -> bool {
        self.status_code.map_or(true, |code| code >= 400)
    }
}

/// Result of running one case on one device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionAttempt {
    pub case_id: String,
    pub device: Device,
    pub status: AttemptStatus,
    pub exit_code: Option<i32>,
    pub elapsed_ms: u64,
    pub started_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
    #[serde(skip)]
    pub raw_output: String,
    pub error_excerpt: Option<String>,
    pub artifacts: AttemptArtifacts,
    pub api_calls: Vec<CapturedApiCall>,
}

impl ExecutionAttempt {
    /// A new attempt starts pessimistically as a failure until a verdict is set.
    pub fn new(case_id: &str, device: &Device) -> Self {
        Self {
            case_id: case_id.to_string(),
            device: device.clone(),
            status: AttemptStatus::Failure,
            exit_code: None,
            elapsed_ms: 0,
            started_at: Local::now(),
            finished_at: None,
            raw_output: String::new(),
            error_excerpt: None,
            artifacts: AttemptArtifacts::default(),
            api_calls: Vec::new(),
        }
    }

    pub fn finish(&mut self, status: AttemptStatus, elapsed: Duration) {
        self.status = status;
        self.elapsed_ms = elapsed.as_millis() as u64;
        self.finished_at = Some(Local::now());
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed_ms as f64 / 1000.0
    }

    /// Append a line to the error excerpt
    pub fn push_error(&mut self, line: &str) {
        match &mut self.error_excerpt {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(line);
            }
            None => self.error_excerpt = Some(line.to_string()),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_state_transitions() {
        let mut state = CaseState::new("314800");
        assert!(!state.complete());
        assert!(state.start());
        assert!(!state.start());
        assert!(state.time_out());
        assert!(state.phase.is_terminal());
        assert!(!state.crash());
        assert_eq!(state.phase, CasePhase::TimedOut);
    }

    #[test]
    fn test_execution_mode_from_device_count() {
        assert_eq!(ExecutionMode::for_device_count(1), ExecutionMode::Single);
        assert_eq!(
            ExecutionMode::for_device_count(3),
            ExecutionMode::Sharded { shards: 3 }
        );
    }

    #[test]
    fn test_attempt_error_excerpt_accumulates() {
        let device = fixtures::device("emulator-5554", "Pixel 7");
        let mut attempt = ExecutionAttempt::new("1", &device);
        assert_eq!(attempt.status, AttemptStatus::Failure);
        attempt.push_error("[maestro] Element not found");
        attempt.push_error("[logcat] FATAL EXCEPTION: main");
        assert_eq!(
            attempt.error_excerpt.as_deref(),
            Some("[maestro] Element not found\n[logcat] FATAL EXCEPTION: main")
        );
    }

    #[test]
    fn test_artifact_paths_skip_missing() {
        let artifacts = AttemptArtifacts {
            tool_log: Some(PathBuf::from("a.log")),
            capture_dump: Some(PathBuf::from("c.har")),
            ..Default::default()
        };
        assert_eq!(
            artifacts.paths(),
            vec![PathBuf::from("a.log"), PathBuf::from("c.har")]
        );
    }
}
