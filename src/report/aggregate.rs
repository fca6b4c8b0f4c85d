use super::classify::classify_attempts;
use super::types::CaseOutcome;
use crate::runner::state::{AttemptStatus, ExecutionAttempt};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::{Path, PathBuf};

/// Attachments uploaded as images; everything else is a log
pub const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "mp4"];

/// Final, immutable result of one case across all devices
#[derive(Debug, Clone)]
pub struct CaseVerdict {
    pub case_id: String,
    pub outcome: CaseOutcome,
    pub attempts: Vec<ExecutionAttempt>,
    pub comment: String,
    pub images: Vec<PathBuf>,
    pub logs: Vec<PathBuf>,
}

impl CaseVerdict {
    pub fn is_failure(&self) -> bool {
        self.outcome.is_failure()
    }

    /// Longest attempt; devices run side by side
    pub fn duration_ms(&self) -> u64 {
        self.attempts.iter().map(|a| a.elapsed_ms).max().unwrap_or(0)
    }
}

pub struct ResultAggregator;

impl ResultAggregator {
    /// Reduce per-device attempts to one verdict. Any failed or timed-out
    /// attempt fails the case.
    pub fn aggregate(case_id: &str, attempts: Vec<ExecutionAttempt>) -> CaseVerdict {
        let outcome = reduce(&attempts);
        let comment = render_comment(case_id, outcome, &attempts);

        let mut images = Vec::new();
        let mut logs = Vec::new();
        for path in attempts.iter().flat_map(|a| a.artifacts.paths()) {
            let bucket = if is_image(&path) { &mut images } else { &mut logs };
            if !bucket.contains(&path) {
                bucket.push(path);
            }
        }

        CaseVerdict {
            case_id: case_id.to_string(),
            outcome,
            attempts,
            comment,
            images,
            logs,
        }
    }
}

fn reduce(attempts: &[ExecutionAttempt]) -> CaseOutcome {
    if attempts.is_empty() {
        return CaseOutcome::Skipped;
    }
    let failed: Vec<_> = attempts.iter().filter(|a| a.status.is_failure()).collect();
    if failed.is_empty() {
        CaseOutcome::Success
    } else if failed.iter().all(|a| a.status == AttemptStatus::TimedOut) {
        CaseOutcome::TimedOut
    } else {
        CaseOutcome::Failure
    }
}

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |ext| {
            IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
        })
}

fn status_label(status: AttemptStatus) -> &'static str {
    match status {
        AttemptStatus::Success => "PASS",
        AttemptStatus::Failure => "FAIL",
        AttemptStatus::TimedOut => "TIMEOUT",
    }
}

fn render_comment(case_id: &str, outcome: CaseOutcome, attempts: &[ExecutionAttempt]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "[TC{}] {} on {} device(s)",
        case_id,
        outcome.as_str().to_uppercase(),
        attempts.len()
    );
    for a in attempts {
        let _ = writeln!(
            out,
            "{} | {} | {} | Android {} | app {} | {:.1}s",
            status_label(a.status),
            a.device.model,
            a.device.serial,
            a.device.os_version,
            a.device.app_version,
            a.elapsed_secs()
        );
    }

    if outcome.is_failure() {
        let sections = classify_attempts(attempts);
        if !sections.is_empty() {
            let _ = writeln!(out, "\nErrors:");
            for (category, lines) in &sections {
                let _ = writeln!(out, "[{}]", category.title());
                for line in lines {
                    let _ = writeln!(out, "  {}", line);
                }
            }
        }

        let stats = api_stats(attempts);
        if !stats.is_empty() {
            let _ = writeln!(out, "\nAPI calls:");
            for (source, s) in &stats {
                let _ = writeln!(
                    out,
                    "  {}: {} call(s), avg {:.0}ms, {} failed",
                    source, s.count, s.avg_ms, s.failures
                );
            }
        }
    }

    out.trim_end().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApiStats {
    pub count: usize,
    pub avg_ms: f64,
    pub failures: usize,
}

/// Call statistics keyed by the capture's device label
pub fn api_stats(attempts: &[ExecutionAttempt]) -> BTreeMap<String, ApiStats> {
    let mut grouped: BTreeMap<String, Vec<&crate::runner::state::CapturedApiCall>> =
        BTreeMap::new();
    for call in attempts.iter().flat_map(|a| a.api_calls.iter()) {
        grouped.entry(call.serial.clone()).or_default().push(call);
    }

    grouped
        .into_iter()
        .map(|(source, calls)| {
            let timings: Vec<f64> = calls.iter().filter_map(|c| c.elapsed_ms).collect();
            let avg_ms = if timings.is_empty() {
                0.0
            } else {
                timings.iter().sum::<f64>() / timings.len() as f64
            };
            let stats = ApiStats {
                count: calls.len(),
                avg_ms,
                failures: calls.iter().filter(|c| c.is_error()).count(),
            };
            (source, stats)
        })
        .collect()
}
