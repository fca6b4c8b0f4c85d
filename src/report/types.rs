use crate::runner::state::ExecutionAttempt;
use serde::{Deserialize, Serialize};

/// Verdict code surfaced per case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseOutcome {
    Success,
    Failure,
    Skipped,
    TimedOut,
}

impl CaseOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseOutcome::Success => "success",
            CaseOutcome::Failure => "failure",
            CaseOutcome::Skipped => "skipped",
            CaseOutcome::TimedOut => "timed_out",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, CaseOutcome::Failure | CaseOutcome::TimedOut)
    }
}

/// One case as it appears in the batch report
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseRecord {
    pub case_id: String,
    pub title: Option<String>,
    pub flow_path: Option<String>,
    pub outcome: CaseOutcome,
    pub duration_ms: u64,
    pub message: Option<String>,
    pub result_id: Option<u64>,
    #[serde(default)]
    pub attempts: Vec<ExecutionAttempt>,
}

impl CaseRecord {
    pub fn skipped(case_id: &str, reason: String) -> Self {
        Self {
            case_id: case_id.to_string(),
            title: None,
            flow_path: None,
            outcome: CaseOutcome::Skipped,
            duration_ms: 0,
            message: Some(reason),
            result_id: None,
            attempts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub run_id: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub skipped: usize,
    pub duration_ms: u64,
}

impl BatchSummary {
    pub fn from_cases(run_id: &str, cases: &[CaseRecord], duration_ms: u64) -> Self {
        let count = |o: CaseOutcome| cases.iter().filter(|c| c.outcome == o).count();
        Self {
            run_id: run_id.to_string(),
            total: cases.len(),
            passed: count(CaseOutcome::Success),
            failed: count(CaseOutcome::Failure),
            timed_out: count(CaseOutcome::TimedOut),
            skipped: count(CaseOutcome::Skipped),
            duration_ms,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed + self.timed_out > 0
    }
}

/// Batch results for report generation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub run_id: String,
    pub cases: Vec<CaseRecord>,
    pub summary: BatchSummary,
    pub generated_at: String,
}
