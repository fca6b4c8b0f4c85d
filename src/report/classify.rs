use crate::runner::state::ExecutionAttempt;
use std::collections::BTreeMap;

/// Source of an error line, in report order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCategory {
    AutomationTool,
    DeviceLog,
    Api,
    Timeout,
    Exception,
}

const TAGGED: [ErrorCategory; 5] = [
    ErrorCategory::AutomationTool,
    ErrorCategory::DeviceLog,
    ErrorCategory::Api,
    ErrorCategory::Timeout,
    ErrorCategory::Exception,
];

impl ErrorCategory {
    pub fn tag(&self) -> &'static str {
        match self {
            ErrorCategory::AutomationTool => "[maestro]",
            ErrorCategory::DeviceLog => "[logcat]",
            ErrorCategory::Api => "[api]",
            ErrorCategory::Timeout => "[timeout]",
            ErrorCategory::Exception => "[exception]",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ErrorCategory::AutomationTool => "Maestro",
            ErrorCategory::DeviceLog => "Device log",
            ErrorCategory::Api => "Network/API",
            ErrorCategory::Timeout => "Timeout",
            ErrorCategory::Exception => "Exception",
        }
    }
}

/// Classify an error line by its source tag. Untagged lines are automation
/// tool output unless they report a timeout.
pub fn classify(line: &str) -> ErrorCategory {
    if let Some(category) = TAGGED.into_iter().find(|c| line.contains(c.tag())) {
        return category;
    }
    if line.contains("timed out") {
        ErrorCategory::Timeout
    } else {
        ErrorCategory::AutomationTool
    }
}

fn strip_tag(line: &str, category: ErrorCategory) -> &str {
    line.trim()
        .strip_prefix(category.tag())
        .map(str::trim_start)
        .unwrap_or_else(|| line.trim())
}

/// Error lines of failed attempts plus failed API calls, grouped by source.
/// Each entry is prefixed with the device label.
pub fn classify_attempts(attempts: &[ExecutionAttempt]) -> BTreeMap<ErrorCategory, Vec<String>> {
    let mut sections: BTreeMap<ErrorCategory, Vec<String>> = BTreeMap::new();

    for attempt in attempts {
        let label = attempt.device.label();
        if attempt.status.is_failure() {
            for line in attempt
                .error_excerpt
                .as_deref()
                .unwrap_or("")
                .lines()
                .filter(|l| !l.trim().is_empty())
            {
                let category = classify(line);
                sections
                    .entry(category)
                    .or_default()
                    .push(format!("{}: {}", label, strip_tag(line, category)));
            }
        }

        for call in attempt.api_calls.iter().filter(|c| c.is_error()) {
            let status = call
                .status_code
                .map_or_else(|| "no response".to_string(), |s| s.to_string());
            sections
                .entry(ErrorCategory::Api)
                .or_default()
                .push(format!("{}: {} {} -> {}", label, call.method, call.url, status));
        }
    }

    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::state::{fixtures, AttemptStatus, CapturedApiCall};
    use chrono::Utc;

    #[test]
    fn test_classify_by_tag_then_keyword() {
        assert_eq!(classify("[logcat] FATAL EXCEPTION: main"), ErrorCategory::DeviceLog);
        assert_eq!(classify("[exception] maestro not found"), ErrorCategory::Exception);
        assert_eq!(classify("Test timed out (exceeded 300s)"), ErrorCategory::Timeout);
        assert_eq!(classify("Element not found: Login"), ErrorCategory::AutomationTool);
        // First tag in order wins
        assert_eq!(
            classify("[maestro] wrapped [exception]"),
            ErrorCategory::AutomationTool
        );
    }

    #[test]
    fn test_classify_attempts_groups_by_source() {
        let device = fixtures::device("s1", "Pixel 7");
        let mut failed = fixtures::attempt("9", &device, AttemptStatus::Failure);
        failed.push_error("Assertion is false");
        failed.push_error("[logcat] ANR in net.cj.cjhv.gs.tving");
        failed.api_calls.push(CapturedApiCall {
            case_id: "9".to_string(),
            serial: "s1".to_string(),
            url: "https://api.tving.com/v2/login".to_string(),
            method: "POST".to_string(),
            status_code: Some(503),
            elapsed_ms: Some(20.0),
            started_at: Utc::now(),
            request_snippet: None,
            response_snippet: None,
        });

        let sections = classify_attempts(&[failed]);
        assert_eq!(
            sections[&ErrorCategory::AutomationTool],
            vec!["Pixel 7 (s1): Assertion is false"]
        );
        assert_eq!(
            sections[&ErrorCategory::DeviceLog],
            vec!["Pixel 7 (s1): ANR in net.cj.cjhv.gs.tving"]
        );
        assert_eq!(
            sections[&ErrorCategory::Api],
            vec!["Pixel 7 (s1): POST https://api.tving.com/v2/login -> 503"]
        );
    }
}
