pub mod testrail;

use crate::error::UploadFault;
use crate::report::aggregate::CaseVerdict;
use crate::report::types::CaseOutcome;
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

pub use testrail::TestRailClient;

pub type ResultId = u64;

/// TestRail status ids
pub const STATUS_PASSED: u8 = 1;
pub const STATUS_FAILED: u8 = 5;

/// Body of one result submission
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultPayload {
    pub status_id: u8,
    pub comment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Test-management system receiving verdicts
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn add_result(&self, case_id: &str, payload: &ResultPayload)
        -> Result<ResultId, UploadFault>;

    async fn add_attachment(&self, result_id: ResultId, path: &Path) -> Result<(), UploadFault>;
}

/// Maps a verdict outcome to a status id. Skipped cases are not submitted.
pub fn status_id(outcome: CaseOutcome) -> Option<u8> {
    match outcome {
        CaseOutcome::Success => Some(STATUS_PASSED),
        CaseOutcome::Failure | CaseOutcome::TimedOut => Some(STATUS_FAILED),
        CaseOutcome::Skipped => None,
    }
}

/// Files verdicts upstream. Faults are logged here and handed back to the
/// caller as values.
pub struct UploadPipeline {
    sink: Arc<dyn ResultSink>,
}

impl UploadPipeline {
    pub fn new(sink: Arc<dyn ResultSink>) -> Self {
        Self { sink }
    }

    pub fn payload(verdict: &CaseVerdict, status_id: u8) -> ResultPayload {
        let secs = verdict.duration_ms() / 1000;
        ResultPayload {
            status_id,
            comment: verdict.comment.clone(),
            // TestRail rejects a zero timespan
            elapsed: (secs > 0).then(|| format!("{}s", secs)),
            version: verdict.attempts.first().map(|a| a.device.app_version.clone()),
        }
    }

    /// Submit the result, then its attachments: logs always, images only
    /// for failed verdicts. A failed attachment is logged and skipped.
    pub async fn submit(&self, verdict: &CaseVerdict) -> Result<ResultId, UploadFault> {
        let status = status_id(verdict.outcome).ok_or_else(|| {
            UploadFault::NotConfigured(format!("TC{} was skipped", verdict.case_id))
        })?;
        let payload = Self::payload(verdict, status);

        let result_id = match self.sink.add_result(&verdict.case_id, &payload).await {
            Ok(id) => id,
            Err(e) => {
                log::error!("TC{}: result upload failed: {}", verdict.case_id, e);
                return Err(e);
            }
        };
        log::info!("TC{}: result {} recorded", verdict.case_id, result_id);

        let images: &[_] = if verdict.is_failure() {
            &verdict.images
        } else {
            &[]
        };
        for path in verdict.logs.iter().chain(images.iter()) {
            match self.sink.add_attachment(result_id, path).await {
                Ok(()) => log::debug!("Attached {}", path.display()),
                Err(e) => log::warn!("TC{}: attachment skipped: {}", verdict.case_id, e),
            }
        }

        Ok(result_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::aggregate::ResultAggregator;
    use crate::runner::state::{fixtures, AttemptStatus};
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        results: Mutex<Vec<(String, ResultPayload)>>,
        attachments: Mutex<Vec<PathBuf>>,
        reject_results: bool,
        broken_attachment: Option<PathBuf>,
    }

    #[async_trait]
    impl ResultSink for RecordingSink {
        async fn add_result(
            &self,
            case_id: &str,
            payload: &ResultPayload,
        ) -> Result<ResultId, UploadFault> {
            if self.reject_results {
                return Err(UploadFault::Rejected {
                    status: 400,
                    body: "Field :case_id is not a valid test case".to_string(),
                });
            }
            self.results
                .lock()
                .unwrap()
                .push((case_id.to_string(), payload.clone()));
            Ok(1001)
        }

        async fn add_attachment(
            &self,
            _result_id: ResultId,
            path: &Path,
        ) -> Result<(), UploadFault> {
            if self.broken_attachment.as_deref() == Some(path) {
                return Err(UploadFault::Attachment {
                    path: path.to_path_buf(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
                });
            }
            self.attachments.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }
    }

    fn verdict(status: AttemptStatus) -> CaseVerdict {
        let device = fixtures::device("s1", "Pixel 7");
        let mut attempt = fixtures::attempt("314800", &device, status);
        attempt.artifacts.tool_log = Some(PathBuf::from("maestro_TC314800.log"));
        attempt.artifacts.device_log = Some(PathBuf::from("logcat_TC314800.txt"));
        attempt.artifacts.screenshot = Some(PathBuf::from("screenshot_TC314800.png"));
        ResultAggregator::aggregate("314800", vec![attempt])
    }

    #[tokio::test]
    async fn test_passing_verdict_attaches_logs_only() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = UploadPipeline::new(sink.clone());

        let id = pipeline.submit(&verdict(AttemptStatus::Success)).await.unwrap();
        assert_eq!(id, 1001);

        let results = sink.results.lock().unwrap();
        assert_eq!(results[0].0, "314800");
        assert_eq!(results[0].1.status_id, STATUS_PASSED);
        assert_eq!(results[0].1.elapsed.as_deref(), Some("12s"));
        assert_eq!(results[0].1.version.as_deref(), Some("25.23.01"));
        assert_eq!(
            *sink.attachments.lock().unwrap(),
            vec![
                PathBuf::from("maestro_TC314800.log"),
                PathBuf::from("logcat_TC314800.txt")
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_attachment_is_skipped() {
        let sink = Arc::new(RecordingSink {
            broken_attachment: Some(PathBuf::from("logcat_TC314800.txt")),
            ..Default::default()
        });
        let pipeline = UploadPipeline::new(sink.clone());

        let id = pipeline.submit(&verdict(AttemptStatus::Failure)).await.unwrap();
        assert_eq!(id, 1001);
        assert_eq!(sink.results.lock().unwrap()[0].1.status_id, STATUS_FAILED);
        assert_eq!(
            *sink.attachments.lock().unwrap(),
            vec![
                PathBuf::from("maestro_TC314800.log"),
                PathBuf::from("screenshot_TC314800.png")
            ]
        );
    }

    #[tokio::test]
    async fn test_rejected_result_is_returned_not_raised() {
        let sink = Arc::new(RecordingSink {
            reject_results: true,
            ..Default::default()
        });
        let pipeline = UploadPipeline::new(sink.clone());

        let err = pipeline
            .submit(&verdict(AttemptStatus::TimedOut))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadFault::Rejected { status: 400, .. }));
        assert!(sink.attachments.lock().unwrap().is_empty());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_id(CaseOutcome::Success), Some(1));
        assert_eq!(status_id(CaseOutcome::Failure), Some(5));
        assert_eq!(status_id(CaseOutcome::TimedOut), Some(5));
        assert_eq!(status_id(CaseOutcome::Skipped), None);
    }
}
