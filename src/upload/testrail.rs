use super::{ResultId, ResultPayload, ResultSink};
use crate::error::UploadFault;
use crate::utils::config::TestRailConfig;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

/// Case assigned to a TestRail run
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunTest {
    pub case_id: u64,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    #[serde(default)]
    next: Option<String>,
}

/// `get_tests` answers with a bare list on older servers and a paginated
/// object (250 tests per page) on newer ones.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TestsResponse {
    Paged {
        tests: Vec<RunTest>,
        #[serde(rename = "_links", default)]
        links: Links,
    },
    Bare(Vec<RunTest>),
}

impl TestsResponse {
    /// Tests of this page and the link to the next one
    fn into_page(self) -> (Vec<RunTest>, Option<String>) {
        match self {
            TestsResponse::Paged { tests, links } => (tests, links.next),
            TestsResponse::Bare(tests) => (tests, None),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Created {
    id: ResultId,
}

/// TestRail API v2 client (basic auth with user + API key)
#[derive(Debug, Clone)]
pub struct TestRailClient {
    client: reqwest::Client,
    base_url: String,
    username: String,
    api_key: String,
    run_id: u64,
}

impl TestRailClient {
    pub fn new(config: &TestRailConfig) -> Result<Self, UploadFault> {
        if !config.is_complete() {
            return Err(UploadFault::NotConfigured(
                "url, username and apiKey are required".to_string(),
            ));
        }
        let run_id = config
            .run_id
            .ok_or_else(|| UploadFault::NotConfigured("runId is required".to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            api_key: config.api_key.clone(),
            run_id,
        })
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn endpoint(&self, method: &str) -> String {
        format!("{}/index.php?/api/v2/{}", self.base_url, method)
    }

    /// Absolute URL of a `_links.next` value such as
    /// `/api/v2/get_tests/812&limit=250&offset=250`
    pub fn page_url(&self, next: &str) -> String {
        format!("{}/index.php?/{}", self.base_url, next.trim_start_matches('/'))
    }

    /// Cases of the configured run, in TestRail order, across all pages
    pub async fn get_tests(&self) -> Result<Vec<RunTest>, UploadFault> {
        let first = self.endpoint(&format!("get_tests/{}", self.run_id));
        let tests = collect_pages(first, |next| self.page_url(next), |url| self.get(url)).await?;
        log::debug!("TestRail run {}: {} test(s)", self.run_id, tests.len());
        Ok(tests)
    }

    async fn get(&self, url: String) -> Result<String, UploadFault> {
        let resp = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.api_key))
            .send()
            .await?;
        checked(resp).await
    }
}

/// Fetch `first`, then every `_links.next` page, until a page has no next
/// link or no tests.
async fn collect_pages<U, F, Fut>(
    first: String,
    page_url: U,
    mut fetch: F,
) -> Result<Vec<RunTest>, UploadFault>
where
    U: Fn(&str) -> String,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<String, UploadFault>>,
{
    let mut url = first;
    let mut tests = Vec::new();
    loop {
        let body = fetch(url).await?;
        let parsed: TestsResponse =
            serde_json::from_str(&body).map_err(|e| UploadFault::Rejected {
                status: 200,
                body: format!("unexpected get_tests body: {}", e),
            })?;
        let (page, next) = parsed.into_page();
        let exhausted = page.is_empty();
        tests.extend(page);
        match next {
            Some(next) if !exhausted => url = page_url(&next),
            _ => return Ok(tests),
        }
    }
}

async fn checked(resp: reqwest::Response) -> Result<String, UploadFault> {
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(UploadFault::Rejected {
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

#[async_trait]
impl ResultSink for TestRailClient {
    async fn add_result(
        &self,
        case_id: &str,
        payload: &ResultPayload,
    ) -> Result<ResultId, UploadFault> {
        let url = self.endpoint(&format!("add_result_for_case/{}/{}", self.run_id, case_id));
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.username, Some(&self.api_key))
            .json(payload)
            .send()
            .await?;
        let body = checked(resp).await?;
        let created: Created = serde_json::from_str(&body).map_err(|e| UploadFault::Rejected {
            status: 200,
            body: format!("unexpected add_result body: {}", e),
        })?;
        Ok(created.id)
    }

    async fn add_attachment(&self, result_id: ResultId, path: &Path) -> Result<(), UploadFault> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| UploadFault::Attachment {
                path: path.to_path_buf(),
                source,
            })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        let form = Form::new().part("attachment", Part::bytes(bytes).file_name(file_name));

        let url = self.endpoint(&format!("add_attachment_to_result/{}", result_id));
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.username, Some(&self.api_key))
            .multipart(form)
            .send()
            .await?;
        checked(resp).await?;
        Ok(())
    }
}
