//! GitHub issue sink.
//!
//! Files each report as an issue in a configured findings repository,
//! going through the shared rate-limited client like every other call.

use std::sync::Arc;

use serde::Serialize;
use vetbot_ratelimit::{ApiRequest, RateLimitedClient};

use crate::traits::{NotifyError, Report, ReportSink};

#[derive(Serialize)]
struct CreateIssue<'a> {
    title: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "no_labels")]
    labels: &'a [String],
}

fn no_labels(labels: &&[String]) -> bool {
    labels.is_empty()
}

/// Opens one issue per report in `owner/repo`.
pub struct GithubIssueSink {
    client: Arc<RateLimitedClient>,
    owner: String,
    repo: String,
    labels: Vec<String>,
}

impl GithubIssueSink {
    pub fn new(
        client: Arc<RateLimitedClient>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        labels: Vec<String>,
    ) -> Self {
        Self {
            client,
            owner: owner.into(),
            repo: repo.into(),
            labels,
        }
    }
}

impl GithubIssueSink {
    /// The issue exists once the POST succeeds, so a body missing
    /// `html_url` still yields a handle: the API `url`, then
    /// `owner/repo#number`, then the repository's issue list.
    fn issue_handle(&self, body: &serde_json::Value) -> String {
        let field = |name: &str| body.get(name).and_then(|v| v.as_str());
        if let Some(url) = field("html_url").or_else(|| field("url")) {
            return url.to_string();
        }
        if let Some(number) = body.get("number").and_then(|v| v.as_u64()) {
            return format!("{}/{}#{}", self.owner, self.repo, number);
        }
        tracing::warn!(
            owner = %self.owner,
            repo = %self.repo,
            "issue created but response carried no link"
        );
        format!("https://github.com/{}/{}/issues", self.owner, self.repo)
    }
}

#[async_trait::async_trait]
impl ReportSink for GithubIssueSink {
    async fn file(&self, report: &Report) -> Result<String, NotifyError> {
        let path = format!("/repos/{}/{}/issues", self.owner, self.repo);
        let payload = CreateIssue {
            title: &report.title,
            body: &report.body,
            labels: &self.labels,
        };

        let response = self.client.call(ApiRequest::post(path, &payload)).await?;

        let url = self.issue_handle(&response.body);
        tracing::debug!(
            repo = %report.repo,
            fingerprint = %report.fingerprint,
            url = %url,
            "issue filed"
        );
        Ok(url)
    }

    fn channel_name(&self) -> &str {
        "github-issue"
    }
}

/// Logs reports instead of filing them. Used for `--dry-run`.
#[derive(Debug, Default)]
pub struct DryRunSink;

#[async_trait::async_trait]
impl ReportSink for DryRunSink {
    async fn file(&self, report: &Report) -> Result<String, NotifyError> {
        tracing::info!(
            repo = %report.repo,
            fingerprint = %report.fingerprint,
            title = %report.title,
            "dry run: report not filed"
        );
        Ok(format!("dry-run:{}", report.fingerprint))
    }

    fn channel_name(&self) -> &str {
        "dry-run"
    }

    fn records(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use serde_json::json;
    use vetbot_core::{Finding, Location, RateLimitConfig, RepoId};
    use vetbot_ratelimit::{ApiResponse, Transport, TransportError};

    /// Records every request and answers like the issues endpoint.
    struct IssuesEndpoint {
        requests: Mutex<Vec<ApiRequest>>,
        reply: serde_json::Value,
    }

    impl IssuesEndpoint {
        fn replying(reply: serde_json::Value) -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                reply,
            })
        }
    }

    #[async_trait::async_trait]
    impl Transport for IssuesEndpoint {
        async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(ApiResponse {
                status: 201,
                rate: None,
                retry_after: None,
                body: self.reply.clone(),
            })
        }
    }

    fn report() -> Report {
        Report::from_finding(&Finding {
            repo: RepoId::new("acme", "widgets"),
            location: Location {
                path: "main.go".into(),
                start_line: 3,
                end_line: 5,
            },
            snippet: "x".into(),
            pattern: "p".into(),
        })
    }

    fn sink(endpoint: Arc<IssuesEndpoint>, labels: Vec<String>) -> GithubIssueSink {
        let client = Arc::new(RateLimitedClient::new(endpoint, RateLimitConfig::default()));
        GithubIssueSink::new(client, "github-vet", "findings", labels)
    }

    #[tokio::test]
    async fn posts_issue_to_findings_repo() {
        let endpoint = IssuesEndpoint::replying(json!({
            "number": 1,
            "html_url": "https://github.com/github-vet/findings/issues/1",
        }));
        let sink = sink(endpoint.clone(), vec!["fresh".into()]);

        let url = sink.file(&report()).await.unwrap();
        assert_eq!(url, "https://github.com/github-vet/findings/issues/1");

        let requests = endpoint.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method.as_str(), "POST");
        assert_eq!(requests[0].path, "/repos/github-vet/findings/issues");
        let body = requests[0].body.as_ref().unwrap();
        assert_eq!(body["title"], "acme/widgets: p at main.go:3-5");
        assert_eq!(body["labels"], json!(["fresh"]));
    }

    #[tokio::test]
    async fn omits_empty_labels() {
        let endpoint = IssuesEndpoint::replying(json!({ "html_url": "https://example.test/1" }));
        sink(endpoint.clone(), vec![]).file(&report()).await.unwrap();
        let requests = endpoint.requests.lock().unwrap();
        assert!(requests[0].body.as_ref().unwrap().get("labels").is_none());
    }

    #[tokio::test]
    async fn created_issue_without_html_url_falls_back() {
        let api_url = IssuesEndpoint::replying(json!({
            "number": 7,
            "url": "https://api.github.com/repos/github-vet/findings/issues/7",
        }));
        let url = sink(api_url, vec![]).file(&report()).await.unwrap();
        assert_eq!(url, "https://api.github.com/repos/github-vet/findings/issues/7");

        let number_only = IssuesEndpoint::replying(json!({ "number": 7 }));
        let url = sink(number_only, vec![]).file(&report()).await.unwrap();
        assert_eq!(url, "github-vet/findings#7");

        let empty = IssuesEndpoint::replying(json!({}));
        let url = sink(empty, vec![]).file(&report()).await.unwrap();
        assert_eq!(url, "https://github.com/github-vet/findings/issues");
    }

    #[tokio::test]
    async fn dry_run_files_nothing() {
        let url = DryRunSink.file(&report()).await.unwrap();
        assert!(url.starts_with("dry-run:"));
        assert_eq!(DryRunSink.channel_name(), "dry-run");
        assert!(!DryRunSink.records());
    }
}
