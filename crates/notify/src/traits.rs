//! ReportSink trait definition and shared error types.

use vetbot_core::{Finding, Fingerprint, RepoId, StoreError};
use vetbot_ratelimit::AccessError;

/// Errors that can occur while reporting a finding.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("API request failed: {0}")]
    Access(#[from] AccessError),

    #[error("reported-set store failed: {0}")]
    Ledger(#[from] StoreError),

    #[error("unexpected response: {0}")]
    Response(String),

    #[error("reporter is draining, no new submissions accepted")]
    Closed,
}

/// A rendered report ready for delivery.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Report {
    pub title: String,
    pub body: String,
    pub repo: RepoId,
    pub fingerprint: Fingerprint,
}

impl Report {
    pub fn from_finding(finding: &Finding) -> Self {
        let repo = &finding.repo;
        let loc = &finding.location;
        let pattern = if finding.pattern.is_empty() {
            "finding"
        } else {
            finding.pattern.as_str()
        };
        let fingerprint = finding.fingerprint();

        let permalink = format!(
            "https://github.com/{}/{}/blob/HEAD/{}#L{}-L{}",
            repo.owner, repo.name, loc.path, loc.start_line, loc.end_line
        );
        let fence = fence_for(&finding.snippet);

        let body = format!(
            "Found a possible instance of `{pattern}` in [{repo}](https://github.com/{repo}).\n\n\
             [{loc}]({permalink})\n\n\
             {fence}\n{snippet}\n{fence}\n\n\
             <!-- vetbot:fingerprint {fingerprint} -->\n",
            snippet = finding.snippet.trim_end(),
        );

        Self {
            title: format!("{repo}: {pattern} at {loc}"),
            body,
            repo: repo.clone(),
            fingerprint,
        }
    }
}

/// A code fence longer than any backtick run inside `snippet`.
fn fence_for(snippet: &str) -> String {
    let mut longest = 0;
    let mut run = 0;
    for ch in snippet.chars() {
        if ch == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    "`".repeat(longest.max(2) + 1)
}

/// Trait for report destinations.
#[async_trait::async_trait]
pub trait ReportSink: Send + Sync {
    /// File one report. Returns a URL (or other handle) identifying it.
    async fn file(&self, report: &Report) -> Result<String, NotifyError>;

    /// Human-readable name for this sink (e.g., "github-issue").
    fn channel_name(&self) -> &str;

    /// Whether a successful `file` goes into the reported set. Sinks that
    /// publish nothing return `false` so a later real run still files.
    fn records(&self) -> bool {
        true
    }
}
