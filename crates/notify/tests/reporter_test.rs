//! Integration tests for IssueReporter: deduplication, draining and failure handling.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::{Duration, Instant};

use vetbot_core::{Finding, Location, RepoId};
use vetbot_notify::{
    DryRunSink, IssueReporter, NotifyError, Report, ReportSink, ReportedRecord, Submission,
};

/// Sink that takes `latency` per report and fails for listed repositories.
struct FakeSink {
    latency: Duration,
    calls: AtomicUsize,
    filed: Mutex<Vec<String>>,
    failing: HashSet<RepoId>,
}

impl FakeSink {
    fn new(latency: Duration) -> Self {
        Self {
            latency,
            calls: AtomicUsize::new(0),
            filed: Mutex::new(Vec::new()),
            failing: HashSet::new(),
        }
    }

    fn failing_for(mut self, repo: RepoId) -> Self {
        self.failing.insert(repo);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReportSink for FakeSink {
    async fn file(&self, report: &Report) -> Result<String, NotifyError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.failing.contains(&report.repo) {
            return Err(NotifyError::Response("502 from issues endpoint".into()));
        }
        self.filed.lock().unwrap().push(report.title.clone());
        Ok(format!("https://github.com/github-vet/findings/issues/{}", n + 1))
    }

    fn channel_name(&self) -> &str {
        "fake"
    }
}

fn finding(repo: &str, line: u32) -> Finding {
    Finding {
        repo: repo.parse().unwrap(),
        location: Location {
            path: "cmd/main.go".into(),
            start_line: line,
            end_line: line + 2,
        },
        snippet: "for _, v := range vs { go f(&v) }".into(),
        pattern: "range-loop-capture".into(),
    }
}

fn read_ledger(path: &std::path::Path) -> Vec<ReportedRecord> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[tokio::test]
async fn same_finding_is_reported_once_per_run() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = dir.path().join("issues.jsonl");
    let sink = Arc::new(FakeSink::new(Duration::from_millis(5)));
    let reporter = IssueReporter::open(sink.clone(), &ledger).unwrap();

    // Second submit lands while the first is still in flight.
    assert_eq!(reporter.submit(finding("a/one", 10)).unwrap(), Submission::Queued);
    assert_eq!(reporter.submit(finding("a/one", 10)).unwrap(), Submission::Duplicate);
    assert_eq!(reporter.submit(finding("a/one", 20)).unwrap(), Submission::Queued);
    reporter.drain().await;

    assert_eq!(sink.calls(), 2);
    assert!(reporter.is_reported(&finding("a/one", 10).fingerprint()));

    let stats = reporter.stats();
    assert_eq!(stats.queued, 2);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(stats.delivered, 2);
    assert_eq!(read_ledger(&ledger).len(), 2);
}

#[tokio::test]
async fn reported_findings_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = dir.path().join("issues.jsonl");

    let first = Arc::new(FakeSink::new(Duration::ZERO));
    let reporter = IssueReporter::open(first.clone(), &ledger).unwrap();
    reporter.submit(finding("a/one", 10)).unwrap();
    reporter.drain().await;
    assert_eq!(first.calls(), 1);

    let records = read_ledger(&ledger);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].repo, RepoId::new("a", "one"));
    assert_eq!(records[0].start_line, 10);
    assert_eq!(records[0].report_url, "https://github.com/github-vet/findings/issues/1");

    let second = Arc::new(FakeSink::new(Duration::ZERO));
    let reporter = IssueReporter::open(second.clone(), &ledger).unwrap();
    assert_eq!(reporter.submit(finding("a/one", 10)).unwrap(), Submission::Duplicate);
    assert_eq!(reporter.submit(finding("b/two", 10)).unwrap(), Submission::Queued);
    reporter.drain().await;

    assert_eq!(second.calls(), 1);
    assert_eq!(read_ledger(&ledger).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn drain_waits_for_in_flight_submissions() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(FakeSink::new(Duration::from_millis(50)));
    let reporter = IssueReporter::open(sink.clone(), dir.path().join("issues.jsonl")).unwrap();

    let start = Instant::now();
    for line in 0..5 {
        reporter.submit(finding("a/one", line * 10 + 1)).unwrap();
    }
    // Submitting never waits on delivery.
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(reporter.outstanding(), 5);

    reporter.drain().await;

    assert!(start.elapsed() >= Duration::from_millis(50));
    assert_eq!(reporter.outstanding(), 0);
    assert_eq!(reporter.stats().delivered, 5);
    assert_eq!(sink.filed.lock().unwrap().len(), 5);
}

#[tokio::test]
async fn submit_after_drain_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(FakeSink::new(Duration::ZERO));
    let reporter = IssueReporter::open(sink.clone(), dir.path().join("issues.jsonl")).unwrap();

    reporter.drain().await;
    let result = reporter.submit(finding("a/one", 1));
    assert!(matches!(result, Err(NotifyError::Closed)));
    assert_eq!(sink.calls(), 0);
}

#[tokio::test]
async fn delivery_failure_is_counted_not_escalated() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = dir.path().join("issues.jsonl");
    let sink = Arc::new(FakeSink::new(Duration::ZERO).failing_for(RepoId::new("bad", "repo")));
    let reporter = IssueReporter::open(sink.clone(), &ledger).unwrap();

    reporter.submit(finding("bad/repo", 1)).unwrap();
    reporter.submit(finding("good/repo", 1)).unwrap();
    reporter.drain().await;

    let stats = reporter.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.delivered, 1);
    assert!(!reporter.is_reported(&finding("bad/repo", 1).fingerprint()));

    // Not recorded, so a later run tries again.
    let records = read_ledger(&ledger);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].repo, RepoId::new("good", "repo"));
}

#[tokio::test]
async fn dry_run_does_not_suppress_later_real_run() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = dir.path().join("issues.jsonl");

    let reporter = IssueReporter::open(Arc::new(DryRunSink), &ledger).unwrap();
    assert_eq!(reporter.submit(finding("a/one", 10)).unwrap(), Submission::Queued);
    reporter.drain().await;
    assert_eq!(reporter.stats().delivered, 1);
    assert!(!reporter.is_reported(&finding("a/one", 10).fingerprint()));
    assert!(read_ledger(&ledger).is_empty());

    let sink = Arc::new(FakeSink::new(Duration::ZERO));
    let reporter = IssueReporter::open(sink.clone(), &ledger).unwrap();
    assert_eq!(reporter.submit(finding("a/one", 10)).unwrap(), Submission::Queued);
    reporter.drain().await;

    assert_eq!(sink.calls(), 1);
    let records = read_ledger(&ledger);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].report_url, "https://github.com/github-vet/findings/issues/1");
}
