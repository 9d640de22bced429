//! Deduplicating, asynchronous finding reporter.
//!
//! `submit` never waits on the network: it checks the finding against the
//! reported set and the in-flight set, then hands delivery to a background
//! task on the reporter's [`TaskTracker`]. `drain` closes the reporter and
//! waits for every such task, so nothing is cut off at shutdown.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use vetbot_core::{Finding, Fingerprint, JsonlStore, RepoId};

use crate::traits::{NotifyError, Report, ReportSink};

/// One row of the reported table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedRecord {
    pub fingerprint: Fingerprint,
    #[serde(flatten)]
    pub repo: RepoId,
    pub path: String,
    pub start_line: u32,
    pub report_url: String,
    pub reported_at: DateTime<Utc>,
}

/// What `submit` did with a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Delivery was started in the background.
    Queued,
    /// Already reported, or already on its way. Nothing was done.
    Duplicate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReporterStats {
    pub queued: u64,
    pub duplicates: u64,
    pub delivered: u64,
    pub failed: u64,
}

struct Ledger {
    reported: HashSet<Fingerprint>,
    in_flight: HashSet<Fingerprint>,
    store: JsonlStore,
    closed: bool,
}

#[derive(Default)]
struct Counters {
    queued: AtomicU64,
    duplicates: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

struct Inner {
    sink: Arc<dyn ReportSink>,
    ledger: Mutex<Ledger>,
    counters: Counters,
}

/// Files each distinct finding exactly once, in the background.
pub struct IssueReporter {
    inner: Arc<Inner>,
    tracker: TaskTracker,
}

impl IssueReporter {
    /// Open the reported table at `reported_path` and report through `sink`.
    pub fn open(sink: Arc<dyn ReportSink>, reported_path: impl AsRef<Path>) -> Result<Self, NotifyError> {
        let (store, records) = JsonlStore::open::<ReportedRecord>(reported_path)?;
        let reported: HashSet<Fingerprint> = records.into_iter().map(|r| r.fingerprint).collect();

        info!(
            channel = sink.channel_name(),
            reported = reported.len(),
            "issue reporter opened"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                sink,
                ledger: Mutex::new(Ledger {
                    reported,
                    in_flight: HashSet::new(),
                    store,
                    closed: false,
                }),
                counters: Counters::default(),
            }),
            tracker: TaskTracker::new(),
        })
    }

    /// Start reporting `finding` unless it was reported before or is already
    /// being reported. Returns immediately; must be called inside a tokio
    /// runtime.
    pub fn submit(&self, finding: Finding) -> Result<Submission, NotifyError> {
        let fingerprint = finding.fingerprint();
        let mut ledger = self.inner.ledger();

        if ledger.closed {
            warn!(repo = %finding.repo, location = %finding.location, "finding submitted after drain began");
            return Err(NotifyError::Closed);
        }
        if ledger.reported.contains(&fingerprint) || !ledger.in_flight.insert(fingerprint.clone()) {
            self.inner.counters.duplicates.fetch_add(1, Ordering::Relaxed);
            debug!(repo = %finding.repo, %fingerprint, "duplicate finding skipped");
            return Ok(Submission::Duplicate);
        }

        self.inner.counters.queued.fetch_add(1, Ordering::Relaxed);
        // Spawned under the ledger lock so `drain` cannot close in between.
        let inner = self.inner.clone();
        self.tracker
            .spawn(async move { inner.deliver(finding, fingerprint).await });
        drop(ledger);

        Ok(Submission::Queued)
    }

    /// Stop accepting findings and wait for every in-flight submission.
    pub async fn drain(&self) {
        self.inner.ledger().closed = true;
        self.tracker.close();

        let outstanding = self.tracker.len();
        if outstanding > 0 {
            info!(outstanding, "draining in-flight reports");
        }
        self.tracker.wait().await;

        if let Err(e) = self.inner.ledger().store.sync() {
            error!(error = %e, "failed to sync reported set");
        }
        let stats = self.stats();
        info!(
            delivered = stats.delivered,
            failed = stats.failed,
            duplicates = stats.duplicates,
            "reporter drained"
        );
    }

    /// Submissions currently in flight.
    pub fn outstanding(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_reported(&self, fingerprint: &Fingerprint) -> bool {
        self.inner.ledger().reported.contains(fingerprint)
    }

    pub fn stats(&self) -> ReporterStats {
        let c = &self.inner.counters;
        ReporterStats {
            queued: c.queued.load(Ordering::Relaxed),
            duplicates: c.duplicates.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
        }
    }
}

impl Inner {
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        // A panicking delivery task must not wedge every later submission.
        self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn deliver(&self, finding: Finding, fingerprint: Fingerprint) {
        let report = Report::from_finding(&finding);
        let start = std::time::Instant::now();
        let result = self.sink.file(&report).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let mut ledger = self.ledger();
        ledger.in_flight.remove(&fingerprint);

        match result {
            Ok(report_url) => {
                if self.sink.records() {
                    ledger.reported.insert(fingerprint.clone());
                    let record = ReportedRecord {
                        fingerprint: fingerprint.clone(),
                        repo: finding.repo.clone(),
                        path: finding.location.path.clone(),
                        start_line: finding.location.start_line,
                        report_url: report_url.clone(),
                        reported_at: Utc::now(),
                    };
                    if let Err(e) = ledger.store.append(&record) {
                        // Filed but not recorded: a later run may file it again.
                        error!(
                            repo = %finding.repo,
                            %fingerprint,
                            error = %e,
                            "failed to record reported finding"
                        );
                    }
                }
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                info!(
                    channel = self.sink.channel_name(),
                    repo = %finding.repo,
                    location = %finding.location,
                    url = %report_url,
                    duration_ms,
                    "finding reported"
                );
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    channel = self.sink.channel_name(),
                    repo = %finding.repo,
                    location = %finding.location,
                    %fingerprint,
                    error = %e,
                    duration_ms,
                    "report delivery failed, finding dropped for this run"
                );
            }
        }
    }
}
