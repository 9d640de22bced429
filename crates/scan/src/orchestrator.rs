//! The scan loop: `Running -> Draining -> Stopped`.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;
use vetbot_core::{Finding, RepoId, StopPolicy};
use vetbot_notify::{IssueReporter, ReporterStats, Submission};
use vetbot_ratelimit::RateLimitedClient;
use vetbot_sampler::{ItemError, RepositorySampler, SampleError, VisitOutcome};

use crate::analyzer::{AnalysisError, Analyzer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoopState::Running => "running",
            LoopState::Draining => "draining",
            LoopState::Stopped => "stopped",
        })
    }
}

/// Why the loop left `Running`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Every backlog item has been visited.
    Exhausted,
    /// An item failed under [`StopPolicy::Halt`], or GitHub stayed
    /// unavailable through every retry under either policy. In the second
    /// case the item is not marked visited.
    ItemFailed { repo: RepoId, error: String },
    /// Nothing further can succeed: bad credentials, an unwritable store.
    Fatal(String),
    /// A shutdown was requested between items.
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct ScanSummary {
    pub run_id: Uuid,
    /// Items analyzed and marked visited, failures included.
    pub processed: usize,
    pub failed: usize,
    /// Findings produced and handed to the reporter.
    pub findings: usize,
    pub reports: ReporterStats,
    pub stop: StopReason,
}

impl ScanSummary {
    /// True unless the loop stopped on an error.
    pub fn is_clean(&self) -> bool {
        matches!(self.stop, StopReason::Exhausted | StopReason::Shutdown)
    }
}

#[derive(Default)]
struct Tally {
    processed: AtomicUsize,
    failed: AtomicUsize,
    findings: AtomicUsize,
}

/// Drives the sampler, the analyzer and the reporter until the backlog runs
/// out, an item stops the scan, or `shutdown` is cancelled.
pub struct ScanLoop {
    sampler: RepositorySampler,
    analyzer: Arc<dyn Analyzer>,
    client: Arc<RateLimitedClient>,
    reporter: IssueReporter,
    policy: StopPolicy,
    shutdown: CancellationToken,
    state: LoopState,
}

impl ScanLoop {
    pub fn new(
        sampler: RepositorySampler,
        analyzer: Arc<dyn Analyzer>,
        client: Arc<RateLimitedClient>,
        reporter: IssueReporter,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            sampler,
            analyzer,
            client,
            reporter,
            policy: StopPolicy::default(),
            shutdown,
            state: LoopState::Running,
        }
    }

    pub fn with_policy(mut self, policy: StopPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Run to completion. Always drains the reporter and closes the sampler
    /// before returning, whatever the stop reason.
    pub async fn run(self) -> ScanSummary {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("scan", %run_id);
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(mut self, run_id: Uuid) -> ScanSummary {
        info!(
            remaining = self.sampler.remaining(),
            visited = self.sampler.visited_count(),
            policy = %self.policy,
            state = %self.state,
            "scan started"
        );

        let tally = Tally::default();
        let mut stop = self.scan(&tally).await;

        self.transition(LoopState::Draining);
        self.reporter.drain().await;

        self.transition(LoopState::Stopped);
        let Self {
            sampler, reporter, ..
        } = self;
        if let Err(e) = sampler.close() {
            error!(error = %e, "failed to close visited set");
            if matches!(stop, StopReason::Exhausted | StopReason::Shutdown) {
                stop = StopReason::Fatal(e.to_string());
            }
        }

        let summary = ScanSummary {
            run_id,
            processed: tally.processed.load(Ordering::Relaxed),
            failed: tally.failed.load(Ordering::Relaxed),
            findings: tally.findings.load(Ordering::Relaxed),
            reports: reporter.stats(),
            stop,
        };
        info!(
            processed = summary.processed,
            failed = summary.failed,
            findings = summary.findings,
            reported = summary.reports.delivered,
            report_failures = summary.reports.failed,
            stop = ?summary.stop,
            "scan finished"
        );
        summary
    }

    async fn scan(&mut self, tally: &Tally) -> StopReason {
        let shutdown = &self.shutdown;
        let analyzer = self.analyzer.as_ref();
        let client = self.client.as_ref();
        let reporter = &self.reporter;
        let policy = self.policy;

        let result = self
            .sampler
            .sample_while(
                || !shutdown.is_cancelled(),
                move |item| async move {
                    let mut findings = Vec::new();
                    let result = analyzer.analyze(&item, client, &mut findings).await;

                    tally.findings.fetch_add(findings.len(), Ordering::Relaxed);
                    forward(reporter, findings);

                    match result {
                        Ok(()) => {
                            tally.processed.fetch_add(1, Ordering::Relaxed);
                            Ok(VisitOutcome::Completed)
                        }
                        // The repository is left for a later run to retry.
                        Err(e) if !e.marks_visited() => Err(e),
                        Err(e) => {
                            tally.processed.fetch_add(1, Ordering::Relaxed);
                            tally.failed.fetch_add(1, Ordering::Relaxed);
                            match policy {
                                StopPolicy::Halt => Err(e),
                                StopPolicy::Skip => {
                                    warn!(repo = %item.repo, error = %e, "analysis failed, skipping");
                                    Ok(VisitOutcome::Failed)
                                }
                            }
                        }
                    }
                },
            )
            .await;

        match result {
            Ok(summary) if summary.interrupted => {
                info!("shutdown requested");
                StopReason::Shutdown
            }
            Ok(_) => StopReason::Exhausted,
            Err(SampleError::Item { repo, source }) => item_stop(repo, source),
            Err(SampleError::Sampler(e)) => {
                error!(error = %e, "visited set unusable, stopping");
                StopReason::Fatal(e.to_string())
            }
        }
    }

    fn transition(&mut self, next: LoopState) {
        info!(from = %self.state, to = %next, "scan state changed");
        self.state = next;
    }
}

fn forward(reporter: &IssueReporter, findings: Vec<Finding>) {
    for finding in findings {
        let repo = finding.repo.clone();
        match reporter.submit(finding) {
            Ok(Submission::Queued | Submission::Duplicate) => {}
            Err(e) => error!(%repo, error = %e, "failed to submit finding"),
        }
    }
}

fn item_stop(repo: RepoId, error: AnalysisError) -> StopReason {
    if error.is_fatal() {
        error!(%repo, error = %error, "fatal error, stopping without marking item");
        StopReason::Fatal(error.to_string())
    } else if !error.marks_visited() {
        error!(%repo, error = %error, "GitHub unavailable, stopping with item left for retry");
        StopReason::ItemFailed {
            repo,
            error: error.to_string(),
        }
    } else {
        error!(%repo, error = %error, "analysis failed, stopping");
        StopReason::ItemFailed {
            repo,
            error: error.to_string(),
        }
    }
}
